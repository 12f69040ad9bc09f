use crate::abi::Isa;

/// A location in the emitted stream holding an 8-byte absolute call
/// target that is filled in once the callee's address is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchPoint {
    /// Byte offset of the target slot from the start of the stream.
    pub offset: usize,
}

// aarch64 encodings.
/// `STP X29, X30, [SP, #-16]!`
const A64_STP_FP_LR_PRE: u32 = 0xA9BF_7BFD;
/// `MOV X29, SP` (alias of `ADD X29, SP, #0`)
const A64_MOV_FP_SP: u32 = 0x9100_03FD;
/// `LDP X29, X30, [SP], #16`
const A64_LDP_FP_LR_POST: u32 = 0xA8C1_7BFD;
/// `RET`
const A64_RET: u32 = 0xD65F_03C0;
/// `BLR X16`
const A64_BLR_X16: u32 = 0xD63F_0200;

/// Byte-oriented instruction encoder for the small set of sequences the
/// skeleton backend needs: frame setup/teardown and patchable far calls.
///
/// Far calls load their target from an inline 8-byte literal, so any
/// address in the 64-bit space is reachable and patching is a plain
/// 8-byte store, independent of where the caller and callee were mapped.
pub struct Emitter {
    isa: Isa,
    code: Vec<u8>,
}

impl Emitter {
    pub fn new(isa: Isa) -> Self {
        Emitter {
            isa,
            code: Vec::with_capacity(64),
        }
    }

    /// Current offset in bytes.
    pub fn offset(&self) -> usize {
        self.code.len()
    }

    /// Access the emitted instruction stream.
    pub fn code(&self) -> &[u8] {
        &self.code
    }

    pub fn into_code(self) -> Vec<u8> {
        self.code
    }

    /// Save the frame pointer and link register and establish a new frame.
    pub fn prologue(&mut self) {
        match self.isa {
            Isa::Aarch64 => {
                self.word(A64_STP_FP_LR_PRE);
                self.word(A64_MOV_FP_SP);
            }
            Isa::X86_64 => {
                // push rbp; mov rbp, rsp
                self.code.extend_from_slice(&[0x55, 0x48, 0x89, 0xE5]);
            }
        }
    }

    /// Tear down the frame set up by [`Emitter::prologue`] and return.
    pub fn epilogue(&mut self) {
        match self.isa {
            Isa::Aarch64 => {
                self.word(A64_LDP_FP_LR_POST);
                self.word(A64_RET);
            }
            Isa::X86_64 => {
                // pop rbp; ret
                self.code.extend_from_slice(&[0x5D, 0xC3]);
            }
        }
    }

    /// Emit a call through a scratch register whose target is an inline
    /// 8-byte literal, initially zero.
    ///
    /// aarch64:
    /// ```text
    ///   ldr x16, #8      ; load literal below
    ///   b   #12          ; skip over it
    ///   .quad target
    ///   blr x16
    /// ```
    /// x86_64:
    /// ```text
    ///   movabs r11, target
    ///   call   r11
    /// ```
    pub fn far_call(&mut self) -> PatchPoint {
        match self.isa {
            Isa::Aarch64 => {
                self.word(ldr_x_literal(16, 8));
                self.word(b(12));
                let offset = self.offset();
                self.code.extend_from_slice(&[0; 8]);
                self.word(A64_BLR_X16);
                PatchPoint { offset }
            }
            Isa::X86_64 => {
                self.code.extend_from_slice(&[0x49, 0xBB]);
                let offset = self.offset();
                self.code.extend_from_slice(&[0; 8]);
                self.code.extend_from_slice(&[0x41, 0xFF, 0xD3]);
                PatchPoint { offset }
            }
        }
    }

    fn word(&mut self, inst: u32) {
        self.code.extend_from_slice(&inst.to_le_bytes());
    }
}

/// `LDR Xt, label`: PC-relative 64-bit literal load. `offset` in bytes,
/// must be a multiple of 4.
fn ldr_x_literal(rt: u8, offset: i32) -> u32 {
    let imm19 = ((offset >> 2) as u32) & 0x7FFFF;
    0x5800_0000 | imm19 << 5 | (rt as u32 & 0x1F)
}

/// `B label`: unconditional PC-relative branch. `offset` in bytes.
fn b(offset: i32) -> u32 {
    let imm26 = ((offset >> 2) as u32) & 0x03FF_FFFF;
    0x1400_0000 | imm26
}
