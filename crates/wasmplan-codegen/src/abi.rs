/// General-purpose register identifier within an ISA's register file.
///
/// The number is the hardware encoding: `Reg(19)` is `x19` on aarch64,
/// `Reg(3)` is `rbx` on x86_64.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Reg(pub u8);

/// Target instruction set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Isa {
    Aarch64,
    X86_64,
}

impl Isa {
    /// The ISA this crate was compiled for.
    pub fn host() -> Self {
        if cfg!(target_arch = "aarch64") {
            Isa::Aarch64
        } else {
            Isa::X86_64
        }
    }

    /// The platform calling convention of this ISA.
    pub fn calling_convention(self) -> &'static dyn CallingConvention {
        match self {
            Isa::Aarch64 => &Aapcs64,
            Isa::X86_64 => &SystemV,
        }
    }
}

impl std::str::FromStr for Isa {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "aarch64" | "arm64" => Ok(Isa::Aarch64),
            "x86_64" | "x64" => Ok(Isa::X86_64),
            other => Err(format!("unknown isa `{other}` (expected aarch64 or x86_64)")),
        }
    }
}

/// Register conventions the code generator must respect.
///
/// Register pinning walks [`callee_saved_registers`] in order and skips
/// anything [`is_stack_register`] reports, so the order of the returned
/// slice is the pinning preference.
///
/// [`callee_saved_registers`]: CallingConvention::callee_saved_registers
/// [`is_stack_register`]: CallingConvention::is_stack_register
pub trait CallingConvention: std::fmt::Debug + Sync {
    fn isa(&self) -> Isa;

    /// Registers preserved across calls, in pinning preference order.
    fn callee_saved_registers(&self) -> &'static [Reg];

    /// Stack pointer and frame pointer class registers. These are never pinned.
    fn is_stack_register(&self, reg: Reg) -> bool;

    fn register_name(&self, reg: Reg) -> &'static str;
}

/// AAPCS64: x19-x28 are callee-saved, x29 is the frame pointer.
#[derive(Debug, Clone, Copy, Default)]
pub struct Aapcs64;

const AAPCS64_CALLEE_SAVED: [Reg; 11] = [
    Reg(19),
    Reg(20),
    Reg(21),
    Reg(22),
    Reg(23),
    Reg(24),
    Reg(25),
    Reg(26),
    Reg(27),
    Reg(28),
    Reg(29),
];

const AARCH64_NAMES: [&str; 32] = [
    "x0", "x1", "x2", "x3", "x4", "x5", "x6", "x7", "x8", "x9", "x10", "x11", "x12", "x13", "x14",
    "x15", "x16", "x17", "x18", "x19", "x20", "x21", "x22", "x23", "x24", "x25", "x26", "x27",
    "x28", "x29", "x30", "sp",
];

impl CallingConvention for Aapcs64 {
    fn isa(&self) -> Isa {
        Isa::Aarch64
    }

    fn callee_saved_registers(&self) -> &'static [Reg] {
        &AAPCS64_CALLEE_SAVED
    }

    fn is_stack_register(&self, reg: Reg) -> bool {
        // x29 = FP, 31 = SP in base-address contexts.
        reg == Reg(29) || reg == Reg(31)
    }

    fn register_name(&self, reg: Reg) -> &'static str {
        AARCH64_NAMES.get(reg.0 as usize).copied().unwrap_or("?")
    }
}

/// System V AMD64: rbx, rbp, r12-r15 are callee-saved.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemV;

const SYSV_CALLEE_SAVED: [Reg; 6] = [Reg(3), Reg(5), Reg(12), Reg(13), Reg(14), Reg(15)];

const X86_64_NAMES: [&str; 16] = [
    "rax", "rcx", "rdx", "rbx", "rsp", "rbp", "rsi", "rdi", "r8", "r9", "r10", "r11", "r12", "r13",
    "r14", "r15",
];

impl CallingConvention for SystemV {
    fn isa(&self) -> Isa {
        Isa::X86_64
    }

    fn callee_saved_registers(&self) -> &'static [Reg] {
        &SYSV_CALLEE_SAVED
    }

    fn is_stack_register(&self, reg: Reg) -> bool {
        // rsp, rbp
        reg == Reg(4) || reg == Reg(5)
    }

    fn register_name(&self, reg: Reg) -> &'static str {
        X86_64_NAMES.get(reg.0 as usize).copied().unwrap_or("?")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pinnable(cc: &dyn CallingConvention) -> Vec<&'static str> {
        cc.callee_saved_registers()
            .iter()
            .filter(|r| !cc.is_stack_register(**r))
            .map(|r| cc.register_name(*r))
            .collect()
    }

    #[test]
    fn aapcs64_excludes_frame_pointer() {
        let regs = pinnable(&Aapcs64);
        assert_eq!(regs.len(), 10);
        assert_eq!(regs.first(), Some(&"x19"));
        assert!(!regs.contains(&"x29"));
    }

    #[test]
    fn system_v_excludes_rbp() {
        assert_eq!(pinnable(&SystemV), ["rbx", "r12", "r13", "r14", "r15"]);
    }

    #[test]
    fn parse_isa() {
        assert_eq!("arm64".parse::<Isa>(), Ok(Isa::Aarch64));
        assert_eq!("x86_64".parse::<Isa>(), Ok(Isa::X86_64));
        assert!("riscv64".parse::<Isa>().is_err());
    }

    #[test]
    fn host_convention_matches_host_isa() {
        assert_eq!(Isa::host().calling_convention().isa(), Isa::host());
    }
}
