use std::io;
use std::ops::Range;
use std::ptr;

use wasmplan_codegen::abi::{CallingConvention, Reg};

use crate::Engine;
use crate::error::MemoryError;

/// How generated code keeps accesses inside the linear memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryMode {
    /// Explicit size comparisons against the pinned size registers, backed
    /// by the guard region for anything that slips past them.
    BoundsChecking,
}

/// A size register requested by the code generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinnedSizeRegister {
    pub register: Reg,
    /// Bytes subtracted from the memory size before it is kept in `register`.
    pub size_offset: u32,
}

/// Registers reserved for the lifetime of generated code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinnedRegisters {
    pub base_pointer: Reg,
    pub size_registers: Vec<PinnedSizeRegister>,
}

impl PinnedRegisters {
    /// Greedily hand out callee-saved registers, base pointer first, then
    /// one per requested size offset.
    ///
    /// # Panics
    ///
    /// If the convention does not have enough pinnable registers. That is a
    /// configuration bug, not a property of the module being compiled.
    pub fn assign(cc: &dyn CallingConvention, size_offsets: &[u32]) -> Self {
        assert!(
            !size_offsets.is_empty(),
            "at least one pinned size register is required"
        );

        let mut available = cc
            .callee_saved_registers()
            .iter()
            .copied()
            .filter(|reg| !cc.is_stack_register(*reg));

        let base_pointer = available.next();
        let size_registers: Vec<PinnedSizeRegister> = size_offsets
            .iter()
            .zip(&mut available)
            .map(|(&size_offset, register)| PinnedSizeRegister {
                register,
                size_offset,
            })
            .collect();

        let (Some(base_pointer), true) = (base_pointer, size_registers.len() == size_offsets.len())
        else {
            panic!(
                "{:?} has too few callee-saved registers to pin a base pointer and {} size registers",
                cc.isa(),
                size_offsets.len()
            );
        };

        PinnedRegisters {
            base_pointer,
            size_registers,
        }
    }
}

/// A guarded linear memory.
///
/// Layout:
/// ```text
/// [committed ..........][reserved, PROT_NONE ...................]
///  READ|WRITE            guard region
///  ^base                ^base + size                ^base + mapped_capacity
/// ```
///
/// Generated code that indexes past `size` but stays inside the
/// reservation faults instead of touching unrelated memory. The whole
/// reservation is unmapped on drop.
pub struct Memory {
    base: *mut u8,
    size: usize,
    capacity: usize,
    mapped_capacity: usize,
    mode: MemoryMode,
    pinned_registers: PinnedRegisters,
}

// Memory exclusively owns its mapping.
unsafe impl Send for Memory {}

impl Memory {
    /// Reserve `engine.max_memory_bytes()` of address space (falling back
    /// to `capacity` if that fails) and make the first `starting_size`
    /// bytes readable and writable.
    ///
    /// Both sizes must be page multiples with `starting_size <= capacity`.
    pub fn new(engine: &Engine, starting_size: usize, capacity: usize) -> Result<Self, MemoryError> {
        debug_assert!(starting_size <= capacity);

        let pinned_registers =
            PinnedRegisters::assign(engine.calling_convention(), engine.pinned_size_offsets());

        let max_reservation = engine.max_memory_bytes().ok_or(MemoryError::SizeOverflow {
            pages: u64::from(engine.max_page_count()),
        })?;

        let (base, mapped_capacity) = match reserve(max_reservation) {
            Ok(base) => (base, max_reservation),
            Err(err) => {
                tracing::warn!(
                    "reserving {max_reservation} bytes for linear memory failed ({err}), retrying with {capacity}"
                );
                let base = reserve(capacity).map_err(|source| MemoryError::Reserve {
                    size: capacity,
                    source,
                })?;
                (base, capacity)
            }
        };

        if starting_size > 0 {
            let ret = unsafe {
                libc::mprotect(
                    base as *mut libc::c_void,
                    starting_size,
                    libc::PROT_READ | libc::PROT_WRITE,
                )
            };
            if ret != 0 {
                let source = io::Error::last_os_error();
                unsafe { libc::munmap(base as *mut libc::c_void, mapped_capacity) };
                return Err(MemoryError::Commit {
                    size: starting_size,
                    source,
                });
            }
        }

        tracing::debug!(
            base = ?base,
            size = starting_size,
            capacity,
            mapped_capacity,
            "linear memory reserved"
        );

        Ok(Memory {
            base,
            size: starting_size,
            capacity,
            mapped_capacity,
            mode: MemoryMode::BoundsChecking,
            pinned_registers,
        })
    }

    /// Start of the committed region.
    #[inline]
    pub fn base(&self) -> *mut u8 {
        self.base
    }

    /// Committed (accessible) bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Declared maximum, in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes of address space actually reserved.
    #[inline]
    pub fn mapped_capacity(&self) -> usize {
        self.mapped_capacity
    }

    #[inline]
    pub fn mode(&self) -> MemoryMode {
        self.mode
    }

    pub fn pinned_registers(&self) -> &PinnedRegisters {
        &self.pinned_registers
    }

    /// The accessible prefix as an address range.
    pub fn as_ptr_range(&self) -> Range<*mut u8> {
        // SAFETY: `size` never exceeds the reservation.
        self.base..unsafe { self.base.add(self.size) }
    }

    /// Address range of the guard region following the committed prefix.
    pub fn guard_range(&self) -> Range<usize> {
        let base = self.base as usize;
        base + self.size..base + self.mapped_capacity
    }
}

impl Drop for Memory {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base as *mut libc::c_void, self.mapped_capacity);
        }
    }
}

impl std::fmt::Debug for Memory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memory")
            .field("base", &self.base)
            .field("size", &self.size)
            .field("capacity", &self.capacity)
            .field("mapped_capacity", &self.mapped_capacity)
            .field("mode", &self.mode)
            .field("pinned_registers", &self.pinned_registers)
            .finish()
    }
}

/// Reserve `size` bytes of inaccessible address space.
fn reserve(size: usize) -> io::Result<*mut u8> {
    if size == 0 {
        return Err(io::Error::from(io::ErrorKind::InvalidInput));
    }
    let ptr = unsafe {
        libc::mmap(
            ptr::null_mut(),
            size,
            libc::PROT_NONE,
            libc::MAP_PRIVATE | libc::MAP_ANON | libc::MAP_NORESERVE,
            -1,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }
    Ok(ptr as *mut u8)
}
