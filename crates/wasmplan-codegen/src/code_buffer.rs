use std::ptr;

/// Initial committed region: 4KB.
const INITIAL_COMMIT: usize = 4 * 1024;

/// Executable memory buffer for one unit of compiled code.
///
/// Uses a reservation model: reserves a virtual address range via mmap
/// with PROT_NONE (no physical pages), then commits pages on demand as
/// code is emitted. The base address never moves, so absolute call
/// targets computed against it stay valid for the buffer's lifetime.
///
/// Lifecycle:
/// 1. `with_reserve(min, reserve)`: reserves address space, commits initial pages
/// 2. `emit_bytes(code)`: appends machine code (auto-grows committed region)
/// 3. `patch_u64(offset, value)`: rewrites a previously emitted slot in place
/// 4. `finalize()`: flips committed pages to read+execute, invalidates icache
/// 5. `base_address()`: where callers jump to, valid from construction on
///
/// A guard page at the end of the reserved region catches overflows.
/// The buffer is unmapped on drop.
pub struct CodeBuffer {
    base: *mut u8,
    /// Total mmap'd size (reserved + guard page).
    reserved: usize,
    /// Bytes currently committed (RW). Always page-aligned.
    committed: usize,
    /// Bytes emitted so far.
    len: usize,
    finalized: bool,
}

// CodeBuffer holds a raw mmap'd pointer that is never aliased.
unsafe impl Send for CodeBuffer {}
unsafe impl Sync for CodeBuffer {}

impl CodeBuffer {
    /// Allocate a code buffer that can grow up to `reserve` bytes, with at
    /// least `min_size` bytes committed up front.
    pub fn with_reserve(min_size: usize, reserve: usize) -> Result<Self, anyhow::Error> {
        let page_size = page_size();
        let initial_commit = align_up(min_size.max(INITIAL_COMMIT), page_size);
        let reserve = align_up(reserve.max(initial_commit), page_size);
        let total = reserve + page_size; // + guard page

        // Reserve entire range as PROT_NONE (no physical pages).
        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                total,
                libc::PROT_NONE,
                libc::MAP_PRIVATE | libc::MAP_ANON,
                -1,
                0,
            )
        };
        anyhow::ensure!(base != libc::MAP_FAILED, "code buffer mmap failed");

        let ret = unsafe {
            libc::mprotect(base, initial_commit, libc::PROT_READ | libc::PROT_WRITE)
        };
        if ret != 0 {
            unsafe { libc::munmap(base, total) };
            anyhow::bail!("code buffer mprotect (RW) failed");
        }

        Ok(CodeBuffer {
            base: base as *mut u8,
            reserved: total,
            committed: initial_commit,
            len: 0,
            finalized: false,
        })
    }

    /// Append raw machine code.
    ///
    /// Automatically commits more pages if needed.
    pub fn emit_bytes(&mut self, bytes: &[u8]) -> Result<(), anyhow::Error> {
        anyhow::ensure!(!self.finalized, "cannot emit after finalize");
        self.ensure_capacity(bytes.len())?;
        unsafe {
            ptr::copy_nonoverlapping(bytes.as_ptr(), self.base.add(self.len), bytes.len());
        }
        self.len += bytes.len();
        Ok(())
    }

    /// Overwrite the 8-byte slot at byte offset `offset`.
    ///
    /// Slots emitted by the far-call sequences are not necessarily 8-byte
    /// aligned, so this is an unaligned write.
    pub fn patch_u64(&mut self, offset: usize, value: u64) -> Result<(), anyhow::Error> {
        anyhow::ensure!(!self.finalized, "cannot patch after finalize");
        anyhow::ensure!(
            offset.checked_add(8).is_some_and(|end| end <= self.len),
            "patch offset {offset} out of bounds (len {})",
            self.len
        );
        unsafe {
            ptr::write_unaligned(self.base.add(offset) as *mut u64, value);
        }
        Ok(())
    }

    /// Read back the 8-byte slot at byte offset `offset`.
    pub fn read_u64(&self, offset: usize) -> Option<u64> {
        if offset.checked_add(8)? > self.len {
            return None;
        }
        Some(unsafe { ptr::read_unaligned(self.base.add(offset) as *const u64) })
    }

    /// Emitted code as a byte slice. Committed pages are always readable.
    pub fn code(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.base, self.len) }
    }

    /// Flip the buffer to read+execute and invalidate the instruction cache.
    pub fn finalize(&mut self) -> Result<(), anyhow::Error> {
        anyhow::ensure!(!self.finalized, "already finalized");

        let ret = unsafe {
            libc::mprotect(
                self.base as *mut libc::c_void,
                self.committed,
                libc::PROT_READ | libc::PROT_EXEC,
            )
        };
        anyhow::ensure!(ret == 0, "code buffer mprotect (RX) failed");

        unsafe {
            sys_icache_invalidate(self.base, self.len);
        }

        self.finalized = true;
        Ok(())
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Address the code will execute at. Stable from construction on.
    pub fn base_address(&self) -> usize {
        self.base as usize
    }

    /// Number of bytes emitted so far.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Commit more pages if `additional` bytes would exceed the committed region.
    fn ensure_capacity(&mut self, additional: usize) -> Result<(), anyhow::Error> {
        let needed = self.len + additional;
        if needed <= self.committed {
            return Ok(());
        }

        let page_size = page_size();
        // Guard page sits at reserved - page_size.
        let max_commit = self.reserved - page_size;

        // Double committed size until it covers the need.
        let mut new_committed = self.committed;
        while new_committed < needed {
            new_committed = new_committed.saturating_mul(2);
        }
        new_committed = align_up(new_committed, page_size).min(max_commit);

        anyhow::ensure!(
            needed <= new_committed,
            "code buffer exhausted: need {needed} bytes, max {max_commit}"
        );

        let ret = unsafe {
            libc::mprotect(
                self.base.add(self.committed) as *mut libc::c_void,
                new_committed - self.committed,
                libc::PROT_READ | libc::PROT_WRITE,
            )
        };
        anyhow::ensure!(ret == 0, "code buffer grow mprotect failed");

        self.committed = new_committed;
        Ok(())
    }
}

impl Drop for CodeBuffer {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base as *mut libc::c_void, self.reserved);
        }
    }
}

impl std::fmt::Debug for CodeBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodeBuffer")
            .field("base", &self.base)
            .field("len", &self.len)
            .field("committed", &self.committed)
            .field("finalized", &self.finalized)
            .finish()
    }
}

fn page_size() -> usize {
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

fn align_up(val: usize, align: usize) -> usize {
    (val + align - 1) & !(align - 1)
}

/// Invalidate the instruction cache for a region of memory.
/// Required on aarch64 after writing code and before executing it;
/// x86_64 keeps its caches coherent.
#[allow(unused_variables)]
unsafe fn sys_icache_invalidate(addr: *mut u8, len: usize) {
    #[cfg(all(target_os = "macos", target_arch = "aarch64"))]
    {
        unsafe extern "C" {
            fn sys_icache_invalidate(start: *mut libc::c_void, size: usize);
        }
        unsafe { sys_icache_invalidate(addr as *mut libc::c_void, len) };
    }

    #[cfg(all(target_os = "linux", target_arch = "aarch64"))]
    {
        unsafe extern "C" {
            fn __clear_cache(start: *mut libc::c_void, end: *mut libc::c_void);
        }
        unsafe {
            __clear_cache(
                addr as *mut libc::c_void,
                addr.add(len) as *mut libc::c_void,
            )
        };
    }
}
