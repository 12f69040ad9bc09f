use wasmplan_codegen::abi::{CallingConvention, Isa};

/// Size of one linear memory page.
pub const PAGE_SIZE: usize = 64 * 1024;

/// Largest page count a module may declare: 4GiB of linear memory.
pub const DEFAULT_MAX_PAGE_COUNT: u32 = 65536;

/// Shared compilation configuration.
#[derive(Debug, Clone)]
pub struct Engine {
    max_page_count: u32,
    calling_convention: &'static dyn CallingConvention,
    pinned_size_offsets: Vec<u32>,
}

impl Engine {
    /// Upper bound on declared memory sizes and on the address space
    /// reserved for each linear memory.
    pub fn with_max_page_count(mut self, pages: u32) -> Self {
        self.max_page_count = pages;
        self
    }

    /// Convention used to choose pinned registers.
    pub fn with_calling_convention(mut self, cc: &'static dyn CallingConvention) -> Self {
        self.calling_convention = cc;
        self
    }

    /// One pinned size register is assigned per entry. Each entry is the
    /// byte offset the code generator subtracts from the memory size
    /// before keeping it in that register.
    ///
    /// # Panics
    ///
    /// If `offsets` is empty: generated code needs at least one size register.
    pub fn with_pinned_size_offsets(mut self, offsets: Vec<u32>) -> Self {
        assert!(!offsets.is_empty(), "at least one pinned size register is required");
        self.pinned_size_offsets = offsets;
        self
    }

    pub fn max_page_count(&self) -> u32 {
        self.max_page_count
    }

    pub fn calling_convention(&self) -> &'static dyn CallingConvention {
        self.calling_convention
    }

    pub fn pinned_size_offsets(&self) -> &[u32] {
        &self.pinned_size_offsets
    }

    /// Bytes of address space reserved per linear memory.
    pub fn max_memory_bytes(&self) -> Option<usize> {
        (self.max_page_count as usize).checked_mul(PAGE_SIZE)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self {
            max_page_count: DEFAULT_MAX_PAGE_COUNT,
            calling_convention: Isa::host().calling_convention(),
            pinned_size_offsets: vec![0],
        }
    }
}
