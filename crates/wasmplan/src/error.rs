use thiserror::Error;

use crate::parse::Section;

/// Coarse classification of every failure the pipeline can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed header, truncated or mis-sized sections, section order.
    Structural,
    /// Well-formed bytes that violate a module constraint.
    Validation,
    /// The OS refused an address space reservation or commit.
    Resource,
    Compile,
    Link,
}

/// A primitive read ran past the buffer or hit a malformed encoding.
///
/// The decoder never advances its cursor when returning one of these.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unexpected end of module at offset {offset}: needed {needed} bytes, {remaining} remain")]
    UnexpectedEof {
        offset: usize,
        needed: usize,
        remaining: usize,
    },

    #[error("malformed varuint{bits} at offset {offset}")]
    MalformedVarUint { bits: u8, offset: usize },

    #[error("malformed varint{bits} at offset {offset}")]
    MalformedVarInt { bits: u8, offset: usize },

    #[error("invalid UTF-8 in string at offset {offset}")]
    InvalidUtf8 { offset: usize },
}

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("failed to reserve {size} bytes of address space: {source}")]
    Reserve {
        size: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to commit {size} bytes of linear memory: {source}")]
    Commit {
        size: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("memory size of {pages} pages overflows the address space")]
    SizeOverflow { pages: u64 },
}

/// Everything that can make [`ModuleParser::parse`](crate::ModuleParser::parse) fail.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("module is {len} bytes long, a module header needs 8")]
    TooShort { len: usize },

    #[error("bad magic number {0:02x?}, expected \\0asm")]
    BadMagic([u8; 4]),

    #[error("unsupported format version {found:#x}, expected {expected:#x}")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("{current:?} section cannot appear after {previous:?} section")]
    SectionOutOfOrder { previous: Section, current: Section },

    #[error("{section:?} section declares {declared} bytes but only {remaining} remain")]
    SectionTooLong {
        section: Section,
        declared: u32,
        remaining: usize,
    },

    #[error("{section:?} section should end at offset {expected} but parsing stopped at {actual}")]
    SectionSizeMismatch {
        section: Section,
        expected: usize,
        actual: usize,
    },

    #[error("{what} count {count} exceeds the {remaining} bytes left in the section")]
    CountTooLarge {
        what: &'static str,
        count: u32,
        remaining: usize,
    },

    #[error("could not reserve space for {count} {what}")]
    ReservationFailed { what: &'static str, count: u32 },

    #[error("invalid type form {0}, expected the function type form")]
    InvalidTypeForm(i8),

    #[error("invalid value type {0}")]
    InvalidValueType(i8),

    #[error("invalid external kind {0}")]
    InvalidExternalKind(u8),

    #[error("signature index {index} out of range, {count} signatures declared")]
    SignatureIndexOutOfRange { index: u32, count: usize },

    #[error("initial memory size of {initial} pages exceeds the limit of {limit} pages")]
    MemoryInitialTooLarge { initial: u32, limit: u32 },

    #[error("maximum memory size of {maximum} pages is not within [{initial}, {limit}]")]
    MemoryMaximumOutOfRange {
        initial: u32,
        maximum: u32,
        limit: u32,
    },

    #[error("code section has {bodies} bodies but {functions} functions were declared")]
    FunctionCountMismatch { bodies: u32, functions: usize },

    #[error("function body {index} is {length} bytes but only {remaining} remain")]
    FunctionBodyTooLong {
        index: usize,
        length: u32,
        remaining: usize,
    },

    #[error("could not allocate linear memory: {0}")]
    Memory(#[from] MemoryError),
}

impl ParseError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ParseError::Decode(_)
            | ParseError::TooShort { .. }
            | ParseError::BadMagic(_)
            | ParseError::UnsupportedVersion { .. }
            | ParseError::SectionOutOfOrder { .. }
            | ParseError::SectionTooLong { .. }
            | ParseError::SectionSizeMismatch { .. }
            | ParseError::CountTooLarge { .. }
            | ParseError::FunctionBodyTooLong { .. } => ErrorKind::Structural,
            ParseError::InvalidTypeForm(_)
            | ParseError::InvalidValueType(_)
            | ParseError::InvalidExternalKind(_)
            | ParseError::SignatureIndexOutOfRange { .. }
            | ParseError::MemoryInitialTooLarge { .. }
            | ParseError::MemoryMaximumOutOfRange { .. }
            | ParseError::FunctionCountMismatch { .. } => ErrorKind::Validation,
            ParseError::ReservationFailed { .. } | ParseError::Memory(_) => ErrorKind::Resource,
        }
    }
}

/// Failure reported by a [`FunctionCompiler`](crate::FunctionCompiler).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to compile function {function_index}: {message}")]
pub struct CompileError {
    pub function_index: usize,
    pub message: String,
}

impl CompileError {
    pub fn new(function_index: usize, message: impl Into<String>) -> Self {
        CompileError {
            function_index,
            message: message.into(),
        }
    }
}

/// Failure while patching call sites or publishing compiled code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to link function {function_index}: {message}")]
pub struct LinkError {
    pub function_index: usize,
    pub message: String,
}

impl LinkError {
    pub fn new(function_index: usize, message: impl Into<String>) -> Self {
        LinkError {
            function_index,
            message: message.into(),
        }
    }
}

/// The single terminal error of a [`Plan`](crate::Plan).
#[derive(Debug, Error)]
pub enum PlanError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Link(#[from] LinkError),
}

impl PlanError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PlanError::Parse(e) => e.kind(),
            PlanError::Compile(_) => ErrorKind::Compile,
            PlanError::Link(_) => ErrorKind::Link,
        }
    }
}
