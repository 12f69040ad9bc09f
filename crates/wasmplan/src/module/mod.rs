use std::fmt;
use std::ops::Range;

/// Value types, keyed by their signed 7-bit binary encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    I32,
    I64,
    F32,
    F64,
}

impl ValueType {
    pub(crate) fn from_int7(code: i8) -> Option<Self> {
        match code {
            -0x01 => Some(ValueType::I32),
            -0x02 => Some(ValueType::I64),
            -0x03 => Some(ValueType::F32),
            -0x04 => Some(ValueType::F64),
            _ => None,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::I32 => "i32",
            ValueType::I64 => "i64",
            ValueType::F32 => "f32",
            ValueType::F64 => "f64",
        };
        f.write_str(name)
    }
}

/// Index into [`ModuleInformation::signatures`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SignatureIndex(pub u32);

/// A function type: parameters and an optional single result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Signature {
    /// `None` is `void`.
    pub result: Option<ValueType>,
    pub params: Vec<ValueType>,
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{param}")?;
        }
        f.write_str(") -> ")?;
        match self.result {
            Some(result) => write!(f, "{result}"),
            None => f.write_str("void"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExternalKind {
    Function,
    Table,
    Memory,
    Global,
}

impl ExternalKind {
    pub(crate) fn from_u8(code: u8) -> Option<Self> {
        match code {
            0 => Some(ExternalKind::Function),
            1 => Some(ExternalKind::Table),
            2 => Some(ExternalKind::Memory),
            3 => Some(ExternalKind::Global),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Import {
    pub module: String,
    pub field: String,
    pub kind: ExternalKind,
    /// Only set for [`ExternalKind::Function`].
    pub signature: Option<SignatureIndex>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Export {
    pub field: String,
    pub kind: ExternalKind,
    /// Only set for [`ExternalKind::Function`].
    pub signature: Option<SignatureIndex>,
}

/// A function defined by the module.
///
/// `start..end` locates its body in the buffer the module was parsed
/// from; nothing is copied out of that buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionInformation {
    pub signature: SignatureIndex,
    pub start: usize,
    pub end: usize,
}

impl FunctionInformation {
    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    /// The function's body inside `bytes`, which must be the buffer the
    /// module was parsed from.
    pub fn body<'a>(&self, bytes: &'a [u8]) -> Option<&'a [u8]> {
        bytes.get(self.range())
    }
}

/// The declared limits of the module's linear memory, in pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryInformation {
    pub initial: u32,
    pub maximum: u32,
}

/// Validated static structure of a module.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ModuleInformation {
    pub signatures: Vec<Signature>,
    pub imports: Vec<Import>,
    pub functions: Vec<FunctionInformation>,
    pub exports: Vec<Export>,
    pub memory: Option<MemoryInformation>,
}

impl ModuleInformation {
    pub fn signature(&self, index: SignatureIndex) -> Option<&Signature> {
        self.signatures.get(index.0 as usize)
    }

    /// Imported functions come first in the function index space used by
    /// `call`; defined functions are numbered after them.
    pub fn imported_function_count(&self) -> u32 {
        self.imports
            .iter()
            .filter(|import| import.kind == ExternalKind::Function)
            .count() as u32
    }

    /// Render a human-readable summary, one item per line.
    pub fn render(&self) -> String {
        use std::fmt::Write;

        let mut out = String::new();
        let _ = writeln!(out, "signatures ({}):", self.signatures.len());
        for (i, sig) in self.signatures.iter().enumerate() {
            let _ = writeln!(out, "  [{i}] {sig}");
        }
        let _ = writeln!(out, "imports ({}):", self.imports.len());
        for import in &self.imports {
            let _ = write!(out, "  {}.{} {:?}", import.module, import.field, import.kind);
            if let Some(sig) = import.signature {
                let _ = write!(out, " sig={}", sig.0);
            }
            out.push('\n');
        }
        let _ = writeln!(out, "functions ({}):", self.functions.len());
        for (i, func) in self.functions.iter().enumerate() {
            let _ = writeln!(
                out,
                "  [{i}] sig={} body={:#x}..{:#x} ({} bytes)",
                func.signature.0,
                func.start,
                func.end,
                func.end - func.start
            );
        }
        let _ = writeln!(out, "exports ({}):", self.exports.len());
        for export in &self.exports {
            let _ = write!(out, "  {} {:?}", export.field, export.kind);
            if let Some(sig) = export.signature {
                let _ = write!(out, " sig={}", sig.0);
            }
            out.push('\n');
        }
        match self.memory {
            Some(mem) => {
                let _ = writeln!(out, "memory: {} pages, max {} pages", mem.initial, mem.maximum);
            }
            None => out.push_str("memory: none\n"),
        }
        out
    }
}
