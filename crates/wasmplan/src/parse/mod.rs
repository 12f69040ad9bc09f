//! Binary module parsing.
//!
//! [`ModuleParser`] walks the module header and its sections in order,
//! validating every index as it goes. Function bodies are not decoded;
//! only their byte ranges are recorded for the compiler to pick up later.

pub mod decoder;
mod section;
#[cfg(test)]
mod tests;

pub use decoder::Decoder;
pub use section::Section;

use crate::Engine;
use crate::engine::PAGE_SIZE;
use crate::error::{MemoryError, ParseError};
use crate::memory::Memory;
use crate::module::{
    Export, ExternalKind, FunctionInformation, Import, MemoryInformation, ModuleInformation,
    Signature, SignatureIndex, ValueType,
};

const MAGIC: [u8; 4] = *b"\0asm";

/// Binary format version this parser accepts.
pub const FORMAT_VERSION: u32 = 1;

/// Leading byte of a function signature, `-0x20` as a signed 7-bit value.
const FUNCTION_TYPE_FORM: u8 = 0x60;

pub struct ModuleParser<'a> {
    engine: &'a Engine,
    bytes: &'a [u8],
    decoder: Decoder<'a>,
    /// End offset of the section currently being parsed.
    section_end: usize,
    module: ModuleInformation,
    memory: Option<Memory>,
    error_message: Option<String>,
}

impl<'a> ModuleParser<'a> {
    pub fn new(engine: &'a Engine, bytes: &'a [u8]) -> Self {
        ModuleParser {
            engine,
            bytes,
            decoder: Decoder::new(bytes),
            section_end: 0,
            module: ModuleInformation::default(),
            memory: None,
            error_message: None,
        }
    }

    /// Parse and validate the whole module.
    ///
    /// Stops at the first problem. On failure nothing parsed so far is
    /// kept: the module information is reset and any memory is released.
    /// Every call starts over from the first byte.
    pub fn parse(&mut self) -> Result<(), ParseError> {
        self.decoder = Decoder::new(self.bytes);
        self.section_end = 0;
        self.module = ModuleInformation::default();
        self.memory = None;
        self.error_message = None;

        match self.parse_module() {
            Ok(()) => {
                tracing::debug!(
                    signatures = self.module.signatures.len(),
                    imports = self.module.imports.len(),
                    functions = self.module.functions.len(),
                    exports = self.module.exports.len(),
                    memory = self.memory.is_some(),
                    "parsed module"
                );
                Ok(())
            }
            Err(err) => {
                tracing::debug!(offset = self.decoder.offset(), "module parse failed: {err}");
                self.module = ModuleInformation::default();
                self.memory = None;
                self.error_message = Some(err.to_string());
                Err(err)
            }
        }
    }

    /// Message of the error the last [`parse`](Self::parse) failed with.
    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn module_information(&self) -> &ModuleInformation {
        &self.module
    }

    pub fn function_information(&self) -> &[FunctionInformation] {
        &self.module.functions
    }

    pub fn memory(&self) -> Option<&Memory> {
        self.memory.as_ref()
    }

    /// Hand the results over, transferring ownership of the memory.
    pub fn into_parts(self) -> (ModuleInformation, Option<Memory>) {
        (self.module, self.memory)
    }

    fn parse_module(&mut self) -> Result<(), ParseError> {
        let len = self.decoder.len();
        if len < 8 {
            return Err(ParseError::TooShort { len });
        }

        if !self.decoder.consume_string(&MAGIC) {
            let b = self.bytes;
            return Err(ParseError::BadMagic([b[0], b[1], b[2], b[3]]));
        }

        let version = self.decoder.parse_u32()?;
        if version != FORMAT_VERSION {
            return Err(ParseError::UnsupportedVersion {
                found: version,
                expected: FORMAT_VERSION,
            });
        }

        let mut previous: Option<Section> = None;
        let mut saw_code = false;

        while !self.decoder.is_at_end() {
            let section = Section::from_id(self.decoder.parse_var_u7()?);
            match previous {
                Some(prev) if !section.may_follow(previous) => {
                    return Err(ParseError::SectionOutOfOrder {
                        previous: prev,
                        current: section,
                    });
                }
                _ => {}
            }

            let declared = self.decoder.parse_var_u32()?;
            let remaining = self.decoder.remaining();
            if declared as usize > remaining {
                return Err(ParseError::SectionTooLong {
                    section,
                    declared,
                    remaining,
                });
            }
            self.section_end = self.decoder.offset() + declared as usize;

            tracing::trace!(
                ?section,
                offset = self.decoder.offset(),
                size = declared,
                "parsing section"
            );

            match section {
                Section::Type => self.parse_type_section()?,
                Section::Import => self.parse_import_section()?,
                Section::Function => self.parse_function_section()?,
                Section::Memory => self.parse_memory_section()?,
                Section::Export => self.parse_export_section()?,
                Section::Code => {
                    saw_code = true;
                    self.parse_code_section()?
                }
                Section::Table
                | Section::Global
                | Section::Start
                | Section::Element
                | Section::Data => self.parse_undecoded_section(section),
                Section::Unknown => self.decoder.skip(declared as usize)?,
            }

            if self.decoder.offset() != self.section_end {
                return Err(ParseError::SectionSizeMismatch {
                    section,
                    expected: self.section_end,
                    actual: self.decoder.offset(),
                });
            }

            if section != Section::Unknown {
                previous = Some(section);
            }
        }

        if !saw_code && !self.module.functions.is_empty() {
            return Err(ParseError::FunctionCountMismatch {
                bodies: 0,
                functions: self.module.functions.len(),
            });
        }

        Ok(())
    }

    /// Bytes between the cursor and the end of the current section.
    fn section_remaining(&self) -> usize {
        self.section_end.saturating_sub(self.decoder.offset())
    }

    /// Read a vector length and reserve room for it in `vec`.
    ///
    /// Every entry takes at least one byte, so a count larger than what is
    /// left of the section cannot be satisfied and is rejected before
    /// anything is allocated.
    fn parse_count<T>(&mut self, what: &'static str, vec: &mut Vec<T>) -> Result<u32, ParseError> {
        let count = self.decoder.parse_var_u32()?;
        let remaining = self.section_remaining();
        if count as usize > remaining {
            return Err(ParseError::CountTooLarge {
                what,
                count,
                remaining,
            });
        }
        vec.try_reserve(count as usize)
            .map_err(|_| ParseError::ReservationFailed { what, count })?;
        Ok(count)
    }

    fn parse_value_type(&mut self) -> Result<ValueType, ParseError> {
        let code = self.decoder.parse_int7()?;
        ValueType::from_int7(code).ok_or(ParseError::InvalidValueType(code))
    }

    fn parse_external_kind(&mut self) -> Result<ExternalKind, ParseError> {
        let code = self.decoder.read_u8()?;
        ExternalKind::from_u8(code).ok_or(ParseError::InvalidExternalKind(code))
    }

    fn parse_type_section(&mut self) -> Result<(), ParseError> {
        let mut signatures = std::mem::take(&mut self.module.signatures);
        let count = self.parse_count("signatures", &mut signatures)?;

        for _ in 0..count {
            if !self.decoder.consume_character(FUNCTION_TYPE_FORM) {
                let form = self.decoder.parse_int7()?;
                return Err(ParseError::InvalidTypeForm(form));
            }

            let mut params = Vec::new();
            let param_count = self.parse_count("parameters", &mut params)?;
            for _ in 0..param_count {
                params.push(self.parse_value_type()?);
            }

            let result = if self.decoder.parse_var_u1()? {
                Some(self.parse_value_type()?)
            } else {
                None
            };

            signatures.push(Signature { result, params });
        }

        self.module.signatures = signatures;
        Ok(())
    }

    fn parse_import_section(&mut self) -> Result<(), ParseError> {
        let mut imports = std::mem::take(&mut self.module.imports);
        let count = self.parse_count("imports", &mut imports)?;

        for _ in 0..count {
            let module = self.decoder.parse_name()?.to_owned();
            let field = self.decoder.parse_name()?.to_owned();
            let kind = self.parse_external_kind()?;

            let signature = match kind {
                ExternalKind::Function => {
                    let index = self.decoder.parse_var_u32()?;
                    let count = self.module.signatures.len();
                    // Inclusive bound: `index == count` is accepted here,
                    // exports use the strict bound.
                    if index as usize > count {
                        return Err(ParseError::SignatureIndexOutOfRange { index, count });
                    }
                    Some(SignatureIndex(index))
                }
                // Payloads of these kinds are not decoded.
                ExternalKind::Table | ExternalKind::Memory | ExternalKind::Global => None,
            };

            imports.push(Import {
                module,
                field,
                kind,
                signature,
            });
        }

        self.module.imports = imports;
        Ok(())
    }

    fn parse_function_section(&mut self) -> Result<(), ParseError> {
        let mut functions = std::mem::take(&mut self.module.functions);
        let count = self.parse_count("functions", &mut functions)?;

        for _ in 0..count {
            let index = self.decoder.parse_var_u32()?;
            let signatures = self.module.signatures.len();
            if index as usize >= signatures {
                return Err(ParseError::SignatureIndexOutOfRange {
                    index,
                    count: signatures,
                });
            }
            // The body range is filled in by the code section.
            functions.push(FunctionInformation {
                signature: SignatureIndex(index),
                start: 0,
                end: 0,
            });
        }

        self.module.functions = functions;
        Ok(())
    }

    fn parse_memory_section(&mut self) -> Result<(), ParseError> {
        if !self.decoder.parse_var_u1()? {
            return Ok(());
        }

        let has_maximum = self.decoder.parse_var_u1()?;
        let limit = self.engine.max_page_count();

        let initial = self.decoder.parse_var_u32()?;
        if initial > limit {
            return Err(ParseError::MemoryInitialTooLarge { initial, limit });
        }

        let maximum = if has_maximum {
            let maximum = self.decoder.parse_var_u32()?;
            if maximum < initial || maximum > limit {
                return Err(ParseError::MemoryMaximumOutOfRange {
                    initial,
                    maximum,
                    limit,
                });
            }
            maximum
        } else {
            limit
        };

        let memory = Memory::new(self.engine, pages_to_bytes(initial)?, pages_to_bytes(maximum)?)?;
        self.module.memory = Some(MemoryInformation { initial, maximum });
        self.memory = Some(memory);
        Ok(())
    }

    fn parse_export_section(&mut self) -> Result<(), ParseError> {
        let mut exports = std::mem::take(&mut self.module.exports);
        let count = self.parse_count("exports", &mut exports)?;

        for _ in 0..count {
            let field = self.decoder.parse_name()?.to_owned();
            let kind = self.parse_external_kind()?;

            let signature = match kind {
                ExternalKind::Function => {
                    let index = self.decoder.parse_var_u32()?;
                    let count = self.module.signatures.len();
                    if index as usize >= count {
                        return Err(ParseError::SignatureIndexOutOfRange { index, count });
                    }
                    Some(SignatureIndex(index))
                }
                ExternalKind::Table | ExternalKind::Memory | ExternalKind::Global => None,
            };

            exports.push(Export {
                field,
                kind,
                signature,
            });
        }

        self.module.exports = exports;
        Ok(())
    }

    fn parse_code_section(&mut self) -> Result<(), ParseError> {
        let bodies = self.decoder.parse_var_u32()?;
        let functions = self.module.functions.len();
        if bodies as usize != functions {
            return Err(ParseError::FunctionCountMismatch { bodies, functions });
        }

        for index in 0..functions {
            let length = self.decoder.parse_var_u32()?;
            let remaining = self.decoder.remaining();
            if length as usize > remaining {
                return Err(ParseError::FunctionBodyTooLong {
                    index,
                    length,
                    remaining,
                });
            }

            let start = self.decoder.offset();
            self.decoder.skip(length as usize)?;

            let function = &mut self.module.functions[index];
            function.start = start;
            function.end = start + length as usize;
        }

        Ok(())
    }

    /// Sections whose contents are accepted without being decoded. A
    /// non-empty one fails the end-of-section check in the caller.
    fn parse_undecoded_section(&self, section: Section) {
        tracing::trace!(?section, "section contents are not decoded");
    }
}

fn pages_to_bytes(pages: u32) -> Result<usize, MemoryError> {
    (pages as usize)
        .checked_mul(PAGE_SIZE)
        .ok_or(MemoryError::SizeOverflow {
            pages: u64::from(pages),
        })
}
