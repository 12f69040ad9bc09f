use super::*;
use crate::error::{DecodeError, ErrorKind};
use crate::test_util::module;

fn engine() -> Engine {
    Engine::default().with_max_page_count(16)
}

fn parse(bytes: &[u8]) -> Result<ModuleInformation, ParseError> {
    let engine = engine();
    let mut parser = ModuleParser::new(&engine, bytes);
    parser.parse()?;
    Ok(parser.into_parts().0)
}

// (i32, i32) -> i32 and () -> void
const TYPES: &[u8] = &[0x02, 0x60, 0x02, 0x7F, 0x7F, 0x01, 0x7F, 0x60, 0x00, 0x00];

#[test]
fn empty_module() {
    let info = parse(&module(&[])).unwrap();
    assert_eq!(info, ModuleInformation::default());
}

#[test]
fn header_errors() {
    assert!(matches!(parse(b"\0asm\x01"), Err(ParseError::TooShort { len: 5 })));
    assert!(matches!(
        parse(b"\0wasm\x01\0\0"),
        Err(ParseError::BadMagic([0, b'w', b'a', b's']))
    ));

    let err = parse(b"\0asm\x0d\0\0\0").unwrap_err();
    assert!(matches!(
        err,
        ParseError::UnsupportedVersion {
            found: 0xd,
            expected: 1
        }
    ));
    assert_eq!(err.kind(), ErrorKind::Structural);
}

#[test]
fn type_section() {
    let info = parse(&module(&[(1, TYPES)])).unwrap();
    assert_eq!(
        info.signatures,
        [
            Signature {
                result: Some(ValueType::I32),
                params: vec![ValueType::I32, ValueType::I32],
            },
            Signature::default(),
        ]
    );
}

#[test]
fn invalid_type_form_and_value_type() {
    let err = parse(&module(&[(1, &[0x01, 0x5F, 0x00, 0x00])])).unwrap_err();
    assert!(matches!(err, ParseError::InvalidTypeForm(-0x21)));
    assert_eq!(err.kind(), ErrorKind::Validation);

    let err = parse(&module(&[(1, &[0x01, 0x60, 0x01, 0x7B, 0x00])])).unwrap_err();
    assert!(matches!(err, ParseError::InvalidValueType(-0x05)));

    let err = parse(&module(&[(1, &[0x01, 0xE0, 0x00, 0x00])])).unwrap_err();
    assert!(matches!(
        err,
        ParseError::Decode(DecodeError::MalformedVarInt { bits: 7, offset: 11 })
    ));
}

#[test]
fn section_order() {
    let err = parse(&module(&[(5, &[0x00]), (2, &[0x00])])).unwrap_err();
    assert!(matches!(
        err,
        ParseError::SectionOutOfOrder {
            previous: Section::Memory,
            current: Section::Import
        }
    ));

    let err = parse(&module(&[(1, &[0x00]), (1, &[0x00])])).unwrap_err();
    assert!(matches!(err, ParseError::SectionOutOfOrder { .. }));
}

#[test]
fn unknown_sections_go_anywhere() {
    let custom = [0x04, b'n', b'a', b'm', b'e', 0xAA, 0xBB];
    let bytes = module(&[
        (0, &custom),
        (1, TYPES),
        (0, &custom),
        (42, &[1, 2, 3]),
        (7, &[0x00]),
        (0, &[]),
    ]);
    let info = parse(&bytes).unwrap();
    assert_eq!(info.signatures.len(), 2);
}

#[test]
fn section_longer_than_module() {
    let mut bytes = module(&[]);
    bytes.extend([0x01, 0x10, 0x00]);
    let err = parse(&bytes).unwrap_err();
    assert!(matches!(
        err,
        ParseError::SectionTooLong {
            section: Section::Type,
            declared: 16,
            remaining: 1
        }
    ));
}

#[test]
fn section_contents_must_match_declared_size() {
    // Trailing byte after a complete type section.
    let err = parse(&module(&[(1, &[0x00, 0x00])])).unwrap_err();
    assert!(matches!(
        err,
        ParseError::SectionSizeMismatch {
            section: Section::Type,
            expected: 12,
            actual: 11
        }
    ));

    // A two-byte section whose signature runs past its end.
    let mut bytes = module(&[]);
    bytes.extend([0x01, 0x02, 0x01, 0x60, 0x00, 0x00]);
    let err = parse(&bytes).unwrap_err();
    assert!(matches!(
        err,
        ParseError::SectionSizeMismatch {
            section: Section::Type,
            expected: 12,
            actual: 14
        }
    ));

    // A count with no room left for its entries never reaches the end check.
    let mut bytes = module(&[]);
    bytes.extend([0x01, 0x01, 0x01, 0x60, 0x00, 0x00]);
    let err = parse(&bytes).unwrap_err();
    assert!(matches!(
        err,
        ParseError::CountTooLarge {
            what: "signatures",
            count: 1,
            remaining: 0
        }
    ));
}

#[test]
fn count_larger_than_section_is_rejected() {
    let err = parse(&module(&[(1, &[0xFF, 0xFF, 0xFF, 0xFF, 0x0F])])).unwrap_err();
    assert!(matches!(
        err,
        ParseError::CountTooLarge {
            what: "signatures",
            count: u32::MAX,
            ..
        }
    ));
}

#[test]
fn truncated_leb_in_section() {
    let err = parse(&module(&[(1, &[0x80])])).unwrap_err();
    assert!(matches!(err, ParseError::Decode(DecodeError::UnexpectedEof { .. })));
}

#[test]
fn imports() {
    let imports = [
        0x02, // count
        0x03, b'e', b'n', b'v', 0x01, b'f', 0x00, 0x01, // env.f: func sig 1
        0x03, b'e', b'n', b'v', 0x03, b'm', b'e', b'm', 0x02, // env.mem: memory
    ];
    let info = parse(&module(&[(1, TYPES), (2, &imports)])).unwrap();
    assert_eq!(
        info.imports,
        [
            Import {
                module: "env".into(),
                field: "f".into(),
                kind: ExternalKind::Function,
                signature: Some(SignatureIndex(1)),
            },
            Import {
                module: "env".into(),
                field: "mem".into(),
                kind: ExternalKind::Memory,
                signature: None,
            },
        ]
    );
}

#[test]
fn import_signature_index_bound_is_inclusive() {
    let import = |index: u8| vec![0x01, 0x01, b'm', 0x01, b'f', 0x00, index];

    let info = parse(&module(&[(1, TYPES), (2, &import(2))])).unwrap();
    assert_eq!(info.imports[0].signature, Some(SignatureIndex(2)));
    assert_eq!(info.signature(SignatureIndex(2)), None);

    let err = parse(&module(&[(1, TYPES), (2, &import(3))])).unwrap_err();
    assert!(matches!(
        err,
        ParseError::SignatureIndexOutOfRange { index: 3, count: 2 }
    ));
}

#[test]
fn invalid_external_kind() {
    let import = [0x01, 0x01, b'm', 0x01, b'f', 0x04];
    let err = parse(&module(&[(2, &import)])).unwrap_err();
    assert!(matches!(err, ParseError::InvalidExternalKind(4)));
}

#[test]
fn function_signature_index_is_strict() {
    let err = parse(&module(&[(1, TYPES), (3, &[0x01, 0x02])])).unwrap_err();
    assert!(matches!(
        err,
        ParseError::SignatureIndexOutOfRange { index: 2, count: 2 }
    ));
}

#[test]
fn export_signature_index_is_strict() {
    let export = |index: u8| vec![0x01, 0x03, b'r', b'u', b'n', 0x00, index];

    let info = parse(&module(&[(1, TYPES), (7, &export(1))])).unwrap();
    assert_eq!(
        info.exports,
        [Export {
            field: "run".into(),
            kind: ExternalKind::Function,
            signature: Some(SignatureIndex(1)),
        }]
    );

    let err = parse(&module(&[(1, TYPES), (7, &export(2))])).unwrap_err();
    assert!(matches!(err, ParseError::SignatureIndexOutOfRange { .. }));
}

#[test]
fn code_section_records_body_ranges() {
    let bytes = module(&[
        (1, TYPES),
        (3, &[0x02, 0x01, 0x00]),
        (10, &[0x02, 0x02, 0x00, 0x0B, 0x04, 0x00, 0x41, 0x07, 0x0B]),
    ]);
    let info = parse(&bytes).unwrap();

    assert_eq!(info.functions.len(), 2);
    assert_eq!(info.functions[0].signature, SignatureIndex(1));
    assert_eq!(info.functions[0].body(&bytes), Some(&[0x00, 0x0B][..]));
    assert_eq!(info.functions[1].signature, SignatureIndex(0));
    assert_eq!(info.functions[1].body(&bytes), Some(&[0x00, 0x41, 0x07, 0x0B][..]));
    assert_eq!(info.functions[1].end, bytes.len());
}

#[test]
fn code_count_must_match_functions() {
    let bytes = module(&[(1, TYPES), (3, &[0x01, 0x01]), (10, &[0x02, 0x01, 0x0B, 0x01, 0x0B])]);
    let err = parse(&bytes).unwrap_err();
    assert!(matches!(
        err,
        ParseError::FunctionCountMismatch {
            bodies: 2,
            functions: 1
        }
    ));
}

#[test]
fn declared_functions_need_a_code_section() {
    let err = parse(&module(&[(1, TYPES), (3, &[0x01, 0x01])])).unwrap_err();
    assert!(matches!(
        err,
        ParseError::FunctionCountMismatch {
            bodies: 0,
            functions: 1
        }
    ));
}

#[test]
fn function_body_past_end() {
    let mut bytes = module(&[(1, TYPES), (3, &[0x01, 0x01])]);
    // Code section of 3 bytes whose single body claims 9.
    bytes.extend([0x0A, 0x03, 0x01, 0x09, 0x0B]);
    let err = parse(&bytes).unwrap_err();
    assert!(matches!(
        err,
        ParseError::FunctionBodyTooLong {
            index: 0,
            length: 9,
            remaining: 1
        }
    ));
}

#[test]
fn memory_limits() {
    let engine = engine();

    let bytes = module(&[(5, &[0x01, 0x01, 0x02, 0x04])]);
    let mut parser = ModuleParser::new(&engine, &bytes);
    parser.parse().unwrap();
    assert_eq!(
        parser.module_information().memory,
        Some(MemoryInformation {
            initial: 2,
            maximum: 4
        })
    );
    let memory = parser.memory().unwrap();
    assert_eq!(memory.size(), 2 * PAGE_SIZE);
    assert_eq!(memory.capacity(), 4 * PAGE_SIZE);

    // No maximum: capacity defaults to the engine limit.
    let bytes = module(&[(5, &[0x01, 0x00, 0x01])]);
    let mut parser = ModuleParser::new(&engine, &bytes);
    parser.parse().unwrap();
    assert_eq!(parser.memory().unwrap().capacity(), 16 * PAGE_SIZE);

    // Equal initial and maximum.
    let bytes = module(&[(5, &[0x01, 0x01, 0x03, 0x03])]);
    let mut parser = ModuleParser::new(&engine, &bytes);
    parser.parse().unwrap();
    assert_eq!(parser.memory().unwrap().size(), parser.memory().unwrap().capacity());
}

#[test]
fn memory_flag_clear_means_no_memory() {
    let engine = engine();
    let bytes = module(&[(5, &[0x00])]);
    let mut parser = ModuleParser::new(&engine, &bytes);
    parser.parse().unwrap();
    assert!(parser.memory().is_none());
    assert_eq!(parser.module_information().memory, None);
}

#[test]
fn memory_limit_violations() {
    let err = parse(&module(&[(5, &[0x01, 0x00, 0x11])])).unwrap_err();
    assert!(matches!(
        err,
        ParseError::MemoryInitialTooLarge {
            initial: 17,
            limit: 16
        }
    ));

    let err = parse(&module(&[(5, &[0x01, 0x01, 0x04, 0x02])])).unwrap_err();
    assert!(matches!(
        err,
        ParseError::MemoryMaximumOutOfRange {
            initial: 4,
            maximum: 2,
            limit: 16
        }
    ));

    let err = parse(&module(&[(5, &[0x01, 0x01, 0x00, 0x11])])).unwrap_err();
    assert!(matches!(err, ParseError::MemoryMaximumOutOfRange { .. }));
}

#[test]
fn undecoded_sections_must_be_empty() {
    parse(&module(&[(4, &[]), (6, &[]), (8, &[]), (9, &[]), (11, &[])])).unwrap();

    let err = parse(&module(&[(4, &[0x00])])).unwrap_err();
    assert!(matches!(
        err,
        ParseError::SectionSizeMismatch {
            section: Section::Table,
            ..
        }
    ));
}

#[test]
fn failure_discards_partial_results() {
    let engine = engine();
    // Valid types and memory, then a bad export.
    let bytes = module(&[
        (1, TYPES),
        (5, &[0x01, 0x00, 0x01]),
        (7, &[0x01, 0x01, b'x', 0x00, 0x09]),
    ]);
    let mut parser = ModuleParser::new(&engine, &bytes);
    let err = parser.parse().unwrap_err();

    assert_eq!(parser.error_message(), Some(err.to_string().as_str()));
    assert_eq!(parser.module_information(), &ModuleInformation::default());
    assert!(parser.function_information().is_empty());
    assert!(parser.memory().is_none());
}

#[test]
fn parsing_is_deterministic() {
    let bytes = module(&[
        (1, TYPES),
        (3, &[0x01, 0x00]),
        (5, &[0x01, 0x01, 0x01, 0x02]),
        (7, &[0x01, 0x01, b'f', 0x00, 0x00]),
        (10, &[0x01, 0x02, 0x00, 0x0B]),
    ]);
    assert_eq!(parse(&bytes).unwrap(), parse(&bytes).unwrap());
}

#[test]
fn parse_can_be_repeated() {
    let engine = engine();
    let bytes = module(&[
        (1, TYPES),
        (3, &[0x01, 0x01]),
        (5, &[0x01, 0x00, 0x02]),
        (10, &[0x01, 0x02, 0x00, 0x0B]),
    ]);
    let mut parser = ModuleParser::new(&engine, &bytes);
    parser.parse().unwrap();
    let first = parser.module_information().clone();

    parser.parse().unwrap();
    assert_eq!(parser.module_information(), &first);
    assert_eq!(parser.error_message(), None);
    assert_eq!(parser.memory().map(Memory::size), Some(2 * PAGE_SIZE));
}

#[test]
fn repeated_parse_clears_previous_error() {
    let engine = engine();
    let bytes = module(&[(5, &[0x01, 0x00, 0x11])]);
    let mut parser = ModuleParser::new(&engine, &bytes);

    let first = parser.parse().unwrap_err();
    let second = parser.parse().unwrap_err();
    assert_eq!(first.to_string(), second.to_string());
    assert_eq!(parser.error_message(), Some(first.to_string().as_str()));
}

#[test]
fn unreservable_memory_is_a_resource_failure() {
    let engine = Engine::default().with_max_page_count(u32::MAX);
    let bytes = module(&[(1, TYPES), (5, &[0x01, 0x01, 0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0x0F])]);
    let mut parser = ModuleParser::new(&engine, &bytes);

    let err = parser.parse().unwrap_err();
    assert!(matches!(err, ParseError::Memory(_)), "{err}");
    assert_eq!(err.kind(), ErrorKind::Resource);
    assert!(parser.memory().is_none());
    assert_eq!(parser.module_information(), &ModuleInformation::default());
}
