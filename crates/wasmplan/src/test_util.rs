//! Hand-assembled binary modules for unit tests.

pub fn leb(mut value: u32) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return out;
        }
        out.push(byte | 0x80);
    }
}

/// A version 1 module made of `(id, contents)` sections, in the given order.
pub fn module(sections: &[(u8, &[u8])]) -> Vec<u8> {
    let mut out = b"\0asm\x01\0\0\0".to_vec();
    for (id, contents) in sections {
        out.push(*id);
        out.extend(leb(contents.len() as u32));
        out.extend_from_slice(contents);
    }
    out
}

/// Contents of a code section holding `bodies`, each prefixed by its length.
pub fn code_section(bodies: &[&[u8]]) -> Vec<u8> {
    let mut out = leb(bodies.len() as u32);
    for body in bodies {
        out.extend(leb(body.len() as u32));
        out.extend_from_slice(body);
    }
    out
}
