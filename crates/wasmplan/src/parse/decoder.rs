use crate::error::DecodeError;

/// Forward-only cursor over a module's bytes.
///
/// Every read either succeeds and advances the cursor by exactly the
/// number of bytes it consumed, or fails and leaves the cursor untouched.
#[derive(Debug, Clone)]
pub struct Decoder<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Decoder { bytes, offset: 0 }
    }

    /// Current cursor position, in bytes from the start of the buffer.
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.offset
    }

    #[inline]
    pub fn is_at_end(&self) -> bool {
        self.offset == self.bytes.len()
    }

    fn eof(&self, needed: usize) -> DecodeError {
        DecodeError::UnexpectedEof {
            offset: self.offset,
            needed,
            remaining: self.remaining(),
        }
    }

    /// Take the next `len` bytes without interpreting them.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if len > self.remaining() {
            return Err(self.eof(len));
        }
        let bytes = &self.bytes[self.offset..self.offset + len];
        self.offset += len;
        Ok(bytes)
    }

    pub fn skip(&mut self, len: usize) -> Result<(), DecodeError> {
        self.read_bytes(len).map(|_| ())
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        let byte = *self.bytes.get(self.offset).ok_or_else(|| self.eof(1))?;
        self.offset += 1;
        Ok(byte)
    }

    pub fn read_i8(&mut self) -> Result<i8, DecodeError> {
        self.read_u8().map(|b| b as i8)
    }

    /// Fixed-width little-endian u32. Only the format version uses this.
    pub fn parse_u32(&mut self) -> Result<u32, DecodeError> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Unsigned LEB128 limited to `bits` bits of payload.
    fn parse_var_uint(&mut self, bits: u8) -> Result<u32, DecodeError> {
        let start = self.offset;
        let malformed = DecodeError::MalformedVarUint {
            bits,
            offset: start,
        };
        let max_bytes = usize::from(bits).div_ceil(7);

        let mut result: u64 = 0;
        let mut shift = 0u32;
        let mut cursor = start;
        for _ in 0..max_bytes {
            let Some(&byte) = self.bytes.get(cursor) else {
                return Err(DecodeError::UnexpectedEof {
                    offset: start,
                    needed: cursor - start + 1,
                    remaining: self.remaining(),
                });
            };
            cursor += 1;
            result |= u64::from(byte & 0x7F) << shift;
            shift += 7;

            if byte & 0x80 == 0 {
                if result >> bits != 0 {
                    return Err(malformed);
                }
                self.offset = cursor;
                return Ok(result as u32);
            }
        }

        Err(malformed)
    }

    pub fn parse_var_u1(&mut self) -> Result<bool, DecodeError> {
        self.parse_var_uint(1).map(|v| v == 1)
    }

    pub fn parse_var_u7(&mut self) -> Result<u8, DecodeError> {
        self.parse_var_uint(7).map(|v| v as u8)
    }

    pub fn parse_var_u32(&mut self) -> Result<u32, DecodeError> {
        self.parse_var_uint(32)
    }

    /// Signed 7-bit LEB128: a single byte whose bit 6 is the sign.
    pub fn parse_int7(&mut self) -> Result<i8, DecodeError> {
        let byte = *self.bytes.get(self.offset).ok_or_else(|| self.eof(1))?;
        if byte & 0x80 != 0 {
            return Err(DecodeError::MalformedVarInt {
                bits: 7,
                offset: self.offset,
            });
        }
        self.offset += 1;
        // Sign-extend bit 6 into bit 7.
        Ok(((byte << 1) as i8) >> 1)
    }

    /// Consume one byte and report whether it equals `expected`.
    /// The cursor only advances on a match.
    pub fn consume_character(&mut self, expected: u8) -> bool {
        if self.bytes.get(self.offset) == Some(&expected) {
            self.offset += 1;
            true
        } else {
            false
        }
    }

    /// Consume `expected` byte-for-byte. The cursor only advances on a full match.
    pub fn consume_string(&mut self, expected: &[u8]) -> bool {
        if self.bytes[self.offset..].starts_with(expected) {
            self.offset += expected.len();
            true
        } else {
            false
        }
    }

    /// Read `len` bytes as a UTF-8 string.
    pub fn consume_utf8_string(&mut self, len: usize) -> Result<&'a str, DecodeError> {
        let start = self.offset;
        if len > self.remaining() {
            return Err(self.eof(len));
        }
        let s = std::str::from_utf8(&self.bytes[start..start + len])
            .map_err(|_| DecodeError::InvalidUtf8 { offset: start })?;
        self.offset += len;
        Ok(s)
    }

    /// A varuint32 length followed by that many bytes of UTF-8.
    pub fn parse_name(&mut self) -> Result<&'a str, DecodeError> {
        let start = self.offset;
        let len = self.parse_var_u32()?;
        self.consume_utf8_string(len as usize).inspect_err(|_| {
            self.offset = start;
        })
    }
}
