//! Little-endian field reader and writer shared by every codec.

use crate::error::CodecError;

/// Cursor over a borrowed byte slice
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    /// Start reading at the beginning of `data`
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes consumed so far
    #[must_use]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to read
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// True when every byte has been consumed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Unconsumed tail of the input
    #[must_use]
    pub fn rest(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    fn ensure(&self, n: usize) -> Result<(), CodecError> {
        if self.remaining() < n {
            return Err(CodecError::TooShort {
                expected: n,
                actual: self.remaining(),
            });
        }
        Ok(())
    }

    /// Read `n` raw bytes
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::TooShort`] if fewer than `n` bytes remain.
    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        self.ensure(n)?;
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    /// Read a fixed-size array
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::TooShort`] if fewer than `N` bytes remain.
    pub fn array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(N)?);
        Ok(out)
    }

    /// Read one byte
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::TooShort`] at end of input.
    pub fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.array::<1>()?[0])
    }

    /// Read a little-endian `u16`
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::TooShort`] at end of input.
    pub fn u16(&mut self) -> Result<u16, CodecError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    /// Read a little-endian `u32`
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::TooShort`] at end of input.
    pub fn u32(&mut self) -> Result<u32, CodecError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    /// Read a little-endian `u64`
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::TooShort`] at end of input.
    pub fn u64(&mut self) -> Result<u64, CodecError> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    /// Read a byte and interpret any non-zero value as true
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::TooShort`] at end of input.
    pub fn bool8(&mut self) -> Result<bool, CodecError> {
        Ok(self.u8()? != 0)
    }

    /// Read a `u16` count followed by that many bytes
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::TooShort`] if the data is cut short.
    pub fn sized_bytes16(&mut self) -> Result<&'a [u8], CodecError> {
        let len = usize::from(self.u16()?);
        self.bytes(len)
    }

    /// Read a `u32` count followed by that many bytes
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::TooShort`] if the data is cut short.
    pub fn sized_bytes32(&mut self) -> Result<&'a [u8], CodecError> {
        let len = self.u32()? as usize;
        self.bytes(len)
    }

    /// Read a null-terminated 8-bit string
    ///
    /// # Errors
    ///
    /// Fails if no terminator is found.
    pub fn string8(&mut self) -> Result<String, CodecError> {
        let rest = self.rest();
        let end = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(CodecError::InvalidString)?;
        let text = rest[..end].iter().map(|&b| char::from(b)).collect();
        self.pos += end + 1;
        Ok(text)
    }

    /// Read a null-terminated UTF-16LE string
    ///
    /// # Errors
    ///
    /// Fails if no terminator is found or the code units are not valid UTF-16.
    pub fn unicode(&mut self) -> Result<String, CodecError> {
        let mut units = Vec::new();
        loop {
            let unit = self.u16().map_err(|_| CodecError::InvalidString)?;
            if unit == 0 {
                break;
            }
            units.push(unit);
        }
        String::from_utf16(&units).map_err(|_| CodecError::InvalidString)
    }
}

/// Growable little-endian output buffer
#[derive(Debug, Default, Clone)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    /// Empty writer
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty writer with reserved capacity
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Bytes written so far
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// True when nothing has been written
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Finish and take the bytes
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Append one byte
    pub fn u8(&mut self, value: u8) -> &mut Self {
        self.buf.push(value);
        self
    }

    /// Append a little-endian `u16`
    pub fn u16(&mut self, value: u16) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Append a little-endian `u32`
    pub fn u32(&mut self, value: u32) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Append a little-endian `u64`
    pub fn u64(&mut self, value: u64) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Append a boolean as one byte
    pub fn bool8(&mut self, value: bool) -> &mut Self {
        self.u8(u8::from(value))
    }

    /// Append raw bytes
    pub fn bytes(&mut self, data: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(data);
        self
    }

    /// Append a `u16` length and the bytes
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidValue`] if `data` is longer than `u16::MAX`.
    pub fn sized_bytes16(&mut self, data: &[u8]) -> Result<&mut Self, CodecError> {
        let len = u16::try_from(data.len()).map_err(|_| CodecError::InvalidValue {
            field: "u16 length",
            value: data.len() as u64,
        })?;
        self.u16(len);
        Ok(self.bytes(data))
    }

    /// Append a `u32` length and the bytes
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidValue`] if `data` is longer than `u32::MAX`.
    pub fn sized_bytes32(&mut self, data: &[u8]) -> Result<&mut Self, CodecError> {
        let len = u32::try_from(data.len()).map_err(|_| CodecError::InvalidValue {
            field: "u32 length",
            value: data.len() as u64,
        })?;
        self.u32(len);
        Ok(self.bytes(data))
    }

    /// Append a null-terminated 8-bit string; non-Latin-1 characters become `?`
    pub fn string8(&mut self, value: &str) -> &mut Self {
        for ch in value.chars() {
            self.buf.push(u8::try_from(u32::from(ch)).unwrap_or(b'?'));
        }
        self.u8(0)
    }

    /// Append a null-terminated UTF-16LE string
    pub fn unicode(&mut self, value: &str) -> &mut Self {
        for unit in value.encode_utf16() {
            self.u16(unit);
        }
        self.u16(0)
    }

    /// Overwrite a previously written `u16` at `offset`
    pub fn patch_u16(&mut self, offset: usize, value: u16) {
        self.buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    }
}

/// UTF-16LE bytes of a string including the terminator
#[must_use]
pub fn unicode_bytes(value: &str) -> Vec<u8> {
    let mut w = Writer::new();
    w.unicode(value);
    w.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integers_little_endian() {
        let mut w = Writer::new();
        w.u8(0x01).u16(0x0203).u32(0x0405_0607).u64(0x0809_0A0B_0C0D_0E0F);
        let bytes = w.into_bytes();
        assert_eq!(&bytes[..3], &[0x01, 0x03, 0x02]);

        let mut r = Reader::new(&bytes);
        assert_eq!(r.u8().unwrap(), 0x01);
        assert_eq!(r.u16().unwrap(), 0x0203);
        assert_eq!(r.u32().unwrap(), 0x0405_0607);
        assert_eq!(r.u64().unwrap(), 0x0809_0A0B_0C0D_0E0F);
        assert!(r.is_empty());
    }

    #[test]
    fn test_too_short() {
        let mut r = Reader::new(&[0x01]);
        assert_eq!(
            r.u32(),
            Err(CodecError::TooShort {
                expected: 4,
                actual: 1
            })
        );
    }

    #[test]
    fn test_strings() {
        let mut w = Writer::new();
        w.string8("/o=Org").unicode("Inbox ✓");
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        assert_eq!(r.string8().unwrap(), "/o=Org");
        assert_eq!(r.unicode().unwrap(), "Inbox ✓");
    }

    #[test]
    fn test_unterminated_string() {
        let mut r = Reader::new(b"abc");
        assert_eq!(r.string8(), Err(CodecError::InvalidString));
    }

    #[test]
    fn test_patch_u16() {
        let mut w = Writer::new();
        w.u16(0).u8(7);
        w.patch_u16(0, 0xBEEF);
        assert_eq!(w.into_bytes(), vec![0xEF, 0xBE, 7]);
    }
}
