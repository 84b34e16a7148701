use super::DecodeError;

/// Growable byte writer for NAN TLV attributes.
///
/// Attributes are framed as id(1) + length(2, little-endian) + value. The
/// length field is back-patched when the attribute is closed, so callers
/// never compute value sizes by hand.
#[derive(Debug, Default)]
pub struct TlvWriter {
    buf: Vec<u8>,
}

impl TlvWriter {
    pub fn new() -> Self {
        TlvWriter { buf: Vec::new() }
    }

    pub fn with_capacity(cap: usize) -> Self {
        TlvWriter { buf: Vec::with_capacity(cap) }
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn put_u16_le(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_bytes(&mut self, v: &[u8]) {
        self.buf.extend_from_slice(v);
    }

    /// Opens an attribute: writes the id and a placeholder length.
    /// Returns a token that must be handed to [`TlvWriter::end_attr`].
    pub fn begin_attr(&mut self, id: u8) -> usize {
        self.buf.push(id);
        self.buf.extend_from_slice(&[0x00, 0x00]);
        self.buf.len()
    }

    /// Closes an attribute opened with [`TlvWriter::begin_attr`],
    /// back-patching the little-endian length field.
    pub fn end_attr(&mut self, value_start: usize) {
        let len = (self.buf.len() - value_start) as u16;
        self.buf[value_start - 2..value_start].copy_from_slice(&len.to_le_bytes());
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }
}

/// Bounds-checked byte reader over a received frame.
///
/// Every accessor validates the remaining length before touching the
/// buffer and returns [`DecodeError::UnexpectedEof`] instead of reading
/// past the end.
#[derive(Debug, Clone)]
pub struct TlvReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> TlvReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        TlvReader { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn u8(&mut self) -> Result<u8, DecodeError> {
        if self.remaining() < 1 {
            return Err(DecodeError::UnexpectedEof);
        }
        let v = self.buf[self.pos];
        self.pos += 1;
        Ok(v)
    }

    pub fn u16_le(&mut self) -> Result<u16, DecodeError> {
        let b = self.bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < n {
            return Err(DecodeError::UnexpectedEof);
        }
        let v = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(v)
    }

    /// Splits off a sub-reader over the next `n` bytes, advancing this one.
    pub fn take(&mut self, n: usize) -> Result<TlvReader<'a>, DecodeError> {
        Ok(TlvReader::new(self.bytes(n)?))
    }

    /// Remaining bytes without advancing.
    pub fn rest(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }
}
