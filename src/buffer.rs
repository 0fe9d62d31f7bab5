//! Fixed-length byte buffer with a cursor and structured, endianness-aware
//! reads and writes. All patching works on these buffers; file I/O happens
//! at the binary's edge only.

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use std::fmt;
use std::io;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Endian {
  #[default]
  Big,
  Little,
}

/// A fixed-length, owned run of bytes. The length is set at construction;
/// none of the write operations grow the buffer.
#[derive(Clone, Debug)]
pub struct ByteBuffer {
  bytes: Vec<u8>,
  cursor: usize,
  cursor_stack: Vec<usize>,
  endian: Endian,
  name: String,
}

impl ByteBuffer {
  pub fn from_vec(bytes: Vec<u8>) -> Self {
    Self {
      bytes,
      cursor: 0,
      cursor_stack: Vec::new(),
      endian: Endian::Big,
      name: String::new(),
    }
  }

  /// A zero-filled buffer of `len` bytes.
  pub fn with_len(len: usize) -> Self {
    Self::from_vec(vec![0u8; len])
  }

  pub fn from_named_vec(name: impl Into<String>, bytes: Vec<u8>) -> Self {
    let mut buffer = Self::from_vec(bytes);
    buffer.name = name.into();
    buffer
  }

  pub fn file_size(&self) -> usize {
    self.bytes.len()
  }

  pub fn is_eof(&self) -> bool {
    self.cursor >= self.bytes.len()
  }

  pub fn position(&self) -> usize {
    self.cursor
  }

  pub fn endian(&self) -> Endian {
    self.endian
  }

  pub fn set_endian(&mut self, endian: Endian) {
    self.endian = endian;
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn set_name(&mut self, name: impl Into<String>) {
    self.name = name.into();
  }

  /// The lowercased extension of the buffer's name, if it has one.
  /// Doubles as the file-type tag for the ROM header policy.
  pub fn extension(&self) -> Option<String> {
    let (stem, ext) = self.name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
      return None;
    }
    Some(ext.to_ascii_lowercase())
  }

  pub fn bytes(&self) -> &[u8] {
    &self.bytes
  }

  pub fn into_vec(self) -> Vec<u8> {
    self.bytes
  }

  pub fn seek(&mut self, position: usize) -> Result<(), Error> {
    if position > self.bytes.len() {
      return Err(Error::OutOfBounds { offset: position, size: self.bytes.len() });
    }
    self.cursor = position;
    Ok(())
  }

  pub fn skip(&mut self, count: usize) -> Result<(), Error> {
    let position = self.cursor.checked_add(count).ok_or(Error::EndOfFile)?;
    if position > self.bytes.len() {
      return Err(Error::EndOfFile);
    }
    self.cursor = position;
    Ok(())
  }

  pub fn push_cursor(&mut self) {
    self.cursor_stack.push(self.cursor);
  }

  pub fn pop_cursor(&mut self) {
    if let Some(cursor) = self.cursor_stack.pop() {
      self.cursor = cursor;
    }
  }

  /// The next `width` bytes at the cursor, without advancing.
  /// The cursor is only moved once the whole access is known to fit.
  fn peek(&self, width: usize) -> Result<&[u8], Error> {
    let end = self.cursor.checked_add(width).ok_or(Error::EndOfFile)?;
    if end > self.bytes.len() {
      return Err(Error::EndOfFile);
    }
    Ok(&self.bytes[self.cursor..end])
  }

  fn peek_mut(&mut self, width: usize) -> Result<&mut [u8], Error> {
    let end = self.cursor.checked_add(width).ok_or(Error::EndOfFile)?;
    if end > self.bytes.len() {
      return Err(Error::EndOfFile);
    }
    Ok(&mut self.bytes[self.cursor..end])
  }

  pub fn read_u8(&mut self) -> Result<u8, Error> {
    let byte = self.peek(1)?[0];
    self.cursor += 1;
    Ok(byte)
  }

  pub fn read_u16(&mut self) -> Result<u16, Error> {
    let value = match self.endian {
      Endian::Big => BigEndian::read_u16(self.peek(2)?),
      Endian::Little => LittleEndian::read_u16(self.peek(2)?),
    };
    self.cursor += 2;
    Ok(value)
  }

  pub fn read_u24(&mut self) -> Result<u32, Error> {
    let value = match self.endian {
      Endian::Big => BigEndian::read_u24(self.peek(3)?),
      Endian::Little => LittleEndian::read_u24(self.peek(3)?),
    };
    self.cursor += 3;
    Ok(value)
  }

  pub fn read_u32(&mut self) -> Result<u32, Error> {
    let value = match self.endian {
      Endian::Big => BigEndian::read_u32(self.peek(4)?),
      Endian::Little => LittleEndian::read_u32(self.peek(4)?),
    };
    self.cursor += 4;
    Ok(value)
  }

  pub fn write_u8(&mut self, value: u8) -> Result<(), Error> {
    self.peek_mut(1)?[0] = value;
    self.cursor += 1;
    Ok(())
  }

  pub fn write_u16(&mut self, value: u16) -> Result<(), Error> {
    let endian = self.endian;
    let slice = self.peek_mut(2)?;
    match endian {
      Endian::Big => BigEndian::write_u16(slice, value),
      Endian::Little => LittleEndian::write_u16(slice, value),
    }
    self.cursor += 2;
    Ok(())
  }

  pub fn write_u24(&mut self, value: u32) -> Result<(), Error> {
    if value > 0xFF_FFFF {
      return Err(Error::InvalidLength);
    }
    let endian = self.endian;
    let slice = self.peek_mut(3)?;
    match endian {
      Endian::Big => BigEndian::write_u24(slice, value),
      Endian::Little => LittleEndian::write_u24(slice, value),
    }
    self.cursor += 3;
    Ok(())
  }

  pub fn write_u32(&mut self, value: u32) -> Result<(), Error> {
    let endian = self.endian;
    let slice = self.peek_mut(4)?;
    match endian {
      Endian::Big => BigEndian::write_u32(slice, value),
      Endian::Little => LittleEndian::write_u32(slice, value),
    }
    self.cursor += 4;
    Ok(())
  }

  pub fn read_bytes(&mut self, count: usize) -> Result<Vec<u8>, Error> {
    let bytes = self.peek(count)?.to_vec();
    self.cursor += count;
    Ok(bytes)
  }

  pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), Error> {
    self.peek_mut(bytes.len())?.copy_from_slice(bytes);
    self.cursor += bytes.len();
    Ok(())
  }

  /// Reads `count` bytes as an ASCII string. The string stops at the first
  /// NUL byte, but the cursor always advances by `count`.
  pub fn read_string(&mut self, count: usize) -> Result<String, Error> {
    let bytes = self.peek(count)?;
    let text = match bytes.iter().position(|&byte| byte == 0) {
      Some(nul) => &bytes[..nul],
      None => bytes,
    };
    let text = String::from_utf8_lossy(text).into_owned();
    self.cursor += count;
    Ok(text)
  }

  /// Writes an ASCII string. With a fixed `length` the string is truncated
  /// or zero-padded to exactly that many bytes.
  pub fn write_string(&mut self, text: &str, length: Option<usize>) -> Result<(), Error> {
    match length {
      None => self.write_bytes(text.as_bytes()),
      Some(length) => {
        let slice = self.peek_mut(length)?;
        let text = text.as_bytes();
        let count = text.len().min(length);
        slice[..count].copy_from_slice(&text[..count]);
        slice[count..].fill(0);
        self.cursor += length;
        Ok(())
      }
    }
  }

  /// A freshly-owned copy of `[offset, offset + length)`, defaulting to the
  /// rest of the buffer. Inherits the endianness but not the name.
  pub fn slice(&self, offset: usize, length: Option<usize>) -> Result<ByteBuffer, Error> {
    let bytes = self.range(offset, length)?.to_vec();
    let mut buffer = ByteBuffer::from_vec(bytes);
    buffer.endian = self.endian;
    Ok(buffer)
  }

  /// Copies `length` bytes from `self` at `source_offset` into `target` at
  /// `target_offset`. The buffers are distinct, so overlap cannot occur.
  pub fn copy_to(
    &self,
    target: &mut ByteBuffer,
    source_offset: usize,
    length: usize,
    target_offset: usize,
  ) -> Result<(), Error> {
    let source = self.range(source_offset, Some(length))?;
    let end = target_offset.checked_add(length).ok_or(Error::OutOfBounds {
      offset: target_offset,
      size: target.bytes.len(),
    })?;
    if end > target.bytes.len() {
      return Err(Error::OutOfBounds { offset: end, size: target.bytes.len() });
    }
    target.bytes[target_offset..end].copy_from_slice(source);
    Ok(())
  }

  pub fn crc32(&self, start: usize, length: Option<usize>) -> Result<u32, Error> {
    Ok(crate::hash::crc32(self.range(start, length)?))
  }

  pub fn adler32(&self, start: usize, length: Option<usize>) -> Result<u32, Error> {
    Ok(crate::hash::adler32(self.range(start, length)?))
  }

  pub fn crc16(&self, start: usize, length: Option<usize>) -> Result<u16, Error> {
    Ok(crate::hash::crc16(self.range(start, length)?))
  }

  pub fn md5(&self, start: usize, length: Option<usize>) -> Result<String, Error> {
    Ok(crate::hash::md5(self.range(start, length)?))
  }

  pub fn sha1(&self, start: usize, length: Option<usize>) -> Result<String, Error> {
    Ok(crate::hash::sha1(self.range(start, length)?))
  }

  fn range(&self, start: usize, length: Option<usize>) -> Result<&[u8], Error> {
    if start > self.bytes.len() {
      return Err(Error::OutOfBounds { offset: start, size: self.bytes.len() });
    }
    let end = match length {
      None => self.bytes.len(),
      Some(length) => start.checked_add(length).ok_or(Error::InvalidLength)?,
    };
    if end > self.bytes.len() {
      return Err(Error::OutOfBounds { offset: end, size: self.bytes.len() });
    }
    Ok(&self.bytes[start..end])
  }
}

impl fmt::Display for ByteBuffer {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} ({} bytes)", self.name, self.bytes.len())
  }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
  #[error("The source could not be read into a buffer: {0}")]
  InvalidSource(#[from] io::Error),
  #[error("Offset {offset:#x} is outside the buffer ({size:#x} bytes).")]
  OutOfBounds { offset: usize, size: usize },
  #[error("Invalid length.")]
  InvalidLength,
  #[error("Unexpected end of file.")]
  EndOfFile,
}
