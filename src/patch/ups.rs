//! Format documentation: https://www.romhacking.net/documents/392/

use crate::buffer::{ByteBuffer, Endian};
use crate::hash;
use crate::patch::varint::{vlv_len, Varint};
use crate::patch::Error;

pub const MAGIC: &[u8] = b"UPS1";

// Input CRC32, output CRC32, patch CRC32.
const FOOTER_LEN: usize = 3 * 4;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UpsRecord {
  pub relative_offset: u64,
  pub xor: Vec<u8>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UpsPatch {
  pub size_input: u64,
  pub size_output: u64,
  pub records: Vec<UpsRecord>,
  pub checksum_input: u32,
  pub checksum_output: u32,
  pub checksum_patch: u32,
}

pub fn parse(file: &mut ByteBuffer) -> Result<UpsPatch, Error> {
  if file.file_size() < MAGIC.len() + FOOTER_LEN {
    return Err(Error::InvalidRecord);
  }
  file.seek(0)?;
  file.set_endian(Endian::Little);
  if file.read_bytes(MAGIC.len())? != MAGIC {
    return Err(Error::InvalidMagic);
  }

  let size_input = file.read_vlv()?;
  let size_output = file.read_vlv()?;
  if size_input == 0 || size_output == 0 {
    return Err(Error::InvalidRecord);
  }

  let footer = file.file_size() - FOOTER_LEN;
  let mut records = Vec::new();
  // Only tracked to reject patches whose offsets run away.
  let mut absolute_offset: u64 = 0;
  while file.position() < footer {
    let relative_offset = file.read_vlv()?;
    absolute_offset = absolute_offset
      .checked_add(relative_offset)
      .ok_or(Error::InvalidRecord)?;
    let mut xor = Vec::new();
    loop {
      if file.position() >= footer {
        // The hunk ran into the footer without its NUL terminator.
        return Err(Error::InvalidRecord);
      }
      let byte = file.read_u8()?;
      if byte == 0 {
        break;
      }
      xor.push(byte);
    }
    absolute_offset = absolute_offset
      .checked_add(xor.len() as u64 + 1)
      .ok_or(Error::InvalidRecord)?;
    records.push(UpsRecord { relative_offset, xor });
    if file.position() > footer {
      return Err(Error::InvalidRecord);
    }
  }

  let checksum_input = file.read_u32()?;
  let checksum_output = file.read_u32()?;
  let checksum_patch = file.read_u32()?;
  if file.crc32(0, Some(file.file_size() - 4))? != checksum_patch {
    return Err(Error::PatchChecksumMismatch);
  }

  Ok(UpsPatch {
    size_input,
    size_output,
    records,
    checksum_input,
    checksum_output,
    checksum_patch,
  })
}

impl UpsPatch {
  pub fn validate_source(&self, rom: &ByteBuffer) -> bool {
    hash::crc32(rom.bytes()) == self.checksum_input
  }

  pub fn apply(&self, rom: &ByteBuffer, validate: bool) -> Result<ByteBuffer, Error> {
    if validate && !self.validate_source(rom) {
      return Err(Error::SourceChecksumMismatch);
    }

    let mut input_size = usize::try_from(self.size_input).map_err(|_| Error::InvalidRecord)?;
    let mut output_size = usize::try_from(self.size_output).map_err(|_| Error::InvalidRecord)?;
    if !validate && rom.file_size() > input_size {
      // Compatibility shim for patches that understate their input size
      // (Rom Patcher JS PR #40): without validation, trust the ROM we got.
      log::warn!(
        "UPS patch declares a {input_size} byte input but the ROM has {} bytes; \
         widening the patch sizes to fit",
        rom.file_size()
      );
      input_size = rom.file_size();
      if output_size < input_size {
        output_size = input_size;
      }
    }

    let source = rom.bytes();
    let mut target = vec![0u8; output_size];
    let prefix = input_size.min(source.len()).min(output_size);
    target[..prefix].copy_from_slice(&source[..prefix]);

    let mut cursor: usize = 0;
    for record in &self.records {
      let relative = usize::try_from(record.relative_offset).map_err(|_| Error::InvalidRecord)?;
      cursor = cursor.checked_add(relative).ok_or(Error::InvalidRecord)?;
      for (i, &xor) in record.xor.iter().enumerate() {
        let index = cursor + i;
        if index >= output_size {
          break;
        }
        let source_byte = source.get(index).copied().unwrap_or(0);
        target[index] = source_byte ^ xor;
      }
      // The skipped NUL terminator occupies one position of the offset space.
      cursor += record.xor.len() + 1;
    }

    if validate && hash::crc32(&target) != self.checksum_output {
      return Err(Error::TargetChecksumMismatch);
    }
    Ok(ByteBuffer::from_vec(target))
  }

  pub fn export(&self) -> Result<ByteBuffer, Error> {
    let mut size =
      MAGIC.len() + vlv_len(self.size_input) + vlv_len(self.size_output) + FOOTER_LEN;
    for record in &self.records {
      size += vlv_len(record.relative_offset) + record.xor.len() + 1;
    }

    let mut file = ByteBuffer::with_len(size);
    file.set_endian(Endian::Little);
    file.write_bytes(MAGIC)?;
    file.write_vlv(self.size_input)?;
    file.write_vlv(self.size_output)?;
    for record in &self.records {
      file.write_vlv(record.relative_offset)?;
      file.write_bytes(&record.xor)?;
      file.write_u8(0)?;
    }
    file.write_u32(self.checksum_input)?;
    file.write_u32(self.checksum_output)?;
    // The patch checksum covers everything written so far.
    let checksum_patch = file.crc32(0, Some(size - 4))?;
    file.write_u32(checksum_patch)?;
    Ok(file)
  }
}

/// Diffs `modified` against `original`. The XOR payloads make the patch
/// reversible: applying it to either file yields the other.
pub fn build(original: &ByteBuffer, modified: &ByteBuffer) -> Result<UpsPatch, Error> {
  let source = original.bytes();
  let target = modified.bytes();
  let mut records = Vec::new();
  let mut previous_seek: usize = 0;
  let mut position: usize = 0;

  while position < target.len() {
    let source_byte = source.get(position).copied().unwrap_or(0);
    if source_byte == target[position] {
      position += 1;
      continue;
    }

    let start = position;
    let mut xor = Vec::new();
    while position < target.len() {
      let source_byte = source.get(position).copied().unwrap_or(0);
      if source_byte == target[position] {
        break;
      }
      xor.push(source_byte ^ target[position]);
      position += 1;
    }
    records.push(UpsRecord { relative_offset: (start - previous_seek) as u64, xor });
    // The record's NUL terminator consumes one position too.
    previous_seek = position + 1;
    position += 1;
  }

  let mut patch = UpsPatch {
    size_input: source.len() as u64,
    size_output: target.len() as u64,
    records,
    checksum_input: hash::crc32(source),
    checksum_output: hash::crc32(target),
    checksum_patch: 0,
  };
  let exported = patch.export()?;
  patch.checksum_patch = exported.crc32(0, Some(exported.file_size() - 4))?;
  Ok(patch)
}
