//! Format documentation: https://www.romhacking.net/documents/746/

use crate::buffer::{ByteBuffer, Endian};
use crate::hash;
use crate::patch::varint::{signed_vlv_len, vlv_len, Varint};
use crate::patch::Error;

pub const MAGIC: &[u8] = b"BPS1";

/// Above this input size the builder always uses the linear strategy.
pub const DELTA_MODE_MAX_SIZE: usize = 4 * 1024 * 1024;

// Source CRC32, target CRC32, patch CRC32.
const FOOTER_LEN: usize = 3 * 4;

const ACTION_SOURCE_READ: u64 = 0;
const ACTION_TARGET_READ: u64 = 1;
const ACTION_SOURCE_COPY: u64 = 2;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Action {
  /// Copy `length` bytes from the source at the current output position.
  SourceRead { length: u64 },
  /// Emit the literal bytes carried by the patch.
  TargetRead { bytes: Vec<u8> },
  /// Copy from the source's own read head after moving it by `offset`.
  SourceCopy { length: u64, offset: i64 },
  /// Copy from the target's read head after moving it by `offset`. The
  /// regions may overlap; see [`BpsPatch::apply`].
  TargetCopy { length: u64, offset: i64 },
}

impl Action {
  fn length(&self) -> u64 {
    match self {
      Action::SourceRead { length } => *length,
      Action::TargetRead { bytes } => bytes.len() as u64,
      Action::SourceCopy { length, .. } => *length,
      Action::TargetCopy { length, .. } => *length,
    }
  }

  /// The action word: the type in the low 2 bits, `length - 1` above them.
  fn encoded_word(&self) -> u64 {
    let kind = match self {
      Action::SourceRead { .. } => ACTION_SOURCE_READ,
      Action::TargetRead { .. } => ACTION_TARGET_READ,
      Action::SourceCopy { .. } => ACTION_SOURCE_COPY,
      Action::TargetCopy { .. } => 3,
    };
    ((self.length() - 1) << 2) | kind
  }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BpsPatch {
  pub source_size: u64,
  pub target_size: u64,
  pub metadata: String,
  pub actions: Vec<Action>,
  pub source_checksum: u32,
  pub target_checksum: u32,
  pub patch_checksum: u32,
}

pub fn parse(file: &mut ByteBuffer) -> Result<BpsPatch, Error> {
  if file.file_size() < MAGIC.len() + FOOTER_LEN {
    return Err(Error::InvalidRecord);
  }
  file.seek(0)?;
  file.set_endian(Endian::Little);
  if file.read_bytes(MAGIC.len())? != MAGIC {
    return Err(Error::InvalidMagic);
  }

  let source_size = file.read_vlv()?;
  let target_size = file.read_vlv()?;
  let footer = file.file_size() - FOOTER_LEN;

  let metadata_len = usize::try_from(file.read_vlv()?).map_err(|_| Error::InvalidMetadata)?;
  let metadata = file.read_string(metadata_len).map_err(|_| Error::InvalidMetadata)?;
  if file.position() > footer {
    return Err(Error::InvalidMetadata);
  }

  let mut actions = Vec::new();
  while file.position() < footer {
    let word = file.read_vlv()?;
    let length = (word >> 2) + 1;
    let action = match word & 3 {
      ACTION_SOURCE_READ => Action::SourceRead { length },
      ACTION_TARGET_READ => {
        let length = usize::try_from(length).map_err(|_| Error::InvalidRecord)?;
        Action::TargetRead { bytes: file.read_bytes(length)? }
      }
      ACTION_SOURCE_COPY => Action::SourceCopy { length, offset: file.read_signed_vlv()? },
      _ => Action::TargetCopy { length, offset: file.read_signed_vlv()? },
    };
    actions.push(action);
    if file.position() > footer {
      return Err(Error::InvalidRecord);
    }
  }

  let source_checksum = file.read_u32()?;
  let target_checksum = file.read_u32()?;
  let patch_checksum = file.read_u32()?;
  if file.crc32(0, Some(file.file_size() - 4))? != patch_checksum {
    return Err(Error::PatchChecksumMismatch);
  }

  Ok(BpsPatch {
    source_size,
    target_size,
    metadata,
    actions,
    source_checksum,
    target_checksum,
    patch_checksum,
  })
}

impl BpsPatch {
  pub fn validate_source(&self, rom: &ByteBuffer) -> bool {
    hash::crc32(rom.bytes()) == self.source_checksum
  }

  pub fn apply(&self, rom: &ByteBuffer, validate: bool) -> Result<ByteBuffer, Error> {
    if validate && !self.validate_source(rom) {
      return Err(Error::SourceChecksumMismatch);
    }

    let target_size = usize::try_from(self.target_size).map_err(|_| Error::InvalidRecord)?;
    let source = rom.bytes();
    let mut target = vec![0u8; target_size];
    let mut cursor: usize = 0;
    let mut source_offset: usize = 0;
    let mut target_offset: usize = 0;

    for action in &self.actions {
      match action {
        Action::SourceRead { length } => {
          let length = usize::try_from(*length).map_err(|_| Error::InvalidRecord)?;
          let end = cursor.checked_add(length).ok_or(Error::InvalidRecord)?;
          let bytes = (source.get(cursor..end))
            .ok_or_else(|| Error::PatchFailed("read past the end of the source file".into()))?;
          (target.get_mut(cursor..end))
            .ok_or_else(|| Error::PatchFailed("wrote past the end of the target file".into()))?
            .copy_from_slice(bytes);
          cursor = end;
        }
        Action::TargetRead { bytes } => {
          let end = cursor.checked_add(bytes.len()).ok_or(Error::InvalidRecord)?;
          (target.get_mut(cursor..end))
            .ok_or_else(|| Error::PatchFailed("wrote past the end of the target file".into()))?
            .copy_from_slice(bytes);
          cursor = end;
        }
        Action::SourceCopy { length, offset } => {
          let length = usize::try_from(*length).map_err(|_| Error::InvalidRecord)?;
          source_offset = add_signed(source_offset, *offset)?;
          let end = source_offset.checked_add(length).ok_or(Error::InvalidRecord)?;
          let target_end = cursor.checked_add(length).ok_or(Error::InvalidRecord)?;
          let bytes = (source.get(source_offset..end))
            .ok_or_else(|| Error::PatchFailed("copied past the end of the source file".into()))?;
          (target.get_mut(cursor..target_end))
            .ok_or_else(|| Error::PatchFailed("wrote past the end of the target file".into()))?
            .copy_from_slice(bytes);
          source_offset = end;
          cursor = target_end;
        }
        Action::TargetCopy { length, offset } => {
          target_offset = add_signed(target_offset, *offset)?;
          // Deliberately a forward byte-at-a-time copy. The read head may sit
          // inside the region being written: each pass re-reads bytes this
          // very action just produced, unrolling a repeating pattern with
          // period `cursor - target_offset`. memmove semantics would not.
          for _ in 0..*length {
            let byte = *(target.get(target_offset))
              .ok_or_else(|| Error::PatchFailed("copied past the end of the target file".into()))?;
            *(target.get_mut(cursor))
              .ok_or_else(|| Error::PatchFailed("wrote past the end of the target file".into()))? =
              byte;
            target_offset += 1;
            cursor += 1;
          }
        }
      }
    }

    if cursor as u64 != self.target_size {
      return Err(Error::PatchFailed(format!(
        "patch produced {cursor} bytes where {} were declared",
        self.target_size
      )));
    }
    if validate && hash::crc32(&target) != self.target_checksum {
      return Err(Error::TargetChecksumMismatch);
    }
    Ok(ByteBuffer::from_vec(target))
  }

  pub fn export(&self) -> Result<ByteBuffer, Error> {
    let mut size = MAGIC.len()
      + vlv_len(self.source_size)
      + vlv_len(self.target_size)
      + vlv_len(self.metadata.len() as u64)
      + self.metadata.len()
      + FOOTER_LEN;
    for action in &self.actions {
      size += vlv_len(action.encoded_word());
      size += match action {
        Action::TargetRead { bytes } => bytes.len(),
        Action::SourceCopy { offset, .. } | Action::TargetCopy { offset, .. } => {
          signed_vlv_len(*offset)
        }
        Action::SourceRead { .. } => 0,
      };
    }

    let mut file = ByteBuffer::with_len(size);
    file.set_endian(Endian::Little);
    file.write_bytes(MAGIC)?;
    file.write_vlv(self.source_size)?;
    file.write_vlv(self.target_size)?;
    file.write_vlv(self.metadata.len() as u64)?;
    file.write_string(&self.metadata, None)?;
    for action in &self.actions {
      file.write_vlv(action.encoded_word())?;
      match action {
        Action::TargetRead { bytes } => file.write_bytes(bytes)?,
        Action::SourceCopy { offset, .. } | Action::TargetCopy { offset, .. } => {
          file.write_signed_vlv(*offset)?
        }
        Action::SourceRead { .. } => {}
      }
    }
    file.write_u32(self.source_checksum)?;
    file.write_u32(self.target_checksum)?;
    // The patch checksum covers everything written so far.
    let patch_checksum = file.crc32(0, Some(size - 4))?;
    file.write_u32(patch_checksum)?;
    Ok(file)
  }
}

fn add_signed(base: usize, offset: i64) -> Result<usize, Error> {
  let offset = isize::try_from(offset).map_err(|_| Error::InvalidRecord)?;
  base.checked_add_signed(offset).ok_or(Error::InvalidRecord)
}

/// Builds a patch with the linear strategy: same-position matches become
/// `SourceRead` actions, everything else accumulates into `TargetRead`
/// literals. The delta strategy is an extension point; until it exists the
/// flag falls back to linear, which interoperates through the same apply
/// semantics at some cost in patch size.
pub fn build(original: &ByteBuffer, modified: &ByteBuffer, _delta: bool) -> Result<BpsPatch, Error> {
  let source = original.bytes();
  let target = modified.bytes();
  let mut actions: Vec<Action> = Vec::new();
  let mut pending: Vec<u8> = Vec::new();
  let mut position = 0usize;

  while position < target.len() {
    let mut run = 0usize;
    while position + run < target.len()
      && source.get(position + run) == Some(&target[position + run])
    {
      run += 1;
    }
    if run > 0 {
      if !pending.is_empty() {
        actions.push(Action::TargetRead { bytes: std::mem::take(&mut pending) });
      }
      actions.push(Action::SourceRead { length: run as u64 });
      position += run;
    } else {
      pending.push(target[position]);
      position += 1;
    }
  }
  if !pending.is_empty() {
    actions.push(Action::TargetRead { bytes: pending });
  }

  let mut patch = BpsPatch {
    source_size: source.len() as u64,
    target_size: target.len() as u64,
    metadata: String::new(),
    actions,
    source_checksum: hash::crc32(source),
    target_checksum: hash::crc32(target),
    patch_checksum: 0,
  };
  let exported = patch.export()?;
  patch.patch_checksum = exported.crc32(0, Some(exported.file_size() - 4))?;
  Ok(patch)
}
