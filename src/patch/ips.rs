//! Documentation: https://zerosoft.zophar.net/ips.php

use crate::buffer::ByteBuffer;
use crate::patch::Error;

pub const MAGIC: &[u8] = b"PATCH";

const EOF_MARKER: u32 = u32::from_be_bytes([0, b'E', b'O', b'F']);
// Record offsets are 24 bits on the wire.
const MAX_FILE_SIZE: usize = 0x100_0000;
const MAX_RECORD_LEN: usize = 0xFFFF;
// A fresh simple record costs 5 header bytes; runs closer than this to the
// previous record are cheaper to merge into it.
const MERGE_DISTANCE: usize = 6;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Record {
  Simple { offset: u32, data: Vec<u8> },
  Rle { offset: u32, length: u16, byte: u8 },
}

impl Record {
  fn len(&self) -> usize {
    match self {
      Record::Simple { data, .. } => data.len(),
      Record::Rle { length, .. } => usize::from(*length),
    }
  }

  fn end(&self) -> usize {
    match self {
      Record::Simple { offset, .. } | Record::Rle { offset, .. } => *offset as usize + self.len(),
    }
  }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct IpsPatch {
  pub records: Vec<Record>,
  /// Some patches shrink the file; this is the final size when they do.
  pub truncate: Option<u32>,
}

pub fn parse(file: &mut ByteBuffer) -> Result<IpsPatch, Error> {
  file.seek(0)?;
  if file.read_bytes(MAGIC.len())? != MAGIC {
    return Err(Error::InvalidMagic);
  }
  let mut patch = IpsPatch::default();
  loop {
    let offset = file.read_u24()?;
    if offset == EOF_MARKER {
      // "EOF" doubles as a legal record offset. It only ends the stream when
      // nothing follows, or when exactly a 3-byte truncation size follows.
      match file.file_size() - file.position() {
        0 => break,
        3 => {
          patch.truncate = Some(file.read_u24()?);
          break;
        }
        _ => {}
      }
    }
    let size = file.read_u16()?;
    if size == 0 {
      let length = file.read_u16()?;
      if length == 0 {
        return Err(Error::InvalidRecord);
      }
      let byte = file.read_u8()?;
      patch.records.push(Record::Rle { offset, length, byte });
    } else {
      let data = file.read_bytes(usize::from(size))?;
      patch.records.push(Record::Simple { offset, data });
    }
  }
  Ok(patch)
}

impl IpsPatch {
  /// IPS binds no checksums, so any input is acceptable.
  pub fn validate_source(&self, _rom: &ByteBuffer) -> bool {
    true
  }

  /// Records overwrite, so applying a patch twice is the same as once.
  pub fn apply(&self, rom: &ByteBuffer) -> ByteBuffer {
    let target_size = match self.truncate {
      Some(truncate) => truncate as usize,
      None => (self.records.iter())
        .map(Record::end)
        .fold(rom.file_size(), usize::max),
    };
    let mut target = vec![0u8; target_size];
    let prefix = rom.file_size().min(target_size);
    target[..prefix].copy_from_slice(&rom.bytes()[..prefix]);

    for record in &self.records {
      let offset = match record {
        Record::Simple { offset, .. } | Record::Rle { offset, .. } => *offset as usize,
      };
      if offset >= target_size {
        continue;
      }
      let end = target_size.min(offset + record.len());
      match record {
        Record::Simple { data, .. } => target[offset..end].copy_from_slice(&data[..end - offset]),
        Record::Rle { byte, .. } => target[offset..end].fill(*byte),
      }
    }
    ByteBuffer::from_vec(target)
  }

  pub fn export(&self) -> Result<ByteBuffer, Error> {
    let mut size = MAGIC.len() + 3;
    for record in &self.records {
      size += match record {
        Record::Simple { data, .. } => 3 + 2 + data.len(),
        Record::Rle { .. } => 3 + 2 + 2 + 1,
      };
    }
    if self.truncate.is_some() {
      size += 3;
    }

    let mut file = ByteBuffer::with_len(size);
    file.write_bytes(MAGIC)?;
    for record in &self.records {
      match record {
        Record::Simple { offset, data } => {
          file.write_u24(*offset)?;
          file.write_u16(data.len() as u16)?;
          file.write_bytes(data)?;
        }
        Record::Rle { offset, length, byte } => {
          file.write_u24(*offset)?;
          file.write_u16(0)?;
          file.write_u16(*length)?;
          file.write_u8(*byte)?;
        }
      }
    }
    file.write_bytes(b"EOF")?;
    if let Some(truncate) = self.truncate {
      file.write_u24(truncate)?;
    }
    Ok(file)
  }
}

/// Diffs `modified` against `original` into a patch. The record layout
/// (including the merge heuristic) matches Rom Patcher JS byte for byte so
/// that both tools emit identical patches for identical inputs.
pub fn build(original: &ByteBuffer, modified: &ByteBuffer) -> Result<IpsPatch, Error> {
  let source = original.bytes();
  let target = modified.bytes();
  let mut patch = IpsPatch::default();
  // Index of the last emitted record a nearby run may merge into.
  let mut merge_candidate: Option<usize> = None;
  let mut position = 0usize;

  while position < target.len() {
    let mut source_byte = source.get(position).copied().unwrap_or(0);
    let mut target_byte = target[position];
    position += 1;
    if source_byte == target_byte {
      continue;
    }

    let start = position - 1;
    let mut rle_eligible = true;
    let mut data: Vec<u8> = Vec::new();
    while source_byte != target_byte && data.len() < MAX_RECORD_LEN {
      data.push(target_byte);
      if target_byte != data[0] {
        rle_eligible = false;
      }
      if position >= target.len() || data.len() == MAX_RECORD_LEN {
        break;
      }
      source_byte = source.get(position).copied().unwrap_or(0);
      target_byte = target[position];
      position += 1;
    }

    if let Some(index) = merge_candidate {
      let Record::Simple { offset, data: previous } = &mut patch.records[index] else {
        unreachable!("only simple records are merge candidates");
      };
      let previous_end = *offset as usize + previous.len();
      let distance = start - previous_end;
      if distance < MERGE_DISTANCE && previous.len() + distance + data.len() < MAX_RECORD_LEN {
        if rle_eligible && data.len() > MERGE_DISTANCE {
          // This run is worth its own RLE record. Rescan it from the top
          // with merging suppressed instead of folding it in.
          position = start;
          merge_candidate = None;
        } else {
          previous.extend_from_slice(&target[previous_end..start]);
          previous.extend_from_slice(&data);
        }
        continue;
      }
    }

    if start >= MAX_FILE_SIZE {
      return Err(Error::PatchFailed("files are too big for the IPS format".into()));
    }
    if rle_eligible && data.len() > 2 {
      patch.records.push(Record::Rle {
        offset: start as u32,
        length: data.len() as u16,
        byte: data[0],
      });
      merge_candidate = None;
    } else {
      patch.records.push(Record::Simple { offset: start as u32, data });
      merge_candidate = Some(patch.records.len() - 1);
    }
  }

  if target.len() > source.len() {
    // A grown file whose new tail is all zeroes produces no record, but the
    // applier derives the output size from the records. Pin the size with a
    // one-byte write at the very end.
    let covered = patch.records.last().map(Record::end).unwrap_or(0);
    if covered < target.len() {
      if target.len() - 1 >= MAX_FILE_SIZE {
        return Err(Error::PatchFailed("files are too big for the IPS format".into()));
      }
      patch.records.push(Record::Simple {
        offset: (target.len() - 1) as u32,
        data: vec![0x00],
      });
    }
  } else if target.len() < source.len() {
    patch.truncate = Some(target.len() as u32);
  }
  Ok(patch)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn parse_bytes(bytes: &[u8]) -> IpsPatch {
    parse(&mut ByteBuffer::from_vec(bytes.to_vec())).unwrap()
  }

  #[test]
  fn applies_a_simple_record() {
    let patch = parse_bytes(&[
      0x50, 0x41, 0x54, 0x43, 0x48, // PATCH
      0x00, 0x00, 0x05, 0x00, 0x03, 0xAA, 0xBB, 0xCC, // 3 bytes at 5
      0x45, 0x4F, 0x46, // EOF
    ]);
    let rom = ByteBuffer::from_vec(vec![0u8; 8]);
    assert_eq!(
      patch.apply(&rom).bytes(),
      &[0x00, 0x00, 0x00, 0x00, 0x00, 0xAA, 0xBB, 0xCC]
    );
  }

  #[test]
  fn applies_an_rle_record() {
    let patch = parse_bytes(&[
      0x50, 0x41, 0x54, 0x43, 0x48, // PATCH
      0x00, 0x00, 0x02, 0x00, 0x00, 0x00, 0x04, 0xFF, // 4x 0xFF at 2
      0x45, 0x4F, 0x46, // EOF
    ]);
    let rom = ByteBuffer::from_vec(vec![0u8; 6]);
    assert_eq!(patch.apply(&rom).bytes(), &[0x00, 0x00, 0xFF, 0xFF, 0xFF, 0xFF]);
  }

  #[test]
  fn applies_a_truncating_patch() {
    let patch = parse_bytes(&[
      0x50, 0x41, 0x54, 0x43, 0x48, // PATCH
      0x45, 0x4F, 0x46, // EOF
      0x00, 0x00, 0x04, // truncate to 4 bytes
    ]);
    assert_eq!(patch.truncate, Some(4));
    let rom = ByteBuffer::from_vec(vec![0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88]);
    assert_eq!(patch.apply(&rom).bytes(), &[0x11, 0x22, 0x33, 0x44]);
  }

  #[test]
  fn records_past_the_input_grow_the_file() {
    let patch = parse_bytes(&[
      0x50, 0x41, 0x54, 0x43, 0x48, //
      0x00, 0x00, 0x06, 0x00, 0x02, 0x01, 0x02, //
      0x45, 0x4F, 0x46,
    ]);
    let rom = ByteBuffer::from_vec(vec![0xAAu8; 4]);
    assert_eq!(
      patch.apply(&rom).bytes(),
      &[0xAA, 0xAA, 0xAA, 0xAA, 0x00, 0x00, 0x01, 0x02]
    );
  }

  #[test]
  fn apply_is_idempotent() {
    let patch = parse_bytes(&[
      0x50, 0x41, 0x54, 0x43, 0x48, //
      0x00, 0x00, 0x01, 0x00, 0x02, 0xAA, 0xBB, //
      0x00, 0x00, 0x02, 0x00, 0x00, 0x00, 0x03, 0x77, // overlapping RLE
      0x45, 0x4F, 0x46,
    ]);
    let rom = ByteBuffer::from_vec(vec![0u8; 6]);
    let once = patch.apply(&rom);
    let twice = patch.apply(&once);
    assert_eq!(once.bytes(), twice.bytes());
  }

  #[test]
  fn rejects_a_bad_magic() {
    let mut file = ByteBuffer::from_vec(b"PETCHxxxxxx".to_vec());
    assert!(matches!(parse(&mut file), Err(Error::InvalidMagic)));
  }

  #[test]
  fn build_emits_rle_for_uniform_runs() {
    let original = ByteBuffer::from_vec(vec![0u8; 32]);
    let mut bytes = vec![0u8; 32];
    bytes[8..24].fill(0xEE);
    let modified = ByteBuffer::from_vec(bytes);
    let patch = build(&original, &modified).unwrap();
    assert_eq!(
      patch.records,
      vec![Record::Rle { offset: 8, length: 16, byte: 0xEE }]
    );
  }

  #[test]
  fn build_merges_nearby_simple_records() {
    let original = ByteBuffer::from_vec(vec![0u8; 16]);
    let mut bytes = vec![0u8; 16];
    bytes[2] = 1;
    bytes[3] = 2;
    // 3 identical bytes apart: cheaper to merge than to open a new record.
    bytes[7] = 3;
    let modified = ByteBuffer::from_vec(bytes);
    let patch = build(&original, &modified).unwrap();
    assert_eq!(
      patch.records,
      vec![Record::Simple { offset: 2, data: vec![1, 2, 0, 0, 0, 3] }]
    );
  }

  #[test]
  fn build_truncates_when_the_file_shrinks() {
    let original = ByteBuffer::from_vec(vec![1u8; 10]);
    let modified = ByteBuffer::from_vec(vec![1u8; 6]);
    let patch = build(&original, &modified).unwrap();
    assert!(patch.records.is_empty());
    assert_eq!(patch.truncate, Some(6));
    assert_eq!(patch.apply(&original).bytes(), modified.bytes());
  }

  #[test]
  fn build_pins_the_size_of_a_grown_file() {
    let original = ByteBuffer::from_vec(vec![1u8; 4]);
    let modified = ByteBuffer::from_vec(vec![1, 1, 1, 1, 0, 0, 0, 0]);
    let patch = build(&original, &modified).unwrap();
    assert_eq!(
      patch.records,
      vec![Record::Simple { offset: 7, data: vec![0x00] }]
    );
    assert_eq!(patch.apply(&original).bytes(), modified.bytes());
  }

  #[test]
  fn build_round_trips_through_apply() {
    let original = ByteBuffer::from_vec((0..=255u8).cycle().take(2048).collect());
    let mut bytes = original.bytes().to_vec();
    bytes[0] = 0xFE;
    bytes[100..120].fill(0x55);
    bytes[1500] ^= 0xFF;
    bytes.extend_from_slice(&[9, 9, 9, 0, 0]);
    let modified = ByteBuffer::from_vec(bytes);
    let patch = build(&original, &modified).unwrap();
    assert_eq!(patch.apply(&original).bytes(), modified.bytes());
  }

  #[test]
  fn build_rejects_files_too_big_for_the_format() {
    let original = ByteBuffer::from_vec(vec![0u8; MAX_FILE_SIZE + 2]);
    let mut bytes = vec![0u8; MAX_FILE_SIZE + 2];
    bytes[MAX_FILE_SIZE + 1] = 0xFF;
    let modified = ByteBuffer::from_vec(bytes);
    assert!(matches!(
      build(&original, &modified),
      Err(Error::PatchFailed(_))
    ));
  }

  #[test]
  fn parse_export_round_trip() {
    let bytes = [
      0x50, 0x41, 0x54, 0x43, 0x48, //
      0x00, 0x00, 0x05, 0x00, 0x03, 0xAA, 0xBB, 0xCC, //
      0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x10, 0xFF, //
      0x45, 0x4F, 0x46, //
      0x00, 0x00, 0x20,
    ];
    let patch = parse_bytes(&bytes);
    let exported = patch.export().unwrap();
    assert_eq!(exported.bytes(), &bytes);
    let reparsed = parse(&mut exported.clone()).unwrap();
    assert_eq!(reparsed, patch);
  }
}
