use crate::buffer::{self, ByteBuffer};
use crate::patch::Error;

/// Reads and writes the variable-length integers UPS and BPS share.
///
/// In the specifications for both formats this encoding is called
/// `encode`/`decode`: little-endian 7-bit groups, terminated by the byte
/// whose high bit is set.
pub trait Varint {
  fn read_vlv(&mut self) -> Result<u64, Error>;
  fn read_signed_vlv(&mut self) -> Result<i64, Error>;
  fn write_vlv(&mut self, value: u64) -> Result<(), buffer::Error>;
  fn write_signed_vlv(&mut self, value: i64) -> Result<(), buffer::Error>;
}

impl Varint for ByteBuffer {
  /// If the value overflows a `u64` the patch is corrupt and
  /// [`Error::InvalidRecord`] is returned.
  fn read_vlv(&mut self) -> Result<u64, Error> {
    let mut data: u64 = 0;
    let mut shift: u64 = 1;
    loop {
      let byte = self.read_u8()?;
      data = u64::from(byte & 0x7F)
        .checked_mul(shift)
        .and_then(|group| data.checked_add(group))
        .ok_or(Error::InvalidRecord)?;
      if byte & 0x80 != 0 {
        return Ok(data);
      }
      shift = shift.checked_mul(128).ok_or(Error::InvalidRecord)?;
      // The encoder subtracts 1 after emitting each byte. Adding the shift
      // back after each decoded byte reverses that, and is what gives every
      // integer exactly one encoding.
      data = data.checked_add(shift).ok_or(Error::InvalidRecord)?;
    }
  }

  /// BPS carries signed offsets as magnitude-plus-sign: the low bit of the
  /// decoded value is the sign, the remaining bits the magnitude.
  fn read_signed_vlv(&mut self) -> Result<i64, Error> {
    let encoded = self.read_vlv()?;
    let magnitude = (encoded >> 1) as i64;
    Ok(if encoded & 1 == 1 { -magnitude } else { magnitude })
  }

  fn write_vlv(&mut self, mut value: u64) -> Result<(), buffer::Error> {
    loop {
      let group = (value & 0x7F) as u8;
      value >>= 7;
      if value == 0 {
        return self.write_u8(0x80 | group);
      }
      self.write_u8(group)?;
      value -= 1;
    }
  }

  fn write_signed_vlv(&mut self, value: i64) -> Result<(), buffer::Error> {
    self.write_vlv((value.unsigned_abs() << 1) | u64::from(value < 0))
  }
}

/// How many bytes `write_vlv` will emit for `value`.
pub fn vlv_len(mut value: u64) -> usize {
  let mut len = 1;
  loop {
    value >>= 7;
    if value == 0 {
      return len;
    }
    value -= 1;
    len += 1;
  }
}

pub fn signed_vlv_len(value: i64) -> usize {
  vlv_len((value.unsigned_abs() << 1) | u64::from(value < 0))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn round_trip(value: u64) -> usize {
    let mut buffer = ByteBuffer::with_len(16);
    buffer.write_vlv(value).unwrap();
    let len = buffer.position();
    assert_eq!(len, vlv_len(value));
    buffer.seek(0).unwrap();
    assert_eq!(buffer.read_vlv().unwrap(), value);
    assert_eq!(buffer.position(), len);
    len
  }

  #[test]
  fn round_trips_at_group_boundaries() {
    // The bias makes 127 the largest 1-byte value and 16511 the largest
    // 2-byte value, one group more than a plain 7-bit encoding reaches.
    assert_eq!(round_trip(0), 1);
    assert_eq!(round_trip(1), 1);
    assert_eq!(round_trip(127), 1);
    assert_eq!(round_trip(128), 2);
    assert_eq!(round_trip(16383), 2);
    assert_eq!(round_trip(16384), 2);
    assert_eq!(round_trip(16511), 2);
    assert_eq!(round_trip(16512), 3);
    assert_eq!(round_trip(1 << 32), 5);
    assert_eq!(round_trip(1 << 53), 8);
  }

  #[test]
  fn encoded_length_is_monotonic() {
    let mut previous = 0;
    for value in (0..60).map(|shift| 1u64 << shift) {
      let len = vlv_len(value);
      assert!(len >= previous, "vlv_len shrank at {value}");
      previous = len;
    }
  }

  #[test]
  fn known_encodings() {
    let mut buffer = ByteBuffer::with_len(2);
    buffer.write_vlv(127).unwrap();
    assert_eq!(buffer.bytes()[0], 0xFF);
    buffer.seek(0).unwrap();
    buffer.write_vlv(128).unwrap();
    assert_eq!(buffer.bytes(), &[0x00, 0x80]);
  }

  #[test]
  fn decodes_a_rom_patcher_js_vector() {
    let mut buffer = ByteBuffer::from_vec(vec![0x0E, 0xB0, 0x80, 0x00]);
    // Expected value obtained from the RomPatcher.js implementation.
    assert_eq!(buffer.read_vlv().unwrap(), 6286);
    assert_eq!(buffer.position(), 2);
  }

  #[test]
  fn signed_round_trip() {
    for value in [0i64, 1, -1, 63, -64, 8191, -8192, i32::MAX as i64] {
      let mut buffer = ByteBuffer::with_len(16);
      buffer.write_signed_vlv(value).unwrap();
      assert_eq!(buffer.position(), signed_vlv_len(value));
      buffer.seek(0).unwrap();
      assert_eq!(buffer.read_signed_vlv().unwrap(), value);
    }
  }

  #[test]
  fn unterminated_input_is_an_error() {
    let mut buffer = ByteBuffer::from_vec(vec![0x00, 0x00]);
    assert!(buffer.read_vlv().is_err());
  }
}
