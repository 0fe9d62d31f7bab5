//! The checksums the patch formats and ROM headers rely on, plus the
//! digests reported for file identification. None of these carry any
//! security weight.

use sha1::Digest;

const CRC16: crc::Crc<u16> = crc::Crc::<u16>::new(&crc::CRC_16_IBM_3740);

/// IEEE CRC32, reflected, polynomial `0xEDB88320`. This is the checksum
/// UPS and BPS embed in their footers.
pub fn crc32(bytes: &[u8]) -> u32 {
  crc32fast::hash(bytes)
}

pub fn adler32(bytes: &[u8]) -> u32 {
  let mut hasher = simd_adler32::Adler32::new();
  hasher.write(bytes);
  hasher.finish()
}

/// CRC-16/CCITT-FALSE: polynomial `0x1021`, seed `0xFFFF`, unreflected.
pub fn crc16(bytes: &[u8]) -> u16 {
  CRC16.checksum(bytes)
}

pub fn md5(bytes: &[u8]) -> String {
  format!("{:x}", md5::compute(bytes))
}

pub fn sha1(bytes: &[u8]) -> String {
  format!("{:x}", sha1::Sha1::digest(bytes))
}
