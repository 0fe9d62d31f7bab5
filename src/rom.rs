//! Console-specific knowledge: system detection, the copier-header policy,
//! in-ROM checksum repair, and the pipelines that tie the codecs together.

use crate::buffer::{self, ByteBuffer};
use crate::filename;
use crate::patch::{self, Patch};
use std::fmt;

/// The bitmap at `0x104` of every licensed Game Boy cartridge.
pub const GAME_BOY_NINTENDO_LOGO: [u8; 48] = [
  0xCE, 0xED, 0x66, 0x66, 0xCC, 0x0D, 0x00, 0x0B, 0x03, 0x73, 0x00, 0x83, //
  0x00, 0x0C, 0x00, 0x0D, 0x00, 0x08, 0x11, 0x1F, 0x88, 0x89, 0x00, 0x0E, //
  0xDC, 0xCC, 0x6E, 0xE6, 0xDD, 0xDD, 0xD9, 0x99, 0xBB, 0xBB, 0x67, 0x63, //
  0x6E, 0x0E, 0xEC, 0xCC, 0xDD, 0xDC, 0x99, 0x9F, 0xBB, 0xB9, 0x33, 0x3E,
];

const GENESIS_SIGNATURES: [&str; 3] = ["SEGA", "GENESIS", "MEGA DR"];

// The three byte orders N64 dumps circulate in (.z64, .v64, .n64).
const N64_SIGNATURES: [[u8; 4]; 3] = [
  [0x80, 0x37, 0x12, 0x40],
  [0x37, 0x80, 0x40, 0x12],
  [0x40, 0x12, 0x37, 0x80],
];

const FDS_DISK_SIZE: usize = 65500;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum System {
  GameBoy,
  SegaGenesis,
  Nintendo64,
  FamicomDiskSystem,
}

impl fmt::Display for System {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      System::GameBoy => write!(f, "Game Boy"),
      System::SegaGenesis => write!(f, "Sega Genesis"),
      System::Nintendo64 => write!(f, "Nintendo 64"),
      System::FamicomDiskSystem => write!(f, "Famicom Disk System"),
    }
  }
}

/// Recognizes the console a ROM belongs to from its fixed-offset
/// signatures. Anything at or under `0x200` bytes is too small to carry one.
pub fn detect_system(rom: &ByteBuffer) -> Option<System> {
  if rom.file_size() <= 0x200 {
    return None;
  }
  let bytes = rom.bytes();
  // Matching the first 32 logo bytes is enough to identify the console.
  if rom.file_size() >= 0x150 && bytes[0x104..0x124] == GAME_BOY_NINTENDO_LOGO[..32] {
    return Some(System::GameBoy);
  }
  let console_name = String::from_utf8_lossy(&bytes[0x100..0x10C]);
  if GENESIS_SIGNATURES.iter().any(|signature| console_name.contains(signature)) {
    return Some(System::SegaGenesis);
  }
  if rom.file_size() >= 0x40 && N64_SIGNATURES.iter().any(|signature| &bytes[..4] == signature) {
    return Some(System::Nintendo64);
  }
  if rom.file_size() == FDS_DISK_SIZE {
    return Some(System::FamicomDiskSystem);
  }
  None
}

/// One entry of the copier-header table. Dumps whose extension matches are
/// assumed to carry (or want) a `size`-byte header in front of a body that
/// is a whole multiple of `rom_size_multiple`.
#[derive(Debug)]
pub struct HeaderInfo {
  pub extensions: &'static [&'static str],
  pub size: usize,
  pub rom_size_multiple: usize,
  pub name: &'static str,
}

pub const HEADERS: [HeaderInfo; 4] = [
  HeaderInfo { extensions: &["nes"], size: 16, rom_size_multiple: 1024, name: "iNES" },
  HeaderInfo { extensions: &["fds"], size: 16, rom_size_multiple: FDS_DISK_SIZE, name: "fwNES" },
  HeaderInfo { extensions: &["lnx"], size: 64, rom_size_multiple: 1024, name: "LNX" },
  HeaderInfo {
    extensions: &["sfc", "smc", "swc", "fig"],
    size: 512,
    rom_size_multiple: 262144,
    name: "SNES copier",
  },
];

const MAX_REMOVE_SIZE: usize = 0x60_0200;
const MAX_ADD_SIZE: usize = 0x60_0000;

pub fn header_info_for(rom: &ByteBuffer) -> Option<&'static HeaderInfo> {
  let extension = rom.extension()?;
  HEADERS.iter().find(|info| info.extensions.contains(&extension.as_str()))
}

fn removable_header(rom: &ByteBuffer) -> Option<&'static HeaderInfo> {
  let info = header_info_for(rom)?;
  let size = rom.file_size();
  (size <= MAX_REMOVE_SIZE
    && size % 1024 != 0
    && size > info.size
    && (size - info.size) % info.rom_size_multiple == 0)
    .then_some(info)
}

fn addable_header(rom: &ByteBuffer) -> Option<&'static HeaderInfo> {
  let info = header_info_for(rom)?;
  (rom.file_size() <= MAX_ADD_SIZE && rom.file_size() % info.rom_size_multiple == 0)
    .then_some(info)
}

pub fn can_remove_header(rom: &ByteBuffer) -> bool {
  removable_header(rom).is_some()
}

pub fn can_add_header(rom: &ByteBuffer) -> bool {
  addable_header(rom).is_some()
}

fn with_header(rom: &ByteBuffer, info: &HeaderInfo) -> Result<ByteBuffer, buffer::Error> {
  let mut bytes = vec![0u8; info.size + rom.file_size()];
  bytes[info.size..].copy_from_slice(rom.bytes());
  let mut headered = ByteBuffer::from_named_vec(rom.name(), bytes);
  if info.name == "fwNES" {
    // fwNES headers are not all zeroes: magic plus the disk-side count.
    headered.write_bytes(&[0x46, 0x44, 0x53, 0x1A])?;
    headered.write_u8((rom.file_size() / FDS_DISK_SIZE) as u8)?;
    headered.seek(0)?;
  }
  Ok(headered)
}

/// Rewrites the in-ROM checksum the console's boot code verifies. Returns
/// whether the stored value actually changed. Only the Game Boy and the
/// Genesis keep such a checksum; everything else is a no-op.
pub fn fix_checksum(rom: &mut ByteBuffer, system: System) -> Result<bool, buffer::Error> {
  match system {
    System::GameBoy => {
      rom.seek(0x14D)?;
      let current = rom.read_u8()?;
      // The header checksum covers 0x134..=0x14C, 25 bytes. The checksum
      // byte itself at 0x14D is the destination, not part of the sum.
      let mut checksum: u8 = 0;
      rom.seek(0x134)?;
      for _ in 0..25 {
        checksum = checksum.wrapping_sub(rom.read_u8()?).wrapping_sub(1);
      }
      if checksum == current {
        return Ok(false);
      }
      rom.seek(0x14D)?;
      rom.write_u8(checksum)?;
      log::info!("Game Boy header checksum fixed: {current:#04x} -> {checksum:#04x}");
      Ok(true)
    }
    System::SegaGenesis => {
      rom.seek(0x18E)?;
      let current = rom.read_u16()?;
      let mut checksum: u16 = 0;
      rom.seek(0x200)?;
      while rom.file_size() - rom.position() >= 2 {
        checksum = checksum.wrapping_add(rom.read_u16()?);
      }
      if checksum == current {
        return Ok(false);
      }
      rom.seek(0x18E)?;
      rom.write_u16(checksum)?;
      log::info!("Genesis checksum fixed: {current:#06x} -> {checksum:#06x}");
      Ok(true)
    }
    System::Nintendo64 | System::FamicomDiskSystem => Ok(false),
  }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct PatchOptions {
  /// Strip a copier header before patching and put it back afterwards.
  pub remove_header: bool,
  /// Patch as if the ROM had a header, then strip the fake one again.
  pub add_header: bool,
  /// Enforce the checksums the patch embeds.
  pub validate: bool,
  /// Repair the console's in-ROM checksum on the result.
  pub fix_checksum: bool,
  /// Append " (patched)" to the output's display name.
  pub output_suffix: bool,
}

/// The whole "apply" path: sniff the patch format, adjust the header,
/// apply, undo the header adjustment, repair checksums.
pub fn apply_patch(
  rom: &ByteBuffer,
  patch_file: &mut ByteBuffer,
  options: &PatchOptions,
) -> Result<ByteBuffer, patch::Error> {
  let patch = Patch::parse(patch_file)?;
  log::info!("applying {} patch to {}", patch.kind(), rom.name());

  // At most one of the two header adjustments runs; removal wins.
  let removable = options.remove_header.then(|| removable_header(rom)).flatten();
  let addable = match removable {
    None if options.add_header => addable_header(rom),
    _ => None,
  };
  let mut extracted_header: Option<ByteBuffer> = None;
  let mut fake_header_size: Option<usize> = None;
  let working = if let Some(info) = removable {
    log::info!("removing the {} byte {} header before patching", info.size, info.name);
    extracted_header = Some(rom.slice(0, Some(info.size))?);
    let mut body = rom.slice(info.size, None)?;
    body.set_name(rom.name());
    body
  } else if let Some(info) = addable {
    log::info!("patching under a temporary {} byte {} header", info.size, info.name);
    fake_header_size = Some(info.size);
    with_header(rom, info)?
  } else {
    rom.clone()
  };

  let mut patched = patch.apply(&working, options.validate)?;

  if let Some(header) = extracted_header {
    let mut bytes = header.into_vec();
    bytes.extend_from_slice(patched.bytes());
    patched = ByteBuffer::from_vec(bytes);
  } else if let Some(size) = fake_header_size {
    patched = patched.slice(size, None)?;
  }

  if options.fix_checksum {
    if let Some(system) = detect_system(&patched) {
      fix_checksum(&mut patched, system)?;
    }
  }

  let mut name = rom.name().to_string();
  if options.output_suffix {
    name = filename::with_suffix(&name, " (patched)");
  }
  patched.set_name(name);
  Ok(patched)
}

/// The "create" path: diff two ROMs into a patch file of the given format.
pub fn create_patch(
  original: &ByteBuffer,
  modified: &ByteBuffer,
  kind: patch::Kind,
) -> Result<ByteBuffer, patch::Error> {
  log::info!("building a {kind} patch from {} to {}", original.name(), modified.name());
  let patch = Patch::build(original, modified, kind)?;
  patch.export()
}

#[cfg(test)]
mod tests {
  use super::*;

  fn game_boy_rom() -> ByteBuffer {
    let mut bytes = vec![0u8; 0x8000];
    bytes[0x104..0x134].copy_from_slice(&GAME_BOY_NINTENDO_LOGO);
    bytes[0x134..0x140].copy_from_slice(b"TESTCART\0\0\0\0");
    ByteBuffer::from_named_vec("test.gb", bytes)
  }

  #[test]
  fn detects_a_game_boy_rom() {
    assert_eq!(detect_system(&game_boy_rom()), Some(System::GameBoy));
  }

  #[test]
  fn detects_a_genesis_rom() {
    let mut bytes = vec![0u8; 0x400];
    bytes[0x100..0x110].copy_from_slice(b"SEGA MEGA DRIVE ");
    let rom = ByteBuffer::from_vec(bytes);
    assert_eq!(detect_system(&rom), Some(System::SegaGenesis));
  }

  #[test]
  fn detects_an_n64_rom_in_any_byte_order() {
    for signature in N64_SIGNATURES {
      let mut bytes = vec![0u8; 0x1000];
      bytes[..4].copy_from_slice(&signature);
      assert_eq!(
        detect_system(&ByteBuffer::from_vec(bytes)),
        Some(System::Nintendo64)
      );
    }
  }

  #[test]
  fn detects_an_fds_disk_by_its_exact_size() {
    let rom = ByteBuffer::from_vec(vec![0u8; FDS_DISK_SIZE]);
    assert_eq!(detect_system(&rom), Some(System::FamicomDiskSystem));
  }

  #[test]
  fn small_files_are_never_detected() {
    let mut bytes = vec![0u8; 0x200];
    bytes[..4].copy_from_slice(&N64_SIGNATURES[0]);
    assert_eq!(detect_system(&ByteBuffer::from_vec(bytes)), None);
  }

  #[test]
  fn header_removal_policy() {
    // 2 MiB SNES body plus a 512 byte copier header.
    let rom = ByteBuffer::from_named_vec("game.smc", vec![0u8; 512 + 0x200000]);
    assert!(can_remove_header(&rom));
    assert!(!can_add_header(&rom));
    // Without the header the size is a clean multiple instead.
    let bare = ByteBuffer::from_named_vec("game.sfc", vec![0u8; 0x200000]);
    assert!(!can_remove_header(&bare));
    assert!(can_add_header(&bare));
    // Unknown extensions never qualify.
    let other = ByteBuffer::from_named_vec("game.bin", vec![0u8; 512 + 0x200000]);
    assert!(!can_remove_header(&other));
  }

  #[test]
  fn fds_headers_carry_the_fwnes_magic() {
    let rom = ByteBuffer::from_named_vec("game.fds", vec![0xAAu8; FDS_DISK_SIZE * 2]);
    let info = addable_header(&rom).unwrap();
    let headered = with_header(&rom, info).unwrap();
    assert_eq!(headered.file_size(), 16 + FDS_DISK_SIZE * 2);
    assert_eq!(&headered.bytes()[..5], &[0x46, 0x44, 0x53, 0x1A, 2]);
    assert_eq!(&headered.bytes()[5..16], &[0u8; 11]);
  }

  #[test]
  fn fixes_the_game_boy_header_checksum() {
    let mut rom = game_boy_rom();
    assert!(fix_checksum(&mut rom, System::GameBoy).unwrap());
    let sum: u32 = rom.bytes()[0x134..=0x14C].iter().map(|&byte| u32::from(byte)).sum();
    let expected = (0u8).wrapping_sub((sum % 256) as u8).wrapping_sub(25);
    assert_eq!(rom.bytes()[0x14D], expected);
    // A second pass finds nothing to do.
    assert!(!fix_checksum(&mut rom, System::GameBoy).unwrap());
  }

  #[test]
  fn fixes_the_genesis_checksum() {
    let mut bytes = vec![0u8; 0x400];
    bytes[0x100..0x104].copy_from_slice(b"SEGA");
    bytes[0x200..].fill(0x01);
    // 0x100 words of 0x0101 each: the 16-bit sum wraps to 0x0100.
    let mut rom = ByteBuffer::from_vec(bytes);
    assert!(fix_checksum(&mut rom, System::SegaGenesis).unwrap());
    assert_eq!(&rom.bytes()[0x18E..0x190], &[0x01, 0x00]);
    assert!(!fix_checksum(&mut rom, System::SegaGenesis).unwrap());
  }

  #[test]
  fn applies_an_ips_patch_end_to_end() {
    let rom = ByteBuffer::from_named_vec("game.gba", vec![0u8; 8]);
    let mut patch_file = ByteBuffer::from_vec(vec![
      0x50, 0x41, 0x54, 0x43, 0x48, //
      0x00, 0x00, 0x05, 0x00, 0x03, 0xAA, 0xBB, 0xCC, //
      0x45, 0x4F, 0x46,
    ]);
    let options = PatchOptions { output_suffix: true, ..PatchOptions::default() };
    let patched = apply_patch(&rom, &mut patch_file, &options).unwrap();
    assert_eq!(patched.bytes(), &[0, 0, 0, 0, 0, 0xAA, 0xBB, 0xCC]);
    assert_eq!(patched.name(), "game (patched).gba");
  }

  #[test]
  fn unknown_patch_formats_are_rejected() {
    let rom = ByteBuffer::from_vec(vec![0u8; 8]);
    let mut junk = ByteBuffer::from_vec(b"not a patch".to_vec());
    assert!(matches!(
      apply_patch(&rom, &mut junk, &PatchOptions::default()),
      Err(patch::Error::UnknownPatchFormat)
    ));
  }

  #[test]
  fn removed_headers_are_restored_after_patching() {
    // A headered SNES dump whose patch targets the bare body.
    let mut header = vec![0xEEu8; 512];
    header[0] = 0x40;
    let body = vec![0x11u8; 262144];
    let mut with_copier_header = header.clone();
    with_copier_header.extend_from_slice(&body);
    let rom = ByteBuffer::from_named_vec("game.smc", with_copier_header);

    let original = ByteBuffer::from_vec(body);
    let mut modified_bytes = original.bytes().to_vec();
    modified_bytes[0] = 0x99;
    let modified = ByteBuffer::from_vec(modified_bytes);
    let mut patch_file = create_patch(&original, &modified, patch::Kind::BPS).unwrap();

    let options = PatchOptions {
      remove_header: true,
      validate: true,
      ..PatchOptions::default()
    };
    let patched = apply_patch(&rom, &mut patch_file, &options).unwrap();
    assert_eq!(patched.file_size(), 512 + 262144);
    assert_eq!(&patched.bytes()[..512], &header[..]);
    assert_eq!(patched.bytes()[512], 0x99);
    assert_eq!(&patched.bytes()[513..], &modified.bytes()[1..]);
  }

  #[test]
  fn fake_headers_are_stripped_after_patching() {
    // The patch was made against a headered dump, the ROM on disk is bare.
    let bare = vec![0x22u8; 262144];
    let mut headered = vec![0u8; 512];
    headered.extend_from_slice(&bare);
    let original = ByteBuffer::from_vec(headered);
    let mut modified_bytes = original.bytes().to_vec();
    modified_bytes[512] = 0x77;
    let modified = ByteBuffer::from_vec(modified_bytes);
    let mut patch_file = create_patch(&original, &modified, patch::Kind::UPS).unwrap();

    let rom = ByteBuffer::from_named_vec("game.sfc", bare);
    let options = PatchOptions { add_header: true, ..PatchOptions::default() };
    let patched = apply_patch(&rom, &mut patch_file, &options).unwrap();
    assert_eq!(patched.file_size(), 262144);
    assert_eq!(patched.bytes()[0], 0x77);
  }

  #[test]
  fn create_patch_round_trips_through_every_format() {
    let original = ByteBuffer::from_named_vec("a.gb", (0..=255u8).cycle().take(1024).collect());
    let mut bytes = original.bytes().to_vec();
    bytes[37] ^= 0xFF;
    bytes[900..910].fill(0x00);
    let modified = ByteBuffer::from_named_vec("b.gb", bytes);
    for kind in [patch::Kind::IPS, patch::Kind::UPS, patch::Kind::BPS] {
      let mut patch_file = create_patch(&original, &modified, kind).unwrap();
      assert_eq!(patch::find_patch_kind(&patch_file).unwrap(), kind);
      let patched = apply_patch(&original, &mut patch_file, &PatchOptions::default()).unwrap();
      assert_eq!(patched.bytes(), modified.bytes(), "{kind} patch did not round trip");
    }
  }
}
