use crate::fs;
use anyhow::Context;
use rom_patcher::filename;
use rom_patcher::rom::{self, PatchOptions};
use std::path::PathBuf;

#[derive(Clone, Debug, clap::Args)]
pub struct Args {
  /// The ROM to patch.
  pub rom: PathBuf,
  /// The patch to apply (IPS, UPS or BPS).
  pub patch: PathBuf,
  /// Enforce the checksums embedded in the patch.
  #[arg(long)]
  pub validate_checksum: bool,
  /// Patch as if the ROM carried a copier header, then strip it again.
  #[arg(long)]
  pub add_header: bool,
  /// Strip the copier header before patching and restore it afterwards.
  #[arg(long)]
  pub remove_header: bool,
  /// Repair the console's in-ROM checksum after patching.
  #[arg(long)]
  pub fix_checksum: bool,
  /// Append " (patched)" to the output name.
  #[arg(long)]
  pub output_suffix: bool,
  /// Where to write the result. Defaults to `<patch name>.<rom extension>`.
  #[arg(short, long)]
  pub output: Option<PathBuf>,
}

impl Args {
  pub fn call(self) -> anyhow::Result<()> {
    let rom = fs::read_buffer(&self.rom)?;
    let mut patch_file = fs::read_buffer(&self.patch)?;
    let options = PatchOptions {
      remove_header: self.remove_header,
      add_header: self.add_header,
      validate: self.validate_checksum,
      fix_checksum: self.fix_checksum,
      output_suffix: self.output_suffix,
    };

    let patched = rom::apply_patch(&rom, &mut patch_file, &options)?;
    log::info!(
      "patched ROM: crc32 {:08x}, md5 {}, sha1 {}",
      patched.crc32(0, None)?,
      patched.md5(0, None)?,
      patched.sha1(0, None)?
    );

    let output_path = self
      .output
      .unwrap_or_else(|| filename::patched_rom_name(&self.patch, &self.rom, self.output_suffix));
    fs::write_buffer(&output_path, &patched)
      .with_context(|| format!("couldn't write {}", output_path.display()))?;
    log::info!("wrote {}", output_path.display());
    Ok(())
  }
}
