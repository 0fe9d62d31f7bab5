use crate::fs;
use anyhow::Context;
use rom_patcher::patch::Kind;
use rom_patcher::{filename, rom};
use std::path::PathBuf;

#[derive(Clone, Debug, clap::Args)]
pub struct Args {
  /// The unmodified ROM.
  pub original: PathBuf,
  /// The modified ROM the patch should reproduce.
  pub modified: PathBuf,
  /// The patch format to emit.
  #[arg(long, value_enum, default_value = "ips")]
  pub format: Kind,
  /// Where to write the patch. Defaults to `<modified name>.<format>`.
  #[arg(short, long)]
  pub output: Option<PathBuf>,
}

impl Args {
  pub fn call(self) -> anyhow::Result<()> {
    let original = fs::read_buffer(&self.original)?;
    let modified = fs::read_buffer(&self.modified)?;

    let patch_file = rom::create_patch(&original, &modified, self.format)?;
    let output_path = self
      .output
      .unwrap_or_else(|| filename::patch_name(&self.modified, self.format));
    fs::write_buffer(&output_path, &patch_file)
      .with_context(|| format!("couldn't write {}", output_path.display()))?;
    log::info!(
      "wrote a {} byte {} patch to {}",
      patch_file.file_size(),
      self.format,
      output_path.display()
    );
    Ok(())
  }
}
