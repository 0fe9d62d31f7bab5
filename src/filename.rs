//! Derived names for the files the tool writes.

use crate::patch::Kind;
use std::path::{Path, PathBuf};

fn file_stem(path: &Path, fallback: &str) -> String {
  path
    .file_stem()
    .map(|stem| stem.to_string_lossy().into_owned())
    .unwrap_or_else(|| fallback.to_string())
}

/// The conventional name for a patched ROM: the patch's stem with the ROM's
/// extension, so "Hack v1.2.ips" applied to "game.sfc" becomes
/// "Hack v1.2.sfc".
pub fn patched_rom_name(patch_path: &Path, rom_path: &Path, patched_suffix: bool) -> PathBuf {
  let mut name = file_stem(patch_path, "patched");
  if patched_suffix {
    name.push_str(" (patched)");
  }
  let mut path = PathBuf::from(name);
  if let Some(extension) = rom_path.extension() {
    path.set_extension(extension);
  }
  path
}

/// The conventional name for a created patch: the modified ROM's stem with
/// the format's extension.
pub fn patch_name(modified_path: &Path, kind: Kind) -> PathBuf {
  let mut path = PathBuf::from(file_stem(modified_path, "patch"));
  path.set_extension(kind.extension());
  path
}

/// Appends `suffix` to a display name, keeping any extension in place.
pub fn with_suffix(name: &str, suffix: &str) -> String {
  match name.rsplit_once('.') {
    Some((stem, extension)) if !stem.is_empty() && !extension.is_empty() => {
      format!("{stem}{suffix}.{extension}")
    }
    _ => format!("{name}{suffix}"),
  }
}
