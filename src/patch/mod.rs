use crate::buffer::{self, ByteBuffer};
use std::fmt;

pub mod bps;
pub mod ips;
pub mod ups;
pub mod varint;

pub use bps::BpsPatch;
pub use ips::IpsPatch;
pub use ups::UpsPatch;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, clap::ValueEnum)]
pub enum Kind {
  IPS,
  UPS,
  BPS,
}

impl Kind {
  /// The conventional file extension for patches of this kind.
  pub fn extension(&self) -> &'static str {
    match self {
      Kind::IPS => "ips",
      Kind::UPS => "ups",
      Kind::BPS => "bps",
    }
  }
}

impl fmt::Display for Kind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Kind::IPS => write!(f, "IPS"),
      Kind::UPS => write!(f, "UPS"),
      Kind::BPS => write!(f, "BPS"),
    }
  }
}

/// Identifies a patch buffer by its magic bytes.
pub fn find_patch_kind(file: &ByteBuffer) -> Result<Kind, Error> {
  let bytes = file.bytes();
  if bytes.starts_with(ips::MAGIC) {
    Ok(Kind::IPS)
  } else if bytes.starts_with(ups::MAGIC) {
    Ok(Kind::UPS)
  } else if bytes.starts_with(bps::MAGIC) {
    Ok(Kind::BPS)
  } else {
    Err(Error::UnknownPatchFormat)
  }
}

/// A parsed patch of any supported format. The orchestrator only needs the
/// four operations every codec provides, so an enum keeps dispatch closed.
#[derive(Clone, Debug)]
pub enum Patch {
  IPS(IpsPatch),
  UPS(UpsPatch),
  BPS(BpsPatch),
}

impl Patch {
  pub fn parse(file: &mut ByteBuffer) -> Result<Self, Error> {
    match find_patch_kind(file)? {
      Kind::IPS => ips::parse(file).map(Patch::IPS),
      Kind::UPS => ups::parse(file).map(Patch::UPS),
      Kind::BPS => bps::parse(file).map(Patch::BPS),
    }
  }

  pub fn build(original: &ByteBuffer, modified: &ByteBuffer, kind: Kind) -> Result<Self, Error> {
    match kind {
      Kind::IPS => ips::build(original, modified).map(Patch::IPS),
      Kind::UPS => ups::build(original, modified).map(Patch::UPS),
      Kind::BPS => {
        // Delta encoding is only attempted for inputs small enough to index.
        let delta = original.file_size() <= bps::DELTA_MODE_MAX_SIZE;
        bps::build(original, modified, delta).map(Patch::BPS)
      }
    }
  }

  pub fn kind(&self) -> Kind {
    match self {
      Patch::IPS(_) => Kind::IPS,
      Patch::UPS(_) => Kind::UPS,
      Patch::BPS(_) => Kind::BPS,
    }
  }

  /// Whether `rom` is the file this patch was made for. IPS carries no
  /// checksums, so it accepts anything.
  pub fn validate_source(&self, rom: &ByteBuffer) -> bool {
    match self {
      Patch::IPS(_) => true,
      Patch::UPS(patch) => patch.validate_source(rom),
      Patch::BPS(patch) => patch.validate_source(rom),
    }
  }

  pub fn apply(&self, rom: &ByteBuffer, validate: bool) -> Result<ByteBuffer, Error> {
    match self {
      Patch::IPS(patch) => Ok(patch.apply(rom)),
      Patch::UPS(patch) => patch.apply(rom, validate),
      Patch::BPS(patch) => patch.apply(rom, validate),
    }
  }

  pub fn export(&self) -> Result<ByteBuffer, Error> {
    match self {
      Patch::IPS(patch) => patch.export(),
      Patch::UPS(patch) => patch.export(),
      Patch::BPS(patch) => patch.export(),
    }
  }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
  #[error("Unknown patch format.")]
  UnknownPatchFormat,
  #[error("The patch didn't start with the correct magic string.")]
  InvalidMagic,
  #[error("Encountered an invalid record. The patch may be corrupt.")]
  InvalidRecord,
  #[error("The patch metadata could not be read.")]
  InvalidMetadata,
  #[error("The input file is not the one this patch was made for.")]
  SourceChecksumMismatch,
  #[error("The patched file failed its checksum; the output is not usable.")]
  TargetChecksumMismatch,
  #[error("The patch file failed its own checksum. It may be corrupt.")]
  PatchChecksumMismatch,
  #[error("Patching failed: {0}")]
  PatchFailed(String),
  #[error(transparent)]
  Buffer(#[from] buffer::Error),
}
