use crate::{apply, create};

#[derive(Clone, Debug, clap::Parser)]
#[command(name = "rom-patcher", author, version, about, long_about = None)]
pub struct Args {
  #[command(subcommand)]
  pub command: CommandKind,
}

#[derive(Clone, Debug, clap::Subcommand)]
#[command(about)]
pub enum CommandKind {
  /// Apply a patch to a ROM.
  Patch(apply::Args),
  /// Create a patch from an original and a modified ROM.
  Create(create::Args),
}
