use std::process;

mod apply;
mod cli;
mod create;
mod fs;
mod log;

fn main() -> process::ExitCode {
  log::init();
  let args: cli::Args = clap::Parser::parse();
  let result = match args.command {
    cli::CommandKind::Patch(args) => args.call(),
    cli::CommandKind::Create(args) => args.call(),
  };
  match result {
    Ok(()) => process::ExitCode::SUCCESS,
    Err(err) => {
      eprintln!("Error: {err:#}");
      process::ExitCode::FAILURE
    }
  }
}
