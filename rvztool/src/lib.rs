use argp::FromArgs;

pub mod cmd;

// Re-export rvz
pub use rvz;

#[derive(FromArgs, Debug)]
#[argp(subcommand)]
pub enum SubCommand {
    Decompress(cmd::decompress::Args),
}

pub fn run(command: SubCommand) -> rvz::Result<()> {
    match command {
        SubCommand::Decompress(c_args) => cmd::decompress::run(c_args),
    }
}
