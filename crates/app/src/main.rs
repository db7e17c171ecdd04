mod cli;
mod html;
mod safety;

use clap::Parser;

fn main() {
    if let Err(err) = run() {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    cli::handle_commands(cli::Cli::parse())
}
