//! Port agent daemon entry point. See `portagentd::cli`.

use std::process;

use anyhow::Result;
use clap::Parser;

use portagentd::cli::{self, Args};

fn main() -> Result<()> {
    let code = cli::run(Args::parse())?;
    process::exit(code);
}
