// Licensed under the Apache-2.0 license

//! Convert a CSV register map to SystemRDL text.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use systemrdl_tools::csv;

#[derive(Parser, Debug)]
#[command(
    name = "csv2rdl",
    version,
    about = "Convert CSV register definitions to SystemRDL"
)]
struct Cli {
    /// CSV input file
    input: PathBuf,

    /// Output RDL file (default: <input-stem>.rdl)
    #[arg(short = 'o', long = "output", value_name = "FILE")]
    output: Option<PathBuf>,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let content = match std::fs::read_to_string(&cli.input) {
        Ok(content) => content,
        Err(e) => {
            eprintln!("error: cannot read {}: {}", cli.input.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let rdl = match csv::csv_to_rdl(&content) {
        Ok(rdl) => rdl,
        Err(e) => {
            eprintln!("{}: {}", cli.input.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let output = cli.output.unwrap_or_else(|| cli.input.with_extension("rdl"));
    if let Err(e) = std::fs::write(&output, rdl) {
        eprintln!("error: cannot write {}: {}", output.display(), e);
        return ExitCode::FAILURE;
    }
    println!("SystemRDL written to {}", output.display());

    ExitCode::SUCCESS
}
