// Licensed under the Apache-2.0 license

//! Parse and elaborate a SystemRDL file, print the elaborated model and a
//! flat address map, and optionally emit the model JSON interchange form.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use systemrdl_elab::{address_map, json, ElaboratedNode, ModelVisitor};
use systemrdl_tools::default_json_filename;

#[derive(Parser, Debug)]
#[command(
    name = "rdl-elaborator",
    version,
    about = "Elaborate a SystemRDL file into a fully resolved register model"
)]
struct Cli {
    /// SystemRDL input file
    input: PathBuf,

    /// Write elaborated model JSON (default file: <input-stem>_elaborated.json)
    #[arg(short = 'j', long = "json", value_name = "FILE", num_args = 0..=1, default_missing_value = "")]
    json: Option<String>,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let source = match std::fs::read_to_string(&cli.input) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("error: cannot read {}: {}", cli.input.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let result = systemrdl_elab::elaborate_source(&source, &cli.input.display().to_string());
    for diag in &result.diagnostics {
        eprintln!("{}", diag);
    }
    let Some(root) = result.root else {
        return ExitCode::FAILURE;
    };

    println!("=== Elaborated Model ===");
    let mut printer = ModelPrinter;
    systemrdl_elab::traverse(&root, &mut printer);

    println!();
    println!("=== Address Map ===");
    println!("{:<12}{:<8}{:<20}Path", "Address", "Size", "Name");
    for entry in address_map(&root) {
        println!(
            "{:#010x}  {:<6}  {:<18}  {}",
            entry.address, entry.size, entry.name, entry.path
        );
    }

    if let Some(json_arg) = cli.json {
        let path = if json_arg.is_empty() {
            default_json_filename(&cli.input, "_elaborated")
        } else {
            PathBuf::from(json_arg)
        };
        let text = json::model_to_json_string(&root);
        if let Err(e) = std::fs::write(&path, text) {
            eprintln!("error: cannot write {}: {}", path.display(), e);
            return ExitCode::FAILURE;
        }
        println!("Model JSON written to {}", path.display());
    }

    ExitCode::SUCCESS
}

struct ModelPrinter;

impl ModelVisitor for ModelPrinter {
    fn pre_visit(&mut self, node: &ElaboratedNode, depth: usize) {
        let indent = "  ".repeat(depth);
        let mut line = format!("{}{} {}", indent, node.kind.as_str(), node.inst_name);
        match (node.msb(), node.lsb()) {
            (Some(msb), Some(lsb)) => {
                line.push_str(&format!(" [{}:{}]", msb, lsb));
            }
            _ => {
                line.push_str(&format!(" @ {:#x}", node.absolute_address));
            }
        }
        if node.size > 0 {
            line.push_str(&format!(" (size: {} bytes)", node.size));
        }
        if !node.array_dimensions.is_empty() {
            let dims: Vec<String> = node
                .array_dimensions
                .iter()
                .map(|d| d.to_string())
                .collect();
            line.push_str(&format!(" [array: {}]", dims.join("x")));
        }
        println!("{}", line);

        for (name, value) in &node.properties {
            println!("{}  {} = {}", indent, name, value);
        }
    }
}
