// Licensed under the Apache-2.0 license

//! Parse a SystemRDL file and print its syntax tree, optionally emitting
//! the AST JSON interchange form.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser as ClapParser;
use systemrdl_elab::cst::{CstNode, Rule, RuleNode};
use systemrdl_elab::json;
use systemrdl_tools::default_json_filename;

#[derive(ClapParser, Debug)]
#[command(name = "rdl-parser", version, about = "Parse a SystemRDL file and print its syntax tree")]
struct Cli {
    /// SystemRDL input file
    input: PathBuf,

    /// Write AST JSON (default file: <input-stem>_ast.json)
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

    let tree = match systemrdl_elab::parse(&source) {
        Ok(tree) => tree,
        Err(mut diag) => {
            diag.file = cli.input.display().to_string();
            eprintln!("{}", diag);
            return ExitCode::FAILURE;
        }
    };

    println!("=== Syntax Tree ===");
    print_tree(&source, &tree, 0);

    if let Some(json_arg) = cli.json {
        let path = if json_arg.is_empty() {
            default_json_filename(&cli.input, "_ast")
        } else {
            PathBuf::from(json_arg)
        };
        let text = json::ast_to_json_string(&source, &tree);
        if let Err(e) = std::fs::write(&path, text) {
            eprintln!("error: cannot write {}: {}", path.display(), e);
            return ExitCode::FAILURE;
        }
        println!("AST JSON written to {}", path.display());
    }

    ExitCode::SUCCESS
}

/// Selective tree printer: surfaces the structurally interesting rules and
/// recurses through the rest.
fn print_tree(src: &str, node: &RuleNode, depth: usize) {
    let indent = "  ".repeat(depth);
    match node.rule {
        Rule::ComponentNamedDef | Rule::ComponentAnonDef => {
            println!("{}definition: {}", indent, first_line(node.text(src)));
        }
        Rule::ComponentInst => {
            println!("{}instance: {}", indent, first_line(node.text(src)));
        }
        Rule::ExplicitComponentInst => {
            println!("{}instantiation: {}", indent, first_line(node.text(src)));
        }
        Rule::LocalPropertyAssignment | Rule::DynamicPropertyAssignment => {
            println!("{}property: {}", indent, first_line(node.text(src)));
        }
        Rule::RangeSuffix => {
            println!("{}range: {}", indent, first_line(node.text(src)));
        }
        Rule::InstAddrFixed => {
            println!("{}address: {}", indent, first_line(node.text(src)));
        }
        Rule::EnumDef => {
            println!("{}enum: {}", indent, first_line(node.text(src)));
        }
        _ => {}
    }
    for child in &node.children {
        if let CstNode::Rule(rule) = child {
            print_tree(src, rule, depth + 1);
        }
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("")
}
