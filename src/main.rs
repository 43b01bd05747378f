use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

mod ast;
mod chunk;
mod code_gen;
mod common;
mod compiler;
mod lexer;
mod parser;
mod scope;
mod tree_dump;
mod type_check;
mod vm;

use crate::compiler::{compile, Options};
use crate::vm::{DEFAULT_MAX_STEPS, DEFAULT_MEMORY};

/// C-minus compiler for the TM machine
#[derive(Parser, Debug)]
#[command(name = "cminus")]
#[command(version, about, long_about = None)]
struct Args {
    /// C-minus source file
    #[arg(value_name = "FILE")]
    source: PathBuf,

    /// Print the abstract syntax tree
    #[arg(short = 'a')]
    tree: bool,

    /// Print each scope's symbols as it is closed
    #[arg(short = 's')]
    symbols: bool,

    /// Generate TM assembly
    #[arg(short = 'c')]
    code: bool,

    /// Assembly output file (use "-" for stdout)
    #[arg(short = 'o', value_name = "FILE")]
    output: Option<String>,

    /// Run the generated program on the TM simulator
    #[arg(short = 'r')]
    run: bool,

    /// Simulator data memory size in words
    #[arg(long, default_value_t = DEFAULT_MEMORY)]
    memory: usize,

    /// Simulator instruction limit
    #[arg(long, default_value_t = DEFAULT_MAX_STEPS)]
    max_steps: usize,
}

impl From<Args> for Options {
    fn from(args: Args) -> Self {
        let mut options = Options::new(args.source);
        options.show_tree = args.tree;
        options.show_symbols = args.symbols;
        options.generate = args.code || args.output.is_some();
        options.output = args.output;
        options.run = args.run;
        options.memory = args.memory;
        options.max_steps = args.max_steps;
        options
    }
}

fn main() -> ExitCode {
    env_logger::init();
    let options = Options::from(Args::parse());
    match compile(&options) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}
