use std::fs::{self, File};
use std::io::{self, BufRead, BufWriter, Write};
use std::path::{Path, PathBuf};

use log::info;

use crate::chunk::Instruction;
use crate::code_gen::generate;
use crate::common::{CodeGenError, CompileError, CompileResult};
use crate::parser::parse;
use crate::tree_dump;
use crate::type_check::analyze;
use crate::vm::{Machine, MachineError, DEFAULT_MAX_STEPS, DEFAULT_MEMORY};

/// What the driver should do with one source file.
#[derive(Debug, Clone)]
pub struct Options {
    pub source: PathBuf,
    pub show_tree: bool,
    pub show_symbols: bool,
    pub generate: bool,
    /// `-` writes the listing to stdout; `None` uses the source path with `.tm`.
    pub output: Option<String>,
    pub run: bool,
    pub memory: usize,
    pub max_steps: usize,
}

impl Options {
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            show_tree: false,
            show_symbols: false,
            generate: false,
            output: None,
            run: false,
            memory: DEFAULT_MEMORY,
            max_steps: DEFAULT_MAX_STEPS,
        }
    }

    fn output_path(&self) -> Option<PathBuf> {
        match self.output.as_deref() {
            Some("-") => None,
            Some(path) => Some(PathBuf::from(path)),
            None => Some(self.source.with_extension("tm")),
        }
    }
}

/// Runs the pipeline, printing diagnostics to stderr and requested dumps to
/// stdout.
pub fn compile(options: &Options) -> CompileResult<()> {
    let source = fs::read_to_string(&options.source).map_err(|e| CompileError::File {
        path: options.source.display().to_string(),
        source: e,
    })?;

    info!("parsing {}", options.source.display());
    let mut program = match parse(&source) {
        Ok(program) => program,
        Err(errors) => {
            for error in &errors {
                eprintln!("{}", error);
            }
            return Err(CompileError::Syntax(errors.len()));
        }
    };
    if options.show_tree {
        print!("{}", tree_dump::dump(&program));
    }

    info!("analyzing");
    let analysis = analyze(&mut program, options.show_symbols);
    for line in &analysis.dump {
        println!("{}", line);
    }
    for error in &analysis.errors {
        eprintln!("{}", error);
    }
    if !analysis.errors.is_empty() {
        return Err(CompileError::Semantic(analysis.errors.len()));
    }
    eprintln!("no errors");

    #[cfg(feature = "debug-logging")]
    eprintln!("{:#?}", program);

    if !options.generate && !options.run {
        return Ok(());
    }
    info!("generating code for {} functions", program.functions().count());
    let code = generate(&mut program)?;
    if options.generate {
        write_code(options, &code)?;
    }
    if options.run {
        run(options, &code)?;
    }
    Ok(())
}

fn write_code(options: &Options, code: &[Instruction]) -> Result<(), CodeGenError> {
    match options.output_path() {
        None => write_listing(&mut io::stdout().lock(), &options.source, code).map_err(|e| {
            CodeGenError::OutputTargetUnavailable {
                path: "-".to_string(),
                source: e,
            }
        }),
        Some(path) => {
            info!("writing {}", path.display());
            let unavailable = |e: io::Error| CodeGenError::OutputTargetUnavailable {
                path: path.display().to_string(),
                source: e,
            };
            let file = File::create(&path).map_err(unavailable)?;
            let mut out = BufWriter::new(file);
            write_listing(&mut out, &options.source, code)
                .and_then(|_| out.flush())
                .map_err(unavailable)
        }
    }
}

/// Writes the assembly listing, preceded by `*` comment lines.
pub fn write_listing(out: &mut dyn Write, source: &Path, code: &[Instruction]) -> io::Result<()> {
    writeln!(out, "* C-Minus Compilation to TM Code")?;
    writeln!(out, "* File: {}", source.display())?;
    writeln!(out, "* Instructions: {}", code.len())?;
    for (address, instruction) in code.iter().enumerate() {
        writeln!(out, "{}", instruction.listing(address).trim_end())?;
    }
    Ok(())
}

fn run(options: &Options, code: &[Instruction]) -> CompileResult<()> {
    let stdin = io::stdin();
    let stdout = io::stdout();
    execute(options, code, stdin.lock(), &mut stdout.lock())
}

/// Runs `code` on the simulator, reading `input` calls from `input` one
/// integer per line and writing each `output` value to `out`.
fn execute(
    options: &Options,
    code: &[Instruction],
    input: impl BufRead,
    out: &mut dyn Write,
) -> CompileResult<()> {
    info!("running {} instructions", code.len());
    let mut machine = Machine::new(code, options.memory, options.max_steps);
    let mut lines = input.lines();

    machine.run(
        || match lines.next() {
            Some(Ok(line)) => line.trim().parse::<i64>().map_err(|_| {
                MachineError::Input(format!("'{}' is not an integer", line.trim()))
            }),
            Some(Err(e)) => Err(MachineError::Input(e.to_string())),
            None => Err(MachineError::Input("end of input".to_string())),
        },
        |value| writeln!(out, "{}", value).map_err(|e| MachineError::Output(e.to_string())),
    )?;
    match machine.fault() {
        Some(fault) => Err(CompileError::Fault(fault)),
        None => Ok(()),
    }
}
