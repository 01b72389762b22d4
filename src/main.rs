//! Punto de entrada ("driver").
//!
//! Este módulo orquesta las diferentes fases del proceso de
//! compilación y expone una CLI.

use anyhow::Context;
use clap::{crate_version, Arg, ArgMatches, Command};
use log::{info, LevelFilter, Log, Metadata, Record};

use sysyc::{
    error::{Diagnostics, Phase},
    lex::Lexer,
    opt, parse, source, target,
};

use std::{
    fs::{self, File},
    io::{self, BufWriter, Write},
    process,
};

/// Forma de la salida.
#[derive(Copy, Clone, Debug)]
enum Form {
    Eeyore,
    Tigger,
    Assembly,
}

/// Razones por las que una compilación termina sin salida.
enum Failure {
    /// Errores en el código fuente.
    Source(Diagnostics),

    /// Fallo de lectura o escritura.
    Io(anyhow::Error),
}

impl From<anyhow::Error> for Failure {
    fn from(error: anyhow::Error) -> Self {
        Failure::Io(error)
    }
}

impl From<Diagnostics> for Failure {
    fn from(diagnostics: Diagnostics) -> Self {
        Failure::Source(diagnostics)
    }
}

fn main() {
    // Parsing de CLI; clap termina con estado 2 ante argumentos inválidos
    let args = Command::new("SysY compiler")
        .version(crate_version!())
        .arg(
            Arg::new("asm")
                .short('S')
                .help("Generate assembly (implied, kept for compatibility)"),
        )
        .arg(
            Arg::new("eeyore")
                .short('e')
                .conflicts_with("tigger")
                .help("Emit Eeyore IR instead of assembly"),
        )
        .arg(
            Arg::new("tigger")
                .short('t')
                .help("Emit Tigger IR instead of assembly"),
        )
        .arg(
            Arg::new("input")
                .required(true)
                .value_name("INPUT")
                .help("SysY source file"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .takes_value(true)
                .required(true)
                .value_name("FILE")
                .help("Output file ('-' for stdout)"),
        )
        .arg(
            Arg::new("opt")
                .short('O')
                .takes_value(true)
                .value_name("LEVEL")
                .default_value("1")
                .possible_values(["0", "1"])
                .help("Optimization level"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .multiple_occurrences(true)
                .help("Log compiler stages to stderr (repeat for more detail)"),
        )
        .get_matches();

    install_logger(args.occurrences_of("verbose"));

    let status = match run(&args) {
        Ok(()) => 0,

        Err(Failure::Source(diagnostics)) => {
            eprint!("{}", diagnostics);
            match diagnostics.kind() {
                Phase::Lexical | Phase::Syntax => 1,
                Phase::Semantic => 3,
            }
        }

        Err(Failure::Io(error)) => {
            eprintln!("Error: {:?}", error);
            4
        }
    };

    process::exit(status);
}

fn run(args: &ArgMatches) -> Result<(), Failure> {
    // Se extraen argumentos necesarios
    let input = args.value_of("input").expect("clap allowed a missing input");
    let output = args.value_of("output").expect("clap allowed a missing output");
    let optimize = args.value_of("opt") != Some("0");

    let form = if args.is_present("eeyore") {
        Form::Eeyore
    } else if args.is_present("tigger") {
        Form::Tigger
    } else {
        Form::Assembly
    };

    let text = fs::read_to_string(input)
        .with_context(|| format!("Failed to open for reading: {}", input))?;

    let (start, stream) = source::consume(text.as_bytes(), input);
    let tokens = Lexer::new(start, stream)
        .try_exhaustive()
        .map_err(|errors| Diagnostics::from(errors).phase(Phase::Lexical))?;

    let ast = parse::parse(tokens.iter())
        .map_err(|error| Diagnostics::from(error).phase(Phase::Syntax))?;

    let mut program = ast.resolve().map_err(Diagnostics::from)?;
    if optimize {
        program = opt::optimize(program);
    }

    info!("Emitting {:?} to {}", form, output);

    // Nada se escribe hasta que el programa es válido
    let mut sink: Box<dyn Write> = match output {
        "-" => Box::new(io::stdout()),
        path => {
            let file = File::create(path)
                .with_context(|| format!("Failed to open for writing: {}", path))?;

            Box::new(BufWriter::new(file))
        }
    };

    let written = match form {
        Form::Eeyore => write!(sink, "{}", program),
        Form::Tigger => write!(sink, "{}", target::lower(&program)),
        Form::Assembly => target::emit(&target::lower(&program), &mut sink),
    };

    written
        .and_then(|()| sink.flush())
        .with_context(|| format!("Failed to emit to: {}", output))?;

    Ok(())
}

/// Registro mínimo hacia stderr.
struct StderrLogger;

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            eprintln!("[{}] {}: {}", record.level(), record.target(), record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: StderrLogger = StderrLogger;

fn install_logger(verbosity: u64) {
    let level = match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }
}
