use clap::{Parser, ValueEnum};
use flo::evaluator::InterpreterConfig;
use flo::runner::{self, RunOptions};
use flo::{lexer, parser, repl};
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "flo", version, about = "Interpreter for the flo language")]
struct Cli {
    /// The script file to execute
    #[arg(value_name = "FILE")]
    file: Option<PathBuf>,

    /// Arguments passed to the script as __argv
    #[arg(value_name = "ARGS", trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,

    /// Start the interactive REPL (after running FILE, if given)
    #[arg(short, long)]
    interactive: bool,

    /// Run FILE in script mode even without a #!script line
    #[arg(long)]
    script: bool,

    /// Print an intermediate form instead of running
    #[arg(long, value_enum)]
    emit: Option<Emit>,

    /// Seed for rand()
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Deepest allowed nesting of function calls
    #[arg(long, default_value_t = 10_000)]
    max_depth: usize,

    /// Log pipeline phases to stderr
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Emit {
    Tokens,
    Ast,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = InterpreterConfig {
        max_call_depth: cli.max_depth,
        seed: cli.seed,
    };

    let Some(path) = cli.file.as_ref() else {
        repl::start(config);
        return ExitCode::SUCCESS;
    };

    let source = match fs::read_to_string(path) {
        Ok(source) => source,
        Err(error) => {
            eprintln!("Error reading file '{}': {}", path.display(), error);
            return ExitCode::FAILURE;
        }
    };
    let filename = path.display().to_string();

    let succeeded = match cli.emit {
        Some(emit) => emit_stage(&source, &filename, emit),
        None => {
            let options = RunOptions {
                config: config.clone(),
                force_script: cli.script,
                argv: cli.args.clone(),
            };
            runner::run(&source, Some(&filename), &options)
        }
    };

    if cli.interactive {
        repl::start(config);
    }

    if succeeded {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env("FLO_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn emit_stage(source: &str, filename: &str, emit: Emit) -> bool {
    let tokens = match lexer::tokenize(source, filename) {
        Ok(tokens) => tokens,
        Err(error) => {
            error.report(source, Some(filename));
            return false;
        }
    };

    if emit == Emit::Tokens {
        for token in &tokens {
            println!(
                "{:>4}:{:<3} {:?} {:?}",
                token.line, token.column, token.token_type, token.lexeme
            );
        }
        return true;
    }

    match parser::parse(tokens) {
        Ok(program) => {
            println!("{:#?}", program);
            true
        }
        Err(error) => {
            error.report(source, Some(filename));
            false
        }
    }
}
