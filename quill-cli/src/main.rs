use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use clap::error::ErrorKind;
use quill_core::interpreter::{DEFAULT_MAX_CALL_DEPTH, DEFAULT_STEP_LIMIT};
use quill_core::{ExecConfig, Mode, PipelineConfig, SourceMap, run};
use tracing_subscriber::EnvFilter;

/// Command-line arguments: one mode flag and one source file.
#[derive(Parser, Debug)]
#[command(version, about = "Run stages of the Quill pipeline", long_about = None)]
struct Cli {
    #[arg(
        value_name = "MODE",
        allow_hyphen_values = true,
        help = "Stage to run: --preprocess, --tokenize, --parse, --monolith, --execute, --compile"
    )]
    mode: String,

    #[arg(value_name = "SOURCE", help = "Source file to process")]
    source: PathBuf,

    #[arg(
        short = 'I',
        long = "include-dir",
        value_name = "DIR",
        help = "Additional directory searched by #include (repeatable)"
    )]
    include_dirs: Vec<PathBuf>,

    #[arg(
        long,
        env = "QUILL_STEP_LIMIT",
        default_value_t = DEFAULT_STEP_LIMIT,
        help = "Interpreter step budget; 0 disables it"
    )]
    step_limit: u64,

    #[arg(long, default_value_t = DEFAULT_MAX_CALL_DEPTH, help = "Maximum interpreter call depth")]
    max_call_depth: usize,
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) {
                err.exit();
            }
            let _ = err.print();
            return ExitCode::FAILURE;
        }
    };
    init_tracing();

    match execute(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn execute(cli: Cli) -> Result<ExitCode> {
    let mode = Mode::from_flag(&cli.mode)?;

    let mut sources = SourceMap::new();
    let file = sources.load(&cli.source)?;

    let config = PipelineConfig {
        include_dirs: cli.include_dirs,
        exec: ExecConfig {
            step_limit: (cli.step_limit > 0).then_some(cli.step_limit),
            max_call_depth: cli.max_call_depth,
        },
    };

    let outcome = {
        let mut stdout = io::stdout().lock();
        let outcome = run(mode, &mut sources, file, &config, &mut stdout)?;
        stdout.flush().context("failed to flush stage output")?;
        outcome
    };

    let mut stderr = io::stderr().lock();
    for diagnostic in &outcome.diagnostics {
        writeln!(stderr, "{}", diagnostic.render(&sources))?;
    }

    Ok(if outcome.has_errors {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}
