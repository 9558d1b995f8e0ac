//! Command-line entry point: loads a story file, wires up terminal-backed
//! delegates, and runs the interpreter to completion.

use clap::Parser;
use zmtrellis::cli_io::{DumbTerminalWindow, FileTraceSink, PromptingSaveChooser, SilentSound, StdinSource, StdoutSink};
use zmtrellis::interpreter::Interpreter;
use zmtrellis::quetzal::RestoreGame;
use zmtrellis::vm::{Game, VM};
use log::error;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "zmtrellis", about = "A Z-Machine story-file interpreter")]
struct Cli {
    /// Path to the story file (.z3/.z5/.z8/.dat)
    story: PathBuf,

    /// Restore this save file before the first instruction runs
    #[arg(long)]
    restore: Option<PathBuf>,

    /// Write save files here instead of prompting (still prompts for restore)
    #[arg(long)]
    save: Option<PathBuf>,

    /// Raise log verbosity: -v for info, -vv for debug
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Write one formatted line per executed instruction to this file
    #[arg(long)]
    trace: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            error!("{message}");
            eprintln!("zmtrellis: {message}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), String> {
    let memory = fs::read(&cli.story).map_err(|e| format!("reading {}: {e}", cli.story.display()))?;
    let game = Game::from_memory(memory).map_err(|e| e.to_string())?;
    let mut vm = VM::new(game);

    if let Some(path) = &cli.restore {
        let restore = RestoreGame::from_file(path).map_err(|e| format!("restoring {}: {e}", path.display()))?;
        restore.restore_to_vm(&mut vm).map_err(|e| format!("restoring {}: {e}", path.display()))?;
    }

    let suggested_save = cli.save.clone();
    let mut interpreter = Interpreter::new(
        vm,
        Box::new(StdoutSink),
        Box::new(StdinSource),
        Box::new(PromptingSaveChooser::with_default(suggested_save)),
        Box::new(DumbTerminalWindow),
        Box::new(SilentSound),
    );

    if let Some(path) = &cli.trace {
        let sink = FileTraceSink::create(path).map_err(|e| format!("opening trace file {}: {e}", path.display()))?;
        interpreter = interpreter.with_trace(Box::new(sink));
    }

    interpreter.run().map_err(|e| e.to_string())
}
