mod cmd;
mod exit;
mod logging;
mod output;

use std::path::PathBuf;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "pioneers", version, about = "PIOneERS flight supervisor")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format.
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level.
    #[arg(
        long,
        value_name = "LEVEL",
        default_value = "info",
        env = "PIONEERS_LOG_LEVEL",
        global = true
    )]
    log_level: LogLevel,

    /// Append logs to this file instead of stderr.
    #[arg(long, value_name = "FILE", env = "PIONEERS_LOG_FILE", global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    // A producer's stdout is its channel; its logs must stay on stderr.
    let log_file = match cli.command {
        Command::Produce(_) => None,
        _ => cli.log_file.as_deref(),
    };
    init_logging(cli.log_format, cli.log_level, log_file);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}
