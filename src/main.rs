//! Ferrite Functions - run Redis Functions commands from the command line
//!
//! Libraries given with `--load` are loaded first (with REPLACE), then the
//! trailing command runs. Without a trailing command, commands are read from
//! stdin, one per line, split on whitespace.
#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use bytes::Bytes;
use clap::{ArgAction, Parser};
use ferrite_functions::config::{Config, LogFormat};
use ferrite_functions::{CommandExecutor, Frame, Session};
use tracing::{error, info};

/// Ferrite Functions - Redis Functions over an in-memory store
#[derive(Parser, Debug)]
#[command(name = "ferrite-functions")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (TOML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level: trace, debug, info, warn, error (overrides config file)
    #[arg(short = 'l', long = "log-level", value_name = "LEVEL", env = "FERRITE_LOG_LEVEL")]
    loglevel: Option<String>,

    /// Number of databases (1-16, overrides config file)
    #[arg(long = "databases", value_name = "NUM", env = "FERRITE_DATABASES")]
    databases: Option<u8>,

    /// Library file to load before running the command (repeatable)
    #[arg(long = "load", value_name = "FILE", action = ArgAction::Append)]
    load: Vec<PathBuf>,

    /// Database to select before running the command
    #[arg(short = 'n', long = "db", value_name = "INDEX", default_value_t = 0)]
    db: u8,

    /// Dump effective configuration to stdout and exit
    #[arg(long = "dump-config", action = ArgAction::SetTrue)]
    dump_config: bool,

    /// Command to run, e.g. `FCALL myfunc 1 key arg`
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => match Config::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("{}", e);
                return ExitCode::FAILURE;
            }
        },
        None => Config::default(),
    };

    if let Some(level) = &cli.loglevel {
        config.logging.level = level.clone();
    }
    if let Some(databases) = cli.databases {
        config.storage.databases = databases;
    }

    if let Err(e) = config.validate() {
        eprintln!("{}", e);
        return ExitCode::FAILURE;
    }

    if cli.dump_config {
        return match toml::to_string_pretty(&config) {
            Ok(text) => {
                println!("{}", text);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Failed to serialize config: {}", e);
                ExitCode::FAILURE
            }
        };
    }

    init_logging(&config);

    let executor = CommandExecutor::new(Arc::new(config));
    let mut session = Session::new();

    if let Some(password) = executor.config().security.requirepass.clone() {
        executor.execute(&mut session, &[Bytes::from("AUTH"), Bytes::from(password)]);
    }

    if cli.db != 0 {
        let reply = executor.execute(&mut session, &[Bytes::from("SELECT"), Bytes::from(cli.db.to_string())]);
        if reply.is_error() {
            print_reply(&reply);
            return ExitCode::FAILURE;
        }
    }

    for path in &cli.load {
        let code = match std::fs::read_to_string(path) {
            Ok(code) => code,
            Err(e) => {
                error!(path = %path.display(), "Failed to read library: {}", e);
                return ExitCode::FAILURE;
            }
        };
        let reply = executor.execute(
            &mut session,
            &[Bytes::from("FUNCTION"), Bytes::from("LOAD"), Bytes::from("REPLACE"), Bytes::from(code)],
        );
        if reply.is_error() {
            print_reply(&reply);
            return ExitCode::FAILURE;
        }
        info!(path = %path.display(), "Library loaded");
    }

    if !cli.command.is_empty() {
        let argv: Vec<Bytes> = cli.command.into_iter().map(Bytes::from).collect();
        let reply = executor.execute(&mut session, &argv);
        print_reply(&reply);
        return if reply.is_error() {
            ExitCode::FAILURE
        } else {
            ExitCode::SUCCESS
        };
    }

    run_stdin(&executor, &mut session)
}

fn run_stdin(executor: &CommandExecutor, session: &mut Session) -> ExitCode {
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                error!("Failed to read stdin: {}", e);
                return ExitCode::FAILURE;
            }
        };
        let argv: Vec<Bytes> = line
            .split_whitespace()
            .map(|part| Bytes::from(part.to_string()))
            .collect();
        if argv.is_empty() {
            continue;
        }
        print_reply(&executor.execute(session, &argv));
    }
    ExitCode::SUCCESS
}

fn print_reply(frame: &Frame) {
    let mut out = String::new();
    format_raw(frame, &mut out);
    let mut stdout = io::stdout().lock();
    let _ = stdout.write_all(out.as_bytes());
    let _ = stdout.flush();
}

/// Render a reply the way `redis-cli --raw` does
fn format_raw(frame: &Frame, out: &mut String) {
    match frame {
        Frame::Simple(s) | Frame::Error(s) | Frame::Bulk(Some(s)) => {
            out.push_str(&String::from_utf8_lossy(s));
            out.push('\n');
        }
        Frame::Integer(n) => {
            out.push_str(&n.to_string());
            out.push('\n');
        }
        Frame::Double(d) => {
            out.push_str(&d.to_string());
            out.push('\n');
        }
        Frame::Boolean(b) => {
            out.push_str(if *b { "1\n" } else { "0\n" });
        }
        Frame::Bulk(None) | Frame::Array(None) | Frame::Null => out.push('\n'),
        Frame::Array(Some(items)) => {
            for item in items {
                format_raw(item, out);
            }
        }
        Frame::Map(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            for (key, value) in entries {
                out.push_str(&String::from_utf8_lossy(key));
                out.push('\n');
                format_raw(value, out);
            }
        }
    }
}

fn init_logging(config: &Config) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    // Logs go to stderr so replies on stdout stay clean
    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(io::stderr))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().pretty().with_writer(io::stderr))
                .init();
        }
    }
}
