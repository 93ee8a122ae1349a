//! Tabula - command-line front end for the grid engine

mod config;

use std::env;
use std::path::PathBuf;

use anyhow::{Context, bail};
use tabula_core::{CodeArray, EngineConfig, Key};
use tracing::debug;
use tracing_subscriber::EnvFilter;

fn print_usage() {
    eprintln!("Usage: tabula [OPTIONS]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -c, --command <EXPR>      Evaluate EXPR as cell (0, 0, 0) and print the result");
    eprintln!("  -m, --macros <FILE>       Run a macro file before evaluating");
    eprintln!("  --safe-mode               Do not evaluate any code");
    eprintln!("  --timeout <SECS>          Evaluation time limit in seconds");
    eprintln!("  --config <FILE>           Load engine settings from a TOML file");
    eprintln!("  -h, --help                Print help");
}

#[derive(Default)]
struct Options {
    command: Option<String>,
    macros_file: Option<PathBuf>,
    safe_mode: bool,
    timeout: Option<f64>,
    config_file: Option<PathBuf>,
}

fn required_value(args: &[String], i: usize, what: &str) -> String {
    match args.get(i) {
        Some(value) => value.to_string(),
        None => {
            eprintln!("Error: {} requires {}", args[i - 1], what);
            std::process::exit(1);
        }
    }
}

fn parse_args() -> Options {
    let args: Vec<String> = env::args().collect();
    let mut options = Options::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_usage();
                std::process::exit(0);
            }
            "-c" | "--command" => {
                i += 1;
                options.command = Some(required_value(&args, i, "an expression"));
            }
            "-m" | "--macros" => {
                i += 1;
                options.macros_file = Some(PathBuf::from(required_value(&args, i, "a file path")));
            }
            "--safe-mode" => options.safe_mode = true,
            "--timeout" => {
                i += 1;
                let value = required_value(&args, i, "a number of seconds");
                match value.parse::<f64>() {
                    Ok(secs) if secs.is_finite() && secs > 0.0 => options.timeout = Some(secs),
                    _ => {
                        eprintln!("Error: Invalid timeout: {}", value);
                        std::process::exit(1);
                    }
                }
            }
            "--config" => {
                i += 1;
                options.config_file = Some(PathBuf::from(required_value(&args, i, "a file path")));
            }
            arg => {
                eprintln!("Error: Unknown option: {}", arg);
                print_usage();
                std::process::exit(1);
            }
        }
        i += 1;
    }
    options
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();
}

/// Returns false when the command evaluated to an error value.
fn run(options: Options, mut config: EngineConfig) -> anyhow::Result<bool> {
    if let Some(secs) = options.timeout {
        config.timeout_secs = secs;
    }
    let array = CodeArray::with_config(config.shape(), config);
    array.set_safe_mode(options.safe_mode);

    if let Some(path) = &options.macros_file {
        array
            .load_macros(path)
            .with_context(|| format!("failed to load macros from {}", path.display()))?;
        let output = array.execute_macros();
        print!("{}", output.stdout);
        eprint!("{}", output.stderr);
    }

    let Some(command) = options.command else {
        if options.macros_file.is_none() {
            bail!("nothing to do; pass -c <EXPR> or -m <FILE>");
        }
        return Ok(true);
    };

    let key = Key::new(0, 0, 0);
    array.set(key, &command)?;
    debug!(%key, "evaluating command");
    let Some(value) = array.read(key)? else {
        return Ok(true);
    };
    let text = array.display(key)?.unwrap_or_default();
    if value.is_error() {
        eprintln!("{}", text);
        Ok(false)
    } else {
        println!("{}", text);
        Ok(true)
    }
}

fn main() {
    let options = parse_args();
    init_logging();

    let (config, warnings) = config::load_config(options.config_file.as_deref());
    for warning in warnings {
        eprintln!("Warning: {}", warning);
    }

    match run(options, config) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}
