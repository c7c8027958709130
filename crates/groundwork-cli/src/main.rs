mod commands;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::{EXIT_FAILURE, EXIT_LOCK_HELD, EXIT_VALIDATION};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "groundwork",
    version,
    about = "Deterministic provisioning of pinned packages and binary artifacts"
)]
struct Cli {
    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Validate, plan, and execute a manifest.
    Run {
        /// Path to manifest TOML file.
        #[arg(default_value = "groundwork.toml")]
        manifest: PathBuf,
        /// Maximum number of steps in flight (overrides settings.parallelism).
        #[arg(short, long)]
        jobs: Option<usize>,
        /// Python interpreter used by the pip client (overrides environment.python).
        #[arg(long)]
        python: Option<String>,
        /// Host credentials file (default: ~/.config/groundwork/credentials.json if present).
        #[arg(long)]
        credentials: Option<PathBuf>,
        /// Run lock file (default: $TMPDIR/groundwork.lock).
        #[arg(long)]
        lock_file: Option<PathBuf>,
    },
    /// Validate a manifest and print the execution plan without running it.
    Plan {
        /// Path to manifest TOML file.
        #[arg(default_value = "groundwork.toml")]
        manifest: PathBuf,
    },
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("GROUNDWORK_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    let json_output = cli.json;

    let result = match cli.command {
        Commands::Run {
            manifest,
            jobs,
            python,
            credentials,
            lock_file,
        } => commands::run::run(
            &commands::run::RunArgs {
                manifest,
                jobs,
                python,
                credentials,
                lock_file,
            },
            json_output,
        ),
        Commands::Plan { manifest } => commands::plan::run(&manifest, json_output),
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            let code = if msg.starts_with("invalid manifest:")
                || msg.starts_with("invalid configuration:")
            {
                EXIT_VALIDATION
            } else if msg.starts_with("run lock:") {
                EXIT_LOCK_HELD
            } else {
                EXIT_FAILURE
            };
            ExitCode::from(code)
        }
    }
}
