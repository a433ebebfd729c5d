mod commands;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::{
    EXIT_FAILURE, EXIT_PRECONDITION, EXIT_PROFILE_ERROR, EXIT_UNKNOWN_INSTANCE,
};
use deploy_core::install_signal_handler;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "deploy",
    version,
    about = "Profile-driven lifecycle manager for supervised database deployments"
)]
struct Cli {
    /// Path to the deployctl state directory.
    #[arg(long, default_value = "~/.local/share/deploy")]
    store: String,

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
    /// Start the service under a named profile and wait until it is healthy.
    Start {
        /// Profile name (built-in preset or file in the store's profiles dir).
        #[arg(long)]
        env: String,
        /// Override a profile field, e.g. --override memory.heap_max=2G.
        #[arg(long = "override", value_name = "KEY=VALUE")]
        overrides: Vec<String>,
    },
    /// Stop a running instance, draining gracefully before forcing.
    Stop {
        /// Profile name.
        #[arg(long)]
        env: String,
        /// Kill immediately instead of waiting for a graceful drain.
        #[arg(long, default_value_t = false)]
        force: bool,
        #[arg(long = "override", value_name = "KEY=VALUE")]
        overrides: Vec<String>,
    },
    /// Stop then start an instance.
    Restart {
        /// Profile name.
        #[arg(long)]
        env: String,
        #[arg(long = "override", value_name = "KEY=VALUE")]
        overrides: Vec<String>,
    },
    /// Supervise a running instance, checking health at the profile's interval.
    Watch {
        /// Profile name.
        #[arg(long)]
        env: String,
        #[arg(long = "override", value_name = "KEY=VALUE")]
        overrides: Vec<String>,
    },
    /// Report instance state and current health.
    Status {
        /// Profile name.
        #[arg(long)]
        env: String,
        #[arg(long = "override", value_name = "KEY=VALUE")]
        overrides: Vec<String>,
    },
    /// Dump the running instance into a checksummed backup artifact.
    Backup {
        /// Profile name.
        #[arg(long)]
        env: String,
        #[arg(long = "override", value_name = "KEY=VALUE")]
        overrides: Vec<String>,
    },
    /// Load a backup artifact into a stopped instance.
    Restore {
        /// Profile name.
        #[arg(long)]
        env: String,
        /// Path to the backup artifact to load.
        #[arg(long)]
        from: PathBuf,
        #[arg(long = "override", value_name = "KEY=VALUE")]
        overrides: Vec<String>,
    },
    /// Apply the profile's backup retention policy.
    Prune {
        /// Profile name.
        #[arg(long)]
        env: String,
        /// Only report what would be removed.
        #[arg(long, default_value_t = false)]
        dry_run: bool,
        #[arg(long = "override", value_name = "KEY=VALUE")]
        overrides: Vec<String>,
    },
    /// List all known instances.
    List,
    /// Print the fully resolved configuration for a profile.
    Show {
        /// Profile name.
        #[arg(long)]
        env: String,
        #[arg(long = "override", value_name = "KEY=VALUE")]
        overrides: Vec<String>,
    },
    /// List built-in presets and on-disk profile files.
    Profiles,
    /// Run diagnostic checks on the runtime and state directory.
    Doctor,
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
            tracing_subscriber::EnvFilter::try_from_env("DEPLOY_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    install_signal_handler();

    let store_path = expand_tilde(&cli.store);
    let json_output = cli.json;

    let result = match cli.command {
        Commands::Start { env, overrides } => {
            commands::start::run(&store_path, &env, &overrides, json_output)
        }
        Commands::Stop {
            env,
            force,
            overrides,
        } => commands::stop::run(&store_path, &env, force, &overrides, json_output),
        Commands::Restart { env, overrides } => {
            commands::restart::run(&store_path, &env, &overrides, json_output)
        }
        Commands::Watch { env, overrides } => {
            commands::watch::run(&store_path, &env, &overrides, json_output)
        }
        Commands::Status { env, overrides } => {
            commands::status::run(&store_path, &env, &overrides, json_output)
        }
        Commands::Backup { env, overrides } => {
            commands::backup::run(&store_path, &env, &overrides, json_output)
        }
        Commands::Restore {
            env,
            from,
            overrides,
        } => commands::restore::run(&store_path, &env, &from, &overrides, json_output),
        Commands::Prune {
            env,
            dry_run,
            overrides,
        } => commands::prune::run(&store_path, &env, dry_run, &overrides, json_output),
        Commands::List => commands::list::run(&store_path, json_output),
        Commands::Show { env, overrides } => {
            commands::show::run(&store_path, &env, &overrides, json_output)
        }
        Commands::Profiles => commands::profiles::run(&store_path, json_output),
        Commands::Doctor => commands::doctor::run(&store_path, json_output),
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            let code = if msg.starts_with("profile error:") {
                EXIT_PROFILE_ERROR
            } else if msg.starts_with("unknown instance") {
                EXIT_UNKNOWN_INSTANCE
            } else if msg.starts_with("precondition:") {
                EXIT_PRECONDITION
            } else {
                EXIT_FAILURE
            };
            ExitCode::from(code)
        }
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(stripped);
        }
    }
    PathBuf::from(path)
}
