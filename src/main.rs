use clap::{Parser, Subcommand};
use hx_env::commands::{self, Session, SessionOptions};
use hx_env::error::Result;
use hx_env::sync::CancelToken;
use std::path::PathBuf;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "hx-env")]
#[command(version)]
#[command(about = "Synchronise encrypted .env files with the Hyphen environment store", long_about = None)]
struct Cli {
    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Keep the project key in a local .hxkey file instead of the key service
    #[arg(long, global = true)]
    local_secret: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encrypt and upload local env files
    Push {
        /// Environment to push (default: every .env.<name> file)
        #[arg(short, long = "environment")]
        env: Option<String>,
    },

    /// Download and decrypt environments
    Pull {
        /// Environment to pull (default: all)
        #[arg(short, long = "environment")]
        env: Option<String>,

        /// Pull a specific stored version
        #[arg(long, requires = "env")]
        version: Option<u64>,

        /// Overwrite local files changed since the last sync
        #[arg(short, long)]
        force: bool,
    },

    /// Re-encrypt every environment under a new project key
    RotateKey {
        /// Skip the confirmation guard
        #[arg(short, long)]
        yes: bool,
    },

    /// List stored versions of an environment
    ListVersions {
        /// Environment name (default environment if omitted)
        #[arg(short, long = "environment")]
        env: Option<String>,

        #[arg(long, default_value_t = 1)]
        page: u32,

        #[arg(long, default_value_t = 20)]
        page_size: u32,
    },

    /// Encrypt a file with the project key
    Encrypt {
        file: PathBuf,
    },

    /// Decrypt a value produced by `encrypt`
    Decrypt {
        ciphertext: String,
    },
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_env("HX_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if verbose { "hx_env=debug" } else { "hx_env=warn" })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let cancel = CancelToken::new();
    let handler = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || handler.cancel()) {
        warn!(error = %e, "could not install the interrupt handler");
    }

    let root = std::env::current_dir()?;
    let session = Session::open(
        &root,
        SessionOptions {
            local_secret: cli.local_secret,
            cancel,
        },
    )?;

    match cli.command {
        Commands::Push { env } => commands::push(&session, env.as_deref()),
        Commands::Pull {
            env,
            version,
            force,
        } => commands::pull(&session, env.as_deref(), version, force),
        Commands::RotateKey { yes } => commands::rotate_key(&session, yes),
        Commands::ListVersions {
            env,
            page,
            page_size,
        } => commands::list_versions(&session, env.as_deref(), page, page_size),
        Commands::Encrypt { file } => commands::encrypt(&session, &file),
        Commands::Decrypt { ciphertext } => commands::decrypt(&session, &ciphertext),
    }
}
