//! ringkv CLI
//!
//! Loads a data directory and performs asynchronous point lookups against it.

use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use ringkv::{AsyncReader, Config, ReadOptions, RingBackend, Store};
use tracing_subscriber::{fmt, EnvFilter};

/// ringkv CLI
#[derive(Parser, Debug)]
#[command(name = "ringkv-cli")]
#[command(about = "Asynchronous point reads over a ringkv data directory")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./ringkv_data")]
    data_dir: String,

    /// Ring implementation used for lookups
    #[arg(short, long, value_enum, default_value_t = Backend::Kernel)]
    backend: Backend,

    /// Submission-queue entries
    #[arg(short = 'c', long, default_value = "256")]
    ring_capacity: u32,

    #[command(subcommand)]
    command: Commands,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Backend {
    Kernel,
    InProcess,
}

impl From<Backend> for RingBackend {
    fn from(backend: Backend) -> Self {
        match backend {
            Backend::Kernel => RingBackend::Kernel,
            Backend::InProcess => RingBackend::InProcess,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write `count` keys k0..k{count-1} with values v0.. and flush them
    Load {
        count: usize,
    },

    /// Look up keys through the async reader
    Get {
        #[arg(required = true)]
        keys: Vec<String>,
    },
}

fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,ringkv=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("ringkv CLI v{}", ringkv::VERSION);
    tracing::info!("Data directory: {}", args.data_dir);

    let config = Config::builder()
        .data_dir(&args.data_dir)
        .ring_capacity(args.ring_capacity)
        .ring_backend(args.backend.into())
        .build();

    if let Err(e) = run(config, args.command) {
        tracing::error!("{}", e);
        process::exit(1);
    }
}

fn run(config: Config, command: Commands) -> ringkv::Result<()> {
    let store = Store::open(config.clone())?;

    match command {
        Commands::Load { count } => {
            for i in 0..count {
                store.put(format!("k{}", i).as_bytes(), format!("v{}", i).as_bytes())?;
            }
            store.flush()?;
            tracing::info!(count, sstables = store.sstable_count(), "keys loaded");
        }

        Commands::Get { keys } => {
            let reader = AsyncReader::from_config(Arc::new(store), &config)?;
            let opts = ReadOptions::default();

            let lookups: Vec<_> = keys
                .iter()
                .map(|key| (key, reader.get(&opts, key.as_bytes())))
                .collect();

            tracing::debug!(
                lookups = lookups.len(),
                in_flight = reader.pending_submission_count(),
                coalesced_keys = reader.pending_keys(),
                "lookups submitted"
            );

            while reader.pending_submission_count() > 0 {
                if reader.peek_completions() {
                    reader.reap_completions();
                } else {
                    std::thread::yield_now();
                }
            }

            for (key, lookup) in lookups {
                let (status, value) = lookup.resolve();
                if status.is_ok() {
                    println!("{} => {}", key, String::from_utf8_lossy(&value));
                } else {
                    println!("{} => {}", key, status);
                }
            }
        }
    }

    Ok(())
}
