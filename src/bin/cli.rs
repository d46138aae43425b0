//! hashkv CLI
//!
//! Command-line interface for inspecting and editing a hashkv database.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use hashkv::config::DEFAULT_BUCKET_COUNT;
use hashkv::{Config, Database, HashKvError, StoreMode};
use tracing_subscriber::{fmt, EnvFilter};

/// hashkv CLI
#[derive(Parser, Debug)]
#[command(name = "hashkv-cli")]
#[command(about = "CLI for the hashkv embedded key-value store")]
#[command(version)]
struct Args {
    /// Database base path ({db}.idx and {db}.dat)
    #[arg(short, long)]
    db: PathBuf,

    /// Create the database if it does not exist
    #[arg(short, long)]
    create: bool,

    /// Hash bucket count for a newly created database (power of two, 1..=2048)
    #[arg(short, long, default_value_t = DEFAULT_BUCKET_COUNT)]
    buckets: u32,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(flatten)]
    Db(DbCommand),

    /// Remove both database files
    Drop,
}

/// Commands that run against an open database
#[derive(Subcommand, Debug)]
enum DbCommand {
    /// Get a value by key
    Get {
        /// The key to get
        key: String,
    },

    /// Set a key-value pair
    Set {
        /// The key to set
        key: String,

        /// The value to set
        value: String,

        /// Insert only, replace only, or either
        #[arg(short, long, value_enum, default_value_t = Mode::Upsert)]
        mode: Mode,
    },

    /// Delete a key
    Del {
        /// The key to delete
        key: String,
    },

    /// Print every record in file order
    Scan,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Mode {
    Insert,
    Replace,
    Upsert,
}

impl From<Mode> for StoreMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Insert => StoreMode::Insert,
            Mode::Replace => StoreMode::Replace,
            Mode::Upsert => StoreMode::Upsert,
        }
    }
}

fn main() -> ExitCode {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match run(args) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{}", e);
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> hashkv::Result<ExitCode> {
    let command = match args.command {
        Commands::Drop => {
            hashkv::drop_database(&args.db)?;
            return Ok(ExitCode::SUCCESS);
        }
        Commands::Db(command) => command,
    };

    let config = Config::builder()
        .path(&args.db)
        .create(args.create)
        .bucket_count(args.buckets)
        .build();
    let mut db = Database::open(config)?;

    let code = match command {
        DbCommand::Get { key } => match db.fetch(key.as_bytes())? {
            Some(value) => {
                write_line(&value)?;
                ExitCode::SUCCESS
            }
            None => {
                eprintln!("(not found)");
                ExitCode::from(1)
            }
        },
        DbCommand::Set { key, value, mode } => {
            match db.store(key.as_bytes(), value.as_bytes(), mode.into()) {
                Ok(()) => ExitCode::SUCCESS,
                Err(HashKvError::AlreadyExists) => {
                    eprintln!("(exists)");
                    ExitCode::from(1)
                }
                Err(HashKvError::NotFound) => {
                    eprintln!("(not found)");
                    ExitCode::from(1)
                }
                Err(e) => return Err(e),
            }
        }
        DbCommand::Del { key } => match db.delete(key.as_bytes()) {
            Ok(()) => ExitCode::SUCCESS,
            Err(HashKvError::NotFound) => {
                eprintln!("(not found)");
                ExitCode::from(1)
            }
            Err(e) => return Err(e),
        },
        DbCommand::Scan => {
            for record in db.iter() {
                let (key, value) = record?;
                let mut line = key.to_vec();
                line.push(b'\t');
                line.extend_from_slice(&value);
                write_line(&line)?;
            }
            ExitCode::SUCCESS
        }
    };

    tracing::debug!(stats = ?db.stats(), "done");
    db.close()?;
    Ok(code)
}

fn write_line(bytes: &[u8]) -> hashkv::Result<()> {
    let mut out = std::io::stdout().lock();
    out.write_all(bytes)?;
    out.write_all(b"\n")?;
    Ok(())
}
