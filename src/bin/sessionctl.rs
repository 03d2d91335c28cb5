//! Session store operator CLI
//!
//! Inspect and manage individual sessions stored in Redis.

use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use harbour_session::{
    BackendConfig, ClientMode, Engine, ItemLookup, SessionStore, StoreConfig, StoreOptions,
};
use tracing_subscriber::{fmt, EnvFilter};

/// Session store CLI
#[derive(Parser, Debug)]
#[command(name = "sessionctl")]
#[command(about = "Inspect and manage sessions in a Redis session store")]
#[command(version)]
struct Args {
    /// Redis endpoints (host:port), comma separated
    #[arg(short = 'H', long, default_value = "127.0.0.1:6379", value_delimiter = ',')]
    host: Vec<String>,

    /// Client type
    #[arg(long, value_enum, default_value = "basic")]
    client_type: ClientTypeArg,

    /// Application id (key prefix)
    #[arg(short, long)]
    app: String,

    /// Key separator
    #[arg(long)]
    separator: Option<String>,

    /// Default session timeout in minutes
    #[arg(short, long, default_value = "20")]
    timeout: u32,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ClientTypeArg {
    Pooled,
    Basic,
}

impl From<ClientTypeArg> for ClientMode {
    fn from(arg: ClientTypeArg) -> Self {
        match arg {
            ClientTypeArg::Pooled => ClientMode::Pooled,
            ClientTypeArg::Basic => ClientMode::Basic,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show a session record without touching it
    Show {
        /// Session id
        session_id: String,
    },

    /// Create an empty, uninitialized session
    Create {
        /// Session id
        session_id: String,

        /// Timeout in minutes (defaults to --timeout)
        #[arg(long)]
        minutes: Option<u32>,
    },

    /// Slide the session expiration to the default timeout
    Touch {
        /// Session id
        session_id: String,
    },

    /// Release the session lock, whoever holds it
    Unlock {
        /// Session id
        session_id: String,
    },

    /// Lock the session and delete it
    Remove {
        /// Session id
        session_id: String,

        /// Seconds to wait for the session lock
        #[arg(long, default_value = "5")]
        wait: u64,
    },
}

fn main() -> ExitCode {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,harbour_session=info"));

    fmt().with_env_filter(filter).with_target(true).init();

    let args = Args::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> harbour_session::Result<()> {
    let backend_config = BackendConfig::builder()
        .hosts(args.host.clone())
        .client_mode(args.client_type.into())
        .build();

    let mut options = StoreOptions::new();
    if let Some(separator) = &args.separator {
        options = options.key_separator(separator.clone());
    }
    if let Commands::Remove { wait, .. } = &args.command {
        options = options.lock_acquisition_timeout_seconds(*wait);
    }

    let config = StoreConfig::builder(args.app.clone())
        .default_timeout_minutes(args.timeout)
        .options(options)
        .build();

    let engine = Engine::connect(config, &backend_config)?;

    match &args.command {
        Commands::Show { session_id } => show(&engine, session_id)?,
        Commands::Create { session_id, minutes } => {
            engine.create_uninitialized_item(session_id, minutes.unwrap_or(args.timeout))?;
            println!("created {}", engine.key(session_id));
        }
        Commands::Touch { session_id } => {
            engine.reset_item_timeout(session_id)?;
            println!("expiration reset to {} minutes", args.timeout);
        }
        Commands::Unlock { session_id } => match engine.inspect(session_id)? {
            Some(record) if record.locked => {
                engine.release_item_exclusive(session_id, record.lock_id)?;
                println!("released lock {}", record.lock_id);
            }
            Some(_) => println!("session is not locked"),
            None => println!("(not found)"),
        },
        Commands::Remove { session_id, .. } => match engine.get_item_exclusive(session_id)? {
            ItemLookup::Found {
                lock_id: Some(lock_id),
                ..
            } => {
                engine.remove_item(session_id, lock_id)?;
                println!("removed {}", engine.key(session_id));
            }
            ItemLookup::Locked { lock_id, lock_age } => {
                println!("session is locked (lock {}, held for {:?})", lock_id, lock_age);
            }
            _ => println!("(not found)"),
        },
    }

    engine.close()
}

fn show(engine: &Engine, session_id: &str) -> harbour_session::Result<()> {
    let Some(record) = engine.inspect(session_id)? else {
        println!("(not found)");
        return Ok(());
    };

    println!("key:      {}", engine.key(session_id));
    println!("created:  {}", record.created());
    println!("timeout:  {} min", record.timeout_minutes);
    println!("flags:    {:?}", record.flags);
    match record.lock_info() {
        Some(held) => println!(
            "locked:   yes (id {}, since {})",
            held.lock_id, held.lock_date
        ),
        None => println!("locked:   no"),
    }
    match engine.time_to_live(session_id)? {
        Some(ttl) => println!("ttl:      {}s", ttl.as_secs()),
        None => println!("ttl:      none"),
    }
    println!("items:    {}", record.items.len());
    for (name, value) in record.items.iter() {
        println!("  {:<20} {} bytes", name, value.len());
    }

    Ok(())
}
