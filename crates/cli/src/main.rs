mod config;
mod error;

use std::collections::HashMap;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Local, TimeZone};
use clap::{Parser, Subcommand};
use storage::{
    IdentityResolver, Lookup, MessageStore, NormalizedEvent, Order, SchemaCatalog, StoreLayout,
};
use tail::{ChangeDetector, EventBus, EventKey, NewTablePolicy, Source, TailLoop};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use config::Config;
use error::{Error, Result};

const CONFIG_FILE: &str = "msgtail.toml";

#[derive(Parser)]
#[command(name = "msgtail")]
#[command(about = "Tail a chat client's local message store", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (defaults to ./msgtail.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Account data directory
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// Own handle, if it cannot be derived from the data directory
    #[arg(long, global = true)]
    self_handle: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print every new message as one JSON line
    Watch {
        /// Poll period in milliseconds
        #[arg(long)]
        period_ms: Option<u64>,
        /// Starting point for tables created while running (replay, skip)
        #[arg(long, value_parser = parse_policy)]
        new_tables: Option<NewTablePolicy>,
    },
    /// List conversation tables with their newest local id
    Tables,
    /// Show recent messages of one conversation table
    Recent {
        /// Conversation table name (Msg_...)
        #[arg(short, long)]
        table: String,
        /// Number of messages
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Only messages from this handle
        #[arg(long)]
        from: Option<String>,
        /// Oldest first instead of newest first
        #[arg(long, conflicts_with = "from")]
        oldest: bool,
    },
    /// Find own recent messages to a contact or room
    Sent {
        /// Contact or room handle
        #[arg(long)]
        to: String,
        /// Text the message contains
        #[arg(long, group = "what")]
        text: Option<String>,
        /// md5 of a sent image
        #[arg(long, group = "what")]
        image: Option<String>,
        /// md5 of a sent file
        #[arg(long, group = "what")]
        file: Option<String>,
        /// How far back to look, in seconds
        #[arg(long, default_value = "120")]
        within: i64,
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
}

fn parse_policy(value: &str) -> std::result::Result<NewTablePolicy, String> {
    match value {
        "replay" => Ok(NewTablePolicy::Replay),
        "skip" => Ok(NewTablePolicy::Skip),
        other => Err(format!("expected 'replay' or 'skip', got '{other}'")),
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_ref())?;
    if let Some(dir) = cli.data_dir {
        config.data_dir = Some(dir);
    }
    if let Some(handle) = cli.self_handle {
        config.self_handle = Some(handle);
    }
    if let Some(Commands::Watch {
        period_ms,
        new_tables,
    }) = &cli.command
    {
        if let Some(period_ms) = period_ms {
            config.period_ms = *period_ms;
        }
        if let Some(policy) = new_tables {
            config.new_tables = *policy;
        }
    }
    config.validate()?;
    init_tracing(&config.log_level);

    match cli.command {
        Some(Commands::Watch { .. }) | None => cmd_watch(&config).await,
        Some(Commands::Tables) => cmd_tables(&config),
        Some(Commands::Recent {
            table,
            limit,
            from,
            oldest,
        }) => cmd_recent(&config, &table, limit, from.as_deref(), oldest),
        Some(Commands::Sent {
            to,
            text,
            image,
            file,
            within,
            limit,
        }) => cmd_sent(&config, &to, text, image, file, within, limit),
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Ok(Config::load(path)?),
        None if std::path::Path::new(CONFIG_FILE).exists() => Ok(Config::load(CONFIG_FILE)?),
        None => Ok(Config::default()),
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

/// Everything a command needs from the account data directory.
struct Account {
    layout: StoreLayout,
    store: MessageStore,
    self_handle: String,
}

fn open_account(config: &Config) -> Result<Account> {
    let data_dir = config.data_dir()?;
    if !data_dir.is_dir() {
        return Err(Error::DataDirNotFound {
            path: data_dir.to_path_buf(),
        });
    }
    let layout = StoreLayout::locate(data_dir)?;
    let self_handle = config
        .self_handle
        .clone()
        .or_else(|| layout.self_handle())
        .ok_or_else(|| Error::UnknownSelf {
            path: data_dir.to_path_buf(),
        })?;
    let store = open_store(config, &layout)?;
    Ok(Account {
        layout,
        store,
        self_handle,
    })
}

#[cfg(feature = "sqlcipher")]
fn open_store(config: &Config, layout: &StoreLayout) -> Result<MessageStore> {
    match &config.key {
        Some(key) => Ok(MessageStore::open_encrypted(&layout.store, key)?),
        None => Ok(MessageStore::open(&layout.store)?),
    }
}

#[cfg(not(feature = "sqlcipher"))]
fn open_store(config: &Config, layout: &StoreLayout) -> Result<MessageStore> {
    if config.key.is_some() {
        warn!("key is set but msgtail was built without sqlcipher; opening as plain SQLite");
    }
    Ok(MessageStore::open(&layout.store)?)
}

async fn cmd_watch(config: &Config) -> Result<()> {
    let account = open_account(config)?;
    let source = Source {
        self_handle: account.self_handle.clone(),
        store: account.layout.store.clone(),
    };
    info!(%source, "starting");

    let bus = Arc::new(EventBus::new());
    bus.subscribe(EventKey::All, false, |_, event| {
        let line = serde_json::to_string(event)?;
        let mut out = io::stdout().lock();
        writeln!(out, "{line}")?;
        out.flush()?;
        Ok(())
    });

    let mut tail = TailLoop::new(
        account.store,
        IdentityResolver::new(account.self_handle),
        ChangeDetector::new(&account.layout.wal),
        bus,
        Arc::new(source),
        config.tail(),
    )?;

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupt received");
                let _ = stop_tx.send(true);
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for interrupts");
                stop_tx.closed().await;
            }
        }
    });

    let result = tail.run(stop_rx).await;
    tail.shutdown().await?;
    Ok(result?)
}

fn cmd_tables(config: &Config) -> Result<()> {
    let account = open_account(config)?;
    let tables = SchemaCatalog::list_conversation_tables(&account.store)?;

    if tables.is_empty() {
        println!("No conversation tables found.");
        return Ok(());
    }

    println!("{:<40}  LAST ID", "TABLE");
    println!("{}", "-".repeat(50));
    for table in &tables {
        let last = account.store.max_local_id(table)?;
        println!("{:<40}  {last}", table.as_str());
    }
    Ok(())
}

fn cmd_recent(
    config: &Config,
    table: &str,
    limit: usize,
    from: Option<&str>,
    oldest: bool,
) -> Result<()> {
    let account = open_account(config)?;
    let mut catalog = SchemaCatalog::new();
    catalog.refresh(&account.store)?;
    let table = catalog.lookup(table)?;

    let mut resolver = IdentityResolver::new(account.self_handle.as_str());
    let mut tables_by_handle = HashMap::new();
    let mut lookup = Lookup::new(
        &account.store,
        &mut resolver,
        &catalog,
        &mut tables_by_handle,
    );
    let events = match from {
        Some(sender) => lookup.recent_messages_from(&table, sender, limit)?,
        None => {
            let order = if oldest { Order::Oldest } else { Order::Newest };
            lookup.recent_messages(&table, limit, order)?
        }
    };
    print_events(&events)
}

fn cmd_sent(
    config: &Config,
    to: &str,
    text: Option<String>,
    image: Option<String>,
    file: Option<String>,
    within: i64,
    limit: usize,
) -> Result<()> {
    let account = open_account(config)?;
    let mut catalog = SchemaCatalog::new();
    catalog.refresh(&account.store)?;

    let mut resolver = IdentityResolver::new(account.self_handle.as_str());
    let mut tables_by_handle = HashMap::new();
    let mut lookup = Lookup::new(
        &account.store,
        &mut resolver,
        &catalog,
        &mut tables_by_handle,
    );
    let events = match (text, image, file) {
        (_, Some(md5), _) => lookup.find_sent_image(to, &md5, within, limit)?,
        (_, _, Some(md5)) => lookup.find_sent_file(to, &md5, within, limit)?,
        (text, None, None) => {
            lookup.find_sent_text(to, text.as_deref().unwrap_or_default(), within, limit)?
        }
    };

    if events.is_empty() {
        println!("No matching messages to {to}.");
        return Ok(());
    }
    print_events(&events)
}

fn print_events(events: &[NormalizedEvent]) -> Result<()> {
    let mut out = io::stdout().lock();
    for event in events {
        let time = match event.created_at() {
            Some(at) => Local
                .from_utc_datetime(&at.naive_utc())
                .format("%Y-%m-%d %H:%M:%S")
                .to_string(),
            None => event.create_time.to_string(),
        };
        let line = serde_json::to_string(event).map_err(storage::Error::from)?;
        writeln!(out, "[{time}] {line}")?;
    }
    Ok(())
}
