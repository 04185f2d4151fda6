use std::fs;
use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use typetrain::config::Config;
use typetrain::corpus::Corpus;
use typetrain::engine::ModeOverride;
use typetrain::service::Trainer;
use typetrain::store::JsonStore;

#[derive(Parser)]
#[command(name = "typetrain", version, about = "Adaptive typing trainer driven by weak bigrams")]
struct Cli {
    #[arg(long, help = "Config file (defaults to the user config dir)")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Pick the next practice text for a user
    Next {
        uid: String,
        #[arg(short, long, help = "Mode override (easy, normal, hard)")]
        mode: Option<String>,
    },
    /// Register a user, optionally with a display name
    Identify {
        uid: String,
        #[arg(short, long, help = "Display name")]
        name: Option<String>,
    },
    /// Open a session on a text
    Start { uid: String, text_id: u32 },
    /// Append a JSON array of key events to a session
    Events {
        uid: String,
        session_id: u64,
        #[arg(short, long, help = "Read events from a file instead of stdin")]
        file: Option<PathBuf>,
    },
    /// Close a session and update the user's profile
    Finish { uid: String, session_id: u64 },
    /// Show a user's profile
    Profile { uid: String },
    /// List known users
    Users,
    /// List a user's finished sessions
    History { uid: String },
    /// Show or change settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Show,
    Set {
        #[arg(long, help = "Personalization strength, 0-100")]
        strength: Option<u8>,
        #[arg(long, help = "Stress mode on or off")]
        stress: Option<bool>,
    },
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn open_trainer(config: Config) -> Result<Trainer> {
    let corpus = match &config.corpus_path {
        Some(path) => Corpus::load(path)?,
        None => Corpus::bundled()?,
    };
    if corpus.is_empty() {
        warn!("corpus has no texts; next-text requests will fail");
    }
    let store = match &config.data_dir {
        Some(dir) => JsonStore::with_base_dir(dir.clone())?,
        None => JsonStore::new()?,
    };
    Ok(Trainer::new(corpus, store, config))
}

fn read_events(file: Option<PathBuf>) -> Result<Vec<Value>> {
    let events = match file {
        Some(path) => {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&content)?
        }
        None => serde_json::from_reader(io::stdin().lock())?,
    };
    Ok(events)
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    let config_path = cli.config.unwrap_or_else(Config::config_path);
    let config = Config::load_from(&config_path)?;

    match cli.command {
        Command::Config { action } => match action {
            ConfigAction::Show => print_json(&config)?,
            ConfigAction::Set { strength, stress } => {
                let mut config = config;
                config.update(strength, stress);
                config.save_to(&config_path)?;
                print_json(&config)?;
            }
        },
        Command::Next { uid, mode } => {
            let explicit = mode.and_then(|m| match m.parse::<ModeOverride>() {
                Ok(o) => Some(o),
                Err(e) => {
                    warn!("ignoring mode override: {e}");
                    None
                }
            });
            let trainer = open_trainer(config)?;
            print_json(&trainer.next_text(&uid, explicit, &mut rand::thread_rng())?)?;
        }
        Command::Identify { uid, name } => {
            let trainer = open_trainer(config)?;
            print_json(&trainer.identify(&uid, name.as_deref())?)?;
        }
        Command::Start { uid, text_id } => {
            let trainer = open_trainer(config)?;
            let session = trainer.start_session(&uid, text_id, Utc::now())?;
            print_json(&serde_json::json!({
                "session_id": session.id,
                "text_id": session.text_id,
                "started_at": session.started_at,
            }))?;
        }
        Command::Events {
            uid,
            session_id,
            file,
        } => {
            let raw = read_events(file)?;
            let trainer = open_trainer(config)?;
            print_json(&trainer.ingest_events(session_id, &uid, &raw)?)?;
        }
        Command::Finish { uid, session_id } => {
            let trainer = open_trainer(config)?;
            print_json(&trainer.finish_session(session_id, &uid, Utc::now())?)?;
        }
        Command::Profile { uid } => {
            let trainer = open_trainer(config)?;
            print_json(&trainer.profile_view(&uid)?)?;
        }
        Command::Users => {
            let trainer = open_trainer(config)?;
            print_json(&trainer.store.list_users()?)?;
        }
        Command::History { uid } => {
            let trainer = open_trainer(config)?;
            print_json(&trainer.store.list_sessions(&uid)?)?;
        }
    }

    Ok(())
}
