//! Keymint CLI - issue, verify and expire scoped signing keys

use clap::{Parser, Subcommand};
use keymint_core::config::Config;
use keymint_core::domain::signing::{KeyQuery, KeyRegistry, SigningKey, WriteKeyOptions};
use keymint_core::storage::Database;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "keymint")]
#[command(author, version, about = "Scoped, expiring signing keys", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// SQLite database file (defaults to `database.path` from config)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Issue a new signing key
    Issue {
        /// Scope the key is valid for (e.g. password-reset)
        scope: String,
        /// Hours until the key expires; negative values issue an already-expired key
        #[arg(short, long, allow_hyphen_values = true)]
        expires_in: Option<f64>,
        /// Email to associate with the key
        #[arg(short = 'm', long)]
        email: Option<String>,
        /// Issue the key deactivated
        #[arg(long)]
        inactive: bool,
        /// Random bytes in the signature (overrides config)
        #[arg(short, long)]
        length: Option<usize>,
    },

    /// Verify a signature against a scope
    Verify {
        signature: String,
        #[arg(short, long)]
        scope: String,
    },

    /// Deactivate a signing key
    Expire { signature: String },

    /// Show a signing key
    Show { signature: String },

    /// List signing keys
    List {
        #[arg(short, long)]
        scope: Option<String>,
        #[arg(short = 'm', long)]
        email: Option<String>,
        /// Only active keys
        #[arg(long, conflicts_with = "inactive")]
        active: bool,
        /// Only inactive keys
        #[arg(long)]
        inactive: bool,
        /// Only keys that replaced this signature
        #[arg(long)]
        previous_key: Option<String>,
    },

    /// Replace a key with a fresh successor
    Rotate {
        signature: String,
        /// Hours until the successor expires (default: the old key's lifetime, if positive)
        #[arg(short, long, allow_hyphen_values = true)]
        expires_in: Option<f64>,
    },

    /// Rotate every active key expiring within a window
    RotateDue {
        /// Window in hours
        #[arg(short, long)]
        within: f64,
        #[arg(short, long)]
        scope: Option<String>,
    },

    /// Permanently delete a signing key
    Delete {
        signature: String,
        #[arg(long)]
        force: bool,
    },

    /// Remove expired, inactive keys older than the retention window
    Purge,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Run health check
    Doctor,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a config value
    Get { key: String },
    /// Set a config value
    Set { key: String, value: String },
    /// List all config values
    List,
    /// Reset to defaults
    Reset,
    /// Show config file path
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("keymint=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            match err.downcast_ref::<keymint_core::Error>() {
                Some(core) => {
                    eprintln!("error[{}]: {}", core.code(), core);
                    if let Some(hint) = core.suggestion() {
                        eprintln!("  hint: {}", hint);
                    }
                }
                None => eprintln!("error: {:#}", err),
            }
            std::process::exit(2);
        }
    }
}

/// Dispatch a command, returning the process exit code
async fn run(cli: Cli) -> anyhow::Result<i32> {
    let out = Output {
        format: cli.format,
        quiet: cli.quiet,
    };

    let command = match cli.command {
        Commands::Config { action } => {
            cmd_config(action, out.quiet)?;
            return Ok(0);
        }
        Commands::Doctor => return cmd_doctor(cli.db, out.quiet).await,
        other => other,
    };

    let (db, registry) = open_registry(cli.db).await?;

    let code = match command {
        Commands::Issue {
            scope,
            expires_in,
            email,
            inactive,
            length,
        } => {
            let options = WriteKeyOptions {
                expiration_hours: expires_in,
                active: !inactive,
                email,
                signature_length: length,
            };
            let signature = registry.write_key(&scope, options).await?;
            out.signature("signature", &signature);
            0
        }

        Commands::Verify { signature, scope } => {
            let valid = registry.verify_key(&signature, &scope).await?;
            out.flag("valid", valid, "valid", "invalid");
            if valid { 0 } else { 1 }
        }

        Commands::Expire { signature } => {
            let expired = registry.expire_key(&signature).await?;
            out.flag("expired", expired, "expired", "no active key found");
            0
        }

        Commands::Show { signature } => {
            let key = registry.get_key(&signature).await?;
            out.keys(std::slice::from_ref(&key))?;
            0
        }

        Commands::List {
            scope,
            email,
            active,
            inactive,
            previous_key,
        } => {
            let query = KeyQuery {
                scope,
                email,
                active: if active {
                    Some(true)
                } else if inactive {
                    Some(false)
                } else {
                    None
                },
                previous_key,
            };
            let keys = registry.query_keys(&query).await?;
            out.keys(&keys)?;
            0
        }

        Commands::Rotate {
            signature,
            expires_in,
        } => match registry.rotate_key(&signature, expires_in).await? {
            Some(successor) => {
                out.signature("signature", &successor);
                0
            }
            None => {
                eprintln!("Key '{}' is unknown, already rotated, or revoked.", signature);
                1
            }
        },

        Commands::RotateDue { within, scope } => {
            let rotated = registry.rotate_keys(within, scope.as_deref()).await?;
            match out.format {
                OutputFormat::Json => {
                    let pairs: Vec<_> = rotated
                        .iter()
                        .map(|(old, new)| serde_json::json!({ "old": old, "new": new }))
                        .collect();
                    println!("{}", serde_json::to_string_pretty(&pairs)?);
                }
                OutputFormat::Text => {
                    for (old, new) in &rotated {
                        println!("{} -> {}", old, new);
                    }
                    if !out.quiet {
                        println!("Rotated {} key(s).", rotated.len());
                    }
                }
            }
            0
        }

        Commands::Delete { signature, force } => {
            if !force {
                warn!("Refusing to delete without --force");
                eprintln!("Deleting a key is permanent. Re-run with --force, or use `keymint expire`.");
                1
            } else {
                let deleted = registry.delete_key(&signature).await?;
                out.flag("deleted", deleted, "deleted", "no such key");
                0
            }
        }

        Commands::Purge => {
            let removed = registry.purge_expired().await;
            match out.format {
                OutputFormat::Json => println!("{}", serde_json::json!({ "removed": removed })),
                OutputFormat::Text => println!("Removed {} expired key(s).", removed),
            }
            0
        }

        Commands::Config { .. } | Commands::Doctor => unreachable!("handled before opening the database"),
    };

    db.close().await;
    Ok(code)
}

async fn open_registry(db_path: Option<PathBuf>) -> anyhow::Result<(Database, KeyRegistry)> {
    let config = Config::load()?;
    let path = db_path.unwrap_or_else(|| config.database.resolved_path());
    let db = Database::open(&path).await?;
    let registry = KeyRegistry::sqlite(config.registry, &db)?;
    info!(path = %path.display(), "Opened key registry");
    Ok((db, registry))
}

/// Renders command results in the selected format
struct Output {
    format: OutputFormat,
    quiet: bool,
}

impl Output {
    fn signature(&self, field: &str, signature: &str) {
        match self.format {
            OutputFormat::Json => println!("{}", serde_json::json!({ field: signature })),
            OutputFormat::Text => println!("{}", signature),
        }
    }

    fn flag(&self, field: &str, value: bool, yes: &str, no: &str) {
        match self.format {
            OutputFormat::Json => println!("{}", serde_json::json!({ field: value })),
            OutputFormat::Text => println!("{}", if value { yes } else { no }),
        }
    }

    fn keys(&self, keys: &[SigningKey]) -> anyhow::Result<()> {
        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(keys)?),
            OutputFormat::Text => {
                if keys.is_empty() && !self.quiet {
                    println!("No keys found.");
                }
                for key in keys {
                    println!("{}", key.signature);
                    if self.quiet {
                        continue;
                    }
                    println!("  ID: {}", key.id);
                    println!("  Scope: {}", key.scope);
                    if let Some(email) = &key.email {
                        println!("  Email: {}", email);
                    }
                    println!("  Active: {}", key.active);
                    match key.expiration {
                        Some(exp) => println!("  Expires: {}", exp.to_rfc3339()),
                        None => println!("  Expires: never"),
                    }
                    if key.rotated {
                        println!("  Rotated: true");
                    }
                    if let Some(previous) = &key.previous_key {
                        println!("  Replaces: {}", previous);
                    }
                    println!("  Created: {}", key.created_at.to_rfc3339());
                    println!("  Updated: {}", key.last_updated.to_rfc3339());
                }
            }
        }
        Ok(())
    }
}

fn cmd_config(action: ConfigAction, quiet: bool) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            println!("{}", config.get(&key)?);
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            if !quiet {
                println!("Set {} = {}", key, value);
            }
        }
        ConfigAction::List => {
            let config = Config::load()?;
            for (key, value) in config.list()? {
                println!("{} = {}", key, value);
            }
        }
        ConfigAction::Reset => {
            Config::reset()?;
            if !quiet {
                println!("Configuration reset to defaults.");
            }
        }
        ConfigAction::Path => {
            println!("{}", Config::config_path()?.display());
        }
    }
    Ok(())
}

async fn cmd_doctor(db_path: Option<PathBuf>, quiet: bool) -> anyhow::Result<i32> {
    if !quiet {
        println!("Keymint Health Check");
        println!("====================");
        println!();
    }

    let mut all_ok = true;

    let config = match Config::load() {
        Ok(config) => {
            if !quiet {
                println!("[OK] Configuration: Valid");
            }
            config
        }
        Err(e) => {
            all_ok = false;
            if !quiet {
                println!("[!!] Configuration: Error - {:#}", e);
            }
            Config::default()
        }
    };

    let path = db_path.unwrap_or_else(|| config.database.resolved_path());
    match Database::open(&path).await {
        Ok(db) => {
            match db.health_check().await {
                Ok(()) => {
                    if !quiet {
                        println!("[OK] Database: {}", path.display());
                    }
                }
                Err(e) => {
                    all_ok = false;
                    if !quiet {
                        println!("[!!] Database: {:#}", e);
                    }
                }
            }
            match db.migration_status().await {
                Ok(status) if !status.needs_migration => {
                    if !quiet {
                        println!("[OK] Schema: version {}", status.current_version);
                    }
                }
                Ok(status) => {
                    all_ok = false;
                    if !quiet {
                        println!(
                            "[!!] Schema: version {} of {}",
                            status.current_version, status.target_version
                        );
                    }
                }
                Err(e) => {
                    all_ok = false;
                    if !quiet {
                        println!("[!!] Schema: {:#}", e);
                    }
                }
            }
            db.close().await;
        }
        Err(e) => {
            all_ok = false;
            if !quiet {
                println!("[!!] Database: {} - {:#}", path.display(), e);
            }
        }
    }

    if !quiet {
        println!();
        if all_ok {
            println!("All checks passed.");
        } else {
            println!("Some checks failed.");
        }
    }

    Ok(if all_ok { 0 } else { 1 })
}
