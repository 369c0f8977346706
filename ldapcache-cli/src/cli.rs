//! Command definitions and dispatch.

use std::io::Read;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use ldapcache_core::{dn, CacheConfig, CacheError, ChangeEvent, ConfigError, Shard};
use ldapcache_query::{groups_for_user, users_groups, users_in_group};
use ldapcache_storage::get_cache;
use serde_json::{json, Value};
use thiserror::Error;

// =============================================================================
// Error Types
// =============================================================================

#[derive(Debug, Error)]
pub enum CliError {
    #[error("{0}")]
    Cache(#[from] CacheError),

    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error("Cannot read change event from {source_name}: {reason}")]
    Input { source_name: String, reason: String },

    #[error("Cannot encode output: {0}")]
    Output(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CliError>;

// =============================================================================
// CLI Definition
// =============================================================================

/// Inspect and maintain the LDAP group membership cache.
#[derive(Parser, Debug)]
#[command(name = "ldapcache", version, about, long_about = None)]
pub struct Cli {
    /// Configuration file (TOML). Defaults to $LDAPCACHE_CONFIG, then the
    /// built-in production settings.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log as JSON lines on stderr.
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List the active shards.
    Shards,

    /// Add a shard to the shard configuration.
    AddShard(ShardArgs),

    /// Remove a shard from the shard configuration.
    RmShard(ShardArgs),

    /// Look up one key.
    Get { cache: String, key: String },

    /// List the keys of a sub-cache.
    Keys { cache: String },

    /// Print a whole sub-cache.
    Dump { cache: String },

    /// Groups a user belongs to.
    GroupsForUser {
        dn: String,
        /// Only direct memberships.
        #[arg(long)]
        direct: bool,
    },

    /// Users in a group.
    UsersInGroup {
        dn: String,
        /// Do not descend into nested groups.
        #[arg(long)]
        direct: bool,
    },

    /// Every user with the groups they are in.
    UsersGroups,

    /// Apply a JSON change event.
    ApplyEvent {
        /// Read the event from this file instead of stdin.
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Wipe one sub-cache, or all of them.
    Clear { cache: Option<String> },

    /// Run engine maintenance on every sub-cache.
    Cleanup,
}

#[derive(Args, Debug, Clone)]
pub struct ShardArgs {
    #[arg(long)]
    pub db_name: String,
    #[arg(long)]
    pub key: String,
    #[arg(long)]
    pub value: String,
    #[arg(long = "filter")]
    pub ldap_filter: String,
    #[arg(long)]
    pub single_value: bool,
    #[arg(long)]
    pub reverse: bool,
}

impl From<ShardArgs> for Shard {
    fn from(args: ShardArgs) -> Self {
        Shard::new(
            args.db_name,
            args.key,
            args.value,
            args.ldap_filter,
            args.single_value,
            args.reverse,
        )
    }
}

// =============================================================================
// Dispatch
// =============================================================================

pub fn run(cli: Cli) -> Result<Value> {
    let config = CacheConfig::load(cli.config.as_deref())?;
    let cache = get_cache(&config)?;
    let caches = cache.caches();

    let value = match cli.command {
        Command::Shards => serde_json::to_value(cache.shards().collect::<Vec<_>>())?,
        Command::AddShard(args) => {
            let added = cache.shard_config().add_shard_to_config(&Shard::from(args))?;
            json!({ "added": added })
        }
        Command::RmShard(args) => {
            let removed = cache.shard_config().rm_shard_from_config(&Shard::from(args))?;
            json!({ "removed": removed })
        }
        Command::Get { cache: name, key } => {
            serde_json::to_value(cache.get_sub_cache(&name)?.get(&dn::normalize(&key))?)?
        }
        Command::Keys { cache: name } => {
            let mut keys = cache.get_sub_cache(&name)?.keys()?;
            keys.sort();
            serde_json::to_value(keys)?
        }
        Command::Dump { cache: name } => serde_json::to_value(cache.get_sub_cache(&name)?.load()?)?,
        Command::GroupsForUser { dn, direct } => serde_json::to_value(groups_for_user(caches, &dn, !direct)?)?,
        Command::UsersInGroup { dn, direct } => serde_json::to_value(users_in_group(caches, &dn, !direct)?)?,
        Command::UsersGroups => serde_json::to_value(users_groups(caches)?)?,
        Command::ApplyEvent { file } => {
            let event = read_event(file)?;
            serde_json::to_value(cache.handle(&event)?)?
        }
        Command::Clear { cache: Some(name) } => {
            cache.get_sub_cache(&name)?.clear()?;
            tracing::info!(sub_cache = %name, "Cleared");
            json!({ "cleared": [name] })
        }
        Command::Clear { cache: None } => {
            caches.clear_all()?;
            tracing::info!("Cleared all sub-caches");
            json!({ "cleared": caches.names().collect::<Vec<_>>() })
        }
        Command::Cleanup => {
            caches.cleanup_all()?;
            json!({ "cleaned": caches.names().collect::<Vec<_>>() })
        }
    };
    Ok(value)
}

fn read_event(file: Option<PathBuf>) -> Result<ChangeEvent> {
    let (source_name, text) = match file {
        Some(path) => {
            let text = std::fs::read_to_string(&path).map_err(|e| CliError::Input {
                source_name: path.display().to_string(),
                reason: e.to_string(),
            })?;
            (path.display().to_string(), text)
        }
        None => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .map_err(|e| CliError::Input {
                    source_name: "stdin".to_string(),
                    reason: e.to_string(),
                })?;
            ("stdin".to_string(), text)
        }
    };
    serde_json::from_str(&text).map_err(|e| CliError::Input {
        source_name,
        reason: e.to_string(),
    })
}

pub fn render(value: &Value) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}
