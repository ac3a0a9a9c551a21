use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::auth::password::{MAX_COST, MIN_COST};
use crate::auth::SessionConfig;
use crate::metastore::{Durability, StorageEngine};

#[derive(Parser, Debug)]
#[command(version, about = "Session-authenticated notes API")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the API server
    Server(ServerConfig),

    /// Inspect the credential store
    Inspect {
        #[command(flatten)]
        store: StoreArgs,

        #[command(subcommand)]
        command: InspectCommand,
    },

    /// Delete expired sessions
    PruneSessions {
        #[command(flatten)]
        store: StoreArgs,
    },
}

#[derive(Debug, Subcommand)]
pub enum InspectCommand {
    /// List all users
    ListUsers,
    /// Number of user and session records
    NumKeys,
    /// Live sessions of one user
    UserSessions { email: String },
}

/// Location and engine of the credential store
#[derive(clap::Args, Debug, Clone)]
pub struct StoreArgs {
    #[arg(long, default_value = ".")]
    pub meta_root: PathBuf,

    #[arg(long, default_value = "fjall", help = "Metadata DB (fjall, memory)")]
    pub metadata_db: StorageEngine,

    #[arg(
        long,
        default_value = "fdatasync",
        help = "Durability level (buffer, fsync, fdatasync)"
    )]
    pub durability: Durability,
}

/// Deployment environment; production marks cookies `Secure`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            _ => Err(format!("Unknown environment: {}", s)),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Development => f.write_str("development"),
            Environment::Production => f.write_str("production"),
        }
    }
}

#[derive(Parser, Debug)]
pub struct ServerConfig {
    #[command(flatten)]
    pub store: StoreArgs,

    #[arg(long, default_value = "localhost")]
    pub host: String,

    #[arg(long, default_value = "3000")]
    pub port: u16,

    #[arg(long, default_value = "localhost")]
    pub metric_host: String,

    #[arg(long, default_value = "9100")]
    pub metric_port: u16,

    #[arg(
        long,
        env = "TOKEN_EXP",
        default_value = "3600",
        value_parser = clap::value_parser!(u64).range(1..),
        help = "Session lifetime in seconds"
    )]
    pub session_ttl: u64,

    #[arg(
        long,
        env = "APP_ENV",
        default_value = "development",
        help = "Deployment environment (development, production)"
    )]
    pub environment: Environment,

    #[arg(
        long,
        default_value_t = bcrypt::DEFAULT_COST,
        value_parser = clap::value_parser!(u32).range(MIN_COST as i64..=MAX_COST as i64),
        help = "Bcrypt work factor"
    )]
    pub bcrypt_cost: u32,

    #[arg(
        long,
        default_value = "info",
        help = "Log level (error, warn, info, debug, trace). Can also be set via RUST_LOG env var"
    )]
    pub log_level: String,
}

impl ServerConfig {
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            ttl: Duration::from_secs(self.session_ttl),
            secure_cookies: self.environment == Environment::Production,
        }
    }
}
