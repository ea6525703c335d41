use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::{env, str::FromStr};

/// 50 MiB.
const DEFAULT_MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    pub public_url_base: String,
    pub max_upload_bytes: usize,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "File gateway over an object store with SQLite metadata")]
pub struct Args {
    /// Host to bind to (overrides FILE_GATEWAY_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides FILE_GATEWAY_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where objects are stored (overrides FILE_GATEWAY_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides FILE_GATEWAY_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Base of public file URLs (overrides FILE_GATEWAY_PUBLIC_URL_BASE)
    #[arg(long)]
    pub public_url_base: Option<String>,

    /// Largest accepted request body in bytes (overrides FILE_GATEWAY_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<usize>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// What the binary should do. Defaults to `serve`.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Apply migrations, then serve HTTP
    Serve,
    /// Apply migrations and exit
    Migrate,
    /// Create a user and print its API token
    CreateUser {
        #[arg(long)]
        name: String,
        #[arg(long)]
        admin: bool,
    },
    /// Replace a user's API token and print the new one
    RegenerateToken {
        #[arg(long)]
        user_id: i64,
    },
    /// Create a bucket in the object store and the metadata store
    CreateBucket {
        #[arg(long)]
        name: String,
    },
    /// Give a user membership of a bucket
    Grant {
        #[arg(long)]
        user_id: i64,
        #[arg(long)]
        bucket: String,
    },
    /// Report drift between metadata rows and stored objects
    Audit,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and the command to run.
    pub fn from_env_and_args() -> Result<(Self, Command)> {
        Self::resolve(Args::parse(), |name| env::var(name))
    }

    /// Merge `args` over values read through `lookup`, then defaults.
    pub fn resolve(
        args: Args,
        lookup: impl Fn(&str) -> Result<String, env::VarError>,
    ) -> Result<(Self, Command)> {
        let env_host = lookup("FILE_GATEWAY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = parse_env(&lookup, "FILE_GATEWAY_PORT", 3000u16)?;
        let env_storage =
            lookup("FILE_GATEWAY_STORAGE_DIR").unwrap_or_else(|_| "./data/objects".into());
        let env_db = lookup("FILE_GATEWAY_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/file_gateway.db".into());
        let env_max_upload =
            parse_env(&lookup, "FILE_GATEWAY_MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?;

        let port = args.port.unwrap_or(env_port);
        let public_url_base = args
            .public_url_base
            .or_else(|| lookup("FILE_GATEWAY_PUBLIC_URL_BASE").ok())
            .unwrap_or_else(|| format!("http://localhost:{port}/files"));

        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port,
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            public_url_base,
            max_upload_bytes: args.max_upload_bytes.unwrap_or(env_max_upload),
        };

        Ok((cfg, args.command.unwrap_or(Command::Serve)))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_env<T>(
    lookup: &impl Fn(&str) -> Result<String, env::VarError>,
    name: &str,
    default: T,
) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn resolve_with(argv: &[&str], vars: &[(&str, &str)]) -> Result<(AppConfig, Command)> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let args = Args::try_parse_from(argv)?;
        AppConfig::resolve(args, |name| {
            vars.get(name).cloned().ok_or(env::VarError::NotPresent)
        })
    }

    #[test]
    fn defaults_apply_without_env_or_flags() {
        let (cfg, command) = resolve_with(&["file-gateway"], &[]).unwrap();
        assert_eq!(cfg.addr(), "0.0.0.0:3000");
        assert_eq!(cfg.public_url_base, "http://localhost:3000/files");
        assert_eq!(cfg.max_upload_bytes, DEFAULT_MAX_UPLOAD_BYTES);
        assert_eq!(command, Command::Serve);
    }

    #[test]
    fn flags_override_env() {
        let (cfg, _) = resolve_with(
            &["file-gateway", "--port", "8080"],
            &[("FILE_GATEWAY_PORT", "9000"), ("FILE_GATEWAY_HOST", "127.0.0.1")],
        )
        .unwrap();
        assert_eq!(cfg.addr(), "127.0.0.1:8080");
    }

    #[test]
    fn malformed_env_names_the_variable() {
        let err = resolve_with(&["file-gateway"], &[("FILE_GATEWAY_PORT", "http")]).unwrap_err();
        assert!(err.to_string().contains("FILE_GATEWAY_PORT"));
    }

    #[test]
    fn subcommands_parse() {
        let (_, command) = resolve_with(
            &["file-gateway", "grant", "--user-id", "3", "--bucket", "docs"],
            &[],
        )
        .unwrap();
        assert_eq!(
            command,
            Command::Grant {
                user_id: 3,
                bucket: "docs".into()
            }
        );
    }
}
