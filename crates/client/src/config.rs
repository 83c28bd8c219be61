//! Client configuration
//!
//! A [`ClientConfig`] can come from defaults, a configuration file (TOML,
//! JSON or YAML), a `redis://` URL, and command-line flags, with later
//! sources overriding earlier ones.
//!
//! # Example
//!
//! ```no_run
//! use client::config::{Cli, Parser, setup};
//!
//! let args = Cli::parse();
//! let config = setup(args).unwrap();
//! println!("Connecting to {}:{}", config.host, config.port);
//! ```

use std::path::Path;

pub use clap::Parser;
use percent_encoding::percent_decode_str;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use url::Url;

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
	#[error("Failed to read configuration file '{path}': {source}")]
	Io {
		source: std::io::Error,
		path: String,
	},

	#[error("Failed to parse TOML configuration: {0}")]
	TomlParse(#[from] toml::de::Error),

	#[error("Failed to parse JSON configuration: {0}")]
	JsonParse(#[from] serde_json::Error),

	#[error("Failed to parse YAML configuration: {0}")]
	YamlParse(#[from] serde_yaml::Error),

	#[error("Unsupported configuration format: {0}")]
	UnsupportedFormat(String),

	#[error("Configuration file has no extension")]
	NoExtension,

	#[error("Invalid connection URL: {0}")]
	InvalidUrl(String),

	#[error(transparent)]
	Logging(#[from] telemetry::TelemetryError),
}

/// Command-line arguments for the client
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
	/// Configuration file path (TOML, JSON, or YAML).
	/// Defaults to conf/client.toml if it exists.
	#[arg(short, long)]
	pub config: Option<String>,

	/// Connection URL, e.g. redis://:password@127.0.0.1:6379/0
	#[arg(short, long)]
	pub url: Option<String>,

	/// Server host
	#[arg(long)]
	pub host: Option<String>,

	/// Server port
	#[arg(short, long)]
	pub port: Option<u16>,

	/// ACL username sent with AUTH
	#[arg(long)]
	pub user: Option<String>,

	/// Password sent with AUTH
	#[arg(short = 'a', long)]
	pub password: Option<String>,

	/// Database index selected after connecting
	#[arg(short = 'n', long)]
	pub db: Option<i64>,

	/// Log filter: a level (trace, debug, info, warn, error) or directives
	/// such as `warn,client=debug`
	#[arg(short, long)]
	pub log_level: Option<String>,

	/// Buffer commands until an explicit flush
	#[arg(long)]
	pub no_autoflush: bool,

	/// Command and arguments to send; `subscribe` and `psubscribe` stream
	/// messages until interrupted
	#[arg(trailing_var_arg = true, allow_hyphen_values = true)]
	pub command: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
	pub host: String,
	pub port: u16,
	pub username: Option<String>,
	pub password: Option<String>,
	pub database: Option<i64>,
	pub autoflush: bool,
	pub allow_subscriptions: bool,
	pub log_level: String,
}

impl Default for ClientConfig {
	fn default() -> Self {
		Self {
			host: "127.0.0.1".into(),
			port: 6379,
			username: None,
			password: None,
			database: None,
			autoflush: true,
			allow_subscriptions: true,
			log_level: "info".into(),
		}
	}
}

impl ClientConfig {
	/// Build a configuration from `redis://[user:password@]host[:port][/db]`.
	pub fn from_url(input: &str) -> Result<Self, ConfigError> {
		let url = Url::parse(input).map_err(|e| ConfigError::InvalidUrl(e.to_string()))?;
		if url.scheme() != "redis" {
			return Err(ConfigError::InvalidUrl(format!(
				"unsupported scheme '{}'",
				url.scheme()
			)));
		}

		let mut config = ClientConfig::default();
		if let Some(host) = url.host_str() {
			config.host = host.to_string();
		}
		if let Some(port) = url.port() {
			config.port = port;
		}
		if !url.username().is_empty() {
			config.username = Some(decode_credential(url.username())?);
		}
		if let Some(password) = url.password() {
			config.password = Some(decode_credential(password)?);
		}

		let path = url.path().trim_start_matches('/');
		if !path.is_empty() {
			let db = path
				.parse()
				.map_err(|_| ConfigError::InvalidUrl(format!("invalid database index '{path}'")))?;
			config.database = Some(db);
		}
		Ok(config)
	}

	pub fn addr(&self) -> String {
		format!("{}:{}", self.host, self.port)
	}
}

// Userinfo comes back percent-encoded from the URL parser
fn decode_credential(raw: &str) -> Result<String, ConfigError> {
	percent_decode_str(raw)
		.decode_utf8()
		.map(|decoded| decoded.into_owned())
		.map_err(|_| ConfigError::InvalidUrl("credentials are not valid UTF-8".to_string()))
}

/// Resolve the configuration for a CLI run and initialize logging.
pub fn setup(args: Cli) -> Result<ClientConfig, ConfigError> {
	let default_config = "conf/client.toml";
	let mut config = match (args.config.as_deref(), args.url.as_deref()) {
		(Some(p), _) => load_from_file(p)?,
		(None, Some(url)) => ClientConfig::from_url(url)?,
		(None, None) if Path::new(default_config).exists() => load_from_file(default_config)?,
		(None, None) => ClientConfig::default(),
	};

	// A URL given next to a file only overrides the endpoint part
	if let (Some(_), Some(url)) = (args.config.as_deref(), args.url.as_deref()) {
		let from_url = ClientConfig::from_url(url)?;
		config.host = from_url.host;
		config.port = from_url.port;
		config.username = from_url.username.or(config.username);
		config.password = from_url.password.or(config.password);
		config.database = from_url.database.or(config.database);
	}

	// Override with CLI arguments if explicitly provided
	if let Some(host) = args.host {
		config.host = host;
	}
	if let Some(port) = args.port {
		config.port = port;
	}
	if let Some(user) = args.user {
		config.username = Some(user);
	}
	if let Some(password) = args.password {
		config.password = Some(password);
	}
	if let Some(db) = args.db {
		config.database = Some(db);
	}
	if let Some(log_level) = args.log_level {
		config.log_level = log_level;
	}
	if args.no_autoflush {
		config.autoflush = false;
	}

	telemetry::logger::init(&config.log_level)?;
	Ok(config)
}

pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<ClientConfig, ConfigError> {
	let path_ref = path.as_ref();
	let content = std::fs::read_to_string(path_ref).map_err(|source| ConfigError::Io {
		path: path_ref.display().to_string(),
		source,
	})?;

	let extension = path_ref
		.extension()
		.and_then(|ext| ext.to_str())
		.ok_or(ConfigError::NoExtension)?;

	match extension.to_lowercase().as_str() {
		"toml" => Ok(toml::from_str(&content)?),
		"json" => Ok(serde_json::from_str(&content)?),
		"yaml" | "yml" => Ok(serde_yaml::from_str(&content)?),
		_ => Err(ConfigError::UnsupportedFormat(extension.to_string())),
	}
}
