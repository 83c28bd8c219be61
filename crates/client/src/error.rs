use std::sync::Arc;

use resp::RespError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors surfaced by a [`crate::Connection`].
///
/// The type is `Clone` so one outcome can be handed to every caller waiting
/// on it, e.g. all concurrent `close()` calls or all callers coalesced onto
/// one SUBSCRIBE.
#[derive(Error, Debug, Clone)]
pub enum ClientError {
	#[error("Connection is closed")]
	ConnectionClosed,

	#[error("Subscriptions are not allowed on this connection")]
	PubSubNotAllowed,

	#[error("Command '{0}' is not allowed while subscribed")]
	NotAllowedInPubSub(String),

	#[error("Command '{0}' must be issued through subscribe/unsubscribe")]
	ReservedCommand(String),

	#[error("Protocol error: {0}")]
	Protocol(#[from] RespError),

	#[error("Server error: {0}")]
	Server(String),

	#[error("Unexpected reply: {0}")]
	UnexpectedReply(String),

	#[error("I/O error: {0}")]
	Io(Arc<std::io::Error>),

	#[error("Configuration error: {0}")]
	Config(String),
}

impl From<std::io::Error> for ClientError {
	fn from(e: std::io::Error) -> Self {
		ClientError::Io(Arc::new(e))
	}
}

impl From<crate::config::ConfigError> for ClientError {
	fn from(e: crate::config::ConfigError) -> Self {
		ClientError::Config(e.to_string())
	}
}
