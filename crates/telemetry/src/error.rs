use thiserror::Error;

#[derive(Debug, Error)]
pub enum TelemetryError {
	#[error("Invalid log level: {0}")]
	InvalidLogLevel(String),
	#[error("Logger is not initialized")]
	NotInitialized,
	#[error("Failed to reload log level: {0}")]
	ReloadFailed(String),
}
