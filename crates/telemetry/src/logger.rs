use std::sync::OnceLock;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::Registry;
use tracing_subscriber::fmt;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::reload;
use tracing_subscriber::util::SubscriberInitExt;

use crate::TelemetryError;

/// Timestamps as "[YYYY-MM-DD HH:MM:SS.micros]" in local time
struct LocalTime;

impl FormatTime for LocalTime {
	fn format_time(&self, w: &mut fmt::format::Writer<'_>) -> std::fmt::Result {
		let now: chrono::DateTime<chrono::Local> = chrono::Local::now();
		write!(w, "{}", now.format("[%Y-%m-%d %H:%M:%S%.6f]"))
	}
}

type ReloadHandle = reload::Handle<EnvFilter, Registry>;

static RELOAD_HANDLE: OnceLock<ReloadHandle> = OnceLock::new();

const LEVELS: &[&str] = &["off", "trace", "debug", "info", "warn", "error"];

/// Normalize a filter of comma-separated directives.
///
/// A directive is either a bare level (`debug`) or a target and a level
/// (`client=trace`). Levels are case-insensitive; targets are kept as
/// written.
fn parse_filter(filter: &str) -> Result<String, TelemetryError> {
	let invalid = || TelemetryError::InvalidLogLevel(filter.to_string());

	let directives = filter
		.split(',')
		.map(str::trim)
		.map(|directive| {
			let (target, level) = match directive.split_once('=') {
				Some((target, level)) if !target.trim().is_empty() => (Some(target.trim()), level),
				Some(_) => return Err(invalid()),
				None => (None, directive),
			};
			let level = level.trim().to_lowercase();
			if !LEVELS.contains(&level.as_str()) {
				return Err(invalid());
			}
			Ok(match target {
				Some(target) => format!("{}={}", target, level),
				None => level,
			})
		})
		.collect::<Result<Vec<_>, _>>()?;
	Ok(directives.join(","))
}

/// Install the global logger.
///
/// Events go to stderr, so the CLI can keep stdout for replies, with
/// timestamps and thread ids. `filter` is a level such as `info` or a list
/// of directives such as `warn,client=debug`; it can be changed later with
/// [`reload_log_level`]. Records emitted through the `log` facade are
/// picked up as well.
///
/// Only the first call installs anything. Later calls validate `filter`
/// and leave the running logger untouched.
///
/// ```no_run
/// telemetry::init("info,client=debug").unwrap();
/// tracing::info!("connecting");
/// ```
pub fn init(filter: &str) -> Result<(), TelemetryError> {
	let filter = parse_filter(filter)?;
	let (filter_layer, reload_handle) = reload::Layer::new(EnvFilter::new(filter));
	if RELOAD_HANDLE.set(reload_handle).is_err() {
		return Ok(());
	}

	// Another global subscriber may already be set, e.g. by a test harness
	let _ = tracing_subscriber::registry()
		.with(filter_layer)
		.with(
			fmt::layer()
				.with_writer(std::io::stderr)
				.with_timer(LocalTime)
				.with_target(true)
				.with_thread_ids(true)
				.with_file(false)
				.with_line_number(false),
		)
		.try_init();
	Ok(())
}

/// Replace the active filter.
///
/// Accepts the same syntax as [`init`].
///
/// # Errors
///
/// - `InvalidLogLevel` if `filter` does not parse
/// - `NotInitialized` if [`init`] never ran
/// - `ReloadFailed` if the subscriber is gone
pub fn reload_log_level(filter: &str) -> Result<(), TelemetryError> {
	let filter = parse_filter(filter)?;
	let handle = RELOAD_HANDLE.get().ok_or(TelemetryError::NotInitialized)?;
	handle
		.reload(EnvFilter::new(filter))
		.map_err(|e| TelemetryError::ReloadFailed(e.to_string()))
}

#[cfg(test)]
mod tests {
	use rstest::rstest;

	use super::*;

	#[rstest]
	#[case("info", "info")]
	#[case("DeBuG", "debug")]
	#[case("off", "off")]
	#[case("warn,client=TRACE", "warn,client=trace")]
	#[case(" error , resp = debug ", "error,resp=debug")]
	fn test_parse_filter(#[case] input: &str, #[case] expected: &str) {
		assert_eq!(parse_filter(input).unwrap(), expected);
	}

	#[rstest]
	#[case("")]
	#[case("warning")]
	#[case("critical")]
	#[case("client=")]
	#[case("=debug")]
	#[case("info,,debug")]
	fn test_parse_filter_rejects(#[case] input: &str) {
		assert!(matches!(
			parse_filter(input),
			Err(TelemetryError::InvalidLogLevel(ref s)) if s == input
		));
	}

	/// Reloading before init fails after validation. A real reload is not
	/// exercised since init() installs a process-wide subscriber.
	#[test]
	fn test_reload_before_init() {
		assert!(matches!(
			reload_log_level("debug"),
			Err(TelemetryError::NotInitialized)
		));
		assert!(matches!(
			reload_log_level("loud"),
			Err(TelemetryError::InvalidLogLevel(_))
		));
	}
}
