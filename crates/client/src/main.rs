use std::future::Future;
use std::sync::Arc;

use client::ClientError;
use client::Connection;
use client::PubSubMessage;
use client::RespValue;
use client::Subscriber;
use client::SubscriptionTarget;
use client::config::Cli;
use client::config::Parser;
use client::config::setup;
use tokio::sync::Notify;
use tracing::error;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
	let args = Cli::parse();
	let command = args.command.clone();
	let config = setup(args)?;

	let Some((name, rest)) = command.split_first() else {
		eprintln!("usage: nimbis-cli [OPTIONS] <COMMAND> [ARGS]...");
		std::process::exit(2);
	};

	let conn = Connection::connect(&config).await?;
	let result = match name.to_ascii_lowercase().as_str() {
		"subscribe" => listen(&conn, SubscriptionTarget::channels(rest.to_vec())).await,
		"psubscribe" => listen(&conn, SubscriptionTarget::patterns(rest.to_vec())).await,
		_ => match flushed(&conn, conn.send(name, rest.to_vec())).await {
			Ok(reply) => {
				print!("{}", format_reply(&reply, 0));
				Ok(())
			}
			Err(ClientError::Server(message)) => {
				println!("(error) {}", message);
				Ok(())
			}
			Err(e) => Err(e),
		},
	};

	conn.close().await?;
	if let Err(e) = result {
		error!("{}", e);
		return Err(e.into());
	}
	Ok(())
}

/// Print pushed messages until Ctrl-C or until the server goes away.
async fn listen(conn: &Connection, target: SubscriptionTarget) -> client::Result<()> {
	let lost = Arc::new(Notify::new());
	let notify = lost.clone();
	conn.set_on_unexpected_closure(move || notify.notify_one());

	let subscriber = Subscriber::new(print_message)
		.on_subscribe(|target, count| {
			println!(
				"Subscribed to {} ({} active)",
				String::from_utf8_lossy(target),
				count
			);
		})
		.on_unsubscribe(|target, count| {
			println!(
				"Unsubscribed from {} ({} active)",
				String::from_utf8_lossy(target),
				count
			);
		});
	flushed(conn, conn.subscribe(target, subscriber)).await?;
	info!("Listening, press Ctrl-C to stop");

	tokio::select! {
		_ = tokio::signal::ctrl_c() => {
			info!("Interrupted, unsubscribing");
			flushed(conn, conn.unsubscribe_all()).await
		}
		_ = lost.notified() => Err(ClientError::ConnectionClosed),
	}
}

/// Await `request`. With autoflush off nothing else would write it out, so
/// a flush is driven alongside.
async fn flushed<T>(
	conn: &Connection,
	request: impl Future<Output = client::Result<T>>,
) -> client::Result<T> {
	if conn.autoflush() {
		return request.await;
	}
	let (result, _) = tokio::join!(request, conn.flush());
	result
}

fn print_message(message: PubSubMessage) {
	let channel = String::from_utf8_lossy(&message.channel);
	let payload = String::from_utf8_lossy(&message.payload);
	match &message.pattern {
		Some(pattern) => println!(
			"[{}] {}: {}",
			String::from_utf8_lossy(pattern),
			channel,
			payload
		),
		None => println!("{}: {}", channel, payload),
	}
}

/// Render a reply the way redis-cli does. Every line ends with a newline.
fn format_reply(value: &RespValue, indent: usize) -> String {
	match value {
		RespValue::SimpleString(s) => format!("{}\n", String::from_utf8_lossy(s)),
		RespValue::Error(e) => format!("(error) {}\n", String::from_utf8_lossy(e)),
		RespValue::Integer(i) => format!("(integer) {}\n", i),
		RespValue::BulkString(s) => format!("{:?}\n", String::from_utf8_lossy(s)),
		RespValue::Null | RespValue::NullArray => "(nil)\n".to_string(),
		RespValue::Array(items) if items.is_empty() => "(empty array)\n".to_string(),
		RespValue::Array(items) => {
			let mut out = String::new();
			for (i, item) in items.iter().enumerate() {
				let prefix = format!("{}) ", i + 1);
				if i > 0 {
					out.push_str(&" ".repeat(indent));
				}
				out.push_str(&prefix);
				out.push_str(&format_reply(item, indent + prefix.len()));
			}
			out
		}
	}
}
