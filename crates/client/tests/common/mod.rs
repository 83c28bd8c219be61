#![allow(dead_code)]

use std::time::Duration;

use bytes::BytesMut;
use client::ClientConfig;
use client::Connection;
use resp::ParseError;
use resp::RespEncoder;
use resp::RespValue;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::io::DuplexStream;

pub const QUIET_PERIOD: Duration = Duration::from_millis(50);

const WAIT_LIMIT: Duration = Duration::from_secs(5);

/// The server end of an in-memory transport, driven by the test script.
pub struct FakeServer {
	stream: DuplexStream,
	buf: BytesMut,
}

impl FakeServer {
	/// Next command written by the client, `None` once the client hung up.
	pub async fn read_command(&mut self) -> Option<Vec<String>> {
		loop {
			match resp::parse(&mut self.buf) {
				Ok(value) => {
					let parts = value
						.into_vec()
						.expect("client sent a non-array command")
						.into_iter()
						.map(|part| part.to_string_lossy().expect("non-string command part"))
						.collect();
					return Some(parts);
				}
				Err(ParseError::Incomplete) => {}
				Err(e) => panic!("client sent malformed bytes: {}", e),
			}
			let n = self.stream.read_buf(&mut self.buf).await.ok()?;
			if n == 0 {
				return None;
			}
		}
	}

	/// Read one command and assert it matches `expected`.
	pub async fn expect(&mut self, expected: &[&str]) {
		let command = tokio::time::timeout(WAIT_LIMIT, self.read_command())
			.await
			.expect("timed out waiting for a command")
			.expect("client closed the connection");
		assert_eq!(command, expected);
	}

	/// Assert the client writes nothing for a short while.
	pub async fn expect_silence(&mut self) {
		let read = tokio::time::timeout(QUIET_PERIOD, self.read_command()).await;
		assert!(read.is_err(), "unexpected command: {:?}", read);
	}

	/// Assert the client closes its end.
	pub async fn expect_hangup(&mut self) {
		let read = tokio::time::timeout(WAIT_LIMIT, self.read_command())
			.await
			.expect("timed out waiting for the client to hang up");
		assert_eq!(read, None);
	}

	pub async fn reply(&mut self, bytes: impl AsRef<[u8]>) {
		self.stream
			.write_all(bytes.as_ref())
			.await
			.expect("failed to write reply");
	}
}

pub fn pair() -> (DuplexStream, FakeServer) {
	let (client, server) = tokio::io::duplex(64 * 1024);
	(
		client,
		FakeServer {
			stream: server,
			buf: BytesMut::new(),
		},
	)
}

/// A connection with no handshake, talking to a fake server.
pub async fn connect() -> (Connection, FakeServer) {
	connect_with(ClientConfig::default()).await
}

/// Only for configurations without credentials or database, which would
/// need the server to answer the handshake.
pub async fn connect_with(config: ClientConfig) -> (Connection, FakeServer) {
	let (stream, server) = pair();
	let conn = Connection::from_stream(stream, &config)
		.await
		.expect("connection setup failed");
	(conn, server)
}

/// A subscription confirmation push, e.g. `["subscribe", "news", 1]`.
pub fn confirmation(kind: &str, target: &str, count: i64) -> Vec<u8> {
	encode(RespValue::array(vec![
		RespValue::bulk_string(kind.to_string()),
		RespValue::bulk_string(target.to_string()),
		RespValue::integer(count),
	]))
}

pub fn message(channel: &str, payload: &str) -> Vec<u8> {
	encode(RespValue::array(vec![
		RespValue::bulk_string("message"),
		RespValue::bulk_string(channel.to_string()),
		RespValue::bulk_string(payload.to_string()),
	]))
}

pub fn pmessage(pattern: &str, channel: &str, payload: &str) -> Vec<u8> {
	encode(RespValue::array(vec![
		RespValue::bulk_string("pmessage"),
		RespValue::bulk_string(pattern.to_string()),
		RespValue::bulk_string(channel.to_string()),
		RespValue::bulk_string(payload.to_string()),
	]))
}

fn encode(value: RespValue) -> Vec<u8> {
	value.encode().expect("encodable value").to_vec()
}

/// Poll `condition` until it holds, failing the test after a while.
pub async fn eventually(condition: impl Fn() -> bool) {
	tokio::time::timeout(WAIT_LIMIT, async {
		while !condition() {
			tokio::time::sleep(Duration::from_millis(5)).await;
		}
	})
	.await
	.expect("condition never became true");
}
