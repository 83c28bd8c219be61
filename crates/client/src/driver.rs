//! The task that owns a connection's transport.
//!
//! Every command is encoded, written and correlated with its reply here, in
//! the order requests arrive on the channel. Replies carry no identifiers,
//! so keeping the outbound queue and the decoder on one task is what makes
//! FIFO matching sound.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use bytes::BytesMut;
use log::debug;
use log::trace;
use log::warn;
use resp::RespParseResult;
use resp::RespParser;
use resp::RespValue;
use resp::encode_command;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;
use tokio::io::ReadHalf;
use tokio::io::WriteHalf;
use tokio::sync::mpsc;
use tokio::sync::oneshot;

use crate::connection::Shared;
use crate::error::ClientError;
use crate::error::Result;
use crate::pubsub::PushKind;
use crate::pubsub::classify;

/// With autoflush off, buffered commands are written once this many bytes
/// are waiting.
pub(crate) const HIGH_WATER_MARK: usize = 64 * 1024;

// Requests drained from the channel before the outbound buffer is flushed
const MAX_BATCH: usize = 256;

const READ_BUFFER_SIZE: usize = 4096;

pub(crate) type ReplySender = oneshot::Sender<Result<RespValue>>;

/// Bytes to append to the outbound buffer.
pub(crate) enum Outbound {
	/// Encoded by the driver as an array of bulk strings
	Command { name: Bytes, args: Vec<Bytes> },
	/// Already encoded
	Encoded(Bytes),
}

/// What the driver does with the reply of a written command.
pub(crate) enum Pending {
	/// `subscribed` is set for commands accepted in pubsub mode, whose
	/// replies may be preceded by pushes.
	Reply { reply: ReplySender, subscribed: bool },
	/// A (P)(UN)SUBSCRIBE for `remaining` targets. Each target is confirmed
	/// by its own push; the collected pushes resolve `reply` as one array.
	Control {
		remaining: usize,
		confirmations: Vec<RespValue>,
		reply: ReplySender,
	},
	Quit,
}

pub(crate) enum Request {
	Command { outbound: Outbound, pending: Pending },
	Flush(oneshot::Sender<()>),
	Close(oneshot::Sender<()>),
}

enum Flow {
	Continue,
	Quit,
}

pub(crate) struct Driver<T> {
	reader: ReadHalf<T>,
	writer: WriteHalf<T>,
	read_buf: BytesMut,
	out: BytesMut,
	parser: RespParser,
	pending: VecDeque<Pending>,
	requests: mpsc::UnboundedReceiver<Request>,
	shared: Arc<Shared>,
	closing: Option<oneshot::Sender<()>>,
}

impl<T> Driver<T>
where
	T: AsyncRead + AsyncWrite + Send + 'static,
{
	pub(crate) fn new(
		stream: T,
		requests: mpsc::UnboundedReceiver<Request>,
		shared: Arc<Shared>,
	) -> Self {
		let (reader, writer) = tokio::io::split(stream);
		Self {
			reader,
			writer,
			read_buf: BytesMut::with_capacity(READ_BUFFER_SIZE),
			out: BytesMut::with_capacity(READ_BUFFER_SIZE),
			parser: RespParser::new(),
			pending: VecDeque::new(),
			requests,
			shared,
			closing: None,
		}
	}

	pub(crate) async fn run(mut self) {
		let outcome = self.serve().await;
		self.finish(outcome).await;
	}

	async fn serve(&mut self) -> Result<()> {
		let mut batch = Vec::with_capacity(MAX_BATCH);
		loop {
			tokio::select! {
				request = self.requests.recv() => {
					let Some(request) = request else {
						debug!("All connection handles dropped, closing transport");
						return Ok(());
					};
					batch.push(request);
					while batch.len() < MAX_BATCH {
						match self.requests.try_recv() {
							Ok(request) => batch.push(request),
							Err(_) => break,
						}
					}

					let mut force = false;
					let mut acks = Vec::new();
					for request in batch.drain(..) {
						match request {
							Request::Command { outbound, pending } => self.queue(outbound, pending),
							Request::Flush(ack) => {
								force = true;
								acks.push(ack);
							}
							Request::Close(ack) => {
								debug!("Closing connection, sending QUIT");
								self.queue(
									Outbound::Command {
										name: Bytes::from_static(b"QUIT"),
										args: Vec::new(),
									},
									Pending::Quit,
								);
								self.closing = Some(ack);
								force = true;
							}
						}
					}

					if force || self.shared.autoflush() || self.out.len() >= HIGH_WATER_MARK {
						self.flush().await?;
					}
					for ack in acks {
						let _ = ack.send(());
					}
				}
				read = self.reader.read_buf(&mut self.read_buf) => {
					let n = read?;
					trace!("Read {} bytes from transport", n);
					if n == 0 {
						return match self.closing {
							Some(_) => Ok(()),
							None => Err(ClientError::ConnectionClosed),
						};
					}
					if let Flow::Quit = self.decode()? {
						return Ok(());
					}
				}
			}
		}
	}

	fn queue(&mut self, outbound: Outbound, pending: Pending) {
		match outbound {
			Outbound::Command { name, args } => encode_command(&mut self.out, &name, &args),
			Outbound::Encoded(frame) => self.out.extend_from_slice(&frame),
		}
		self.pending.push_back(pending);
	}

	async fn flush(&mut self) -> Result<()> {
		if self.out.is_empty() {
			return Ok(());
		}
		trace!("Flushing {} bytes", self.out.len());
		self.writer.write_all_buf(&mut self.out).await?;
		self.writer.flush().await?;
		Ok(())
	}

	fn decode(&mut self) -> Result<Flow> {
		loop {
			match self.parser.parse(&mut self.read_buf) {
				RespParseResult::Complete(value) => {
					if let Flow::Quit = self.route(value) {
						return Ok(Flow::Quit);
					}
				}
				RespParseResult::Incomplete => return Ok(Flow::Continue),
				RespParseResult::Error(e) => return Err(ClientError::Protocol(e)),
			}
		}
	}

	// Whether the server may send pushes ahead of the reply at the head of
	// the queue. Replies to commands written before a SUBSCRIBE arrive
	// before any push, whatever their shape.
	fn expects_push(&self) -> bool {
		match self.pending.front() {
			Some(Pending::Reply { subscribed, .. }) => *subscribed,
			Some(Pending::Control { .. }) | Some(Pending::Quit) | None => true,
		}
	}

	fn route(&mut self, value: RespValue) -> Flow {
		let registry = self.shared.registry();
		let push = match (&registry, self.expects_push()) {
			(Some(_), true) => classify(&value),
			_ => None,
		};
		match push {
			Some(PushKind::Message) => {
				if let Some(registry) = registry {
					registry.dispatch(value);
				}
				return Flow::Continue;
			}
			Some(PushKind::Confirmation) => {
				let Some(Pending::Control {
					remaining,
					confirmations,
					..
				}) = self.pending.front_mut()
				else {
					debug!("Dropping unsolicited confirmation: {:?}", value);
					return Flow::Continue;
				};
				confirmations.push(value);
				*remaining = remaining.saturating_sub(1);
				if *remaining > 0 {
					return Flow::Continue;
				}
				if let Some(Pending::Control {
					confirmations,
					reply,
					..
				}) = self.pending.pop_front()
				{
					let _ = reply.send(Ok(RespValue::Array(confirmations)));
				}
				return Flow::Continue;
			}
			None => {}
		}

		match self.pending.pop_front() {
			Some(Pending::Reply { reply, .. }) | Some(Pending::Control { reply, .. }) => {
				if reply.send(into_result(value)).is_err() {
					debug!("Caller stopped waiting, dropping reply");
				}
				Flow::Continue
			}
			Some(Pending::Quit) => {
				debug!("QUIT acknowledged: {:?}", value);
				Flow::Quit
			}
			None => {
				warn!("Discarding reply with no pending command: {:?}", value);
				Flow::Continue
			}
		}
	}

	async fn finish(mut self, outcome: Result<()>) {
		let error = match outcome {
			Ok(()) => ClientError::ConnectionClosed,
			Err(e) => {
				if self.closing.is_none() {
					warn!("Connection failed: {}", e);
				} else {
					debug!("Connection failed while closing: {}", e);
				}
				e
			}
		};

		for pending in self.pending.drain(..) {
			match pending {
				Pending::Reply { reply, .. } | Pending::Control { reply, .. } => {
					let _ = reply.send(Err(error.clone()));
				}
				Pending::Quit => {}
			}
		}

		// Already-closed transports are fine here
		if let Err(e) = self.writer.shutdown().await {
			trace!("Transport shutdown: {}", e);
		}

		self.requests.close();
		while let Ok(request) = self.requests.try_recv() {
			if let Request::Command {
				pending: Pending::Reply { reply, .. } | Pending::Control { reply, .. },
				..
			} = request
			{
				let _ = reply.send(Err(ClientError::ConnectionClosed));
			}
		}

		let intentional = self.closing.is_some();
		self.shared.mark_closed(intentional);
		if let Some(ack) = self.closing.take() {
			let _ = ack.send(());
		}
	}
}

/// Server error replies fail the command; everything else is its result.
fn into_result(value: RespValue) -> Result<RespValue> {
	match value {
		RespValue::Error(message) => Err(ClientError::Server(
			String::from_utf8_lossy(&message).into_owned(),
		)),
		value => Ok(value),
	}
}
