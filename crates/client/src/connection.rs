//! Client connection handle.
//!
//! A [`Connection`] is a cheap, cloneable handle onto one transport. All
//! clones feed the same driver task, which writes commands in the order
//! they are accepted and resolves their replies in that same order.
//!
//! ```no_run
//! use client::ClientConfig;
//! use client::Connection;
//!
//! # async fn demo() -> client::Result<()> {
//! let conn = Connection::connect(&ClientConfig::default()).await?;
//! conn.send("SET", ["greeting", "hello"]).await?;
//! let value = conn.send("GET", ["greeting"]).await?;
//! assert_eq!(value.as_str(), Some("hello"));
//! conn.close().await
//! # }
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use arc_swap::ArcSwapOption;
use bytes::Bytes;
use futures::FutureExt;
use futures::future::BoxFuture;
use futures::future::Shared as SharedFuture;
use log::debug;
use log::info;
use log::warn;
use parking_lot::Mutex;
use resp::RespEncoder;
use resp::RespValue;
use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::oneshot;

use crate::config::ClientConfig;
use crate::driver::Driver;
use crate::driver::Outbound;
use crate::driver::Pending;
use crate::driver::Request;
use crate::error::ClientError;
use crate::error::Result;
use crate::pubsub::Confirmation;
use crate::pubsub::PubSubRegistry;
use crate::pubsub::Subscriber;
use crate::pubsub::SubscriptionTarget;
use crate::pubsub::TargetKind;
use crate::pubsub::parse_confirmations;

/// Commands that change subscriptions; only `subscribe` and `unsubscribe`
/// may issue them.
const RESERVED_COMMANDS: &[&str] = &["SUBSCRIBE", "PSUBSCRIBE", "UNSUBSCRIBE", "PUNSUBSCRIBE"];

/// Commands the server accepts from a subscribed connection, besides the
/// subscription commands themselves.
const PUBSUB_COMMANDS: &[&str] = &["PING"];

type CloseFuture = SharedFuture<BoxFuture<'static, Result<()>>>;

type ClosureNotifier = Arc<dyn Fn() + Send + Sync>;

enum State {
	Open,
	PubSub(Arc<PubSubRegistry>),
	ShuttingDown(CloseFuture),
	Closed,
}

/// State shared between the handles and the driver task.
pub(crate) struct Shared {
	state: Mutex<State>,
	// Mirrors the registry of `State::PubSub` so the driver can route pushes
	// without taking the state lock
	registry: ArcSwapOption<PubSubRegistry>,
	autoflush: AtomicBool,
	allow_subscriptions: AtomicBool,
	on_unexpected_closure: Mutex<Option<ClosureNotifier>>,
}

impl Shared {
	fn new() -> Self {
		Self {
			state: Mutex::new(State::Open),
			registry: ArcSwapOption::empty(),
			autoflush: AtomicBool::new(true),
			allow_subscriptions: AtomicBool::new(true),
			on_unexpected_closure: Mutex::new(None),
		}
	}

	pub(crate) fn autoflush(&self) -> bool {
		self.autoflush.load(Ordering::Acquire)
	}

	pub(crate) fn registry(&self) -> Option<Arc<PubSubRegistry>> {
		self.registry.load_full()
	}

	/// Called by the driver once the transport is gone.
	pub(crate) fn mark_closed(&self, intentional: bool) {
		{
			let mut state = self.state.lock();
			*state = State::Closed;
			self.registry.store(None);
		}

		if intentional {
			debug!("Connection closed");
			return;
		}
		warn!("Connection closed unexpectedly");
		let notifier = self.on_unexpected_closure.lock().take();
		if let Some(notifier) = notifier {
			notifier();
		}
	}
}

#[derive(Clone)]
pub struct Connection {
	requests: mpsc::UnboundedSender<Request>,
	shared: Arc<Shared>,
}

impl fmt::Debug for Connection {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Connection")
			.field("connected", &self.is_connected())
			.field("subscribed", &self.is_subscribed())
			.finish()
	}
}

impl Connection {
	/// Open a TCP connection and run the AUTH / SELECT handshake.
	pub async fn connect(config: &ClientConfig) -> Result<Self> {
		let addr = config.addr();
		debug!("Connecting to {}", addr);
		let stream = TcpStream::connect(&addr).await?;
		stream.set_nodelay(true)?;
		let conn = Self::from_stream(stream, config).await?;
		info!("Connected to {}", addr);
		Ok(conn)
	}

	/// Run a connection over an already established transport.
	///
	/// Must be called from within a tokio runtime; the driver task is
	/// spawned onto it.
	pub async fn from_stream<T>(stream: T, config: &ClientConfig) -> Result<Self>
	where
		T: AsyncRead + AsyncWrite + Send + 'static,
	{
		let (requests, receiver) = mpsc::unbounded_channel();
		let shared = Arc::new(Shared::new());
		tokio::spawn(Driver::new(stream, receiver, shared.clone()).run());

		let conn = Self { requests, shared };
		conn.set_allow_subscriptions(config.allow_subscriptions);
		if let Err(e) = conn.handshake(config).await {
			let _ = conn.close().await;
			return Err(e);
		}
		conn.set_autoflush(config.autoflush);
		Ok(conn)
	}

	async fn handshake(&self, config: &ClientConfig) -> Result<()> {
		if let Some(password) = &config.password {
			let mut args = Vec::with_capacity(2);
			if let Some(username) = &config.username {
				args.push(Bytes::from(username.clone()));
			}
			args.push(Bytes::from(password.clone()));
			self.send("AUTH", args).await?;
			debug!("Authenticated");
		}
		if let Some(db) = config.database {
			self.send("SELECT", [db.to_string()]).await?;
			debug!("Selected database {}", db);
		}
		Ok(())
	}

	/// Send a command and wait for its reply.
	///
	/// Error replies resolve to [`ClientError::Server`].
	pub async fn send<I, A>(&self, command: &str, args: I) -> Result<RespValue>
	where
		I: IntoIterator<Item = A>,
		A: Into<Bytes>,
	{
		let name = command.to_ascii_uppercase();
		if RESERVED_COMMANDS.contains(&name.as_str()) {
			return Err(ClientError::ReservedCommand(name));
		}

		let outbound = Outbound::Command {
			name: Bytes::copy_from_slice(command.as_bytes()),
			args: args.into_iter().map(Into::into).collect(),
		};
		self.request(&name, outbound).await
	}

	/// Send a pre-built value, normally an array of bulk strings.
	pub async fn send_value(&self, value: RespValue) -> Result<RespValue> {
		let name = command_name(&value);
		if RESERVED_COMMANDS.contains(&name.as_str()) {
			return Err(ClientError::ReservedCommand(name));
		}

		let frame = value.encode().map_err(resp::RespError::from)?;
		self.request(&name, Outbound::Encoded(frame)).await
	}

	async fn request(&self, name: &str, outbound: Outbound) -> Result<RespValue> {
		let (reply, response) = oneshot::channel();
		self.enqueue(
			name,
			outbound,
			Pending::Reply {
				reply,
				subscribed: false,
			},
		)?;
		response.await.unwrap_or(Err(ClientError::ConnectionClosed))
	}

	// Admission and hand-off happen under the state lock so nothing can be
	// queued behind the QUIT of a close.
	fn enqueue(&self, name: &str, outbound: Outbound, mut pending: Pending) -> Result<()> {
		let state = self.shared.state.lock();
		match &*state {
			State::Open => {}
			State::PubSub(_)
				if PUBSUB_COMMANDS.contains(&name) || RESERVED_COMMANDS.contains(&name) =>
			{
				if let Pending::Reply { subscribed, .. } = &mut pending {
					*subscribed = true;
				}
			}
			State::PubSub(_) => return Err(ClientError::NotAllowedInPubSub(name.to_string())),
			State::ShuttingDown(_) | State::Closed => return Err(ClientError::ConnectionClosed),
		}
		self.requests
			.send(Request::Command { outbound, pending })
			.map_err(|_| ClientError::ConnectionClosed)
	}

	pub async fn ping(&self) -> Result<()> {
		let reply = self.send("PING", std::iter::empty::<Bytes>()).await?;
		let is_pong = match &reply {
			RespValue::SimpleString(s) => s.eq_ignore_ascii_case(b"PONG"),
			// Subscribed connections answer with a ["pong", ""] push
			RespValue::Array(items) => matches!(
				items.first(),
				Some(RespValue::BulkString(s)) if s.eq_ignore_ascii_case(b"pong")
			),
			_ => false,
		};
		if is_pong {
			Ok(())
		} else {
			Err(ClientError::UnexpectedReply(format!("{:?}", reply)))
		}
	}

	/// Write out every buffered command.
	pub async fn flush(&self) -> Result<()> {
		let (ack, done) = oneshot::channel();
		self.requests
			.send(Request::Flush(ack))
			.map_err(|_| ClientError::ConnectionClosed)?;
		done.await.map_err(|_| ClientError::ConnectionClosed)
	}

	pub fn autoflush(&self) -> bool {
		self.shared.autoflush()
	}

	/// Turning autoflush back on writes out whatever is buffered.
	pub fn set_autoflush(&self, enabled: bool) {
		let was = self.shared.autoflush.swap(enabled, Ordering::AcqRel);
		if enabled && !was {
			let (ack, _) = oneshot::channel();
			let _ = self.requests.send(Request::Flush(ack));
		}
	}

	/// Close the connection.
	///
	/// Sends QUIT and tears the transport down whatever the server answers.
	/// Concurrent and repeated calls share one closure and all succeed.
	pub async fn close(&self) -> Result<()> {
		let closing = {
			let mut state = self.shared.state.lock();
			match &*state {
				State::ShuttingDown(closing) => closing.clone(),
				State::Closed => return Ok(()),
				State::Open | State::PubSub(_) => {
					let (ack, done) = oneshot::channel();
					if self.requests.send(Request::Close(ack)).is_err() {
						return Ok(());
					}
					let closing: CloseFuture = async move {
						// A dropped ack means the driver is already gone
						let _ = done.await;
						Ok(())
					}
					.boxed()
					.shared();
					*state = State::ShuttingDown(closing.clone());
					closing
				}
			}
		};
		closing.await
	}

	/// Register the callback fired when the transport closes without
	/// [`Connection::close`] being called. It fires at most once.
	pub fn set_on_unexpected_closure(&self, notifier: impl Fn() + Send + Sync + 'static) {
		*self.shared.on_unexpected_closure.lock() = Some(Arc::new(notifier));
	}

	pub fn is_connected(&self) -> bool {
		matches!(*self.shared.state.lock(), State::Open | State::PubSub(_))
	}

	pub fn is_subscribed(&self) -> bool {
		matches!(*self.shared.state.lock(), State::PubSub(_))
	}

	/// Channels plus patterns this connection is subscribed or subscribing to.
	pub fn subscription_count(&self) -> usize {
		self.shared
			.registry()
			.map_or(0, |registry| registry.subscription_count())
	}

	pub fn allow_subscriptions(&self) -> bool {
		self.shared.allow_subscriptions.load(Ordering::Acquire)
	}

	/// Disallowing subscriptions on a subscribed connection unsubscribes from
	/// everything in the background.
	pub fn set_allow_subscriptions(&self, allowed: bool) {
		// Stored under the state lock so a concurrent subscribe either sees
		// the new flag or is already visible as subscribed here
		let subscribed = {
			let state = self.shared.state.lock();
			self.shared
				.allow_subscriptions
				.store(allowed, Ordering::Release);
			matches!(*state, State::PubSub(_))
		};
		if allowed || !subscribed {
			return;
		}

		let conn = self.clone();
		tokio::spawn(async move {
			if let Err(e) = conn.unsubscribe_all().await {
				warn!("Failed to unsubscribe after disallowing subscriptions: {}", e);
			}
		});
	}

	/// Subscribe `subscriber` to `target`.
	///
	/// Resolves once the server confirmed every target. Targets that are
	/// already subscribed only get their handlers replaced; targets another
	/// call is still subscribing resolve with that call's outcome.
	pub async fn subscribe(&self, target: SubscriptionTarget, subscriber: Subscriber) -> Result<()> {
		let (kind, names) = target.into_parts();

		let registry = {
			let mut state = self.shared.state.lock();
			if !self.allow_subscriptions() {
				return Err(ClientError::PubSubNotAllowed);
			}
			if names.is_empty() {
				return Ok(());
			}
			let registry = match &*state {
				State::Open => {
					debug!("Entering pubsub mode");
					let registry = Arc::new(PubSubRegistry::new());
					self.shared.registry.store(Some(registry.clone()));
					*state = State::PubSub(registry.clone());
					registry
				}
				State::PubSub(registry) => registry.clone(),
				State::ShuttingDown(_) | State::Closed => return Err(ClientError::ConnectionClosed),
			};
			registry.begin_subscribe();
			registry
		};

		let result = self.add_subscriptions(&registry, kind, &names, &subscriber).await;
		registry.end_subscribe();
		self.leave_pubsub_if_idle(&registry);
		result
	}

	async fn add_subscriptions(
		&self,
		registry: &PubSubRegistry,
		kind: TargetKind,
		names: &[Bytes],
		subscriber: &Subscriber,
	) -> Result<()> {
		let (confirm, confirmed) = oneshot::channel::<Result<()>>();
		let confirmation: Confirmation = async move {
			confirmed
				.await
				.unwrap_or(Err(ClientError::ConnectionClosed))
		}
		.boxed()
		.shared();

		let added = registry.add(kind, names, subscriber, &confirmation);
		if !added.fresh.is_empty() {
			match self.control(kind.subscribe_command(), &added.fresh).await {
				Ok(confirmations) => {
					for (name, count) in confirmations {
						subscriber.notify_subscribed(&name, count);
					}
					let _ = confirm.send(Ok(()));
				}
				Err(e) => {
					debug!("Subscribe failed, discarding {} target(s): {}", added.fresh.len(), e);
					registry.discard(kind, &added.fresh);
					let _ = confirm.send(Err(e.clone()));
					return Err(e);
				}
			}
		}

		for pending in added.pending {
			pending.await?;
		}
		Ok(())
	}

	/// Unsubscribe from `target`; an empty target list means every target
	/// of that kind. Targets that are not subscribed are ignored.
	pub async fn unsubscribe(&self, target: SubscriptionTarget) -> Result<()> {
		let registry = {
			let state = self.shared.state.lock();
			match &*state {
				State::PubSub(registry) => registry.clone(),
				State::Open => return Ok(()),
				State::ShuttingDown(_) | State::Closed => return Err(ClientError::ConnectionClosed),
			}
		};

		let (kind, names) = target.into_parts();
		let removed = registry.remove(kind, &names);
		if removed.is_empty() {
			return Ok(());
		}

		let targets: Vec<Bytes> = removed.iter().map(|(name, _)| name.clone()).collect();
		let result = self.control(kind.unsubscribe_command(), &targets).await;
		if let Ok(confirmations) = &result {
			for (name, count) in confirmations {
				if let Some((_, subscriber)) = removed.iter().find(|(target, _)| target == name) {
					subscriber.notify_unsubscribed(name, *count);
				}
			}
		}
		self.leave_pubsub_if_idle(&registry);
		result.map(|_| ())
	}

	/// Unsubscribe from every channel and pattern at once.
	pub async fn unsubscribe_all(&self) -> Result<()> {
		futures::try_join!(
			self.unsubscribe(SubscriptionTarget::Channels(Vec::new())),
			self.unsubscribe(SubscriptionTarget::Patterns(Vec::new())),
		)?;
		Ok(())
	}

	// Issue a (P)(UN)SUBSCRIBE and collect one confirmation per target.
	async fn control(&self, command: &'static [u8], targets: &[Bytes]) -> Result<Vec<(Bytes, i64)>> {
		let (reply, response) = oneshot::channel();
		let name = String::from_utf8_lossy(command);
		self.enqueue(
			&name,
			Outbound::Command {
				name: Bytes::from_static(command),
				args: targets.to_vec(),
			},
			Pending::Control {
				remaining: targets.len(),
				confirmations: Vec::with_capacity(targets.len()),
				reply,
			},
		)?;
		let confirmations = response
			.await
			.unwrap_or(Err(ClientError::ConnectionClosed))?;
		parse_confirmations(confirmations)
	}

	fn leave_pubsub_if_idle(&self, registry: &Arc<PubSubRegistry>) {
		let mut state = self.shared.state.lock();
		if let State::PubSub(current) = &*state {
			if Arc::ptr_eq(current, registry) && registry.is_idle() {
				debug!("Leaving pubsub mode");
				self.shared.registry.store(None);
				*state = State::Open;
			}
		}
	}
}

/// Upper-cased keyword of a command value, empty if it has none.
fn command_name(value: &RespValue) -> String {
	match value.as_array().and_then(|items| items.first()) {
		Some(RespValue::BulkString(name) | RespValue::SimpleString(name)) => {
			String::from_utf8_lossy(name).to_ascii_uppercase()
		}
		_ => String::new(),
	}
}
