//! Publish/subscribe bookkeeping.
//!
//! A [`PubSubRegistry`] exists only while the connection is in pubsub mode.
//! It maps every subscribed channel or pattern to the handlers that were
//! registered for it, and the connection driver hands it every pushed
//! `message` / `pmessage` it decodes.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use bytes::Bytes;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::BoxFuture;
use futures::future::Shared;
use log::debug;
use log::trace;
use resp::RespValue;

use crate::error::ClientError;
use crate::error::Result;

/// Resolves once the server confirmed (or refused) a subscription.
pub(crate) type Confirmation = Shared<BoxFuture<'static, Result<()>>>;

/// Receives every message published to a subscribed target.
pub type MessageReceiver = Arc<dyn Fn(PubSubMessage) + Send + Sync>;

/// Called with the target name and the connection's subscription count
/// reported by the server.
pub type SubscriptionChangeCallback = Arc<dyn Fn(&Bytes, i64) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetKind {
	Channel,
	Pattern,
}

impl TargetKind {
	pub(crate) fn subscribe_command(self) -> &'static [u8] {
		match self {
			TargetKind::Channel => b"SUBSCRIBE",
			TargetKind::Pattern => b"PSUBSCRIBE",
		}
	}

	pub(crate) fn unsubscribe_command(self) -> &'static [u8] {
		match self {
			TargetKind::Channel => b"UNSUBSCRIBE",
			TargetKind::Pattern => b"PUNSUBSCRIBE",
		}
	}
}

/// What to subscribe to or unsubscribe from.
///
/// An empty list passed to `unsubscribe` means every target of that kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionTarget {
	/// Exact channel names
	Channels(Vec<Bytes>),
	/// Glob-style patterns
	Patterns(Vec<Bytes>),
}

impl SubscriptionTarget {
	pub fn channels<I, T>(names: I) -> Self
	where
		I: IntoIterator<Item = T>,
		T: Into<Bytes>,
	{
		SubscriptionTarget::Channels(names.into_iter().map(Into::into).collect())
	}

	pub fn patterns<I, T>(patterns: I) -> Self
	where
		I: IntoIterator<Item = T>,
		T: Into<Bytes>,
	{
		SubscriptionTarget::Patterns(patterns.into_iter().map(Into::into).collect())
	}

	pub fn kind(&self) -> TargetKind {
		match self {
			SubscriptionTarget::Channels(_) => TargetKind::Channel,
			SubscriptionTarget::Patterns(_) => TargetKind::Pattern,
		}
	}

	pub fn names(&self) -> &[Bytes] {
		match self {
			SubscriptionTarget::Channels(names) | SubscriptionTarget::Patterns(names) => names,
		}
	}

	pub(crate) fn into_parts(self) -> (TargetKind, Vec<Bytes>) {
		match self {
			SubscriptionTarget::Channels(names) => (TargetKind::Channel, names),
			SubscriptionTarget::Patterns(names) => (TargetKind::Pattern, names),
		}
	}
}

/// A message pushed by the server for a subscribed target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PubSubMessage {
	/// Channel the message was published to
	pub channel: Bytes,
	/// Pattern that matched, for pattern subscriptions
	pub pattern: Option<Bytes>,
	pub payload: Bytes,
}

/// Handlers registered by one `subscribe` call.
#[derive(Clone)]
pub struct Subscriber {
	on_message: MessageReceiver,
	on_subscribe: Option<SubscriptionChangeCallback>,
	on_unsubscribe: Option<SubscriptionChangeCallback>,
}

impl Subscriber {
	pub fn new(on_message: impl Fn(PubSubMessage) + Send + Sync + 'static) -> Self {
		Self {
			on_message: Arc::new(on_message),
			on_subscribe: None,
			on_unsubscribe: None,
		}
	}

	pub fn on_subscribe(mut self, callback: impl Fn(&Bytes, i64) + Send + Sync + 'static) -> Self {
		self.on_subscribe = Some(Arc::new(callback));
		self
	}

	pub fn on_unsubscribe(
		mut self,
		callback: impl Fn(&Bytes, i64) + Send + Sync + 'static,
	) -> Self {
		self.on_unsubscribe = Some(Arc::new(callback));
		self
	}

	pub(crate) fn notify_subscribed(&self, target: &Bytes, count: i64) {
		if let Some(callback) = &self.on_subscribe {
			callback(target, count);
		}
	}

	pub(crate) fn notify_unsubscribed(&self, target: &Bytes, count: i64) {
		if let Some(callback) = &self.on_unsubscribe {
			callback(target, count);
		}
	}
}

impl fmt::Debug for Subscriber {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Subscriber")
			.field("on_subscribe", &self.on_subscribe.is_some())
			.field("on_unsubscribe", &self.on_unsubscribe.is_some())
			.finish()
	}
}

struct Registration {
	subscriber: Subscriber,
	confirmed: Confirmation,
}

/// Outcome of registering a subscribe call.
pub(crate) struct Added {
	/// Targets that were absent and need a (P)SUBSCRIBE
	pub(crate) fresh: Vec<Bytes>,
	/// Confirmations of targets another call is already subscribing
	pub(crate) pending: Vec<Confirmation>,
}

#[derive(Default)]
pub(crate) struct PubSubRegistry {
	channels: DashMap<Bytes, Registration>,
	patterns: DashMap<Bytes, Registration>,
	// subscribe calls between entering pubsub mode and their completion
	in_flight: AtomicUsize,
}

impl PubSubRegistry {
	pub(crate) fn new() -> Self {
		Self::default()
	}

	fn targets(&self, kind: TargetKind) -> &DashMap<Bytes, Registration> {
		match kind {
			TargetKind::Channel => &self.channels,
			TargetKind::Pattern => &self.patterns,
		}
	}

	/// Number of channels and patterns currently registered.
	pub(crate) fn subscription_count(&self) -> usize {
		self.channels.len() + self.patterns.len()
	}

	pub(crate) fn begin_subscribe(&self) {
		self.in_flight.fetch_add(1, Ordering::SeqCst);
	}

	pub(crate) fn end_subscribe(&self) {
		self.in_flight.fetch_sub(1, Ordering::SeqCst);
	}

	/// No targets and no subscribe call still running.
	pub(crate) fn is_idle(&self) -> bool {
		self.in_flight.load(Ordering::SeqCst) == 0 && self.subscription_count() == 0
	}

	/// Register `subscriber` for `names`.
	///
	/// Absent targets are inserted with `confirmed` and reported as fresh.
	/// Present targets get the new handlers and contribute their existing
	/// confirmation, so concurrent callers coalesce onto one SUBSCRIBE.
	pub(crate) fn add(
		&self,
		kind: TargetKind,
		names: &[Bytes],
		subscriber: &Subscriber,
		confirmed: &Confirmation,
	) -> Added {
		let mut added = Added {
			fresh: Vec::new(),
			pending: Vec::new(),
		};
		for name in names {
			match self.targets(kind).entry(name.clone()) {
				Entry::Occupied(mut entry) => {
					let registration = entry.get_mut();
					registration.subscriber = subscriber.clone();
					added.pending.push(registration.confirmed.clone());
				}
				Entry::Vacant(entry) => {
					entry.insert(Registration {
						subscriber: subscriber.clone(),
						confirmed: confirmed.clone(),
					});
					added.fresh.push(name.clone());
				}
			}
		}
		added
	}

	/// Drop targets whose subscription failed.
	pub(crate) fn discard(&self, kind: TargetKind, names: &[Bytes]) {
		for name in names {
			self.targets(kind).remove(name);
		}
	}

	/// Remove `names` (every target of `kind` if empty) and return the
	/// handlers of the targets that were present.
	pub(crate) fn remove(&self, kind: TargetKind, names: &[Bytes]) -> Vec<(Bytes, Subscriber)> {
		let targets = self.targets(kind);
		let names: Vec<Bytes> = if names.is_empty() {
			targets.iter().map(|entry| entry.key().clone()).collect()
		} else {
			names.to_vec()
		};

		names
			.into_iter()
			.filter_map(|name| targets.remove(&name))
			.map(|(name, registration)| (name, registration.subscriber))
			.collect()
	}

	/// Deliver a `message` or `pmessage` push to its receiver.
	pub(crate) fn dispatch(&self, push: RespValue) {
		let Some(message) = parse_message(push) else {
			debug!("Ignoring malformed pubsub push");
			return;
		};

		let (kind, key) = match &message.pattern {
			Some(pattern) => (TargetKind::Pattern, pattern),
			None => (TargetKind::Channel, &message.channel),
		};
		// Clone the receiver out so no map guard is held while user code runs
		let receiver = self
			.targets(kind)
			.get(key)
			.map(|registration| registration.subscriber.on_message.clone());

		match receiver {
			Some(receiver) => receiver(message),
			None => trace!(
				"Dropping message for unknown target {:?}",
				String::from_utf8_lossy(key)
			),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PushKind {
	/// `message` or `pmessage`
	Message,
	/// `subscribe`, `unsubscribe`, `psubscribe` or `punsubscribe`
	Confirmation,
}

/// Recognize the RESP2 pubsub push shapes.
pub(crate) fn classify(value: &RespValue) -> Option<PushKind> {
	let RespValue::Array(items) = value else {
		return None;
	};
	let Some(RespValue::BulkString(kind)) = items.first() else {
		return None;
	};

	let is = |name: &[u8]| kind.eq_ignore_ascii_case(name);
	match items.len() {
		3 if is(b"message") => Some(PushKind::Message),
		4 if is(b"pmessage") => Some(PushKind::Message),
		3 if is(b"subscribe")
			|| is(b"unsubscribe")
			|| is(b"psubscribe")
			|| is(b"punsubscribe") =>
		{
			Some(PushKind::Confirmation)
		}
		_ => None,
	}
}

fn parse_message(push: RespValue) -> Option<PubSubMessage> {
	let mut items = push.into_vec()?.into_iter().skip(1);
	let mut next_bytes = || match items.next() {
		Some(RespValue::BulkString(b)) => Some(b),
		_ => None,
	};

	let first = next_bytes()?;
	let second = next_bytes()?;
	match next_bytes() {
		// pmessage: pattern, channel, payload
		Some(payload) => Some(PubSubMessage {
			channel: second,
			pattern: Some(first),
			payload,
		}),
		// message: channel, payload
		None => Some(PubSubMessage {
			channel: first,
			pattern: None,
			payload: second,
		}),
	}
}

/// Split the reply of a (P)(UN)SUBSCRIBE request into `(target, count)`
/// pairs, one per confirmation push.
pub(crate) fn parse_confirmations(reply: RespValue) -> Result<Vec<(Bytes, i64)>> {
	let unexpected = |what: &RespValue| ClientError::UnexpectedReply(format!("{:?}", what));

	let confirmations = match reply {
		RespValue::Array(confirmations) => confirmations,
		other => return Err(unexpected(&other)),
	};
	confirmations
		.into_iter()
		.map(|confirmation| match confirmation.as_array().map(Vec::as_slice) {
			Some([_, RespValue::BulkString(target), RespValue::Integer(count)]) => {
				Ok((target.clone(), *count))
			}
			// Unsubscribing with nothing subscribed reports a null target
			Some([_, RespValue::Null, RespValue::Integer(count)]) => Ok((Bytes::new(), *count)),
			_ => Err(unexpected(&confirmation)),
		})
		.collect()
}
