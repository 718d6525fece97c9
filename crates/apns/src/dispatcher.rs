//! The concurrent batch dispatcher: the core of this crate.
//!
//! Grounded directly on `examples/original_source/apns2/client.py`'s
//! `APNsClient` — `send_notification_async`/`get_notification_result` map
//! to [`Dispatcher::send`], and `send_notification_batch`/
//! `update_max_concurrent_streams` map to [`Dispatcher::send_batch`].

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::info;

use apns_core::{DispatchError, ErrorReason, MAX_PAYLOAD_SIZE, Payload, Verdict};

use crate::connection::Connection;
use crate::credentials::Credentials;

/// Wire priority values, carried verbatim in `apns-priority`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Priority {
	#[default]
	Immediate,
	Delayed,
}

impl Priority {
	fn wire(self) -> &'static str {
		match self {
			Self::Immediate => "10",
			Self::Delayed => "5",
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PushType {
	Alert,
	Background,
	Voip,
	Complication,
	Fileprovider,
	Mdm,
}

impl PushType {
	fn wire(self) -> &'static str {
		match self {
			Self::Alert => "alert",
			Self::Background => "background",
			Self::Voip => "voip",
			Self::Complication => "complication",
			Self::Fileprovider => "fileprovider",
			Self::Mdm => "mdm",
		}
	}
}

/// A single token/payload pair for a batch call.
#[derive(Debug, Clone)]
pub struct Notification {
	pub token: String,
	pub payload: Payload,
}

/// Per-call header parameters, shared by `send` and `send_batch`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendParams {
	pub topic: Option<String>,
	pub priority: Option<Priority>,
	pub expiration: Option<i64>,
	pub collapse_id: Option<String>,
	pub push_type: Option<PushType>,
	/// On a transport error mid-batch, close and reopen the connection and
	/// continue rather than aborting the whole batch. Recommended but not
	/// required by the source this is grounded on.
	#[serde(default = "default_reconnect_on_error")]
	pub reconnect_on_error: bool,
}

fn default_reconnect_on_error() -> bool {
	true
}

impl SendParams {
	pub fn new() -> Self {
		Self {
			reconnect_on_error: true,
			..Default::default()
		}
	}
}

/// A custom JSON encoder for [`DispatcherConfig::json_encoder`], replacing
/// the default `Payload::encode`.
pub type JsonEncoder = Box<dyn Fn(&Payload) -> Result<Vec<u8>, serde_json::Error> + Send + Sync>;

/// Construction-time configuration for a [`Dispatcher`].
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatcherConfig {
	#[serde(skip)]
	pub credentials: Option<Credentials>,
	pub use_sandbox: bool,
	pub use_alternative_port: bool,
	pub proxy_host: Option<String>,
	pub proxy_port: Option<u16>,
	pub heartbeat_period: Option<f64>,
	#[serde(default = "default_timeout_secs")]
	pub connect_timeout_secs: u64,
	#[serde(default = "default_timeout_secs")]
	pub request_timeout_secs: u64,
	/// Overrides how payloads are serialized to the request body. Defaults
	/// to `Payload::encode` when left `None`.
	#[serde(skip)]
	pub json_encoder: Option<JsonEncoder>,
}

fn default_timeout_secs() -> u64 {
	20
}

impl Default for DispatcherConfig {
	fn default() -> Self {
		Self {
			credentials: None,
			use_sandbox: false,
			use_alternative_port: false,
			proxy_host: None,
			proxy_port: None,
			heartbeat_period: None,
			connect_timeout_secs: default_timeout_secs(),
			request_timeout_secs: default_timeout_secs(),
			json_encoder: None,
		}
	}
}

const SANDBOX_SERVER: &str = "api.development.push.apple.com";
const LIVE_SERVER: &str = "api.push.apple.com";
const DEFAULT_PORT: u16 = 443;
const ALTERNATIVE_PORT: u16 = 2197;

/// A `RequestStream`: the stream id plus the token it belongs to, tracked
/// in submission-order FIFO while awaiting its response.
struct RequestStream {
	stream_id: u32,
	token: String,
}

/// The concurrent batch dispatcher over a single multiplexed HTTP/2
/// connection to APNs.
pub struct Dispatcher {
	credentials: Credentials,
	connection: Arc<Connection>,
	json_encoder: JsonEncoder,
	/// Only present when `heartbeat_period` was set; holds no other state
	/// and is never awaited, since the task exits on its own once
	/// `connection` drops.
	_heartbeat: Option<JoinHandle<()>>,
}

impl Dispatcher {
	pub fn new(config: DispatcherConfig) -> Result<Self, DispatchError> {
		let credentials = config
			.credentials
			.ok_or_else(|| DispatchError::Credentials("no credentials supplied".into()))?;

		let server = if config.use_sandbox {
			SANDBOX_SERVER
		} else {
			LIVE_SERVER
		};
		let port = if config.use_alternative_port {
			ALTERNATIVE_PORT
		} else {
			DEFAULT_PORT
		};
		let proxy = match (config.proxy_host, config.proxy_port) {
			(Some(host), Some(port)) => Some((host, port)),
			_ => None,
		};

		let connection = Arc::new(Connection::new(
			server,
			port,
			credentials.tls_config(),
			proxy,
			Duration::from_secs(config.connect_timeout_secs),
		)?);

		let heartbeat = config
			.heartbeat_period
			.map(|secs| connection.spawn_heartbeat(Duration::from_secs_f64(secs)));

		Ok(Self {
			credentials,
			connection,
			json_encoder: config
				.json_encoder
				.unwrap_or_else(|| Box::new(apns_core::payload::Payload::encode)),
			_heartbeat: heartbeat,
		})
	}

	/// Builds a dispatcher around an already-constructed [`Connection`],
	/// bypassing the server/port selection in [`Dispatcher::new`]. Useful
	/// for pointing at a non-standard endpoint (a proxy fixture, a sandbox
	/// mock) while still authenticating with real `Credentials`.
	pub fn from_connection(credentials: Credentials, connection: Connection) -> Self {
		Self {
			credentials,
			connection: Arc::new(connection),
			json_encoder: Box::new(apns_core::payload::Payload::encode),
			_heartbeat: None,
		}
	}

	/// Overrides the JSON encoder used for outgoing payloads, regardless of
	/// which constructor built this dispatcher.
	pub fn with_json_encoder(
		mut self,
		encoder: impl Fn(&Payload) -> Result<Vec<u8>, serde_json::Error> + Send + Sync + 'static,
	) -> Self {
		self.json_encoder = Box::new(encoder);
		self
	}

	/// Sends one notification and returns once APNs has responded.
	pub async fn send(
		&self,
		token: &str,
		payload: &Payload,
		params: &SendParams,
	) -> Result<(), DispatchError> {
		self.connection.connect().await?;
		let body = self.encode_payload(payload)?;
		let headers = self.build_headers(payload, params)?;
		let stream_id =
			self.connection
				.request(Method::POST, &device_path(token), body, headers)?;
		let (status, body) = self.connection.get_response(stream_id).await?;
		match verdict_from_response(status, &body)? {
			Verdict::Success => Ok(()),
			Verdict::Failure { reason, timestamp } => {
				Err(DispatchError::Response { reason, timestamp })
			}
		}
	}

	/// The dynamic window scheduler: pipelines notifications as concurrent
	/// HTTP/2 streams, never exceeding the peer's current
	/// `MAX_CONCURRENT_STREAMS`, and collects one verdict per input token
	/// (last write wins on duplicate tokens).
	pub async fn send_batch<I>(
		&self,
		notifications: I,
		params: &SendParams,
	) -> Result<HashMap<String, Verdict>, DispatchError>
	where
		I: IntoIterator<Item = Notification>,
	{
		self.connection.connect().await?;

		let mut iter = notifications.into_iter();
		let mut next = iter.next();
		let mut results = HashMap::new();
		let mut open_streams: VecDeque<RequestStream> = VecDeque::new();

		while !open_streams.is_empty() || next.is_some() {
			let effective_max = self.connection.remote_max_concurrent_streams();

			if let Some(notification) = &next {
				if (open_streams.len() as u32) < effective_max {
					info!(token = %notification.token, "sending to token");
					let body = self.encode_payload(&notification.payload)?;
					let headers = self.build_headers(&notification.payload, params)?;
					match self.connection.request(
						Method::POST,
						&device_path(&notification.token),
						body,
						headers,
					) {
						Ok(stream_id) => {
							open_streams.push_back(RequestStream {
								stream_id,
								token: notification.token.clone(),
							});
							next = iter.next();
							continue;
						}
						Err(e) => {
							results
								.insert(notification.token.clone(), transport_failure_verdict(&e));
							next = iter.next();
							if params.reconnect_on_error {
								self.reconnect_and_drain(&mut open_streams, &mut results)
									.await?;
							}
							continue;
						}
					}
				}
			}

			let pending = open_streams
				.pop_front()
				.expect("loop invariant: open_streams nonempty here");
			match self.connection.get_response(pending.stream_id).await {
				Ok((status, body)) => {
					let verdict = verdict_from_response(status, &body)?;
					info!(token = %pending.token, ?verdict, "got response");
					results.insert(pending.token, verdict);
				}
				Err(e) => {
					results.insert(pending.token, transport_failure_verdict(&e));
					if params.reconnect_on_error {
						self.reconnect_and_drain(&mut open_streams, &mut results)
							.await?;
					}
				}
			}
		}

		Ok(results)
	}

	/// On a transport error, close and reopen the connection and fail out
	/// every still-pending stream as a synthetic transport verdict, since
	/// their `ResponseFuture`s belonged to the now-dead connection.
	async fn reconnect_and_drain(
		&self,
		open_streams: &mut VecDeque<RequestStream>,
		results: &mut HashMap<String, Verdict>,
	) -> Result<(), DispatchError> {
		for pending in open_streams.drain(..) {
			results.insert(
				pending.token,
				transport_failure_verdict(&DispatchError::Transport("connection reset".into())),
			);
		}
		self.connection.close();
		self.connection.connect().await
	}

	fn encode_payload(&self, payload: &Payload) -> Result<Bytes, DispatchError> {
		let encoded = (self.json_encoder)(payload)?;
		if encoded.len() > MAX_PAYLOAD_SIZE {
			return Err(DispatchError::PayloadTooLarge {
				size: encoded.len(),
				limit: MAX_PAYLOAD_SIZE,
			});
		}
		Ok(Bytes::from(encoded))
	}

	fn build_headers(
		&self,
		payload: &Payload,
		params: &SendParams,
	) -> Result<HeaderMap, DispatchError> {
		let mut headers = HeaderMap::new();

		let mut inferred_push_type = None;
		if let Some(topic) = &params.topic {
			headers.insert("apns-topic", header_value(topic)?);
			inferred_push_type = Some(infer_push_type(topic, payload));
		}
		if let Some(push_type) = params.push_type {
			inferred_push_type = Some(push_type);
		}
		if let Some(push_type) = inferred_push_type {
			headers.insert("apns-push-type", HeaderValue::from_static(push_type.wire()));
		}

		let priority = params.priority.unwrap_or_default();
		if priority != Priority::Immediate {
			headers.insert("apns-priority", HeaderValue::from_static(priority.wire()));
		}
		if let Some(expiration) = params.expiration {
			headers.insert("apns-expiration", header_value(&expiration.to_string())?);
		}
		if let Some(auth) = self
			.credentials
			.authorization_header(params.topic.as_deref())?
		{
			headers.insert("authorization", header_value(&auth)?);
		}
		if let Some(collapse_id) = &params.collapse_id {
			headers.insert("apns-collapse-id", header_value(collapse_id)?);
		}

		Ok(headers)
	}
}

fn device_path(token: &str) -> String {
	format!("/3/device/{token}")
}

fn header_value(s: &str) -> Result<HeaderValue, DispatchError> {
	HeaderValue::from_str(s)
		.map_err(|e| DispatchError::Transport(format!("invalid header value: {e}")))
}

/// The push-type inference table: topic suffix wins, then whether the
/// payload carries anything user-visible, otherwise background.
fn infer_push_type(topic: &str, payload: &Payload) -> PushType {
	if topic.ends_with(".voip") {
		PushType::Voip
	} else if topic.ends_with(".complication") {
		PushType::Complication
	} else if topic.ends_with(".pushkit.fileprovider") {
		PushType::Fileprovider
	} else if payload.alert.is_some() || payload.badge.is_some() || payload.sound.is_some() {
		PushType::Alert
	} else {
		PushType::Background
	}
}

#[derive(Deserialize)]
struct ErrorBody {
	reason: String,
	timestamp: Option<i64>,
}

fn verdict_from_response(status: StatusCode, body: &[u8]) -> Result<Verdict, DispatchError> {
	if status == StatusCode::OK {
		return Ok(Verdict::Success);
	}
	let parsed: ErrorBody = serde_json::from_slice(body).map_err(|e| {
		DispatchError::MalformedResponse(format!("failed to parse error body: {e}"))
	})?;
	let timestamp = if status == StatusCode::GONE {
		parsed.timestamp.map(|t| t.to_string())
	} else {
		None
	};
	Ok(Verdict::Failure {
		reason: ErrorReason::from_wire(&parsed.reason),
		timestamp,
	})
}

fn transport_failure_verdict(e: &DispatchError) -> Verdict {
	Verdict::Failure {
		reason: ErrorReason::Unknown(e.to_string()),
		timestamp: None,
	}
}
