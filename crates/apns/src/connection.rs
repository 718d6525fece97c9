//! The single long-lived HTTP/2 connection to APNs.
//!
//! Grounded on `examples/original_source/apns2/client.py`'s `_connection`
//! usage (`connect`, `request`, `get_response`, `update_max_concurrent_streams`)
//! but implemented directly against the `h2` crate rather than a wrapper:
//! that wrapper was never part of the retrieved teacher sources, so this
//! module is new code following the teacher's `tracing`/`parking_lot`
//! idiom elsewhere in the workspace.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use apns_core::arc::Atomic;
use arc_swap::ArcSwap;
use bytes::{Bytes, BytesMut};
use h2::client::{self, ResponseFuture, SendRequest};
use http::{HeaderMap, Method, Request, StatusCode};
use parking_lot::Mutex;
use rustls_pki_types::ServerName;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_rustls::TlsConnector;
use tracing::{debug, info, warn};

use apns_core::DispatchError;

/// Defensive ceiling on the peer-advertised `MAX_CONCURRENT_STREAMS`: APNs
/// typically reports 500, but a buggy or malicious peer shouldn't be able
/// to make the dispatcher open an unbounded number of streams.
pub const CONCURRENT_STREAMS_SAFETY_MAXIMUM: u32 = 1000;

const MAX_CONNECTION_RETRIES: u32 = 3;

struct Inner {
	send_request: SendRequest<Bytes>,
	conn_task: JoinHandle<()>,
	responses: HashMap<u32, ResponseFuture>,
	/// Taken out by `ping` and put back afterwards; `h2` only ever hands
	/// this out once per connection.
	ping_pong: Option<h2::PingPong>,
}

enum State {
	Idle,
	Connected(Inner),
	Closed,
}

/// Owns the TCP+TLS+HTTP/2 connection to one APNs endpoint.
///
/// `request`/`get_response` split submission from completion so the
/// dispatcher can keep multiple streams in flight: `request` never waits on
/// the network, `get_response` awaits exactly one stream's result.
pub struct Connection {
	server: String,
	port: u16,
	server_name: ServerName<'static>,
	tls_connector: TlsConnector,
	proxy: Option<(String, u16)>,
	connect_timeout: Duration,
	state: Mutex<State>,
	/// Hot-swappable cache of the peer's last-observed `MAX_CONCURRENT_STREAMS`,
	/// clamped to `[1, CONCURRENT_STREAMS_SAFETY_MAXIMUM]`. Updated every time
	/// `remote_max_concurrent_streams` is read under `state`'s lock.
	max_streams: Atomic<u32>,
}

impl Connection {
	pub fn new(
		server: impl Into<String>,
		port: u16,
		tls_config: Arc<rustls::ClientConfig>,
		proxy: Option<(String, u16)>,
		connect_timeout: Duration,
	) -> Result<Self, DispatchError> {
		let server = server.into();
		let server_name = ServerName::try_from(server.clone())
			.map_err(|e| DispatchError::Credentials(format!("invalid server name: {e}")))?;
		Ok(Self {
			server,
			port,
			server_name,
			tls_connector: TlsConnector::from(tls_config),
			proxy,
			connect_timeout,
			state: Mutex::new(State::Idle),
			max_streams: Arc::new(ArcSwap::from_pointee(1)),
		})
	}

	/// Idempotent: a no-op if already connected. Retries a failed open up to
	/// `MAX_CONNECTION_RETRIES` times, closing partial state between attempts.
	pub async fn connect(&self) -> Result<(), DispatchError> {
		{
			let state = self.state.lock();
			if matches!(&*state, State::Connected(_)) {
				return Ok(());
			}
		}

		let mut attempts = 0;
		loop {
			attempts += 1;
			match self.connect_once().await {
				Ok(inner) => {
					*self.state.lock() = State::Connected(inner);
					info!(server = %self.server, "connected to APNs");
					return Ok(());
				}
				Err(e) => {
					warn!(attempt = attempts, error = %e, "failed connecting to APNs");
					*self.state.lock() = State::Closed;
					if attempts >= MAX_CONNECTION_RETRIES {
						return Err(DispatchError::Connection { attempts });
					}
				}
			}
		}
	}

	async fn connect_once(&self) -> Result<Inner, DispatchError> {
		let tcp = tokio::time::timeout(self.connect_timeout, self.open_tcp())
			.await
			.map_err(|_| DispatchError::Transport("connect timed out".into()))??;
		tcp.set_nodelay(true).ok();

		let tls = self
			.tls_connector
			.connect(self.server_name.clone(), tcp)
			.await
			.map_err(|e| DispatchError::Transport(format!("TLS handshake failed: {e}")))?;

		let (send_request, mut conn) = client::handshake(tls)
			.await
			.map_err(|e| DispatchError::Transport(format!("HTTP/2 handshake failed: {e}")))?;
		let ping_pong = conn.ping_pong();

		let conn_task = tokio::spawn(async move {
			if let Err(e) = (&mut conn).await {
				debug!(error = %e, "APNs connection task ended");
			}
		});

		let send_request = send_request
			.ready()
			.await
			.map_err(|e| DispatchError::Transport(format!("connection not ready: {e}")))?;

		// `ready()` only guarantees capacity under whatever limit is known so
		// far; until the peer's initial SETTINGS frame has been processed by
		// the driver task above, that limit reads as unbounded. Give the
		// driver a bounded number of turns to catch up so callers relying on
		// `remote_max_concurrent_streams()` right after `connect()` see the
		// real value rather than racing ahead of it.
		for _ in 0..50 {
			if send_request.current_max_send_streams() <= CONCURRENT_STREAMS_SAFETY_MAXIMUM as usize
			{
				break;
			}
			tokio::time::sleep(Duration::from_millis(2)).await;
		}

		Ok(Inner {
			send_request,
			conn_task,
			responses: HashMap::new(),
			ping_pong,
		})
	}

	async fn open_tcp(&self) -> Result<TcpStream, DispatchError> {
		match &self.proxy {
			None => Ok(TcpStream::connect((self.server.as_str(), self.port)).await?),
			Some((host, port)) => {
				let mut tcp = TcpStream::connect((host.as_str(), *port)).await?;
				let connect_req = format!(
					"CONNECT {host}:{port} HTTP/1.1\r\nHost: {host}:{port}\r\n\r\n",
					host = self.server,
					port = self.port,
				);
				tcp.write_all(connect_req.as_bytes()).await?;
				let mut buf = [0u8; 1024];
				let n = tcp.read(&mut buf).await?;
				let response = String::from_utf8_lossy(&buf[..n]);
				if !response.starts_with("HTTP/1.1 200") && !response.starts_with("HTTP/1.0 200") {
					return Err(DispatchError::Transport(format!(
						"proxy CONNECT failed: {response}"
					)));
				}
				Ok(tcp)
			}
		}
	}

	/// Submits a request and returns its stream id without waiting for a
	/// response.
	pub fn request(
		&self,
		method: Method,
		path: &str,
		body: Bytes,
		headers: HeaderMap,
	) -> Result<u32, DispatchError> {
		let mut state = self.state.lock();
		let inner = match &mut *state {
			State::Connected(inner) => inner,
			_ => return Err(DispatchError::Transport("not connected".into())),
		};

		let mut request = Request::builder()
			.method(method)
			.uri(path)
			.body(())
			.map_err(|e| DispatchError::Transport(format!("invalid request: {e}")))?;
		*request.headers_mut() = headers;

		let (response, mut send_stream) = inner
			.send_request
			.send_request(request, body.is_empty())
			.map_err(|e| DispatchError::Transport(e.to_string()))?;

		let stream_id = response.stream_id().into();
		if !body.is_empty() {
			send_stream
				.send_data(body, true)
				.map_err(|e| DispatchError::Transport(e.to_string()))?;
		}
		inner.responses.insert(stream_id, response);
		Ok(stream_id)
	}

	/// Awaits a previously-submitted stream's full response. The stream id
	/// must come from a `request` call on this same connection and must not
	/// have already been drained.
	pub async fn get_response(&self, stream_id: u32) -> Result<(StatusCode, Bytes), DispatchError> {
		let fut = {
			let mut state = self.state.lock();
			match &mut *state {
				State::Connected(inner) => inner
					.responses
					.remove(&stream_id)
					.expect("stream_id not tracked by this connection"),
				_ => return Err(DispatchError::Transport("not connected".into())),
			}
		};

		let response = fut
			.await
			.map_err(|e| DispatchError::Transport(e.to_string()))?;
		let status = response.status();
		let mut body = response.into_body();
		let mut buf = BytesMut::new();
		while let Some(chunk) = body.data().await {
			let chunk = chunk.map_err(|e| DispatchError::Transport(e.to_string()))?;
			let len = chunk.len();
			buf.extend_from_slice(&chunk);
			let _ = body.flow_control().release_capacity(len);
		}
		Ok((status, buf.freeze()))
	}

	/// Reads the peer's current `MAX_CONCURRENT_STREAMS`, clamped to
	/// `[1, CONCURRENT_STREAMS_SAFETY_MAXIMUM]`. Per the source this spec
	/// follows, values out of range are clamped with `max(1, n)`, never
	/// `min(1, n)`.
	pub fn remote_max_concurrent_streams(&self) -> u32 {
		let state = self.state.lock();
		let raw = match &*state {
			State::Connected(inner) => inner.send_request.current_max_send_streams() as u32,
			_ => 1,
		};
		let clamped = if raw > CONCURRENT_STREAMS_SAFETY_MAXIMUM {
			warn!(
				raw,
				"APNs max_concurrent_streams too high, using safety maximum"
			);
			CONCURRENT_STREAMS_SAFETY_MAXIMUM
		} else {
			raw.max(1)
		};
		self.max_streams.store(Arc::new(clamped));
		clamped
	}

	/// Sends an opaque HTTP/2 PING and waits for the peer's PONG.
	pub async fn ping(&self) -> Result<(), DispatchError> {
		let mut ping_pong = {
			let mut state = self.state.lock();
			match &mut *state {
				State::Connected(inner) => inner
					.ping_pong
					.take()
					.ok_or_else(|| DispatchError::Transport("ping already in flight".into()))?,
				_ => return Err(DispatchError::Transport("not connected".into())),
			}
		};
		let result = ping_pong
			.ping(h2::Ping::opaque())
			.await
			.map(|_pong| ())
			.map_err(|e| DispatchError::Transport(e.to_string()));

		let mut state = self.state.lock();
		if let State::Connected(inner) = &mut *state {
			inner.ping_pong = Some(ping_pong);
		}
		result
	}

	/// Tears the connection down. Any pending `get_response` futures that
	/// were already taken out of the map will fail on their own; entries
	/// still in the map are simply dropped along with the connection task.
	pub fn close(&self) {
		let mut state = self.state.lock();
		if let State::Connected(inner) = std::mem::replace(&mut *state, State::Closed) {
			inner.conn_task.abort();
		}
	}

	pub fn is_connected(&self) -> bool {
		matches!(&*self.state.lock(), State::Connected(_))
	}

	/// Spawns a background task that pings the connection every `period`,
	/// keeping idle connections (and any middlebox state along the way)
	/// alive. Holds only a `Weak` reference, so the task exits on its own
	/// once the last `Connection` handle is dropped rather than keeping it
	/// alive artificially.
	pub fn spawn_heartbeat(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
		let weak: Weak<Connection> = Arc::downgrade(self);
		tokio::spawn(async move {
			let mut interval = tokio::time::interval(period);
			interval.tick().await;
			loop {
				interval.tick().await;
				let Some(conn) = weak.upgrade() else {
					return;
				};
				if let Err(e) = conn.ping().await {
					warn!(error = %e, "APNs heartbeat ping failed");
				}
			}
		})
	}
}
