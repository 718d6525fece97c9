//! An in-process fake APNs server, built directly on `h2::server` plus a
//! real TLS handshake over a loopback `TcpListener` — the same two crates
//! (`h2`, `tokio-rustls`) the dispatcher itself depends on, so connecting to
//! it exercises the production `Connection` code path unmodified.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::{Request, Response, StatusCode};
use rcgen::{CertifiedKey, generate_simple_self_signed};
use rustls_pki_types::PrivateKeyDer;
use tokio::net::TcpListener;

/// Computes a response for one device-token request.
pub type Responder = Arc<dyn Fn(&str) -> (StatusCode, Vec<u8>) + Send + Sync>;

pub struct FakeApns {
	pub addr: SocketAddr,
	pub client_config: Arc<rustls::ClientConfig>,
}

/// Starts the fake server with a given `max_concurrent_streams` SETTINGS
/// value and a per-token responder, and returns its address plus a
/// `rustls::ClientConfig` that trusts its self-signed certificate.
pub async fn spawn(max_concurrent_streams: u32, responder: Responder) -> FakeApns {
	let CertifiedKey { cert, signing_key } =
		generate_simple_self_signed(vec!["localhost".to_string()]).expect("self-signed cert");
	let cert_der = cert.der().clone();
	let key_der = PrivateKeyDer::Pkcs8(signing_key.serialize_der().into());

	let mut roots = rustls::RootCertStore::empty();
	roots.add(cert_der.clone()).expect("add test root");
	let mut client_config = rustls::ClientConfig::builder()
		.with_root_certificates(roots)
		.with_no_client_auth();
	client_config.alpn_protocols = vec![b"h2".to_vec()];

	let mut server_config = rustls::ServerConfig::builder()
		.with_no_client_auth()
		.with_single_cert(vec![cert_der], key_der)
		.expect("server config");
	server_config.alpn_protocols = vec![b"h2".to_vec()];
	let acceptor = tokio_rustls::TlsAcceptor::from(Arc::new(server_config));

	let listener = TcpListener::bind("127.0.0.1:0")
		.await
		.expect("bind loopback");
	let addr = listener.local_addr().expect("local addr");

	tokio::spawn(async move {
		loop {
			let Ok((tcp, _)) = listener.accept().await else {
				return;
			};
			let acceptor = acceptor.clone();
			let responder = responder.clone();
			tokio::spawn(async move {
				let Ok(tls) = acceptor.accept(tcp).await else {
					return;
				};
				let mut conn = match h2::server::Builder::new()
					.max_concurrent_streams(max_concurrent_streams)
					.handshake::<_, Bytes>(tls)
					.await
				{
					Ok(conn) => conn,
					Err(_) => return,
				};
				while let Some(result) = conn.accept().await {
					let Ok((request, respond)) = result else {
						break;
					};
					tokio::spawn(handle_request(request, respond, responder.clone()));
				}
			});
		}
	});

	FakeApns {
		addr,
		client_config: Arc::new(client_config),
	}
}

async fn handle_request(
	request: Request<h2::RecvStream>,
	mut respond: h2::server::SendResponse<Bytes>,
	responder: Responder,
) {
	let token = request
		.uri()
		.path()
		.rsplit('/')
		.next()
		.unwrap_or("")
		.to_string();
	let (status, body) = responder(&token);
	let response = Response::builder()
		.status(status)
		.body(())
		.expect("build response");
	let mut send = respond
		.send_response(response, body.is_empty())
		.expect("send response");
	if !body.is_empty() {
		let _ = send.send_data(Bytes::from(body), true);
	}
}
