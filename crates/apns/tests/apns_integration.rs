//! Scenario tests against the in-process fake APNs server
//! (`tests/common/fake_apns.rs`): batch scheduling under a server-advertised
//! concurrency limit, SETTINGS clamping at both ends, mixed verdicts, and
//! connect-retry exhaustion.

use std::sync::Arc;
use std::time::Duration;

use apns::{
	Connection, Credentials, Dispatcher, Notification, SendParams, TokenCredentials, Verdict,
};
use apns_core::Payload;
use http::StatusCode;

mod common;
use common::fake_apns;

const TEST_KEY_PATH: &str = concat!(
	env!("CARGO_MANIFEST_DIR"),
	"/tests/fixtures/ec_p256_test_key.pem"
);

fn test_credentials() -> Credentials {
	Credentials::Token(TokenCredentials::new(TEST_KEY_PATH, "KEYID", "TEAMID").unwrap())
}

async fn dispatcher_against(server: &fake_apns::FakeApns) -> Dispatcher {
	let connection = Connection::new(
		"localhost",
		server.addr.port(),
		server.client_config.clone(),
		None,
		Duration::from_secs(5),
	)
	.unwrap();
	Dispatcher::from_connection(test_credentials(), connection)
}

fn notifications(n: usize) -> Vec<Notification> {
	(0..n)
		.map(|i| Notification {
			token: format!("token-{i}"),
			payload: Payload::new(),
		})
		.collect()
}

#[tokio::test]
async fn batch_succeeds_under_server_concurrency_limit() {
	let server = fake_apns::spawn(4, Arc::new(|_token| (StatusCode::OK, Vec::new()))).await;
	let dispatcher = dispatcher_against(&server).await;

	let results = dispatcher
		.send_batch(notifications(20), &SendParams::new())
		.await
		.unwrap();

	assert_eq!(results.len(), 20);
	assert!(results.values().all(|v| matches!(v, Verdict::Success)));
}

#[tokio::test]
async fn empty_batch_returns_no_results() {
	let server = fake_apns::spawn(4, Arc::new(|_token| (StatusCode::OK, Vec::new()))).await;
	let dispatcher = dispatcher_against(&server).await;

	let results = dispatcher
		.send_batch(Vec::new(), &SendParams::new())
		.await
		.unwrap();

	assert!(results.is_empty());
}

#[tokio::test]
async fn mixed_batch_preserves_per_token_verdicts() {
	let responder = Arc::new(|token: &str| {
		if token.ends_with("-3") || token.ends_with("-7") {
			(
				StatusCode::BAD_REQUEST,
				br#"{"reason":"BadDeviceToken"}"#.to_vec(),
			)
		} else {
			(StatusCode::OK, Vec::new())
		}
	});
	let server = fake_apns::spawn(4, responder).await;
	let dispatcher = dispatcher_against(&server).await;

	let results = dispatcher
		.send_batch(notifications(10), &SendParams::new())
		.await
		.unwrap();

	assert_eq!(results.len(), 10);
	assert!(matches!(results["token-3"], Verdict::Failure { .. }));
	assert!(matches!(results["token-7"], Verdict::Failure { .. }));
	assert!(matches!(results["token-0"], Verdict::Success));
}

#[tokio::test]
async fn oversized_settings_value_clamps_to_safety_maximum() {
	// h2's own builder caps `max_concurrent_streams` to what the HTTP/2
	// SETTINGS frame can carry; what matters here is that our dispatcher
	// clamps whatever the peer advertises down to `CONCURRENT_STREAMS_SAFETY_MAXIMUM`.
	let server = fake_apns::spawn(u32::MAX, Arc::new(|_token| (StatusCode::OK, Vec::new()))).await;
	let connection = Connection::new(
		"localhost",
		server.addr.port(),
		server.client_config.clone(),
		None,
		Duration::from_secs(5),
	)
	.unwrap();

	connection.connect().await.unwrap();
	assert_eq!(
		connection.remote_max_concurrent_streams(),
		apns::connection::CONCURRENT_STREAMS_SAFETY_MAXIMUM
	);
}

#[tokio::test]
async fn zero_settings_value_clamps_to_one() {
	let server = fake_apns::spawn(0, Arc::new(|_token| (StatusCode::OK, Vec::new()))).await;
	let connection = Connection::new(
		"localhost",
		server.addr.port(),
		server.client_config.clone(),
		None,
		Duration::from_secs(5),
	)
	.unwrap();

	connection.connect().await.unwrap();
	assert_eq!(connection.remote_max_concurrent_streams(), 1);
}

#[tokio::test]
async fn connect_fails_after_three_attempts() {
	// Nothing is listening on this port: every attempt fails immediately.
	let connection = Connection::new(
		"127.0.0.1",
		1,
		Arc::new(test_client_config()),
		None,
		Duration::from_millis(200),
	)
	.unwrap();

	let err = connection.connect().await.unwrap_err();
	match err {
		apns_core::DispatchError::Connection { attempts } => assert_eq!(attempts, 3),
		other => panic!("expected Connection error, got {other:?}"),
	}
}

fn test_client_config() -> rustls::ClientConfig {
	let roots = rustls::RootCertStore::empty();
	rustls::ClientConfig::builder()
		.with_root_certificates(roots)
		.with_no_client_auth()
}
