//! JWT signing for token-based APNs authentication.
//!
//! Distinct from the teacher's own `http/jwt.rs`, which only *validates*
//! inbound bearer tokens: here we sign outbound ones, using the same
//! `jsonwebtoken` dependency via `jsonwebtoken::encode`.

use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::Serialize;

use apns_core::DispatchError;

#[derive(Serialize)]
struct Claims<'a> {
	iss: &'a str,
	iat: i64,
}

/// Signs the `{iss, iat}` claims APNs expects for bearer-token auth. No
/// `exp` claim: APNs derives expiry from `iat` and the provider's own
/// lifetime policy.
pub fn sign(
	key: &EncodingKey,
	algorithm: Algorithm,
	key_id: &str,
	team_id: &str,
	issued_at: i64,
) -> Result<String, DispatchError> {
	let mut header = Header::new(algorithm);
	header.kid = Some(key_id.to_string());
	let claims = Claims {
		iss: team_id,
		iat: issued_at,
	};
	jsonwebtoken::encode(&header, &claims, key)
		.map_err(|e| DispatchError::Credentials(format!("failed to sign JWT: {e}")))
}
