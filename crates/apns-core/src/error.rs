//! The closed taxonomy of reasons APNs gives for rejecting a notification,
//! plus the error types layered on top of it (see `DispatchError`).

use std::fmt;

/// A single APNs failure reason, as carried in the `reason` field of a
/// non-200 response body.
///
/// The variant grouping (bad payload / bad device / auth / protocol /
/// server) mirrors how the reasons are documented by Apple; it has no
/// bearing on the wire representation, which is always the bare reason
/// name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ErrorReason {
	// --- bad payload ---
	PayloadEmpty,
	PayloadTooLarge,
	BadTopic,
	TopicDisallowed,
	BadExpirationDate,
	BadCollapseId,
	MissingTopic,

	// --- bad device ---
	BadDeviceToken,
	DeviceTokenNotForTopic,
	Unregistered,
	MissingDeviceToken,

	// --- auth ---
	BadCertificate,
	BadCertificateEnvironment,
	ExpiredProviderToken,
	InvalidProviderToken,
	MissingProviderToken,
	Forbidden,
	TooManyProviderTokenUpdates,

	// --- protocol / internal ---
	BadMessageId,
	BadPriority,
	DuplicateHeaders,
	BadPath,
	MethodNotAllowed,

	// --- server ---
	IdleTimeout,
	Shutdown,
	InternalServerError,
	ServiceUnavailable,
	TooManyRequests,

	/// A reason string APNs returned that this taxonomy doesn't recognize.
	/// Never panics on novel reasons; carries the raw string through.
	Unknown(String),
}

impl ErrorReason {
	/// Maps the wire `reason` string to a typed variant. A pure lookup:
	/// unrecognized input becomes `Unknown`, never a panic.
	pub fn from_wire(reason: &str) -> Self {
		match reason {
			"PayloadEmpty" => Self::PayloadEmpty,
			"PayloadTooLarge" => Self::PayloadTooLarge,
			"BadTopic" => Self::BadTopic,
			"TopicDisallowed" => Self::TopicDisallowed,
			"BadExpirationDate" => Self::BadExpirationDate,
			"BadCollapseId" => Self::BadCollapseId,
			"MissingTopic" => Self::MissingTopic,
			"BadDeviceToken" => Self::BadDeviceToken,
			"DeviceTokenNotForTopic" => Self::DeviceTokenNotForTopic,
			"Unregistered" => Self::Unregistered,
			"MissingDeviceToken" => Self::MissingDeviceToken,
			"BadCertificate" => Self::BadCertificate,
			"BadCertificateEnvironment" => Self::BadCertificateEnvironment,
			"ExpiredProviderToken" => Self::ExpiredProviderToken,
			"InvalidProviderToken" => Self::InvalidProviderToken,
			"MissingProviderToken" => Self::MissingProviderToken,
			"Forbidden" => Self::Forbidden,
			"TooManyProviderTokenUpdates" => Self::TooManyProviderTokenUpdates,
			"BadMessageId" => Self::BadMessageId,
			"BadPriority" => Self::BadPriority,
			"DuplicateHeaders" => Self::DuplicateHeaders,
			"BadPath" => Self::BadPath,
			"MethodNotAllowed" => Self::MethodNotAllowed,
			"IdleTimeout" => Self::IdleTimeout,
			"Shutdown" => Self::Shutdown,
			"InternalServerError" => Self::InternalServerError,
			"ServiceUnavailable" => Self::ServiceUnavailable,
			"TooManyRequests" => Self::TooManyRequests,
			other => Self::Unknown(other.to_string()),
		}
	}

	/// The wire name for this reason, the inverse of [`Self::from_wire`].
	pub fn as_wire(&self) -> &str {
		match self {
			Self::PayloadEmpty => "PayloadEmpty",
			Self::PayloadTooLarge => "PayloadTooLarge",
			Self::BadTopic => "BadTopic",
			Self::TopicDisallowed => "TopicDisallowed",
			Self::BadExpirationDate => "BadExpirationDate",
			Self::BadCollapseId => "BadCollapseId",
			Self::MissingTopic => "MissingTopic",
			Self::BadDeviceToken => "BadDeviceToken",
			Self::DeviceTokenNotForTopic => "DeviceTokenNotForTopic",
			Self::Unregistered => "Unregistered",
			Self::MissingDeviceToken => "MissingDeviceToken",
			Self::BadCertificate => "BadCertificate",
			Self::BadCertificateEnvironment => "BadCertificateEnvironment",
			Self::ExpiredProviderToken => "ExpiredProviderToken",
			Self::InvalidProviderToken => "InvalidProviderToken",
			Self::MissingProviderToken => "MissingProviderToken",
			Self::Forbidden => "Forbidden",
			Self::TooManyProviderTokenUpdates => "TooManyProviderTokenUpdates",
			Self::BadMessageId => "BadMessageId",
			Self::BadPriority => "BadPriority",
			Self::DuplicateHeaders => "DuplicateHeaders",
			Self::BadPath => "BadPath",
			Self::MethodNotAllowed => "MethodNotAllowed",
			Self::IdleTimeout => "IdleTimeout",
			Self::Shutdown => "Shutdown",
			Self::InternalServerError => "InternalServerError",
			Self::ServiceUnavailable => "ServiceUnavailable",
			Self::TooManyRequests => "TooManyRequests",
			Self::Unknown(reason) => reason,
		}
	}
}

impl fmt::Display for ErrorReason {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_wire())
	}
}

/// The per-token result of a batch send, and the return value of a single
/// send on failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
	Success,
	Failure {
		reason: ErrorReason,
		/// Only ever `Some` for `ErrorReason::Unregistered`, carried from
		/// the HTTP 410 response body.
		timestamp: Option<String>,
	},
}

impl Verdict {
	pub fn is_success(&self) -> bool {
		matches!(self, Self::Success)
	}
}

/// Errors raised directly by the dispatcher API (as opposed to recorded as
/// a per-token [`Verdict`] inside a batch).
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
	#[error("failed to connect to APNs after {attempts} attempts")]
	Connection { attempts: u32 },

	#[error("APNs rejected the notification: {reason}")]
	Response {
		reason: ErrorReason,
		timestamp: Option<String>,
	},

	#[error("encoded payload is {size} bytes, exceeding the {limit} byte limit")]
	PayloadTooLarge { size: usize, limit: usize },

	#[error("failed to encode payload: {0}")]
	PayloadEncoding(#[from] serde_json::Error),

	#[error("invalid credentials: {0}")]
	Credentials(String),

	#[error("malformed response body from APNs: {0}")]
	MalformedResponse(String),

	#[error("transport error: {0}")]
	Transport(String),

	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),
}

impl DispatchError {
	/// The reason this error maps to, for a caller that only cares about
	/// the response/failure layer and wants to treat all others uniformly.
	pub fn reason(&self) -> Option<&ErrorReason> {
		match self {
			Self::Response { reason, .. } => Some(reason),
			_ => None,
		}
	}
}
