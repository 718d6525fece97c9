//! The notification payload model and its wire encoding.
//!
//! Grounded on `examples/original_source/apns2/payload.py`'s `Payload`/
//! `PayloadAlert.dict()` methods: build a `serde_json::Map` by hand rather
//! than deriving `Serialize` on the whole struct, so unset fields are
//! omitted instead of serialized as `null`.

use serde_json::{Map, Value};

/// Maximum encoded payload size APNs will accept, in bytes.
pub const MAX_PAYLOAD_SIZE: usize = 4096;

/// The `aps.alert` value: either a bare string or the richer
/// [`PayloadAlert`] record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Alert {
	Text(String),
	Structured(PayloadAlert),
}

impl From<String> for Alert {
	fn from(s: String) -> Self {
		Self::Text(s)
	}
}

impl From<&str> for Alert {
	fn from(s: &str) -> Self {
		Self::Text(s.to_string())
	}
}

impl From<PayloadAlert> for Alert {
	fn from(a: PayloadAlert) -> Self {
		Self::Structured(a)
	}
}

/// The structured form of `aps.alert`. Every field is optional; unset
/// fields are dropped from the encoded object rather than emitted as
/// `null`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PayloadAlert {
	pub title: Option<String>,
	pub title_localized_key: Option<String>,
	pub title_localized_args: Option<Vec<String>>,
	pub subtitle: Option<String>,
	pub subtitle_localized_key: Option<String>,
	pub subtitle_localized_args: Option<Vec<String>>,
	pub body: Option<String>,
	pub body_localized_key: Option<String>,
	pub body_localized_args: Option<Vec<String>>,
	pub action_localized_key: Option<String>,
	pub action: Option<String>,
	pub launch_image: Option<String>,
}

impl PayloadAlert {
	fn encode(&self) -> Value {
		let mut map = Map::new();
		insert_str(&mut map, "title", &self.title);
		insert_str(&mut map, "title-loc-key", &self.title_localized_key);
		insert_strs(&mut map, "title-loc-args", &self.title_localized_args);
		insert_str(&mut map, "subtitle", &self.subtitle);
		insert_str(&mut map, "subtitle-loc-key", &self.subtitle_localized_key);
		insert_strs(&mut map, "subtitle-loc-args", &self.subtitle_localized_args);
		insert_str(&mut map, "body", &self.body);
		insert_str(&mut map, "loc-key", &self.body_localized_key);
		insert_strs(&mut map, "loc-args", &self.body_localized_args);
		insert_str(&mut map, "action-loc-key", &self.action_localized_key);
		insert_str(&mut map, "action", &self.action);
		insert_str(&mut map, "launch-image", &self.launch_image);
		Value::Object(map)
	}
}

fn insert_str(map: &mut Map<String, Value>, key: &str, value: &Option<String>) {
	if let Some(v) = value {
		map.insert(key.to_string(), Value::String(v.clone()));
	}
}

fn insert_strs(map: &mut Map<String, Value>, key: &str, value: &Option<Vec<String>>) {
	if let Some(v) = value {
		map.insert(
			key.to_string(),
			Value::Array(v.iter().cloned().map(Value::String).collect()),
		);
	}
}

/// A notification payload: the `aps` dictionary plus any custom top-level
/// keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Payload {
	pub alert: Option<Alert>,
	pub badge: Option<i64>,
	pub sound: Option<String>,
	pub content_available: bool,
	pub mutable_content: bool,
	pub category: Option<String>,
	pub thread_id: Option<String>,
	pub url_args: Option<Vec<String>>,
	/// Extra top-level keys, merged next to `aps`. Must not contain an
	/// `aps` key; [`encode`] silently lets `aps` win if it does, since APNs
	/// itself only ever reads the `aps` object it expects.
	pub custom: Option<Map<String, Value>>,
}

impl Payload {
	pub fn new() -> Self {
		Self::default()
	}

	fn aps(&self) -> Value {
		let mut aps = Map::new();
		if let Some(alert) = &self.alert {
			let value = match alert {
				Alert::Text(s) => Value::String(s.clone()),
				Alert::Structured(a) => a.encode(),
			};
			aps.insert("alert".to_string(), value);
		}
		if let Some(badge) = self.badge {
			aps.insert("badge".to_string(), Value::from(badge));
		}
		insert_str(&mut aps, "sound", &self.sound);
		if self.content_available {
			aps.insert("content-available".to_string(), Value::from(1));
		}
		if self.mutable_content {
			aps.insert("mutable-content".to_string(), Value::from(1));
		}
		insert_str(&mut aps, "thread-id", &self.thread_id);
		insert_str(&mut aps, "category", &self.category);
		insert_strs(&mut aps, "url-args", &self.url_args);
		Value::Object(aps)
	}

	/// Builds the `{"aps": {...}, ...custom}` object this payload encodes
	/// to. `custom` is merged at the top level but never overwrites `aps`.
	pub fn to_value(&self) -> Value {
		let mut top = Map::new();
		top.insert("aps".to_string(), self.aps());
		if let Some(custom) = &self.custom {
			for (k, v) in custom {
				if k != "aps" {
					top.insert(k.clone(), v.clone());
				}
			}
		}
		Value::Object(top)
	}

	/// Encodes to compact, non-escaped-UTF-8 JSON bytes (serde_json's
	/// defaults already match APNs' `ensure_ascii=False, separators=(',',
	/// ':')` expectations: no whitespace, raw UTF-8 for non-ASCII).
	pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
		serde_json::to_vec(&self.to_value())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn empty_payload_encodes_to_bare_aps() {
		let p = Payload::new();
		assert_eq!(p.encode().unwrap(), br#"{"aps":{}}"#);
	}

	#[test]
	fn booleans_collapse_to_one_or_are_omitted() {
		let mut p = Payload::new();
		p.content_available = true;
		assert_eq!(p.encode().unwrap(), br#"{"aps":{"content-available":1}}"#);

		let mut p = Payload::new();
		p.mutable_content = false;
		assert_eq!(p.encode().unwrap(), br#"{"aps":{}}"#);
	}

	#[test]
	fn custom_keys_merge_without_overwriting_aps() {
		let mut p = Payload::new();
		p.alert = Some("hi".into());
		let mut custom = Map::new();
		custom.insert("aps".to_string(), Value::from("should not win"));
		custom.insert("user_id".to_string(), Value::from(42));
		p.custom = Some(custom);

		let v = p.to_value();
		assert_eq!(v["aps"]["alert"], Value::from("hi"));
		assert_eq!(v["user_id"], Value::from(42));
	}

	#[test]
	fn structured_alert_renames_fields() {
		let mut p = Payload::new();
		p.alert = Some(
			PayloadAlert {
				title: Some("T".into()),
				title_localized_key: Some("tk".into()),
				title_localized_args: Some(vec!["a".into()]),
				body_localized_key: Some("bk".into()),
				..Default::default()
			}
			.into(),
		);
		let v = p.to_value();
		let alert = &v["aps"]["alert"];
		assert_eq!(alert["title"], Value::from("T"));
		assert_eq!(alert["title-loc-key"], Value::from("tk"));
		assert_eq!(alert["title-loc-args"][0], Value::from("a"));
		assert_eq!(alert["loc-key"], Value::from("bk"));
		assert!(alert.get("body").is_none());
	}

	proptest::proptest! {
		#[test]
		fn encode_is_idempotent(title in ".{0,50}", badge in 0i64..1000) {
			let mut p = Payload::new();
			p.alert = Some(title.into());
			p.badge = Some(badge);
			let first = p.encode().unwrap();
			let second = p.encode().unwrap();
			proptest::prop_assert_eq!(first, second);
		}
	}
}
