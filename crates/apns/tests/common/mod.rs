pub mod fake_apns;
