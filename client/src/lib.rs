//! # IoT Hub Client Authentication
//!
//! Credential handling for devices and modules connecting to an IoT hub.
//! This library produces, caches and proactively renews Shared Access
//! Signature (SAS) tokens, and validates that every credential uses exactly
//! one authentication method.
//!
//! ## Modules
//!
//! - [`auth`] - SAS tokens, token refreshers, credentials and the background refresh service
//! - [`common`] - Error types shared across the crate
//! - [`utils`] - Environment variable helpers
//!
//! Transports (HTTP, AMQP, MQTT) are not part of this crate. They ask a
//! [`ConnectionCredentials`](auth::ConnectionCredentials) for a token, an
//! authorization header or an expiry and handle the wire themselves.

pub mod auth;
pub mod common;
pub mod utils;
