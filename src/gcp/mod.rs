//! GCP API plumbing
//!
//! Authentication, the HTTP wrapper and the URL-building client that the
//! compute layer sits on.
//!
//! # Module Structure
//!
//! - [`auth`] - token sources (ADC, installed-app flow, static token) and gcloud defaults
//! - [`oauth`] - installed-app OAuth 2.0 flow with a file-backed credential store
//! - [`client`] - authenticated client with Compute Engine URL helpers
//! - [`http`] - HTTP utilities and API error parsing

pub mod auth;
pub mod client;
pub mod http;
pub mod oauth;
