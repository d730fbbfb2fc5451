//! LicenseGate - license issuance and machine activation server
//!
//! Issues Ed25519-signed licenses, binds them to hardware fingerprints up to
//! a per-license machine limit, and answers the client SDK's online
//! validation calls. The license model, signing codec and hardware
//! similarity policy are shared with the client through `licensegate-sdk`.

pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod pagination;
pub mod rate_limit;
pub mod service;
pub mod tls;
pub mod util;
