//! LicenseGate client SDK.
//!
//! Binds a signed license to the current machine and keeps it validated:
//!
//! ```no_run
//! use std::sync::Arc;
//! use licensegate_sdk::{LicenseManager, ManagerOptions};
//!
//! # async fn run() -> licensegate_sdk::Result<()> {
//! let options = ManagerOptions {
//!     base_url: "https://licenses.example.com".into(),
//!     public_key: "BASE64_PUBLIC_KEY".into(),
//!     app_version: env!("CARGO_PKG_VERSION").into(),
//!     ..Default::default()
//! };
//! let manager = Arc::new(LicenseManager::for_app("myapp", options)?);
//!
//! let result = manager.validate_current().await;
//! if !result.is_valid {
//!     manager.activate("ABCDE-FGHJK-LMNPQ-RSTUV-WXYZ2").await;
//! }
//! let _timer = manager.clone().spawn_periodic_validation(std::time::Duration::from_secs(3600));
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod error;
pub mod fingerprint;
pub mod key;
pub mod manager;
pub mod probe;
pub mod storage;
pub mod transport;
pub mod types;

pub use error::{ErrorCode, Result, SdkError};
pub use fingerprint::{
    Fingerprinter, HardwareComponent, HardwareComponentSet, HardwareIdentity, MIN_VALID_SCORE,
    SIMILARITY_THRESHOLD, similarity,
};
pub use key::KeyFormat;
pub use manager::{LicenseManager, LicenseSnapshot, ManagerOptions};
pub use probe::{HardwareProbe, StaticProbe, SystemProbe};
pub use storage::{EncryptedFileStore, LicenseStore, MemoryStore};
pub use transport::{HttpTransport, LicenseApi};
pub use types::*;
