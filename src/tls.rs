//! HTTPS listener setup.

use std::path::Path;

use axum_server::tls_rustls::RustlsConfig;

/// Installs ring as the process-wide rustls provider.
///
/// Both ring and aws-lc-rs are compiled into the dependency graph, so rustls
/// cannot choose one itself. Calling this again is a no-op.
pub fn install_crypto_provider() {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        tracing::debug!("rustls crypto provider already installed");
    }
}

/// Loads a PEM certificate chain and private key for the HTTPS listener.
pub async fn load_rustls_config(cert_path: &Path, key_path: &Path) -> std::io::Result<RustlsConfig> {
    install_crypto_provider();
    RustlsConfig::from_pem_file(cert_path, key_path).await
}
