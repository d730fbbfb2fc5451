//! HTTP client for the license server API.

use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use url::Url;

use crate::error::{ErrorCode, Result, SdkError, map_status_to_error_code, status_to_error_code};
use crate::types::{
    ActivateRequest, ActivateResponse, DeactivateRequest, DeactivateResponse, LicenseRecord,
    LicenseStatus, ValidateRequest, ValidateResponse,
};

pub const ACTIVATE_PATH: &str = "api/v1/activate";
pub const DEACTIVATE_PATH: &str = "api/v1/deactivate";
pub const VALIDATE_PATH: &str = "api/v1/validate";

/// The three calls the client makes against the license server.
///
/// Entitlement refusals (`success: false`) from activate and deactivate come
/// back as errors with the matching [`ErrorCode`]; validate returns the body
/// as-is so the caller can surface the server's status.
pub trait LicenseApi: Send + Sync {
    fn activate(
        &self,
        request: &ActivateRequest,
    ) -> impl Future<Output = Result<LicenseRecord>> + Send;

    fn deactivate(&self, request: &DeactivateRequest) -> impl Future<Output = Result<()>> + Send;

    fn validate(
        &self,
        request: &ValidateRequest,
    ) -> impl Future<Output = Result<ValidateResponse>> + Send;
}

impl<T: LicenseApi> LicenseApi for std::sync::Arc<T> {
    fn activate(
        &self,
        request: &ActivateRequest,
    ) -> impl Future<Output = Result<LicenseRecord>> + Send {
        (**self).activate(request)
    }

    fn deactivate(&self, request: &DeactivateRequest) -> impl Future<Output = Result<()>> + Send {
        (**self).deactivate(request)
    }

    fn validate(
        &self,
        request: &ValidateRequest,
    ) -> impl Future<Output = Result<ValidateResponse>> + Send {
        (**self).validate(request)
    }
}

/// `reqwest` implementation of [`LicenseApi`] with timeout and retry.
///
/// Transport errors, 5xx and 429 are retried up to `max_retries` times,
/// sleeping `retry_base_delay * 2^attempt` between attempts.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: Url,
    max_retries: u32,
    retry_base_delay: Duration,
}

impl HttpTransport {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        max_retries: u32,
        retry_base_delay: Duration,
        app_version: &str,
    ) -> Result<Self> {
        let mut base_url = Url::parse(base_url).map_err(|e| {
            SdkError::new(ErrorCode::ConfigError, format!("Invalid server URL: {}", e))
        })?;
        // Url::join replaces the last segment unless the path ends in '/'
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let user_agent = format!(
            "licensegate-sdk/{} app/{}",
            env!("CARGO_PKG_VERSION"),
            if app_version.is_empty() { "unknown" } else { app_version }
        );
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| {
                SdkError::new(ErrorCode::ConfigError, format!("Failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url,
            max_retries,
            retry_base_delay,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url.join(path).map_err(|e| {
            SdkError::new(ErrorCode::ConfigError, format!("Invalid endpoint {}: {}", path, e))
        })
    }

    async fn post<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let url = self.endpoint(path)?;
        let mut attempt = 0u32;

        loop {
            match self.post_once(&url, body).await {
                Ok(value) => {
                    if attempt > 0 {
                        tracing::info!(attempt, path, "License server request succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    let delay = self.retry_base_delay.saturating_mul(2u32.saturating_pow(attempt));
                    attempt += 1;
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        path,
                        "Retrying license server request after transient failure"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    if e.is_transient() {
                        tracing::error!(
                            attempts = attempt + 1,
                            error = %e,
                            path,
                            "License server request failed after all retries"
                        );
                    }
                    return Err(e);
                }
            }
        }
    }

    async fn post_once<B, T>(&self, url: &Url, body: &B) -> Result<T>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let response = self.client.post(url.clone()).json(body).send().await?;
        let status = response.status();

        if status.is_success() {
            return response.json::<T>().await.map_err(|e| {
                SdkError::with_status(
                    ErrorCode::ServerError,
                    format!("Malformed server response: {}", e),
                    status.as_u16(),
                )
            });
        }

        let text = response.text().await.unwrap_or_default();
        let message = error_message(&text).unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("Request failed")
                .to_string()
        });
        let code = map_status_to_error_code(status.as_u16(), &message);
        Err(SdkError::with_status(code, message, status.as_u16()))
    }
}

impl LicenseApi for HttpTransport {
    async fn activate(&self, request: &ActivateRequest) -> Result<LicenseRecord> {
        let response: ActivateResponse = self.post(ACTIVATE_PATH, request).await?;
        match (response.success, response.license) {
            (true, Some(license)) => Ok(license),
            (true, None) => Err(SdkError::new(
                ErrorCode::ServerError,
                "Activation succeeded without a license payload",
            )),
            (false, _) => {
                let status = response.status.unwrap_or(LicenseStatus::NotFound);
                Err(SdkError::new(
                    status_to_error_code(status),
                    response
                        .message
                        .unwrap_or_else(|| format!("Activation refused: {}", status)),
                ))
            }
        }
    }

    async fn deactivate(&self, request: &DeactivateRequest) -> Result<()> {
        let response: DeactivateResponse = self.post(DEACTIVATE_PATH, request).await?;
        if response.success {
            Ok(())
        } else {
            Err(SdkError::new(ErrorCode::LicenseNotFound, response.message))
        }
    }

    async fn validate(&self, request: &ValidateRequest) -> Result<ValidateResponse> {
        self.post(VALIDATE_PATH, request).await
    }
}

/// Pull a human-readable message out of a JSON error body. Understands both
/// `{"error": ...}` and problem+json `{"detail": ...}`.
fn error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    ["message", "error", "detail", "title"]
        .iter()
        .find_map(|field| value.get(field).and_then(|v| v.as_str()))
        .map(str::to_string)
}
