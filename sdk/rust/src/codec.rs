//! Canonical signable form of a license and its Ed25519 signature.
//!
//! The server signs and the client verifies the exact same byte string, so
//! this module is the single definition of that string for both sides.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;

use crate::error::{ErrorCode, Result, SdkError};
use crate::types::LicenseRecord;

/// Timestamp layout inside the signable content.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

const FIELD_SEPARATOR: &str = "|";
const ACTIVATION_SEPARATOR: &str = ",";

/// Ordered, pipe-joined license fields. The signature itself, timestamps of
/// individual activations and `lastValidationUtc` are not covered.
pub fn signable_content(record: &LicenseRecord) -> String {
    let hardware_ids = record
        .activations
        .iter()
        .map(|a| a.hardware_id.as_str())
        .collect::<Vec<_>>()
        .join(ACTIVATION_SEPARATOR);

    [
        record.license_id.clone(),
        record.license_key.clone(),
        record.license_type.as_ref().to_string(),
        record.licensee_name.clone(),
        record.licensee_email.clone(),
        record.company.clone().unwrap_or_default(),
        record.issued_at_utc.format(TIMESTAMP_FORMAT).to_string(),
        record.expires_at_utc.format(TIMESTAMP_FORMAT).to_string(),
        record.max_machines.to_string(),
        record.offline_grace_days.to_string(),
        record.schema_version.to_string(),
        hardware_ids,
    ]
    .join(FIELD_SEPARATOR)
}

pub fn sign(record: &LicenseRecord, signing_key: &SigningKey) -> Vec<u8> {
    signing_key
        .sign(signable_content(record).as_bytes())
        .to_bytes()
        .to_vec()
}

/// Recomputes the content from the current fields, so any edit after signing
/// fails verification.
pub fn verify(record: &LicenseRecord, public_key: &VerifyingKey) -> bool {
    let Ok(signature) = Signature::from_slice(&record.signature) else {
        return false;
    };
    public_key
        .verify(signable_content(record).as_bytes(), &signature)
        .is_ok()
}

/// Generate a new Ed25519 key pair
/// Returns (private_key_base64, public_key_base64)
pub fn generate_keypair() -> (String, String) {
    let signing_key = SigningKey::generate(&mut OsRng);
    let verifying_key = signing_key.verifying_key();
    (
        BASE64.encode(signing_key.to_bytes()),
        BASE64.encode(verifying_key.to_bytes()),
    )
}

pub fn encode_public_key(key: &VerifyingKey) -> String {
    BASE64.encode(key.to_bytes())
}

pub fn parse_public_key(encoded: &str) -> Result<VerifyingKey> {
    let bytes = decode_key_bytes(encoded, "public")?;
    VerifyingKey::from_bytes(&bytes)
        .map_err(|e| SdkError::new(ErrorCode::ConfigError, format!("Invalid public key: {}", e)))
}

pub fn parse_signing_key(encoded: &str) -> Result<SigningKey> {
    let bytes = decode_key_bytes(encoded, "signing")?;
    Ok(SigningKey::from_bytes(&bytes))
}

fn decode_key_bytes(encoded: &str, kind: &str) -> Result<[u8; 32]> {
    let decoded = BASE64.decode(encoded.trim()).map_err(|e| {
        SdkError::new(
            ErrorCode::ConfigError,
            format!("Invalid {} key encoding: {}", kind, e),
        )
    })?;

    decoded.try_into().map_err(|bytes: Vec<u8>| {
        SdkError::new(
            ErrorCode::ConfigError,
            format!("{} key must be 32 bytes, got {}", kind, bytes.len()),
        )
    })
}
