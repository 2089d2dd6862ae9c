//! Verification of Slack's `X-Slack-Signature` request header.
//!
//! Slack signs `v0:{timestamp}:{raw body}` with the app's signing secret using
//! HMAC-SHA256 and sends the hex digest prefixed with `v0=`.

use std::time::Duration;

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-slack-signature";
pub const TIMESTAMP_HEADER: &str = "x-slack-request-timestamp";
const VERSION_PREFIX: &str = "v0=";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignatureError {
    #[error("Missing verification headers")]
    MissingHeaders,
    #[error("Invalid request signature")]
    InvalidSignature,
    #[error("Request timestamp is outside the allowed window")]
    StaleTimestamp,
}

#[derive(Clone, Debug)]
pub struct SignatureVerifier {
    signing_secret: SecretString,
    tolerance: Duration,
}

impl SignatureVerifier {
    pub fn new(signing_secret: SecretString, tolerance: Duration) -> Self {
        Self { signing_secret, tolerance }
    }

    pub fn verify(
        &self,
        timestamp: Option<&str>,
        signature: Option<&str>,
        body: &[u8],
    ) -> Result<(), SignatureError> {
        self.verify_at(timestamp, signature, body, chrono::Utc::now().timestamp())
    }

    fn verify_at(
        &self,
        timestamp: Option<&str>,
        signature: Option<&str>,
        body: &[u8],
        now_unix: i64,
    ) -> Result<(), SignatureError> {
        let (Some(timestamp), Some(signature)) = (timestamp, signature) else {
            return Err(SignatureError::MissingHeaders);
        };

        let sent_at =
            timestamp.trim().parse::<i64>().map_err(|_| SignatureError::InvalidSignature)?;
        let skew = now_unix.abs_diff(sent_at);
        if skew > self.tolerance.as_secs() {
            return Err(SignatureError::StaleTimestamp);
        }

        let provided = signature
            .trim()
            .strip_prefix(VERSION_PREFIX)
            .and_then(|digest| hex::decode(digest).ok())
            .ok_or(SignatureError::InvalidSignature)?;

        let mut mac = self.mac()?;
        mac.update(b"v0:");
        mac.update(timestamp.trim().as_bytes());
        mac.update(b":");
        mac.update(body);
        mac.verify_slice(&provided).map_err(|_| SignatureError::InvalidSignature)
    }

    /// Produces the header value Slack would send for `body` at `timestamp`.
    pub fn sign(&self, timestamp: &str, body: &[u8]) -> Result<String, SignatureError> {
        let mut mac = self.mac()?;
        mac.update(b"v0:");
        mac.update(timestamp.as_bytes());
        mac.update(b":");
        mac.update(body);
        Ok(format!("{VERSION_PREFIX}{}", hex::encode(mac.finalize().into_bytes())))
    }

    fn mac(&self) -> Result<HmacSha256, SignatureError> {
        HmacSha256::new_from_slice(self.signing_secret.expose_secret().as_bytes())
            .map_err(|_| SignatureError::InvalidSignature)
    }
}
