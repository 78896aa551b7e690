//! Signature Version 4 for JSON-protocol POST requests.

use std::fmt;
use std::time::SystemTime;

use aws_sigv4::http_request::{
    SignableBody, SignableRequest, SigningParams, SigningSettings, sign,
};
use aws_sigv4::sign::v4;
use aws_smithy_runtime_api::client::identity::Identity;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

const JSON_CONTENT_TYPE: &str = "application/x-amz-json-1.1";
const CREDENTIAL_SOURCE: &str = "aws-cli-export";

/// Temporary credentials as printed by
/// `aws configure export-credentials --format process`.
#[derive(Clone, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Credentials {
    /// Access key id.
    pub access_key_id: String,
    /// Secret access key.
    pub secret_access_key: String,
    /// Session token for temporary credentials.
    #[serde(default)]
    pub session_token: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Credentials {
    fn identity(&self) -> Identity {
        aws_credential_types::Credentials::new(
            self.access_key_id.clone(),
            self.secret_access_key.clone(),
            self.session_token.clone(),
            None,
            CREDENTIAL_SOURCE,
        )
        .into()
    }
}

/// The request could not be signed.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("failed to sign request: {message}")]
pub struct SigningError {
    /// Signer's explanation.
    pub message: String,
}

impl SigningError {
    fn from_display(err: &impl fmt::Display) -> Self {
        Self {
            message: err.to_string(),
        }
    }
}

/// Returns the headers to attach to a JSON-protocol POST of `body` to
/// `endpoint`.
///
/// `host` is signed but not returned; the HTTP client derives it from the
/// URL.
///
/// # Errors
///
/// Returns [`SigningError`] when the endpoint or a header value cannot be
/// signed.
pub fn sign_json_request(
    credentials: &Credentials,
    region: &str,
    service: &str,
    endpoint: &str,
    target: &str,
    body: &str,
    now: DateTime<Utc>,
) -> Result<Vec<(String, String)>, SigningError> {
    let identity = credentials.identity();
    let params: SigningParams<'_> = v4::SigningParams::builder()
        .identity(&identity)
        .region(region)
        .name(service)
        .time(SystemTime::from(now))
        .settings(SigningSettings::default())
        .build()
        .map_err(|err| SigningError::from_display(&err))?
        .into();

    let unsigned = [("content-type", JSON_CONTENT_TYPE), ("x-amz-target", target)];
    let signable = SignableRequest::new(
        "POST",
        endpoint,
        unsigned.into_iter(),
        SignableBody::Bytes(body.as_bytes()),
    )
    .map_err(|err| SigningError::from_display(&err))?;
    let (instructions, _signature) = sign(signable, &params)
        .map_err(|err| SigningError::from_display(&err))?
        .into_parts();

    let mut headers: Vec<(String, String)> = unsigned
        .iter()
        .map(|(name, value)| ((*name).to_owned(), (*value).to_owned()))
        .collect();
    headers.extend(
        instructions
            .headers()
            .map(|(name, value)| (name.to_owned(), value.to_owned())),
    );
    Ok(headers)
}
