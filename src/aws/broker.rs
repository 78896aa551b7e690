//! Session Manager behind [`SessionBroker`].
//!
//! `StartSession` goes straight to the service endpoint with credentials
//! exported from the CLI, so the returned stream URL and token stay with this
//! process instead of being consumed by a CLI-spawned plugin.

use chrono::Utc;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use super::{AwsCli, Credentials, classify_code, sign_json_request};
use crate::provider::{
    BrokerSession, ProviderError, ProviderFuture, SessionBroker, StartSessionRequest,
};
use crate::runner::CommandRunner;

const START_SESSION_TARGET: &str = "AmazonSSM.StartSession";

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StartSessionResponse {
    session_id: String,
    token_value: String,
    stream_url: String,
}

#[derive(Debug, Default, Deserialize)]
struct ServiceErrorBody {
    #[serde(rename = "__type", default)]
    kind: String,
    #[serde(alias = "Message", default)]
    message: String,
}

pub(super) fn start_session_body(request: &StartSessionRequest) -> Value {
    let mut body = Map::new();
    body.insert(String::from("Target"), Value::from(request.target.as_str()));
    if let Some(document) = &request.document {
        body.insert(String::from("DocumentName"), Value::from(document.as_str()));
    }
    if !request.parameters.is_empty() {
        let parameters: Map<String, Value> = request
            .parameters
            .iter()
            .map(|(key, values)| (key.clone(), Value::from(values.clone())))
            .collect();
        body.insert(String::from("Parameters"), Value::Object(parameters));
    }
    Value::Object(body)
}

/// Maps a non-success `StartSession` reply onto a provider error.
///
/// The service reports errors as `{"__type": "prefix#Code", "message": ".."}`.
pub(super) fn classify_service_error(status: u16, body: &str) -> ProviderError {
    let parsed: ServiceErrorBody = serde_json::from_str(body).unwrap_or_default();
    let code = parsed
        .kind
        .rsplit_once('#')
        .map_or(parsed.kind.as_str(), |(_, code)| code);
    if code.is_empty() {
        return ProviderError::Api {
            code: format!("Http{status}"),
            message: body.trim().to_owned(),
        };
    }
    classify_code(code, &parsed.message)
}

impl<R> AwsCli<R>
where
    R: CommandRunner + 'static,
{
    async fn export_credentials(&self) -> Result<Credentials, ProviderError> {
        self.call_json("configure", "export-credentials", &["--format", "process"])
            .await
    }

    async fn post_start_session(
        &self,
        request: &StartSessionRequest,
    ) -> Result<BrokerSession, ProviderError> {
        let credentials = self.export_credentials().await?;
        let region = self.region();
        let host = format!("ssm.{region}.amazonaws.com");
        let endpoint = format!("https://{host}/");
        let body = start_session_body(request).to_string();
        let headers = sign_json_request(
            &credentials,
            region,
            "ssm",
            &endpoint,
            START_SESSION_TARGET,
            &body,
            Utc::now(),
        )
        .map_err(|err| ProviderError::PermissionDenied {
            message: err.to_string(),
        })?;

        let transport = |err: reqwest::Error| ProviderError::Transport {
            endpoint: endpoint.clone(),
            message: err.to_string(),
        };
        let builder = headers
            .into_iter()
            .fold(self.http.post(&endpoint), |builder, (name, value)| {
                builder.header(name, value)
            });
        debug!(target = %request.target, "starting broker session");
        let response = builder.body(body).send().await.map_err(transport)?;
        let status = response.status();
        let text = response.text().await.map_err(transport)?;
        if !status.is_success() {
            return Err(classify_service_error(status.as_u16(), &text));
        }
        let parsed: StartSessionResponse =
            serde_json::from_str(&text).map_err(|err| ProviderError::Parse {
                resource: String::from("ssm start-session"),
                message: err.to_string(),
            })?;
        Ok(BrokerSession {
            session_id: parsed.session_id,
            token_value: parsed.token_value,
            stream_url: parsed.stream_url,
            endpoint,
        })
    }
}

impl<R> SessionBroker for AwsCli<R>
where
    R: CommandRunner + 'static,
{
    fn start_session<'a>(
        &'a self,
        request: &'a StartSessionRequest,
    ) -> ProviderFuture<'a, BrokerSession> {
        Box::pin(self.post_start_session(request))
    }

    fn terminate_session<'a>(&'a self, session_id: &'a str) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            self.call("ssm", "terminate-session", &["--session-id", session_id])
                .await
                .map(|_| ())
        })
    }
}

