//! Mapping of AWS CLI failures onto [`ProviderError`].

use crate::provider::ProviderError;
use crate::runner::{CommandOutput, RunnerError};

const CODE_MARKER: &str = "An error occurred (";

/// Classifies a failed CLI invocation from its stderr.
///
/// The CLI reports service errors as
/// `An error occurred (<Code>) when calling the <Op> operation: <message>`.
/// Anything else is a local CLI failure.
#[must_use]
pub fn classify_output(output: &CommandOutput) -> ProviderError {
    let stderr = output.stderr.trim();
    if let Some((code, message)) = parse_service_error(stderr) {
        return classify_code(code, message);
    }
    let lowered = stderr.to_ascii_lowercase();
    if lowered.contains("could not connect to the endpoint") {
        return ProviderError::Transport {
            endpoint: String::from("aws"),
            message: stderr.to_owned(),
        };
    }
    if lowered.contains("timeout") || lowered.contains("timed out") {
        return ProviderError::Timeout {
            message: stderr.to_owned(),
        };
    }
    if lowered.contains("unable to locate credentials")
        || lowered.contains("token has expired")
        || lowered.contains("sso session")
    {
        return ProviderError::PermissionDenied {
            message: stderr.to_owned(),
        };
    }
    ProviderError::Api {
        code: output
            .code
            .map_or_else(|| String::from("CliError"), |code| format!("CliExit{code}")),
        message: stderr.to_owned(),
    }
}

fn parse_service_error(stderr: &str) -> Option<(&str, &str)> {
    let (_, rest) = stderr.split_once(CODE_MARKER)?;
    let (code, tail) = rest.split_once(')')?;
    let message = tail
        .split_once(": ")
        .map_or(tail, |(_, text)| text)
        .trim();
    Some((code.trim(), message))
}

/// Classifies a service error code.
#[must_use]
pub fn classify_code(code: &str, text: &str) -> ProviderError {
    let message = text.to_owned();
    match code {
        "TargetNotConnected" => ProviderError::TargetNotConnected { message },
        "NoSuchEntity" | "ParameterNotFound" | "DoesNotExistException" => {
            ProviderError::NotFound { message }
        }
        _ if code.ends_with("NotFound") || code.ends_with(".NotFound") => {
            ProviderError::NotFound { message }
        }
        _ if code.ends_with("Duplicate") || code.ends_with("AlreadyExists") => {
            ProviderError::AlreadyExists { message }
        }
        "UnauthorizedOperation" | "AuthFailure" | "UnrecognizedClientException"
        | "ExpiredToken" | "ExpiredTokenException" | "InvalidClientTokenId" => {
            ProviderError::PermissionDenied { message }
        }
        _ if code.starts_with("AccessDenied") => ProviderError::PermissionDenied { message },
        "InsufficientInstanceCapacity" | "InsufficientCapacity" | "SpotMaxPriceTooLow"
        | "MaxSpotInstanceCountExceeded" | "InsufficientFreeAddressesInSubnet" => {
            ProviderError::CapacityOrQuota { message }
        }
        _ if code.ends_with("LimitExceeded") => ProviderError::CapacityOrQuota { message },
        "RequestTimeout" | "RequestTimeoutException" => ProviderError::Timeout { message },
        _ => ProviderError::Api {
            code: code.to_owned(),
            message,
        },
    }
}

/// Maps runner failures: a killed call has an unknown outcome, a call that
/// never started never reached AWS.
#[must_use]
pub fn from_runner(err: RunnerError) -> ProviderError {
    match err {
        RunnerError::Timeout { .. } => ProviderError::Timeout {
            message: err.to_string(),
        },
        RunnerError::Spawn { program, message } => ProviderError::Transport {
            endpoint: program,
            message,
        },
    }
}
