//! Systems Manager Parameter Store behind [`ParameterStore`].

use serde::Deserialize;
use serde_json::{Value, json};

use super::{AwsCli, tags_json};
use crate::provider::{ParameterStore, ProviderFuture};
use crate::runner::CommandRunner;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetParameterOutput {
    parameter: ParameterRecord,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ParameterRecord {
    value: String,
}

impl std::fmt::Debug for ParameterRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParameterRecord")
            .field("value", &"<redacted>")
            .finish()
    }
}

impl<R> ParameterStore for AwsCli<R>
where
    R: CommandRunner + 'static,
{
    fn get_parameter<'a>(&'a self, name: &'a str, decrypt: bool) -> ProviderFuture<'a, String> {
        Box::pin(async move {
            let mut args = vec!["--name", name];
            if decrypt {
                args.push("--with-decryption");
            }
            let output: GetParameterOutput = self
                .call_json("ssm", "get-parameter", args.as_slice())
                .await?;
            Ok(output.parameter.value)
        })
    }

    fn put_secure_parameter<'a>(
        &'a self,
        name: &'a str,
        value: &'a str,
        tags: &'a [(String, String)],
    ) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            // The value is a private key; it only ever travels in the input file.
            let input = json!({
                "Name": name,
                "Value": value,
                "Type": "SecureString",
                "Overwrite": false,
                "Tags": tags_json(tags),
            });
            self.call_with_input::<Value>("ssm", "put-parameter", &input)
                .await
                .map(|_| ())
        })
    }

    fn delete_parameter<'a>(&'a self, name: &'a str) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            self.call("ssm", "delete-parameter", &["--name", name])
                .await
                .map(|_| ())
        })
    }
}
