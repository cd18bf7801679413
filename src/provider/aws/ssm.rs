//! Metadata-store adapter over the provider's parameter store.
//!
//! One parameter per application holds the whole JSON-encoded [`AppRecord`],
//! keyed by lower-cased app name under `/infra/apps/`.

use serde::Deserialize;

use super::{AwsCli, failure_names, os_args};
use crate::exec::CommandRunner;
use crate::model::AppRecord;
use crate::provider::{MetadataStore, ProviderError};

const MISSING_PARAMETER_MARKERS: &[&str] = &["ParameterNotFound"];

/// Metadata store backed by the parameter store in the org home region.
#[derive(Clone, Debug)]
pub struct AwsMetadata<R: CommandRunner> {
    cli: AwsCli<R>,
    org_region: String,
}

impl<R: CommandRunner> AwsMetadata<R> {
    /// Creates the adapter scoped to the organisation's home region.
    pub fn new(cli: AwsCli<R>, org_region: impl Into<String>) -> Self {
        Self {
            cli,
            org_region: org_region.into(),
        }
    }

    fn app_key(app_name: &str) -> String {
        format!("/infra/apps/{}", app_name.to_lowercase())
    }
}

impl<R: CommandRunner> MetadataStore for AwsMetadata<R> {
    fn get_app(&self, app_name: &str) -> Result<Option<AppRecord>, ProviderError> {
        let key = Self::app_key(app_name);
        let args = os_args(&[
            "ssm",
            "get-parameter",
            "--name",
            &key,
            "--with-decryption",
        ]);
        let response: Result<GetParameterResponse, ProviderError> =
            self.cli.run_json(&self.org_region, &args, "parameter");
        let response = match response {
            Ok(value) => value,
            Err(err) if failure_names(&err, MISSING_PARAMETER_MARKERS) => return Ok(None),
            Err(err) => return Err(err),
        };

        let record = serde_json::from_str::<AppRecord>(&response.parameter.value).map_err(
            |err| ProviderError::Parse {
                resource: format!("app record {key}"),
                message: err.to_string(),
            },
        )?;
        Ok(Some(record))
    }

    fn put_app(&self, record: &AppRecord) -> Result<(), ProviderError> {
        let key = Self::app_key(&record.name);
        let value = serde_json::to_string(record).map_err(|err| ProviderError::Parse {
            resource: format!("app record {key}"),
            message: err.to_string(),
        })?;
        let args = os_args(&[
            "ssm",
            "put-parameter",
            "--name",
            &key,
            "--value",
            &value,
            "--type",
            "String",
            "--overwrite",
        ]);
        self.cli.run_discarding(&self.org_region, &args)
    }
}

#[derive(Debug, Deserialize)]
struct GetParameterResponse {
    #[serde(rename = "Parameter")]
    parameter: AwsParameter,
}

#[derive(Debug, Deserialize)]
struct AwsParameter {
    #[serde(rename = "Value")]
    value: String,
}
