//! Infrastructure-stack adapter over `aws cloudformation`.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::json;

use super::{AwsCli, failure_names, os_args};
use crate::exec::CommandRunner;
use crate::provider::{ProviderError, StackDescription, StackResource, Stacks};

const MISSING_STACK_MARKERS: &[&str] = &["does not exist", "ValidationError"];

/// Stack operations implemented over the provider CLI.
#[derive(Clone, Debug)]
pub struct AwsStacks<R: CommandRunner> {
    cli: AwsCli<R>,
}

impl<R: CommandRunner> AwsStacks<R> {
    /// Creates the adapter around a CLI wrapper.
    #[must_use]
    pub const fn new(cli: AwsCli<R>) -> Self {
        Self { cli }
    }
}

fn parameters_json(parameters: &BTreeMap<String, String>) -> String {
    let rendered: Vec<_> = parameters
        .iter()
        .map(|(key, value)| json!({"ParameterKey": key, "ParameterValue": value}))
        .collect();
    json!(rendered).to_string()
}

fn tags_json(tags: &BTreeMap<String, String>) -> String {
    let rendered: Vec<_> = tags
        .iter()
        .map(|(key, value)| json!({"Key": key, "Value": value}))
        .collect();
    json!(rendered).to_string()
}

impl<R: CommandRunner> Stacks for AwsStacks<R> {
    fn describe_stack(
        &self,
        stack_name: &str,
        region: &str,
    ) -> Result<Option<StackDescription>, ProviderError> {
        let args = os_args(&["cloudformation", "describe-stacks", "--stack-name", stack_name]);
        let response: Result<DescribeStacksResponse, ProviderError> =
            self.cli.run_json(region, &args, "stacks");
        let response = match response {
            Ok(value) => value,
            Err(err) if failure_names(&err, MISSING_STACK_MARKERS) => return Ok(None),
            Err(err) => return Err(err),
        };

        Ok(response.stacks.into_iter().next().map(|stack| StackDescription {
            stack_id: stack.stack_id,
            status: stack.stack_status,
            status_reason: stack.stack_status_reason,
        }))
    }

    fn create_stack(
        &self,
        stack_name: &str,
        template_url: &str,
        parameters: &BTreeMap<String, String>,
        tags: &BTreeMap<String, String>,
        region: &str,
    ) -> Result<String, ProviderError> {
        let args = os_args(&[
            "cloudformation",
            "create-stack",
            "--stack-name",
            stack_name,
            "--template-url",
            template_url,
            "--on-failure",
            "DELETE",
            "--capabilities",
            "CAPABILITY_IAM",
            "CAPABILITY_NAMED_IAM",
            "--parameters",
            &parameters_json(parameters),
            "--tags",
            &tags_json(tags),
        ]);
        let response: StackIdResponse = self.cli.run_json(region, &args, "stack")?;
        Ok(response.stack_id)
    }

    fn update_stack(
        &self,
        stack_name: &str,
        template_url: &str,
        parameters: &BTreeMap<String, String>,
        region: &str,
    ) -> Result<String, ProviderError> {
        let args = os_args(&[
            "cloudformation",
            "update-stack",
            "--stack-name",
            stack_name,
            "--template-url",
            template_url,
            "--capabilities",
            "CAPABILITY_IAM",
            "CAPABILITY_NAMED_IAM",
            "--parameters",
            &parameters_json(parameters),
        ]);
        let response: StackIdResponse = self.cli.run_json(region, &args, "stack")?;
        Ok(response.stack_id)
    }

    fn delete_stack(&self, stack_name: &str, region: &str) -> Result<(), ProviderError> {
        let args = os_args(&["cloudformation", "delete-stack", "--stack-name", stack_name]);
        self.cli.run_discarding(region, &args)
    }

    fn stack_resources(
        &self,
        stack_name: &str,
        region: &str,
    ) -> Result<Vec<StackResource>, ProviderError> {
        let args = os_args(&[
            "cloudformation",
            "describe-stack-resources",
            "--stack-name",
            stack_name,
        ]);
        let response: DescribeStackResourcesResponse =
            self.cli.run_json(region, &args, "stack resources")?;
        Ok(response
            .stack_resources
            .into_iter()
            .map(|resource| StackResource {
                logical_id: resource.logical_resource_id,
                physical_id: resource.physical_resource_id,
                resource_type: resource.resource_type,
            })
            .collect())
    }
}

#[derive(Debug, Deserialize)]
struct DescribeStacksResponse {
    #[serde(rename = "Stacks", default)]
    stacks: Vec<AwsStack>,
}

#[derive(Debug, Deserialize)]
struct AwsStack {
    #[serde(rename = "StackId")]
    stack_id: String,
    #[serde(rename = "StackStatus")]
    stack_status: String,
    #[serde(rename = "StackStatusReason", default)]
    stack_status_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StackIdResponse {
    #[serde(rename = "StackId")]
    stack_id: String,
}

#[derive(Debug, Deserialize)]
struct DescribeStackResourcesResponse {
    #[serde(rename = "StackResources", default)]
    stack_resources: Vec<AwsStackResource>,
}

#[derive(Debug, Deserialize)]
struct AwsStackResource {
    #[serde(rename = "LogicalResourceId")]
    logical_resource_id: String,
    #[serde(rename = "PhysicalResourceId", default)]
    physical_resource_id: String,
    #[serde(rename = "ResourceType", default)]
    resource_type: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedRunner;
    use rstest::rstest;

    fn stacks(runner: ScriptedRunner) -> AwsStacks<ScriptedRunner> {
        AwsStacks::new(AwsCli::new("aws", runner))
    }

    #[rstest]
    fn describe_stack_maps_validation_error_to_none() {
        let runner = ScriptedRunner::new();
        runner.push_output(
            Some(254),
            "",
            "An error occurred (ValidationError): Stack with id demo-app does not exist",
        );
        let described = stacks(runner)
            .describe_stack("demo-app", "us-east-1")
            .expect("missing stack should not error");
        assert_eq!(described, None);
    }

    #[rstest]
    fn describe_stack_surfaces_status_and_reason() {
        let runner = ScriptedRunner::new();
        runner.push_output(
            Some(0),
            r#"{"Stacks":[{"StackId":"arn:stack/demo-app","StackStatus":"ROLLBACK_COMPLETE",
                "StackStatusReason":"resource limit"}]}"#,
            "",
        );
        let described = stacks(runner)
            .describe_stack("demo-app", "us-east-1")
            .expect("describe should succeed")
            .expect("stack should exist");
        assert_eq!(described.status, "ROLLBACK_COMPLETE");
        assert_eq!(described.status_reason.as_deref(), Some("resource limit"));
    }

    #[rstest]
    fn stack_resources_surface_physical_ids() {
        let runner = ScriptedRunner::new();
        runner.push_output(
            Some(0),
            r#"{"StackResources":[{"LogicalResourceId":"ScalingGroup",
                "PhysicalResourceId":"demo-app-asg",
                "ResourceType":"AWS::AutoScaling::AutoScalingGroup"}]}"#,
            "",
        );
        let resources = stacks(runner)
            .stack_resources("demo-app", "us-east-1")
            .expect("listing should succeed");
        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0].logical_id, "ScalingGroup");
        assert_eq!(resources[0].physical_id, "demo-app-asg");
    }

    #[rstest]
    fn delete_stack_names_the_stack() {
        let runner = ScriptedRunner::new();
        runner.push_success();
        stacks(runner.clone())
            .delete_stack("demo-app", "us-east-1")
            .expect("delete should succeed");
        let call = runner.invocations().remove(0).command_string();
        assert!(call.contains("delete-stack --stack-name demo-app"), "call: {call}");
    }

    #[rstest]
    fn create_stack_passes_parameters_tags_and_delete_on_failure() {
        let runner = ScriptedRunner::new();
        runner.push_output(Some(0), r#"{"StackId":"arn:stack/demo-app"}"#, "");

        let parameters = BTreeMap::from([(String::from("ImageId"), String::from("ami-1"))]);
        let tags = BTreeMap::from([(String::from("purpose"), String::from("app"))]);
        let stack_id = stacks(runner.clone())
            .create_stack("demo-app", "https://example/stack.yaml", &parameters, &tags, "us-east-1")
            .expect("create should succeed");
        assert_eq!(stack_id, "arn:stack/demo-app");

        let call = runner.invocations().remove(0).command_string();
        assert!(call.contains("--on-failure DELETE"), "call: {call}");
        assert!(call.contains("\"ParameterKey\":\"ImageId\""), "call: {call}");
        assert!(call.contains("\"Key\":\"purpose\""), "call: {call}");
    }
}
