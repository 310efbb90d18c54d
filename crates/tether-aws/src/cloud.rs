//! Management API adapter
//!
//! [`AwsCloud`] implements the reconciler's [`CloudApi`] with the function
//! service for layers and configuration and the identity service for inline
//! role policies. Throttling codes map to `ReconcileError::Throttled`; a
//! missing inline policy is `None` rather than an error.

use aws_config::SdkConfig;
use aws_sdk_lambda::error::{DisplayErrorContext, ProvideErrorMetadata};
use aws_sdk_lambda::operation::get_function_configuration::GetFunctionConfigurationOutput;
use aws_sdk_lambda::primitives::Blob;
use aws_sdk_lambda::types::{Architecture, Environment, LayerVersionContentInput, LayerVersionsListItem};
use std::borrow::Cow;
use tether_infra::{
    CloudApi, FunctionConfiguration, FunctionUpdate, LayerPage, LayerVersion, PublishLayerRequest,
    ReconcileError,
};

/// Error codes the services use for rate limiting
const THROTTLING_CODES: [&str; 4] = [
    "TooManyRequestsException",
    "ThrottlingException",
    "Throttling",
    "RequestLimitExceeded",
];

/// Map a failed call to the reconciler's error
fn failure(
    operation: &'static str,
    target: &str,
    code: Option<&str>,
    message: String,
) -> ReconcileError {
    if code.is_some_and(|code| THROTTLING_CODES.contains(&code)) {
        ReconcileError::Throttled {
            operation,
            target: target.to_string(),
        }
    } else {
        ReconcileError::api(operation, target, message)
    }
}

fn call_failed<E>(operation: &'static str, target: &str, err: E) -> ReconcileError
where
    E: ProvideErrorMetadata + std::error::Error,
{
    failure(operation, target, err.code(), DisplayErrorContext(&err).to_string())
}

/// Policy documents come back URL-encoded
fn decode_policy(document: &str) -> String {
    percent_encoding::percent_decode_str(document)
        .decode_utf8()
        .map_or_else(|_| document.to_string(), Cow::into_owned)
}

fn layer_version(arn: Option<&str>, version: i64, description: Option<&str>) -> Option<LayerVersion> {
    Some(LayerVersion {
        layer_version_arn: arn?.to_string(),
        version: u64::try_from(version).ok()?,
        description: description.map(str::to_string),
    })
}

fn listed_version(item: &LayerVersionsListItem) -> Option<LayerVersion> {
    layer_version(item.layer_version_arn(), item.version(), item.description())
}

fn configuration(output: &GetFunctionConfigurationOutput, name: &str) -> FunctionConfiguration {
    FunctionConfiguration {
        function_name: output.function_name().unwrap_or(name).to_string(),
        timeout: output.timeout().and_then(|t| u32::try_from(t).ok()),
        layers: output
            .layers()
            .iter()
            .filter_map(|layer| layer.arn().map(str::to_string))
            .collect(),
        environment: output
            .environment()
            .and_then(|env| env.variables())
            .map(|vars| vars.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default(),
        role: output.role().map(str::to_string),
    }
}

/// Production [`CloudApi`]
#[derive(Debug, Clone)]
pub struct AwsCloud {
    lambda: aws_sdk_lambda::Client,
    iam: aws_sdk_iam::Client,
}

impl AwsCloud {
    /// Clients over `config`
    #[must_use]
    pub fn new(config: &SdkConfig) -> Self {
        Self {
            lambda: aws_sdk_lambda::Client::new(config),
            iam: aws_sdk_iam::Client::new(config),
        }
    }
}

#[async_trait::async_trait]
impl CloudApi for AwsCloud {
    async fn list_layer_versions(&self, layer_name: &str) -> Result<Vec<LayerVersion>, ReconcileError> {
        let mut versions = Vec::new();
        let mut marker = None;
        loop {
            let page = self
                .lambda
                .list_layer_versions()
                .layer_name(layer_name)
                .set_marker(marker)
                .send()
                .await;
            let page = match page {
                Ok(page) => page,
                Err(e) if e.code() == Some("ResourceNotFoundException") => return Ok(Vec::new()),
                Err(e) => return Err(call_failed("ListLayerVersions", layer_name, e)),
            };
            versions.extend(page.layer_versions().iter().filter_map(listed_version));
            match page.next_marker() {
                Some(next) => marker = Some(next.to_string()),
                None => return Ok(versions),
            }
        }
    }

    async fn publish_layer_version(
        &self,
        request: PublishLayerRequest,
    ) -> Result<LayerVersion, ReconcileError> {
        let content = LayerVersionContentInput::builder()
            .zip_file(Blob::new(request.content))
            .build();
        let architectures = request
            .compatible_architectures
            .iter()
            .map(|arch| Architecture::from(arch.as_str()))
            .collect();

        let output = self
            .lambda
            .publish_layer_version()
            .layer_name(&request.layer_name)
            .description(&request.description)
            .content(content)
            .set_compatible_architectures(Some(architectures))
            .send()
            .await
            .map_err(|e| call_failed("PublishLayerVersion", &request.layer_name, e))?;

        layer_version(output.layer_version_arn(), output.version(), output.description()).ok_or_else(|| {
            ReconcileError::api("PublishLayerVersion", &request.layer_name, "response carried no version ARN")
        })
    }

    async fn delete_layer_version(&self, layer_name: &str, version: u64) -> Result<(), ReconcileError> {
        let number = i64::try_from(version)
            .map_err(|_| ReconcileError::api("DeleteLayerVersion", layer_name, "version out of range"))?;
        self.lambda
            .delete_layer_version()
            .layer_name(layer_name)
            .version_number(number)
            .send()
            .await
            .map_err(|e| call_failed("DeleteLayerVersion", layer_name, e))?;
        Ok(())
    }

    async fn list_layers(&self, marker: Option<String>) -> Result<LayerPage, ReconcileError> {
        let output = self
            .lambda
            .list_layers()
            .set_marker(marker)
            .send()
            .await
            .map_err(|e| call_failed("ListLayers", "account", e))?;
        Ok(LayerPage {
            layer_names: output
                .layers()
                .iter()
                .filter_map(|layer| layer.layer_name().map(str::to_string))
                .collect(),
            next_marker: output.next_marker().map(str::to_string),
        })
    }

    async fn get_function_configuration(
        &self,
        function_name: &str,
    ) -> Result<FunctionConfiguration, ReconcileError> {
        let output = self
            .lambda
            .get_function_configuration()
            .function_name(function_name)
            .send()
            .await
            .map_err(|e| call_failed("GetFunctionConfiguration", function_name, e))?;
        Ok(configuration(&output, function_name))
    }

    async fn update_function_configuration(&self, update: FunctionUpdate) -> Result<(), ReconcileError> {
        let environment = Environment::builder()
            .set_variables(Some(update.environment.into_iter().collect()))
            .build();
        self.lambda
            .update_function_configuration()
            .function_name(&update.function_name)
            .set_layers(Some(update.layers))
            .environment(environment)
            .set_timeout(update.timeout.map(|t| i32::try_from(t).unwrap_or(i32::MAX)))
            .send()
            .await
            .map_err(|e| call_failed("UpdateFunctionConfiguration", &update.function_name, e))?;
        Ok(())
    }

    async fn get_role_policy(
        &self,
        role_name: &str,
        policy_name: &str,
    ) -> Result<Option<String>, ReconcileError> {
        let result = self
            .iam
            .get_role_policy()
            .role_name(role_name)
            .policy_name(policy_name)
            .send()
            .await;
        match result {
            Ok(output) => Ok(Some(decode_policy(output.policy_document()))),
            Err(e) if e.code() == Some("NoSuchEntity") => Ok(None),
            Err(e) => Err(call_failed("GetRolePolicy", role_name, e)),
        }
    }

    async fn put_role_policy(
        &self,
        role_name: &str,
        policy_name: &str,
        document: String,
    ) -> Result<(), ReconcileError> {
        self.iam
            .put_role_policy()
            .role_name(role_name)
            .policy_name(policy_name)
            .policy_document(document)
            .send()
            .await
            .map_err(|e| call_failed("PutRolePolicy", role_name, e))?;
        Ok(())
    }

    async fn delete_role_policy(&self, role_name: &str, policy_name: &str) -> Result<(), ReconcileError> {
        let result = self
            .iam
            .delete_role_policy()
            .role_name(role_name)
            .policy_name(policy_name)
            .send()
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(e) if e.code() == Some("NoSuchEntity") => Ok(()),
            Err(e) => Err(call_failed("DeleteRolePolicy", role_name, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_lambda::types::{EnvironmentResponse, Layer};
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    #[test]
    fn throttling_codes_are_retryable() {
        let err = failure("UpdateFunctionConfiguration", "orders", Some("TooManyRequestsException"), String::new());
        assert!(err.is_retryable());

        let err = failure("PutRolePolicy", "orders-role", Some("Throttling"), String::new());
        assert!(err.is_retryable());

        let err = failure("PutRolePolicy", "orders-role", Some("AccessDenied"), "denied".into());
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "PutRolePolicy failed for orders-role: denied");
    }

    #[test]
    fn policy_documents_are_decoded() {
        assert_eq!(
            decode_policy("%7B%22Version%22%3A%222012-10-17%22%7D"),
            r#"{"Version":"2012-10-17"}"#
        );
        assert_eq!(decode_policy(r#"{"plain":true}"#), r#"{"plain":true}"#);
    }

    #[test]
    fn configuration_keeps_layer_order_and_environment() {
        let output = GetFunctionConfigurationOutput::builder()
            .function_name("orders-prod")
            .timeout(3)
            .role("arn:aws:iam::123456789012:role/orders")
            .layers(Layer::builder().arn("arn:aws:lambda:eu-west-1:1:layer:otel:4").build())
            .layers(Layer::builder().arn("arn:aws:lambda:eu-west-1:1:layer:TetherBridge:2").build())
            .environment(EnvironmentResponse::builder().variables("STAGE", "prod").build())
            .build();

        assert_eq!(
            configuration(&output, "orders"),
            FunctionConfiguration {
                function_name: "orders-prod".into(),
                timeout: Some(3),
                layers: vec![
                    "arn:aws:lambda:eu-west-1:1:layer:otel:4".into(),
                    "arn:aws:lambda:eu-west-1:1:layer:TetherBridge:2".into(),
                ],
                environment: BTreeMap::from([("STAGE".to_string(), "prod".to_string())]),
                role: Some("arn:aws:iam::123456789012:role/orders".into()),
            }
        );
    }

    #[test]
    fn sparse_configuration_falls_back_to_the_requested_name() {
        let output = GetFunctionConfigurationOutput::builder().build();
        let config = configuration(&output, "orders");
        assert_eq!(config.function_name, "orders");
        assert!(config.layers.is_empty());
        assert!(config.environment.is_empty());
        assert_eq!(config.timeout, None);
    }

    #[test]
    fn listed_versions_need_an_arn() {
        let item = LayerVersionsListItem::builder()
            .layer_version_arn("arn:aws:lambda:eu-west-1:1:layer:TetherBridge:3")
            .version(3)
            .description("tether 0.1.0")
            .build();
        assert_eq!(
            listed_version(&item),
            Some(LayerVersion {
                layer_version_arn: "arn:aws:lambda:eu-west-1:1:layer:TetherBridge:3".into(),
                version: 3,
                description: Some("tether 0.1.0".into()),
            })
        );

        assert_eq!(listed_version(&LayerVersionsListItem::builder().version(1).build()), None);
    }
}
