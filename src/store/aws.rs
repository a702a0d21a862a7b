//! AWS Secrets Manager backend.
//!
//! Credentials and region come from the standard AWS provider chain
//! (environment, profile, instance role). `--region` overrides the region.
//! Secret values are never logged.

use super::SecretStore;
use crate::error::SyncError;
use async_trait::async_trait;
use aws_sdk_secretsmanager::config::Region;
use aws_sdk_secretsmanager::error::DisplayErrorContext;
use aws_sdk_secretsmanager::types::{Filter, FilterNameStringType};
use aws_sdk_secretsmanager::Client;

/// [`SecretStore`] backed by AWS Secrets Manager.
#[derive(Debug, Clone)]
pub struct AwsSecretStore {
    client: Client,
}

impl AwsSecretStore {
    /// Build a client from the default AWS configuration chain.
    pub async fn connect(region: Option<String>) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(Region::new(region));
        }
        let config = loader.load().await;

        tracing::debug!(region = ?config.region(), "AWS Secrets Manager client configured");
        Self {
            client: Client::new(&config),
        }
    }

    /// Wrap an already configured client.
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

fn remote_error(
    operation: &'static str,
    name: &str,
    err: impl std::error::Error,
) -> SyncError {
    SyncError::RemoteOperation {
        operation,
        name: name.to_string(),
        message: DisplayErrorContext(err).to_string(),
    }
}

#[async_trait]
impl SecretStore for AwsSecretStore {
    async fn exists(&self, name: &str) -> Result<bool, SyncError> {
        match self.client.describe_secret().secret_id(name).send().await {
            Ok(_) => Ok(true),
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_resource_not_found_exception()) =>
            {
                Ok(false)
            }
            Err(err) => Err(remote_error("describe", name, err)),
        }
    }

    async fn create(
        &self,
        name: &str,
        description: &str,
        payload: &str,
    ) -> Result<Option<String>, SyncError> {
        let response = self
            .client
            .create_secret()
            .name(name)
            .description(description)
            .secret_string(payload)
            .send()
            .await
            .map_err(|e| remote_error("create", name, e))?;

        Ok(response.arn().map(str::to_string))
    }

    async fn update(&self, name: &str, payload: &str) -> Result<Option<String>, SyncError> {
        let response = self
            .client
            .put_secret_value()
            .secret_id(name)
            .secret_string(payload)
            .send()
            .await
            .map_err(|e| remote_error("update", name, e))?;

        Ok(response.arn().map(str::to_string))
    }

    async fn list_names(&self, prefix: &str) -> Result<Vec<String>, SyncError> {
        // The `name` filter is a prefix match on the server side.
        let filter = Filter::builder()
            .key(FilterNameStringType::Name)
            .values(prefix)
            .build();

        let mut names = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let response = self
                .client
                .list_secrets()
                .filters(filter.clone())
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| remote_error("list", prefix, e))?;

            names.extend(
                response
                    .secret_list()
                    .iter()
                    .filter_map(|entry| entry.name())
                    .map(str::to_string),
            );

            match response.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => break,
            }
        }

        Ok(names)
    }

    async fn check_access(&self) -> Result<(), SyncError> {
        self.client
            .list_secrets()
            .max_results(1)
            .send()
            .await
            .map(|_| ())
            .map_err(|e| remote_error("list", "*", e))
    }

    async fn get(&self, name: &str) -> Result<String, SyncError> {
        let response = self
            .client
            .get_secret_value()
            .secret_id(name)
            .send()
            .await
            .map_err(|e| remote_error("get", name, e))?;

        response
            .secret_string()
            .map(str::to_string)
            .ok_or_else(|| SyncError::RemoteOperation {
                operation: "get",
                name: name.to_string(),
                message: "secret has no string value (may be binary)".to_string(),
            })
    }
}
