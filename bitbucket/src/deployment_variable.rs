//! `bitbucket_deployment_variable`: a key/value pair scoped to one deployment
//! environment of a repository.
//!
//! The record addresses its environment through the composite `deployment`
//! attribute (`<repository>:<deployment>`) and is identified by the UUID
//! Bitbucket assigns on creation. Bitbucket offers no single-variable GET, so
//! reads scan the environment's variable listing for that UUID.

use crate::client::{ApiClient, ApiResponse};
use crate::config::{ConsistencyStrategy, ResourceConfig, StatusPolicy};
use crate::provider::{ProviderError, ProviderResult, Resource};
use crate::schema::{AttributeSchema, AttributeType, ResourceData, ResourceSchema};
use crate::types::{DeploymentTarget, DeploymentVariable, PaginatedDeploymentVariables};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub const DEPLOYMENT_VARIABLE_RESOURCE: &str = "bitbucket_deployment_variable";

/// Outcome of looking a variable up in its environment's listing.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Lookup {
    Found(DeploymentVariable),
    Absent,
    Unexpected(ApiResponse),
}

pub struct DeploymentVariableResource {
    client: Arc<dyn ApiClient>,
    config: ResourceConfig,
}

impl DeploymentVariableResource {
    pub fn new(client: Arc<dyn ApiClient>, config: ResourceConfig) -> ProviderResult<Self> {
        config
            .validate()
            .map_err(|msg| ProviderError::InvalidConfig { message: msg })?;

        Ok(Self { client, config })
    }

    /// The payload part of the record: `key`, `value` and `secured`.
    /// `uuid` and `deployment` only address the object.
    pub fn record_from_input(data: &ResourceData) -> ProviderResult<DeploymentVariable> {
        Ok(DeploymentVariable {
            key: data.get_str("key")?.to_string(),
            value: data.get_str("value")?.to_string(),
            uuid: String::new(),
            secured: match data.get("secured") {
                None | Some(serde_json::Value::Null) => false,
                Some(_) => data.get_bool("secured")?,
            },
        })
    }

    fn target(data: &ResourceData) -> ProviderResult<DeploymentTarget> {
        DeploymentTarget::parse(data.get_str("deployment")?)
    }

    /// The `uuid` attribute, or the record id for records that only carry an id.
    fn identity(data: &ResourceData) -> String {
        let uuid = data.get_str_or_empty("uuid");
        if uuid.is_empty() {
            data.id().to_string()
        } else {
            uuid.to_string()
        }
    }

    fn apply_remote(data: &mut ResourceData, variable: DeploymentVariable) {
        data.set_id(variable.uuid.clone());
        data.set("key", variable.key);
        data.set("value", variable.value);
        data.set("secured", variable.secured);
        data.set("uuid", variable.uuid);
    }

    fn unexpected(&self, operation: &str, response: ApiResponse) -> ProviderResult<()> {
        match self.config.status_policy {
            StatusPolicy::Lenient => {
                warn!(
                    "Ignoring HTTP {} on {} of deployment variable",
                    response.status, operation
                );
                Ok(())
            }
            StatusPolicy::Strict => Err(ProviderError::UnexpectedStatus {
                status: response.status,
                body: response.body,
            }),
        }
    }

    /// Walk the variables listing until `uuid` shows up, following `next`
    /// links for at most `max_pages` pages.
    async fn lookup(&self, target: &DeploymentTarget, uuid: &str) -> ProviderResult<Lookup> {
        let mut path = target.variables_path();
        let mut pages = 0;

        loop {
            let response = self.client.get(&path).await?;
            pages += 1;

            match response.status {
                200 => {}
                404 => return Ok(Lookup::Absent),
                _ => return Ok(Lookup::Unexpected(response)),
            }

            let page: PaginatedDeploymentVariables = response.json()?;
            if page.size < 1 {
                return Ok(Lookup::Absent);
            }

            if let Some(variable) = page.values.into_iter().find(|v| v.uuid == uuid) {
                return Ok(Lookup::Found(variable));
            }

            match page.next {
                Some(next) if pages < self.config.max_pages => {
                    debug!("Variable {} not on page {}, following {}", uuid, pages, next);
                    path = next;
                }
                Some(_) => {
                    warn!("Stopped after {} pages looking for variable {}", pages, uuid);
                    return Ok(Lookup::Absent);
                }
                None => return Ok(Lookup::Absent),
            }
        }
    }

    /// Bring a freshly created record in line with the remote listing,
    /// tolerating the listing lagging behind the create.
    async fn settle(
        &self,
        target: &DeploymentTarget,
        data: &mut ResourceData,
    ) -> ProviderResult<()> {
        let consistency = &self.config.consistency;

        match consistency.strategy {
            ConsistencyStrategy::FixedDelay => {
                debug!("Waiting {:?} before reading back", consistency.settle_delay);
                tokio::time::sleep(consistency.settle_delay).await;
                self.read(data).await
            }
            ConsistencyStrategy::Poll => {
                let uuid = Self::identity(data);
                let start = Instant::now();
                let mut attempt = 0;

                loop {
                    match self.lookup(target, &uuid).await? {
                        Lookup::Found(variable) => {
                            debug!(
                                "Variable {} visible after {:?} ({} retries)",
                                uuid,
                                start.elapsed(),
                                attempt
                            );
                            Self::apply_remote(data, variable);
                            return Ok(());
                        }
                        Lookup::Absent => {
                            debug!("Variable {} not listed yet", uuid);
                        }
                        Lookup::Unexpected(response) => {
                            debug!(
                                "Listing returned HTTP {} while waiting for {}",
                                response.status, uuid
                            );
                        }
                    }

                    let delay = consistency.calculate_retry_delay(attempt);
                    if start.elapsed() + delay > consistency.deadline {
                        return Err(ProviderError::ConsistencyTimeout {
                            uuid,
                            waited: start.elapsed(),
                        });
                    }

                    attempt += 1;
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[async_trait]
impl Resource for DeploymentVariableResource {
    fn type_name(&self) -> &str {
        DEPLOYMENT_VARIABLE_RESOURCE
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new()
            .attribute(
                "uuid",
                AttributeSchema::computed(AttributeType::String)
                    .with_description("UUID assigned by Bitbucket"),
            )
            .attribute("key", AttributeSchema::required(AttributeType::String))
            .attribute(
                "value",
                AttributeSchema::required(AttributeType::String).sensitive(),
            )
            .attribute(
                "secured",
                AttributeSchema::optional(AttributeType::Bool).with_default(false),
            )
            .attribute(
                "deployment",
                AttributeSchema::required(AttributeType::String)
                    .with_description("<repository>:<deployment environment uuid>"),
            )
    }

    async fn create(&self, data: &mut ResourceData) -> ProviderResult<()> {
        let target = Self::target(data)?;
        let body = serde_json::to_vec(&Self::record_from_input(data)?)?;

        let response = self.client.post(&target.variables_path(), body).await?;
        if !response.is_success() {
            return Err(ProviderError::UnexpectedStatus {
                status: response.status,
                body: response.body,
            });
        }

        let created: DeploymentVariable = response.json()?;
        if created.uuid.is_empty() {
            return Err(ProviderError::MissingIdentity);
        }

        info!("Created deployment variable {} in {}", created.uuid, target);
        data.set("uuid", created.uuid.clone());
        data.set_id(created.uuid);

        self.settle(&target, data).await
    }

    async fn read(&self, data: &mut ResourceData) -> ProviderResult<()> {
        let target = Self::target(data)?;
        let uuid = Self::identity(data);
        debug!("Reading deployment variable {:?} in {}", uuid, target);

        if uuid.is_empty() {
            data.set_id("");
            return Ok(());
        }

        match self.lookup(&target, &uuid).await? {
            Lookup::Found(variable) => {
                Self::apply_remote(data, variable);
                Ok(())
            }
            Lookup::Absent => {
                info!("Deployment variable {} no longer exists", uuid);
                data.set_id("");
                Ok(())
            }
            Lookup::Unexpected(response) => self.unexpected("read", response),
        }
    }

    async fn update(&self, data: &mut ResourceData) -> ProviderResult<()> {
        let target = Self::target(data)?;
        let uuid = Self::identity(data);
        if uuid.is_empty() {
            return Err(ProviderError::MissingIdentity);
        }

        let body = serde_json::to_vec(&Self::record_from_input(data)?)?;
        let response = self.client.put(&target.variable_path(&uuid), body).await?;

        if response.status != 200 {
            return self.unexpected("update", response);
        }

        self.read(data).await
    }

    async fn delete(&self, data: &mut ResourceData) -> ProviderResult<()> {
        let target = Self::target(data)?;
        let uuid = Self::identity(data);
        if uuid.is_empty() {
            return Err(ProviderError::MissingIdentity);
        }

        let response = self.client.delete(&target.variable_path(&uuid)).await?;
        if !response.is_success() && response.status != 404 {
            return self.unexpected("delete", response);
        }

        info!("Deleted deployment variable {} from {}", uuid, target);
        Ok(())
    }
}
