use crate::client::ApiClient;
use crate::config::ResourceConfig;
use crate::deployment_variable::DeploymentVariableResource;
use crate::schema::{ResourceData, ResourceSchema};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid deployment id {id:?}: expected <repository>:<deployment>")]
    InvalidDeploymentId { id: String },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Missing required attribute: {name}")]
    MissingAttribute { name: String },

    #[error("Invalid attribute {name}: {message}")]
    InvalidAttribute { name: String, message: String },

    #[error("Resource has no identity to address")]
    MissingIdentity,

    #[error("Unexpected HTTP status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("Variable {uuid} not visible after {waited:?}")]
    ConsistencyTimeout { uuid: String, waited: Duration },

    #[error("Refusing to follow URL outside the API base: {url}")]
    ForeignUrl { url: String },

    #[error("Service unavailable: {message}")]
    ServiceUnavailable { message: String },

    #[error("Resource type not found: {name}")]
    ResourceNotFound { name: String },

    #[error("Unknown error: {message}")]
    Unknown { message: String },
}

pub type ProviderResult<T> = Result<T, ProviderError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Read,
    Update,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Create => "create",
            Operation::Read => "read",
            Operation::Update => "update",
            Operation::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// A managed resource kind: a schema plus the four lifecycle callbacks.
///
/// Callbacks get exclusive access to the caller's record for their whole
/// duration. An empty id after `create` or `read` means the remote object is
/// gone.
#[async_trait]
pub trait Resource: Send + Sync {
    fn type_name(&self) -> &str;

    fn schema(&self) -> ResourceSchema;

    async fn create(&self, data: &mut ResourceData) -> ProviderResult<()>;

    async fn read(&self, data: &mut ResourceData) -> ProviderResult<()>;

    async fn update(&self, data: &mut ResourceData) -> ProviderResult<()>;

    async fn delete(&self, data: &mut ResourceData) -> ProviderResult<()>;
}

/// Dispatch table from resource type name to its implementation.
pub struct Provider {
    resources: HashMap<String, Box<dyn Resource>>,
}

impl Provider {
    pub fn new() -> Self {
        Self {
            resources: HashMap::new(),
        }
    }

    /// Provider with every Bitbucket resource registered against `client`.
    pub fn bitbucket(client: Arc<dyn ApiClient>, config: ResourceConfig) -> ProviderResult<Self> {
        let mut provider = Self::new();
        provider.register(Box::new(DeploymentVariableResource::new(client, config)?));
        Ok(provider)
    }

    pub fn register(&mut self, resource: Box<dyn Resource>) {
        let name = resource.type_name().to_string();
        self.resources.insert(name, resource);
    }

    pub fn resource(&self, name: &str) -> Option<&dyn Resource> {
        self.resources.get(name).map(|r| r.as_ref())
    }

    pub fn resource_types(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.resources.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn schemas(&self) -> BTreeMap<String, ResourceSchema> {
        self.resources
            .iter()
            .map(|(name, resource)| (name.clone(), resource.schema()))
            .collect()
    }

    pub async fn apply(
        &self,
        name: &str,
        operation: Operation,
        data: &mut ResourceData,
    ) -> ProviderResult<()> {
        let resource = self
            .resource(name)
            .ok_or_else(|| ProviderError::ResourceNotFound {
                name: name.to_string(),
            })?;

        debug!("Dispatching {} for {} (id: {:?})", operation, name, data.id());

        match operation {
            Operation::Create => {
                resource.schema().apply_defaults_and_validate(data)?;
                resource.create(data).await
            }
            Operation::Read => resource.read(data).await,
            Operation::Update => {
                resource.schema().apply_defaults_and_validate(data)?;
                resource.update(data).await
            }
            Operation::Delete => resource.delete(data).await,
        }
    }
}

impl Default for Provider {
    fn default() -> Self {
        Self::new()
    }
}
