pub mod client;
pub mod config;
pub mod deployment_variable;
pub mod provider;
pub mod schema;
pub mod types;

pub use client::{ApiClient, ApiResponse, BitbucketClient};
pub use config::{
    BitbucketConfig, ConsistencyConfig, ConsistencyStrategy, Credentials, ResourceConfig,
    StatusPolicy, MIN_SETTLE,
};
pub use deployment_variable::{DeploymentVariableResource, DEPLOYMENT_VARIABLE_RESOURCE};
pub use provider::{Operation, Provider, ProviderError, ProviderResult, Resource};
pub use schema::{AttributeSchema, AttributeType, ResourceData, ResourceSchema};
pub use types::{DeploymentTarget, DeploymentVariable, PaginatedDeploymentVariables};

pub mod prelude {
    pub use crate::client::*;
    pub use crate::config::*;
    pub use crate::deployment_variable::*;
    pub use crate::provider::*;
    pub use crate::schema::*;
    pub use crate::types::*;
}
