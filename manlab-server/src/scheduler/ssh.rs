//! SSH collaborator interface.
//!
//! Agent reinstalls and OS package operations run over SSH, outside the
//! agent channel. The scheduler talks to that machinery through this trait;
//! provisioning itself lives elsewhere.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::database::models::NodeDbModel;
use crate::{Error, Result};

/// One available OS package update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageUpdate {
    pub name: String,
    /// Category label: security / feature / driver
    pub category: String,
}

/// SSH-backed operations the scheduler loops depend on.
#[async_trait]
pub trait SshCollaborator: Send + Sync {
    /// Reinstall the agent at the given version.
    async fn reinstall_agent(&self, node: &NodeDbModel, version: &str) -> Result<()>;

    /// List available OS package updates.
    async fn list_available_updates(&self, node: &NodeDbModel) -> Result<Vec<PackageUpdate>>;

    /// Apply the given packages; returns whether a reboot is required.
    async fn apply_updates(&self, node: &NodeDbModel, packages: &[String]) -> Result<bool>;
}

/// Placeholder used until SSH credentials are provisioned; every operation
/// fails with a configuration error.
pub struct UnconfiguredSsh;

#[async_trait]
impl SshCollaborator for UnconfiguredSsh {
    async fn reinstall_agent(&self, node: &NodeDbModel, _version: &str) -> Result<()> {
        Err(Error::config(format!(
            "SSH is not configured for node {}",
            node.id
        )))
    }

    async fn list_available_updates(&self, node: &NodeDbModel) -> Result<Vec<PackageUpdate>> {
        Err(Error::config(format!(
            "SSH is not configured for node {}",
            node.id
        )))
    }

    async fn apply_updates(&self, node: &NodeDbModel, _packages: &[String]) -> Result<bool> {
        Err(Error::config(format!(
            "SSH is not configured for node {}",
            node.id
        )))
    }
}
