//! Access to the engine's application manager across its isolation boundary
//!
//! The application manager lives wherever the engine runs: in this process,
//! or in a child process. Callers never hold the engine directly; they go
//! through a [`DomainBridge`] whose single call may fail like a remote call.

use crate::engine::{EngineIdentity, HostingEngine};
use crate::error::ProvisionError;
use serde::Serialize;
use std::sync::{Arc, Weak};
use tracing::debug;

/// Where the engine's application manager executes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ExecutionDomain {
    /// Same process, no isolation
    InProcess,
    /// A separate engine process
    Process { pid: u32 },
}

/// Reference to the engine's application manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManagerHandle {
    instance_name: String,
    identity: EngineIdentity,
    domain: ExecutionDomain,
}

impl ManagerHandle {
    pub fn new(instance_name: &str, identity: EngineIdentity, domain: ExecutionDomain) -> Self {
        Self {
            instance_name: instance_name.to_string(),
            identity,
            domain,
        }
    }

    pub fn instance_name(&self) -> &str {
        &self.instance_name
    }

    pub fn identity(&self) -> &EngineIdentity {
        &self.identity
    }

    pub fn domain(&self) -> &ExecutionDomain {
        &self.domain
    }
}

/// Fetches the application manager from the engine's execution domain
pub trait DomainBridge: Send + Sync {
    fn fetch_manager(&self) -> Result<ManagerHandle, ProvisionError>;
}

/// Bridge over a weak reference to a started engine.
///
/// Fails once the engine is dropped or has stopped running.
#[derive(Debug, Clone)]
pub struct EngineBridge {
    engine: Weak<dyn HostingEngine>,
}

impl EngineBridge {
    pub fn new(engine: &Arc<dyn HostingEngine>) -> Self {
        Self {
            engine: Arc::downgrade(engine),
        }
    }
}

impl DomainBridge for EngineBridge {
    fn fetch_manager(&self) -> Result<ManagerHandle, ProvisionError> {
        let engine = self.engine.upgrade().ok_or_else(|| ProvisionError::DomainBridge {
            reason: "hosting engine has been torn down".to_string(),
        })?;
        if !engine.is_running() {
            return Err(ProvisionError::DomainBridge {
                reason: "hosting engine is not running".to_string(),
            });
        }
        let manager = engine.application_manager()?;
        debug!(instance = %manager.instance_name(), domain = ?manager.domain(), "Fetched application manager");
        Ok(manager)
    }
}
