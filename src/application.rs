//! Test application descriptors and the application construction contract

use crate::bridge::ManagerHandle;
use crate::error::ProvisionError;
use crate::site::{normalize_virtual_path, SiteBinding};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tracing::{debug, info};

/// Interval between reachability checks
const POLL_INTERVAL_MS: u64 = 50;

/// Describes the application a test wants hosted.
///
/// Before provisioning, `application_id` is the desired site name. After
/// provisioning it holds the engine's application id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationHost {
    application_id: String,
    virtual_path: String,
    physical_path: String,
}

impl ApplicationHost {
    pub fn new(
        application_id: impl Into<String>,
        virtual_path: impl Into<String>,
        physical_path: impl Into<String>,
    ) -> Self {
        let virtual_path: String = virtual_path.into();
        Self {
            application_id: application_id.into(),
            virtual_path: normalize_virtual_path(&virtual_path),
            physical_path: physical_path.into(),
        }
    }

    /// A root application with a unique site name
    pub fn ephemeral(physical_path: impl Into<String>) -> Self {
        let id = format!("livesite-{}", uuid::Uuid::new_v4().simple());
        Self::new(id, "/", physical_path)
    }

    pub fn application_id(&self) -> &str {
        &self.application_id
    }

    /// Name of the site this application should live in
    pub fn site_name(&self) -> &str {
        &self.application_id
    }

    pub fn virtual_path(&self) -> &str {
        &self.virtual_path
    }

    pub fn physical_path(&self) -> &str {
        &self.physical_path
    }

    pub fn set_physical_path(&mut self, physical_path: impl Into<String>) {
        self.physical_path = physical_path.into();
    }
}

/// A started test application and the facts needed to reach it
#[derive(Debug, Clone, Serialize)]
pub struct TestApplication {
    host: ApplicationHost,
    site_name: String,
    port: u16,
    application_type: Option<String>,
    manager: ManagerHandle,
}

impl TestApplication {
    pub fn host(&self) -> &ApplicationHost {
        &self.host
    }

    pub fn site_name(&self) -> &str {
        &self.site_name
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn virtual_path(&self) -> &str {
        self.host.virtual_path()
    }

    pub fn physical_path(&self) -> &str {
        self.host.physical_path()
    }

    pub fn application_type(&self) -> Option<&str> {
        self.application_type.as_deref()
    }

    pub fn manager(&self) -> &ManagerHandle {
        &self.manager
    }

    /// Base URL of the application
    pub fn url(&self) -> String {
        let path = self.virtual_path().trim_end_matches('/');
        format!("http://localhost:{}{}/", self.port, path)
    }

    /// Wait until the site's port accepts TCP connections
    pub async fn wait_until_listening(&self, timeout: Duration) -> bool {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if TcpStream::connect(("127.0.0.1", self.port)).await.is_ok() {
                debug!(site = %self.site_name, port = self.port, "Site is listening");
                return true;
            }
            tokio::time::sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
        }
        false
    }

    /// Serialize the routing facts for an out-of-process test runner
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| self.routing_json())
    }

    /// Minimal routing facts, written by hand
    fn routing_json(&self) -> String {
        format!(
            r#"{{"site_name":"{}","port":{},"virtual_path":"{}","physical_path":"{}"}}"#,
            escape_json(&self.site_name),
            self.port,
            escape_json(self.virtual_path()),
            escape_json(self.physical_path())
        )
    }
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Application construction step of the base test application manager.
///
/// Invoked once the site is provisioned and persisted, with the manager
/// fetched across the engine boundary.
pub trait ApplicationFactory: Send + Sync {
    fn create_application(
        &self,
        manager: ManagerHandle,
        host: ApplicationHost,
        binding: SiteBinding,
    ) -> Result<TestApplication, ProvisionError>;
}

/// Builds plain [`TestApplication`] handles tagged with an application type
#[derive(Debug, Clone, Default)]
pub struct DefaultApplicationFactory {
    application_type: Option<String>,
}

impl DefaultApplicationFactory {
    pub fn new(application_type: Option<String>) -> Self {
        Self { application_type }
    }
}

impl ApplicationFactory for DefaultApplicationFactory {
    fn create_application(
        &self,
        manager: ManagerHandle,
        host: ApplicationHost,
        binding: SiteBinding,
    ) -> Result<TestApplication, ProvisionError> {
        info!(
            application = %host.application_id(),
            site = %binding.site_name,
            port = binding.port,
            "Test application created"
        );
        Ok(TestApplication {
            host,
            site_name: binding.site_name,
            port: binding.port,
            application_type: self.application_type.clone(),
            manager,
        })
    }
}
