//! Test application manager: provisioning cycle and routing accessors

use crate::application::{ApplicationFactory, ApplicationHost, DefaultApplicationFactory, TestApplication};
use crate::bridge::{DomainBridge, EngineBridge};
use crate::config::ManagerConfig;
use crate::engine::{launcher_for, EngineHost, HostingEngine};
use crate::error::ProvisionError;
use crate::host_config::HostConfigStore;
use crate::lock::ProvisionGuard;
use crate::site::{SiteBinding, SiteEndpoint, SiteResolver};
use std::sync::Arc;
use tracing::{error, info};

/// Provisions a dedicated site per test application inside the shared
/// hosting engine and starts the application there.
///
/// # Usage
///
/// ```ignore
/// let manager = IisTestApplicationManager::from_config(config)?;
/// let app = manager.start_application(&ApplicationHost::ephemeral("/srv/app")).await?;
/// println!("{}", app.url());
/// ```
///
/// Every load/mutate/save of the host configuration runs under a
/// [`ProvisionGuard`], so concurrent calls (in this process or in parallel
/// test processes) never lose each other's sites. Routing facts travel on
/// the returned [`TestApplication`]; nothing is stored in shared registers.
pub struct IisTestApplicationManager {
    config: ManagerConfig,
    engines: Arc<EngineHost>,
    bridge: Option<Arc<dyn DomainBridge>>,
    factory: Arc<dyn ApplicationFactory>,
    store: HostConfigStore,
    resolver: SiteResolver,
}

impl IisTestApplicationManager {
    /// Create a manager that starts (or reuses) the engine owned by `engines`
    pub fn new(config: ManagerConfig, engines: Arc<EngineHost>) -> Self {
        let store = HostConfigStore::new(config.host_config.clone());
        let resolver = SiteResolver::new(config.instance_name.clone(), config.bin_variable.clone());
        let factory = Arc::new(DefaultApplicationFactory::new(config.application_type.clone()));
        Self {
            config,
            engines,
            bridge: None,
            factory,
            store,
            resolver,
        }
    }

    /// Create a manager on the process-wide engine host, launching the
    /// engine kind the configuration names
    pub fn from_config(config: ManagerConfig) -> Result<Self, ProvisionError> {
        let launcher = launcher_for(&config)?;
        Ok(Self::new(config, EngineHost::process_wide(launcher)))
    }

    /// Use an explicit bridge instead of one over the started engine (builder pattern)
    pub fn with_bridge(mut self, bridge: Arc<dyn DomainBridge>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    /// Use a custom application construction step (builder pattern)
    pub fn with_factory(mut self, factory: Arc<dyn ApplicationFactory>) -> Self {
        self.factory = factory;
        self
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn store(&self) -> &HostConfigStore {
        &self.store
    }

    /// The engine, started with this manager's identity on first use
    pub fn hosted_engine(&self) -> Result<Arc<dyn HostingEngine>, ProvisionError> {
        self.engines.start_or_get(&self.config.engine_identity())
    }

    /// Provision a site for `host` and start the application in it.
    ///
    /// Fails before anything is handed out if the configuration cannot be
    /// loaded or saved, the environment is incomplete, or the engine's
    /// application manager is unreachable.
    pub async fn start_application(
        &self,
        host: &ApplicationHost,
    ) -> Result<TestApplication, ProvisionError> {
        let result = self.provision_and_start(host).await;
        if let Err(e) = &result {
            error!(
                site = %host.site_name(),
                code = e.code().as_str(),
                error = %e,
                "Failed to start test application"
            );
        }
        result
    }

    async fn provision_and_start(
        &self,
        host: &ApplicationHost,
    ) -> Result<TestApplication, ProvisionError> {
        let engine = self.hosted_engine()?;

        let (adjusted, binding) = {
            let _guard = ProvisionGuard::acquire(self.store.path()).await?;
            let mut document = self.store.load().await?;

            let site = self
                .resolver
                .site_configuration_for_application(&mut document, host)?;
            let binding = SiteBinding::from_site(site)?;
            let mut adjusted = self.resolver.adjust_application_host_to_site(site, host)?;
            self.resolver
                .setup_application_environment(&mut adjusted, site)?;

            self.store.save(&document).await?;
            (adjusted, binding)
        };

        info!(
            site = %binding.site_name,
            port = binding.port,
            application = %adjusted.application_id(),
            physical_path = %adjusted.physical_path(),
            "Site provisioned"
        );

        let manager = match &self.bridge {
            Some(bridge) => bridge.fetch_manager()?,
            None => EngineBridge::new(&engine).fetch_manager()?,
        };
        self.factory.create_application(manager, adjusted, binding)
    }

    /// Re-resolve an application's routing facts from the persisted
    /// configuration, substituting the bin path token as a start does
    pub async fn lookup(&self, application: &TestApplication) -> Result<SiteEndpoint, ProvisionError> {
        let document = self.store.load().await?;
        self.resolver
            .endpoint(&document, application.site_name(), application.virtual_path())
    }

    pub async fn application_site_name(
        &self,
        application: &TestApplication,
    ) -> Result<String, ProvisionError> {
        Ok(self.lookup(application).await?.site_name)
    }

    pub async fn application_virtual_path(
        &self,
        application: &TestApplication,
    ) -> Result<String, ProvisionError> {
        Ok(self.lookup(application).await?.virtual_path)
    }

    pub async fn application_physical_path(
        &self,
        application: &TestApplication,
    ) -> Result<String, ProvisionError> {
        Ok(self.lookup(application).await?.physical_path)
    }

    pub async fn application_port(&self, application: &TestApplication) -> Result<u16, ProvisionError> {
        Ok(self.lookup(application).await?.port)
    }
}
