//! Site configuration resolver
//!
//! Finds or creates the `<site>` for an application, the `<application>`
//! within that site, and the application pool it runs under. Elements are
//! built field by field so the emitted schema stays fixed:
//!
//! ```xml
//! <site name="N" id="N" serverAutoStart="true">
//!   <bindings>
//!     <binding protocol="http" bindingInformation="*:PORT:localhost" />
//!   </bindings>
//!   <application applicationPool="POOL" path="/">
//!     <virtualDirectory path="/" physicalPath="" />
//!   </application>
//! </site>
//! ```

use crate::application::ApplicationHost;
use crate::error::ProvisionError;
use crate::host_config::{resolve_bin_token_with, HostConfiguration};
use crate::port::free_port;
use std::collections::HashSet;
use tracing::{debug, info, warn};
use xmltree::{Element, XMLNode};

/// Virtual path of a site's root application
pub const ROOT_VIRTUAL_PATH: &str = "/";

const SITE: &str = "site";
const BINDINGS: &str = "bindings";
const BINDING: &str = "binding";
const APPLICATION: &str = "application";
const VIRTUAL_DIRECTORY: &str = "virtualDirectory";
const APPLICATION_DEFAULTS: &str = "applicationDefaults";
const COLLECTION_ADD: &str = "add";
const COLLECTION_REMOVE: &str = "remove";
const COLLECTION_CLEAR: &str = "clear";
const HTTP_PROTOCOL: &str = "http";

/// Attempts at finding a port no other site in the document binds
const PORT_ATTEMPTS: usize = 16;

/// Where a provisioned site can be reached
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct SiteBinding {
    pub site_name: String,
    pub port: u16,
}

impl SiteBinding {
    /// Read the site name and its `http` binding port
    pub fn from_site(site: &Element) -> Result<Self, ProvisionError> {
        let site_name = attribute(site, "name").unwrap_or_default().to_string();
        let port = http_port(site).ok_or_else(|| ProvisionError::InvalidSite {
            site: site_name.clone(),
            reason: "no http binding with a port".to_string(),
        })?;
        Ok(Self { site_name, port })
    }
}

/// Full routing facts for one application
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct SiteEndpoint {
    pub site_name: String,
    pub port: u16,
    pub virtual_path: String,
    pub physical_path: String,
}

/// Resolves sites, applications and pools inside a host configuration
#[derive(Debug, Clone)]
pub struct SiteResolver {
    /// Name of the pool injected when the pool collection is empty
    default_pool: String,
    /// Environment variable substituted for the bin path token
    bin_variable: String,
}

impl SiteResolver {
    pub fn new(default_pool: impl Into<String>, bin_variable: impl Into<String>) -> Self {
        Self {
            default_pool: default_pool.into(),
            bin_variable: bin_variable.into(),
        }
    }

    pub fn default_pool(&self) -> &str {
        &self.default_pool
    }

    /// Find the site for `host` by name, or append a new one.
    ///
    /// An existing site is returned unchanged. A new site gets a fresh port
    /// and a root application under the last effective application pool,
    /// after injecting the default pool if none is effective.
    pub fn site_configuration_for_application<'a>(
        &self,
        config: &'a mut HostConfiguration,
        host: &ApplicationHost,
    ) -> Result<&'a mut Element, ProvisionError> {
        let site_name = host.site_name();

        if let Some(index) = config.sites().and_then(|sites| site_index(sites, site_name)) {
            debug!(site = %site_name, "Reusing existing site");
            return Ok(element_at(config.sites_mut(), index));
        }

        let pool = self.ensure_application_pool(config);
        let used = config.sites().map(bound_ports).unwrap_or_default();
        let port = allocate_unused_port(&used)?;

        let sites = config.sites_mut();
        sites
            .children
            .push(XMLNode::Element(site_element(site_name, port, &pool)));
        info!(site = %site_name, port, pool = %pool, "Created site");

        let index = sites.children.len() - 1;
        Ok(element_at(sites, index))
    }

    /// Make sure an application pool is effective and return the one new
    /// applications should use (the last effective one)
    pub fn ensure_application_pool(&self, config: &mut HostConfiguration) -> String {
        let pools = config.application_pools_mut();
        if let Some(last) = effective_pools(pools).pop() {
            return last;
        }

        pools
            .children
            .push(XMLNode::Element(application_pool_element(&self.default_pool)));
        info!(pool = %self.default_pool, "Created default application pool");
        self.default_pool.clone()
    }

    /// Find or append the application matching `host`'s virtual path under
    /// `site` and return the descriptor the engine will actually serve
    pub fn adjust_application_host_to_site(
        &self,
        site: &mut Element,
        host: &ApplicationHost,
    ) -> Result<ApplicationHost, ProvisionError> {
        let site_name = attribute(site, "name").unwrap_or_default().to_string();
        let site_id = attribute(site, "id").unwrap_or(&site_name).to_string();
        let virtual_path = normalize_virtual_path(host.virtual_path());

        let physical_path = match application_index(site, &virtual_path) {
            Some(index) => {
                let application = element_at(site, index);
                let directory = root_virtual_directory(application);
                let existing = attribute(directory, "physicalPath").unwrap_or_default();
                if existing.is_empty() {
                    directory
                        .attributes
                        .insert("physicalPath".to_string(), host.physical_path().to_string());
                    host.physical_path().to_string()
                } else {
                    if existing != host.physical_path() {
                        warn!(
                            site = %site_name,
                            path = %virtual_path,
                            existing = %existing,
                            requested = %host.physical_path(),
                            "Keeping existing physical path for application"
                        );
                    }
                    existing.to_string()
                }
            }
            None => {
                let pool = site
                    .get_child(APPLICATION_DEFAULTS)
                    .and_then(|defaults| attribute(defaults, "applicationPool"))
                    .map(str::to_string)
                    .or_else(|| first_application_pool(site))
                    .unwrap_or_else(|| self.default_pool.clone());
                site.children.push(XMLNode::Element(application_element(
                    &pool,
                    &virtual_path,
                    host.physical_path(),
                )));
                info!(site = %site_name, path = %virtual_path, "Created application");
                host.physical_path().to_string()
            }
        };

        Ok(ApplicationHost::new(
            engine_application_id(&site_id, &virtual_path),
            virtual_path,
            physical_path,
        ))
    }

    /// Resolve the bin path token in the application's physical path
    pub fn setup_application_environment(
        &self,
        host: &mut ApplicationHost,
        site: &Element,
    ) -> Result<(), ProvisionError> {
        self.setup_application_environment_with(host, site, |name| std::env::var(name).ok())
    }

    /// Like [`Self::setup_application_environment`] with an explicit
    /// environment lookup
    pub fn setup_application_environment_with<F>(
        &self,
        host: &mut ApplicationHost,
        site: &Element,
        lookup: F,
    ) -> Result<(), ProvisionError>
    where
        F: FnOnce(&str) -> Option<String>,
    {
        let resolved = resolve_bin_token_with(host.physical_path(), &self.bin_variable, lookup)?;
        if resolved != host.physical_path() {
            debug!(
                site = attribute(site, "name").unwrap_or_default(),
                physical_path = %resolved,
                "Resolved application physical path"
            );
            host.set_physical_path(resolved);
        }
        Ok(())
    }

    /// Routing facts for an already provisioned application, with the bin
    /// path token resolved the same way a start resolves it
    pub fn endpoint(
        &self,
        config: &HostConfiguration,
        site_name: &str,
        virtual_path: &str,
    ) -> Result<SiteEndpoint, ProvisionError> {
        self.endpoint_with(config, site_name, virtual_path, |name| std::env::var(name).ok())
    }

    /// Like [`Self::endpoint`] with an explicit environment lookup
    pub fn endpoint_with<F>(
        &self,
        config: &HostConfiguration,
        site_name: &str,
        virtual_path: &str,
        lookup: F,
    ) -> Result<SiteEndpoint, ProvisionError>
    where
        F: FnOnce(&str) -> Option<String>,
    {
        let mut endpoint = find_endpoint(config, site_name, virtual_path)?;
        endpoint.physical_path =
            resolve_bin_token_with(&endpoint.physical_path, &self.bin_variable, lookup)?;
        Ok(endpoint)
    }
}

/// Look up the routing facts for an application without mutating anything
pub fn find_endpoint(
    config: &HostConfiguration,
    site_name: &str,
    virtual_path: &str,
) -> Result<SiteEndpoint, ProvisionError> {
    let not_found = |reason: &str| ProvisionError::InvalidSite {
        site: site_name.to_string(),
        reason: reason.to_string(),
    };

    let sites = config.sites().ok_or_else(|| not_found("no sites collection"))?;
    let site = site_index(sites, site_name)
        .and_then(|index| sites.children[index].as_element())
        .ok_or_else(|| not_found("site not found"))?;
    let binding = SiteBinding::from_site(site)?;

    let virtual_path = normalize_virtual_path(virtual_path);
    let application = application_index(site, &virtual_path)
        .and_then(|index| site.children[index].as_element())
        .ok_or_else(|| not_found("application not found"))?;
    let physical_path = application
        .get_child(VIRTUAL_DIRECTORY)
        .and_then(|directory| attribute(directory, "physicalPath"))
        .unwrap_or_default()
        .to_string();

    Ok(SiteEndpoint {
        site_name: binding.site_name,
        port: binding.port,
        virtual_path,
        physical_path,
    })
}

/// Engine application id: `/LM/W3SVC/<site id>/ROOT<virtual path>`
pub fn engine_application_id(site_id: &str, virtual_path: &str) -> String {
    format!(
        "/LM/W3SVC/{}/ROOT{}",
        site_id,
        virtual_path.trim_end_matches('/')
    )
}

/// Virtual paths start with `/` and carry no trailing `/` except the root
pub fn normalize_virtual_path(path: &str) -> String {
    let trimmed = path.trim().trim_matches('/');
    if trimmed.is_empty() {
        ROOT_VIRTUAL_PATH.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

/// Application pool names after applying `add`/`remove`/`clear` in order
pub fn effective_pools(pools: &Element) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for entry in child_elements(pools) {
        match entry.name.as_str() {
            COLLECTION_ADD => {
                if let Some(name) = attribute(entry, "name") {
                    names.retain(|n| n != name);
                    names.push(name.to_string());
                }
            }
            COLLECTION_REMOVE => {
                if let Some(name) = attribute(entry, "name") {
                    names.retain(|n| n != name);
                }
            }
            COLLECTION_CLEAR => names.clear(),
            _ => {}
        }
    }
    names
}

/// Port of the site's first `http` binding (`*:<port>:<host>`)
pub fn http_port(site: &Element) -> Option<u16> {
    site.get_child(BINDINGS)
        .into_iter()
        .flat_map(child_elements)
        .filter(|binding| binding.name == BINDING)
        .filter(|binding| attribute(binding, "protocol") == Some(HTTP_PROTOCOL))
        .find_map(|binding| {
            attribute(binding, "bindingInformation")?
                .split(':')
                .nth(1)?
                .parse()
                .ok()
        })
}

/// `<add name=".." managedRuntimeVersion="v4.0" managedPipelineMode="Integrated" />`
pub fn application_pool_element(name: &str) -> Element {
    let mut pool = Element::new(COLLECTION_ADD);
    set(&mut pool, "name", name);
    set(&mut pool, "managedRuntimeVersion", "v4.0");
    set(&mut pool, "managedPipelineMode", "Integrated");
    pool
}

/// A site with one `http` binding on `port` and an empty root application
pub fn site_element(name: &str, port: u16, pool: &str) -> Element {
    let mut binding = Element::new(BINDING);
    set(&mut binding, "protocol", HTTP_PROTOCOL);
    set(&mut binding, "bindingInformation", &format!("*:{}:localhost", port));

    let mut bindings = Element::new(BINDINGS);
    bindings.children.push(XMLNode::Element(binding));

    let mut site = Element::new(SITE);
    set(&mut site, "name", name);
    set(&mut site, "id", name);
    set(&mut site, "serverAutoStart", "true");
    site.children.push(XMLNode::Element(bindings));
    site.children.push(XMLNode::Element(application_element(
        pool,
        ROOT_VIRTUAL_PATH,
        "",
    )));
    site
}

/// An application at `path` whose root virtual directory maps to `physical_path`
pub fn application_element(pool: &str, path: &str, physical_path: &str) -> Element {
    let mut directory = Element::new(VIRTUAL_DIRECTORY);
    set(&mut directory, "path", ROOT_VIRTUAL_PATH);
    set(&mut directory, "physicalPath", physical_path);

    let mut application = Element::new(APPLICATION);
    set(&mut application, "applicationPool", pool);
    set(&mut application, "path", path);
    application.children.push(XMLNode::Element(directory));
    application
}

fn set(element: &mut Element, name: &str, value: &str) {
    element
        .attributes
        .insert(name.to_string(), value.to_string());
}

fn attribute<'a>(element: &'a Element, name: &str) -> Option<&'a str> {
    element.attributes.get(name).map(String::as_str)
}

fn child_elements(parent: &Element) -> impl Iterator<Item = &Element> {
    parent.children.iter().filter_map(XMLNode::as_element)
}

fn site_index(sites: &Element, name: &str) -> Option<usize> {
    sites.children.iter().position(|node| {
        node.as_element()
            .is_some_and(|site| site.name == SITE && attribute(site, "name") == Some(name))
    })
}

fn application_index(site: &Element, virtual_path: &str) -> Option<usize> {
    site.children.iter().position(|node| {
        node.as_element().is_some_and(|application| {
            application.name == APPLICATION
                && attribute(application, "path").map(normalize_virtual_path).as_deref()
                    == Some(virtual_path)
        })
    })
}

fn first_application_pool(site: &Element) -> Option<String> {
    child_elements(site)
        .filter(|e| e.name == APPLICATION)
        .find_map(|e| attribute(e, "applicationPool"))
        .map(str::to_string)
}

fn element_at(parent: &mut Element, index: usize) -> &mut Element {
    parent.children[index]
        .as_mut_element()
        .expect("index points at an element node")
}

/// The application's `/` virtual directory, created if missing
fn root_virtual_directory(application: &mut Element) -> &mut Element {
    let index = application.children.iter().position(|node| {
        node.as_element().is_some_and(|directory| {
            directory.name == VIRTUAL_DIRECTORY
                && attribute(directory, "path") == Some(ROOT_VIRTUAL_PATH)
        })
    });
    let index = match index {
        Some(index) => index,
        None => {
            let mut directory = Element::new(VIRTUAL_DIRECTORY);
            set(&mut directory, "path", ROOT_VIRTUAL_PATH);
            set(&mut directory, "physicalPath", "");
            application.children.push(XMLNode::Element(directory));
            application.children.len() - 1
        }
    };
    element_at(application, index)
}

fn bound_ports(sites: &Element) -> HashSet<u16> {
    child_elements(sites)
        .filter(|site| site.name == SITE)
        .filter_map(http_port)
        .collect()
}

fn allocate_unused_port(used: &HashSet<u16>) -> Result<u16, ProvisionError> {
    allocate_unused_port_with(used, free_port)
}

/// Draw ports from `next` until one is not in `used`
fn allocate_unused_port_with<F>(used: &HashSet<u16>, mut next: F) -> Result<u16, ProvisionError>
where
    F: FnMut() -> Result<u16, ProvisionError>,
{
    for _ in 0..PORT_ATTEMPTS {
        let port = next()?;
        if !used.contains(&port) {
            return Ok(port);
        }
        debug!(port, "Port already bound by another site, retrying");
    }
    Err(ProvisionError::PortAllocation {
        source: std::io::Error::new(
            std::io::ErrorKind::AddrInUse,
            format!("no unused port after {} attempts", PORT_ATTEMPTS),
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    fn resolver() -> SiteResolver {
        SiteResolver::new("LiveSite", "IIS_BIN")
    }

    fn host(name: &str, path: &str, physical: &str) -> ApplicationHost {
        ApplicationHost::new(name, path, physical)
    }

    fn site_count(config: &HostConfiguration) -> usize {
        config
            .sites()
            .map(|sites| child_elements(sites).filter(|e| e.name == SITE).count())
            .unwrap_or(0)
    }

    #[test]
    fn test_creates_site_with_default_pool() {
        let mut config = HostConfiguration::empty();
        let site = resolver()
            .site_configuration_for_application(&mut config, &host("orders", "/", "/srv/orders"))
            .unwrap();

        assert_eq!(attribute(site, "name"), Some("orders"));
        assert_eq!(attribute(site, "id"), Some("orders"));
        assert!(http_port(site).is_some());

        let pools = config.application_pools().unwrap();
        assert_eq!(effective_pools(pools), vec!["LiveSite".to_string()]);
        assert_eq!(child_elements(pools).count(), 1);
    }

    #[test]
    fn test_existing_pool_is_not_duplicated() {
        let mut config = HostConfiguration::empty();
        config
            .application_pools_mut()
            .children
            .push(XMLNode::Element(application_pool_element("Shared")));

        let site = resolver()
            .site_configuration_for_application(&mut config, &host("orders", "/", "/srv"))
            .unwrap();
        let application = site.get_child(APPLICATION).unwrap();
        assert_eq!(attribute(application, "applicationPool"), Some("Shared"));
        assert_eq!(
            effective_pools(config.application_pools().unwrap()),
            vec!["Shared".to_string()]
        );
    }

    #[test]
    fn test_cleared_pools_count_as_empty() {
        let mut config = HostConfiguration::empty();
        let pools = config.application_pools_mut();
        pools
            .children
            .push(XMLNode::Element(application_pool_element("Old")));
        pools
            .children
            .push(XMLNode::Element(Element::new(COLLECTION_CLEAR)));

        let pool = resolver().ensure_application_pool(&mut config);
        assert_eq!(pool, "LiveSite");
        assert_eq!(
            effective_pools(config.application_pools().unwrap()),
            vec!["LiveSite".to_string()]
        );
    }

    #[test]
    fn test_effective_pools_honors_remove() {
        let mut pools = Element::new("applicationPools");
        pools
            .children
            .push(XMLNode::Element(application_pool_element("A")));
        pools
            .children
            .push(XMLNode::Element(application_pool_element("B")));
        let mut remove = Element::new(COLLECTION_REMOVE);
        set(&mut remove, "name", "B");
        pools.children.push(XMLNode::Element(remove));

        assert_eq!(effective_pools(&pools), vec!["A".to_string()]);
    }

    #[test]
    fn test_reuses_existing_site() {
        let mut config = HostConfiguration::empty();
        let resolver = resolver();
        let first = resolver
            .site_configuration_for_application(&mut config, &host("orders", "/", "/srv"))
            .unwrap()
            .clone();
        let second = resolver
            .site_configuration_for_application(&mut config, &host("orders", "/", "/srv"))
            .unwrap()
            .clone();

        assert_eq!(first, second);
        assert_eq!(site_count(&config), 1);
    }

    #[test]
    fn test_distinct_sites_get_distinct_ports() {
        let mut config = HostConfiguration::empty();
        let resolver = resolver();
        let a = http_port(
            resolver
                .site_configuration_for_application(&mut config, &host("a", "/", "/srv/a"))
                .unwrap(),
        );
        let b = http_port(
            resolver
                .site_configuration_for_application(&mut config, &host("b", "/", "/srv/b"))
                .unwrap(),
        );

        assert_ne!(a, b);
        assert_eq!(site_count(&config), 2);
    }

    #[test]
    fn test_port_bound_by_another_site_is_retried() {
        let used: HashSet<u16> = [18080].into_iter().collect();
        let mut offered = vec![18081, 18080].into_iter().rev();

        let port = allocate_unused_port_with(&used, || Ok(offered.next().unwrap())).unwrap();
        assert_eq!(port, 18081);
        assert_eq!(offered.next(), None);
    }

    #[test]
    fn test_port_allocation_gives_up_after_attempts() {
        let used: HashSet<u16> = [18080].into_iter().collect();
        let mut attempts = 0;

        let err = allocate_unused_port_with(&used, || {
            attempts += 1;
            Ok(18080)
        })
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::PortAllocation);
        assert_eq!(attempts, PORT_ATTEMPTS);
    }

    #[test]
    fn test_adjust_fills_empty_root_application() {
        let mut config = HostConfiguration::empty();
        let resolver = resolver();
        let requested = host("orders", "/", "/srv/orders");
        let site = resolver
            .site_configuration_for_application(&mut config, &requested)
            .unwrap();

        let adjusted = resolver
            .adjust_application_host_to_site(site, &requested)
            .unwrap();
        assert_eq!(adjusted.application_id(), "/LM/W3SVC/orders/ROOT");
        assert_eq!(adjusted.virtual_path(), "/");
        assert_eq!(adjusted.physical_path(), "/srv/orders");

        let endpoint = find_endpoint(&config, "orders", "/").unwrap();
        assert_eq!(endpoint.physical_path, "/srv/orders");
        assert_eq!(
            child_elements(
                config
                    .sites()
                    .unwrap()
                    .get_child(SITE)
                    .unwrap()
            )
            .filter(|e| e.name == APPLICATION)
            .count(),
            1
        );
    }

    #[test]
    fn test_adjust_appends_sub_application() {
        let mut config = HostConfiguration::empty();
        let resolver = resolver();
        let site = resolver
            .site_configuration_for_application(&mut config, &host("shop", "/", "/srv/root"))
            .unwrap();

        let adjusted = resolver
            .adjust_application_host_to_site(site, &host("shop", "/api/", "/srv/api"))
            .unwrap();
        assert_eq!(adjusted.application_id(), "/LM/W3SVC/shop/ROOT/api");
        assert_eq!(adjusted.virtual_path(), "/api");

        let endpoint = find_endpoint(&config, "shop", "/api").unwrap();
        assert_eq!(endpoint.physical_path, "/srv/api");
        assert_eq!(endpoint.virtual_path, "/api");
    }

    #[test]
    fn test_adjust_keeps_existing_physical_path() {
        let mut site = site_element("legacy", 9000, "LiveSite");
        site.children
            .push(XMLNode::Element(application_element("LiveSite", "/app", "/old")));

        let adjusted = resolver()
            .adjust_application_host_to_site(&mut site, &host("legacy", "/app", "/new"))
            .unwrap();
        assert_eq!(adjusted.physical_path(), "/old");
    }

    #[test]
    fn test_sub_application_uses_site_default_pool() {
        let mut site = site_element("shop", 9000, "LiveSite");
        let mut defaults = Element::new(APPLICATION_DEFAULTS);
        set(&mut defaults, "applicationPool", "Checkout");
        site.children.insert(0, XMLNode::Element(defaults));

        resolver()
            .adjust_application_host_to_site(&mut site, &host("shop", "/api", "/srv/api"))
            .unwrap();
        let index = application_index(&site, "/api").unwrap();
        let application = site.children[index].as_element().unwrap();
        assert_eq!(attribute(application, "applicationPool"), Some("Checkout"));
    }

    #[test]
    fn test_sub_application_inherits_root_pool() {
        let mut site = site_element("shop", 9000, "Legacy");

        resolver()
            .adjust_application_host_to_site(&mut site, &host("shop", "/api", "/srv/api"))
            .unwrap();
        let index = application_index(&site, "/api").unwrap();
        let application = site.children[index].as_element().unwrap();
        assert_eq!(attribute(application, "applicationPool"), Some("Legacy"));
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let mut config = HostConfiguration::empty();
        let resolver = resolver();
        let requested = host("orders", "/", "/srv/orders");
        resolver
            .site_configuration_for_application(&mut config, &requested)
            .unwrap();
        let snapshot = config.clone();

        let first = resolver
            .site_configuration_for_application(&mut config, &requested)
            .unwrap()
            .clone();
        let second = resolver
            .site_configuration_for_application(&mut config, &requested)
            .unwrap()
            .clone();

        assert_eq!(first, second);
        assert_eq!(config, snapshot);
    }

    #[test]
    fn test_setup_environment_resolves_token() {
        let site = site_element("tools", 9000, "LiveSite");
        let mut app = host("tools", "/", "%IIS_BIN%/app1");

        resolver()
            .setup_application_environment_with(&mut app, &site, |name| {
                assert_eq!(name, "IIS_BIN");
                Some(r"C:\bin".to_string())
            })
            .unwrap();
        assert_eq!(app.physical_path(), r"C:\bin/app1");
    }

    #[test]
    fn test_endpoint_resolves_token_like_start() {
        let mut config = HostConfiguration::empty();
        let resolver = resolver();
        let requested = host("tools", "/", "%IIS_BIN%/app1");
        let site = resolver
            .site_configuration_for_application(&mut config, &requested)
            .unwrap();
        let mut adjusted = resolver.adjust_application_host_to_site(site, &requested).unwrap();
        resolver
            .setup_application_environment_with(&mut adjusted, site, |_| Some("/opt/bin".to_string()))
            .unwrap();

        let endpoint = resolver
            .endpoint_with(&config, "tools", "/", |_| Some("/opt/bin".to_string()))
            .unwrap();
        assert_eq!(endpoint.physical_path, adjusted.physical_path());
        assert_eq!(
            find_endpoint(&config, "tools", "/").unwrap().physical_path,
            "%IIS_BIN%/app1"
        );

        let err = resolver.endpoint_with(&config, "tools", "/", |_| None).unwrap_err();
        assert_eq!(err.code(), ErrorCode::EnvironmentNotConfigured);
    }

    #[test]
    fn test_setup_environment_unset_variable() {
        let site = site_element("tools", 9000, "LiveSite");
        let mut app = host("tools", "/", "%IIS_BIN%/app1");

        let err = resolver()
            .setup_application_environment_with(&mut app, &site, |_| None)
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::EnvironmentNotConfigured);
        assert_eq!(app.physical_path(), "%IIS_BIN%/app1");
    }

    #[test]
    fn test_site_without_http_binding_is_invalid() {
        let mut site = Element::new(SITE);
        set(&mut site, "name", "ftp-only");
        let err = SiteBinding::from_site(&site).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidSite);
    }

    #[test]
    fn test_http_port_parses_binding_information() {
        let site = site_element("orders", 8123, "LiveSite");
        assert_eq!(http_port(&site), Some(8123));
    }

    #[test]
    fn test_normalize_virtual_path() {
        assert_eq!(normalize_virtual_path(""), "/");
        assert_eq!(normalize_virtual_path("/"), "/");
        assert_eq!(normalize_virtual_path("api"), "/api");
        assert_eq!(normalize_virtual_path("/api/v1/"), "/api/v1");
    }

    #[test]
    fn test_engine_application_id() {
        assert_eq!(engine_application_id("7", "/"), "/LM/W3SVC/7/ROOT");
        assert_eq!(engine_application_id("7", "/shop"), "/LM/W3SVC/7/ROOT/shop");
    }
}
