//! Host configuration document store
//!
//! The engine's host configuration is an XML document rooted at
//! `configuration/system.applicationHost` with `sites` and
//! `applicationPools` collections. [`HostConfigStore`] loads it into a
//! mutable [`HostConfiguration`] tree and writes it back to the same path.

use crate::error::ProvisionError;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use xmltree::{Element, EmitterConfig, XMLNode};

/// Conventional host configuration file name used when no path is supplied
pub const DEFAULT_HOST_CONFIG_FILE_NAME: &str = "livesite.applicationHost.config";

/// Conventional root configuration file name used when no path is supplied
pub const DEFAULT_ROOT_CONFIG_FILE_NAME: &str = "livesite.root.config";

/// Placeholder in physical paths replaced by the engine binary directory
pub const BIN_PATH_TOKEN: &str = "%IIS_BIN%";

const ROOT_ELEMENT: &str = "configuration";
const APPLICATION_HOST_ELEMENT: &str = "system.applicationHost";
const SITES_ELEMENT: &str = "sites";
const APPLICATION_POOLS_ELEMENT: &str = "applicationPools";

pub fn default_host_config_file_name() -> &'static str {
    DEFAULT_HOST_CONFIG_FILE_NAME
}

pub fn default_root_config_file_name() -> &'static str {
    DEFAULT_ROOT_CONFIG_FILE_NAME
}

/// A loaded host configuration document.
///
/// Owned by one load/mutate/save cycle; callers serialize cycles through
/// [`crate::lock::ProvisionGuard`].
#[derive(Debug, Clone, PartialEq)]
pub struct HostConfiguration {
    root: Element,
}

impl HostConfiguration {
    /// Parse a document, requiring `configuration/system.applicationHost`
    pub fn parse(xml: &[u8]) -> Result<Self, String> {
        let root = Element::parse(xml).map_err(|e| e.to_string())?;
        if root.name != ROOT_ELEMENT {
            return Err(format!(
                "expected root element '{}', found '{}'",
                ROOT_ELEMENT, root.name
            ));
        }
        if root.get_child(APPLICATION_HOST_ELEMENT).is_none() {
            return Err(format!(
                "missing '{}/{}' element",
                ROOT_ELEMENT, APPLICATION_HOST_ELEMENT
            ));
        }
        Ok(Self { root })
    }

    /// An empty document with both collections present
    pub fn empty() -> Self {
        let mut application_host = Element::new(APPLICATION_HOST_ELEMENT);
        application_host
            .children
            .push(XMLNode::Element(Element::new(SITES_ELEMENT)));
        application_host
            .children
            .push(XMLNode::Element(Element::new(APPLICATION_POOLS_ELEMENT)));

        let mut root = Element::new(ROOT_ELEMENT);
        root.children.push(XMLNode::Element(application_host));
        Self { root }
    }

    pub fn root(&self) -> &Element {
        &self.root
    }

    /// Serialize the document with indentation
    pub fn to_xml(&self) -> Result<Vec<u8>, std::io::Error> {
        let mut out = Vec::new();
        self.root
            .write_with_config(&mut out, EmitterConfig::new().perform_indent(true))
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
        Ok(out)
    }

    fn application_host(&self) -> Option<&Element> {
        self.root.get_child(APPLICATION_HOST_ELEMENT)
    }

    fn application_host_mut(&mut self) -> &mut Element {
        // parse() and empty() guarantee the element exists
        if self.root.get_child(APPLICATION_HOST_ELEMENT).is_none() {
            self.root
                .children
                .push(XMLNode::Element(Element::new(APPLICATION_HOST_ELEMENT)));
        }
        self.root
            .get_mut_child(APPLICATION_HOST_ELEMENT)
            .expect("system.applicationHost present")
    }

    fn collection_mut(&mut self, name: &str) -> &mut Element {
        let application_host = self.application_host_mut();
        if application_host.get_child(name).is_none() {
            debug!(collection = name, "Creating missing collection");
            application_host
                .children
                .push(XMLNode::Element(Element::new(name)));
        }
        application_host
            .get_mut_child(name)
            .expect("collection created above")
    }

    /// The `sites` collection, if present
    pub fn sites(&self) -> Option<&Element> {
        self.application_host()?.get_child(SITES_ELEMENT)
    }

    /// The `sites` collection, created if missing
    pub fn sites_mut(&mut self) -> &mut Element {
        self.collection_mut(SITES_ELEMENT)
    }

    /// The `applicationPools` collection, if present
    pub fn application_pools(&self) -> Option<&Element> {
        self.application_host()?.get_child(APPLICATION_POOLS_ELEMENT)
    }

    /// The `applicationPools` collection, created if missing
    pub fn application_pools_mut(&mut self) -> &mut Element {
        self.collection_mut(APPLICATION_POOLS_ELEMENT)
    }
}

/// Loads and persists the host configuration at a fixed path
#[derive(Debug, Clone)]
pub struct HostConfigStore {
    path: PathBuf,
}

impl HostConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and parse the host configuration file
    pub async fn load(&self) -> Result<HostConfiguration, ProvisionError> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|e| ProvisionError::load(&self.path, e))?;
        let config =
            HostConfiguration::parse(&bytes).map_err(|e| ProvisionError::load(&self.path, e))?;
        debug!(path = %self.path.display(), "Host configuration loaded");
        Ok(config)
    }

    /// Serialize the document back to the store's path.
    ///
    /// The bytes go to a temporary file next to the target which is then
    /// renamed over it, so concurrent readers see the old document or the
    /// new one and never a partial write.
    pub async fn save(&self, config: &HostConfiguration) -> Result<(), ProvisionError> {
        let write_error = |source| ProvisionError::ConfigurationWrite {
            path: self.path.clone(),
            source,
        };
        let bytes = config.to_xml().map_err(write_error)?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || replace_file(&path, &bytes))
            .await
            .map_err(|e| write_error(io::Error::other(e)))?
            .map_err(write_error)?;
        info!(path = %self.path.display(), "Host configuration saved");
        Ok(())
    }
}

/// Write `bytes` to a sibling temp file and rename it onto `path`
fn replace_file(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut file = tempfile::NamedTempFile::new_in(dir)?;
    file.write_all(bytes)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Replace [`BIN_PATH_TOKEN`] in `template` using `lookup` for `variable`.
///
/// Templates without the token are returned unchanged, whether or not the
/// variable is set.
pub fn resolve_bin_token_with<F>(
    template: &str,
    variable: &str,
    lookup: F,
) -> Result<String, ProvisionError>
where
    F: FnOnce(&str) -> Option<String>,
{
    if !template.contains(BIN_PATH_TOKEN) {
        return Ok(template.to_string());
    }

    match lookup(variable) {
        Some(bin) => Ok(template.replace(BIN_PATH_TOKEN, &bin)),
        None => Err(ProvisionError::EnvironmentNotConfigured {
            variable: variable.to_string(),
            template: template.to_string(),
        }),
    }
}

/// Replace [`BIN_PATH_TOKEN`] in `template` from the process environment
pub fn resolve_bin_token(template: &str, variable: &str) -> Result<String, ProvisionError> {
    resolve_bin_token_with(template, variable, |name| std::env::var(name).ok())
}
