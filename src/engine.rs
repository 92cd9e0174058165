//! Hosting engine lifecycle
//!
//! One engine runs per process. [`EngineHost`] starts it on the first
//! request and hands the same instance to every later request, whatever
//! identity those requests ask for. There is no way back to the unstarted
//! state; the engine lives until the process exits or [`EngineHost::shutdown`]
//! is called.
//!
//! Engine processes are registered for teardown at process exit. A static
//! [`EngineHost`] is never dropped, so `kill_on_drop` alone would leave the
//! child running after the test binary finishes.

use crate::bridge::{ExecutionDomain, ManagerHandle};
use crate::config::{EngineKind, ManagerConfig};
use crate::error::ProvisionError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Parameters that determine an engine start
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize)]
pub struct EngineIdentity {
    pub host_config: PathBuf,
    pub root_config: PathBuf,
    pub connection_pool_size: u32,
}

impl EngineIdentity {
    pub fn new(host_config: PathBuf, root_config: PathBuf, connection_pool_size: u32) -> Self {
        Self {
            host_config,
            root_config,
            connection_pool_size,
        }
    }
}

/// A running hosting engine
pub trait HostingEngine: Send + Sync + fmt::Debug {
    /// Identity the engine was started with
    fn identity(&self) -> &EngineIdentity;

    /// Whether the engine can still serve requests
    fn is_running(&self) -> bool;

    /// The engine's application manager, reachable from this process
    fn application_manager(&self) -> Result<ManagerHandle, ProvisionError>;

    /// Stop the engine; its application manager becomes unreachable
    fn shutdown(&self);
}

/// Starts hosting engines
pub trait EngineLauncher: Send + Sync {
    fn launch(&self, identity: &EngineIdentity) -> Result<Arc<dyn HostingEngine>, ProvisionError>;
}

/// Build the launcher a configuration asks for
pub fn launcher_for(config: &ManagerConfig) -> Result<Arc<dyn EngineLauncher>, ProvisionError> {
    match config.engine.kind {
        EngineKind::InProcess => Ok(Arc::new(InProcessLauncher::new(&config.instance_name))),
        EngineKind::Command => {
            let command = config.engine.command.as_ref().ok_or_else(|| {
                ProvisionError::EngineStart {
                    reason: "command engine requires 'engine.command' field".to_string(),
                }
            })?;
            Ok(Arc::new(
                CommandLauncher::new(&config.instance_name, command)
                    .with_args(config.engine.args.clone())
                    .with_env(config.engine.env.clone()),
            ))
        }
    }
}

enum EngineState {
    Unstarted,
    Started(Arc<dyn HostingEngine>),
}

/// Owner of the process's hosting engine
pub struct EngineHost {
    launcher: Arc<dyn EngineLauncher>,
    state: Mutex<EngineState>,
}

impl EngineHost {
    pub fn new(launcher: Arc<dyn EngineLauncher>) -> Arc<Self> {
        Arc::new(Self {
            launcher,
            state: Mutex::new(EngineState::Unstarted),
        })
    }

    /// The process-wide engine host.
    ///
    /// The launcher passed on the first call is kept; later launchers are
    /// ignored.
    pub fn process_wide(launcher: Arc<dyn EngineLauncher>) -> Arc<Self> {
        static PROCESS_HOST: OnceLock<Arc<EngineHost>> = OnceLock::new();
        Arc::clone(PROCESS_HOST.get_or_init(|| EngineHost::new(launcher)))
    }

    /// Start the engine with `identity`, or return the already started one.
    ///
    /// Once started, `identity` is advisory only: a mismatch is logged and
    /// the running engine is returned.
    pub fn start_or_get(
        &self,
        identity: &EngineIdentity,
    ) -> Result<Arc<dyn HostingEngine>, ProvisionError> {
        let mut state = self.state.lock();
        if let EngineState::Started(engine) = &*state {
            if engine.identity() != identity {
                warn!(
                    running = ?engine.identity(),
                    requested = ?identity,
                    "Engine already hosted with different parameters, reusing it"
                );
            } else {
                debug!("Reusing hosted engine");
            }
            return Ok(Arc::clone(engine));
        }

        let engine = self.launcher.launch(identity)?;
        info!(
            host_config = %identity.host_config.display(),
            root_config = %identity.root_config.display(),
            connection_pool_size = identity.connection_pool_size,
            "Hosting engine started"
        );
        *state = EngineState::Started(Arc::clone(&engine));
        Ok(engine)
    }

    /// The started engine, if any
    pub fn current(&self) -> Option<Arc<dyn HostingEngine>> {
        match &*self.state.lock() {
            EngineState::Started(engine) => Some(Arc::clone(engine)),
            EngineState::Unstarted => None,
        }
    }

    pub fn is_started(&self) -> bool {
        matches!(*self.state.lock(), EngineState::Started(_))
    }

    /// Stop the started engine, if any. The host stays started and keeps
    /// returning the stopped engine.
    pub fn shutdown(&self) {
        if let Some(engine) = self.current() {
            engine.shutdown();
        }
    }
}

/// Engine living in this process with no isolation boundary
#[derive(Debug)]
pub struct InProcessEngine {
    instance_name: String,
    identity: EngineIdentity,
    running: AtomicBool,
}

impl InProcessEngine {
    pub fn new(instance_name: &str, identity: EngineIdentity) -> Self {
        Self {
            instance_name: instance_name.to_string(),
            identity,
            running: AtomicBool::new(true),
        }
    }
}

impl HostingEngine for InProcessEngine {
    fn identity(&self) -> &EngineIdentity {
        &self.identity
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn application_manager(&self) -> Result<ManagerHandle, ProvisionError> {
        if !self.is_running() {
            return Err(ProvisionError::DomainBridge {
                reason: format!("engine '{}' has been shut down", self.instance_name),
            });
        }
        Ok(ManagerHandle::new(
            &self.instance_name,
            self.identity.clone(),
            ExecutionDomain::InProcess,
        ))
    }

    fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        info!(instance = %self.instance_name, "In-process engine shut down");
    }
}

#[derive(Debug, Clone)]
pub struct InProcessLauncher {
    instance_name: String,
}

impl InProcessLauncher {
    pub fn new(instance_name: &str) -> Self {
        Self {
            instance_name: instance_name.to_string(),
        }
    }
}

impl EngineLauncher for InProcessLauncher {
    fn launch(&self, identity: &EngineIdentity) -> Result<Arc<dyn HostingEngine>, ProvisionError> {
        Ok(Arc::new(InProcessEngine::new(
            &self.instance_name,
            identity.clone(),
        )))
    }
}

/// Engine running as a child process
pub struct ProcessEngine {
    instance_name: String,
    identity: EngineIdentity,
    pid: u32,
    child: Mutex<Child>,
}

impl fmt::Debug for ProcessEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessEngine")
            .field("instance_name", &self.instance_name)
            .field("identity", &self.identity)
            .field("pid", &self.pid)
            .finish()
    }
}

impl ProcessEngine {
    pub fn pid(&self) -> u32 {
        self.pid
    }
}

impl HostingEngine for ProcessEngine {
    fn identity(&self) -> &EngineIdentity {
        &self.identity
    }

    fn is_running(&self) -> bool {
        matches!(self.child.lock().try_wait(), Ok(None))
    }

    fn application_manager(&self) -> Result<ManagerHandle, ProvisionError> {
        match self.child.lock().try_wait() {
            Ok(None) => Ok(ManagerHandle::new(
                &self.instance_name,
                self.identity.clone(),
                ExecutionDomain::Process { pid: self.pid },
            )),
            Ok(Some(status)) => Err(ProvisionError::DomainBridge {
                reason: format!("engine process {} exited with {}", self.pid, status),
            }),
            Err(e) => Err(ProvisionError::DomainBridge {
                reason: format!("cannot query engine process {}: {}", self.pid, e),
            }),
        }
    }

    fn shutdown(&self) {
        exit_teardown::unregister(self.pid);
        match self.child.lock().start_kill() {
            Ok(()) => info!(instance = %self.instance_name, pid = self.pid, "Engine process killed"),
            Err(e) => warn!(pid = self.pid, error = %e, "Failed to kill engine process"),
        }
    }
}

impl Drop for ProcessEngine {
    fn drop(&mut self) {
        // kill_on_drop on the child handles the kill itself
        exit_teardown::unregister(self.pid);
    }
}

/// Engine processes still to be killed when this process exits
#[cfg(unix)]
mod exit_teardown {
    use parking_lot::{const_mutex, Mutex};
    use std::sync::Once;

    static PIDS: Mutex<Vec<u32>> = const_mutex(Vec::new());
    static INSTALL: Once = Once::new();

    pub fn register(pid: u32) {
        INSTALL.call_once(|| {
            // SAFETY: kill_registered is a plain extern "C" fn with no captured state
            if unsafe { libc::atexit(kill_registered) } != 0 {
                tracing::warn!("Cannot install exit handler; engine processes may outlive this process");
            }
        });
        PIDS.lock().push(pid);
    }

    pub fn unregister(pid: u32) {
        PIDS.lock().retain(|p| *p != pid);
    }

    #[cfg(test)]
    pub fn is_registered(pid: u32) -> bool {
        PIDS.lock().contains(&pid)
    }

    extern "C" fn kill_registered() {
        // Another thread may hold the lock while the process exits
        if let Some(pids) = PIDS.try_lock() {
            for pid in pids.iter() {
                // SAFETY: sending a signal has no memory safety requirements
                unsafe {
                    libc::kill(*pid as libc::pid_t, libc::SIGKILL);
                }
            }
        }
    }
}

#[cfg(not(unix))]
mod exit_teardown {
    // Without atexit support the engine relies on kill_on_drop and
    // EngineHost::shutdown.
    pub fn register(_pid: u32) {}

    pub fn unregister(_pid: u32) {}
}

/// Starts the engine executable as a child process.
///
/// The child receives `--host-config`, `--root-config` and
/// `--connection-pool-size` after the configured arguments. It is killed
/// when the engine handle is dropped, on [`HostingEngine::shutdown`], or
/// when this process exits.
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    instance_name: String,
    command: String,
    args: Vec<String>,
    env: HashMap<String, String>,
}

impl CommandLauncher {
    pub fn new(instance_name: &str, command: &str) -> Self {
        Self {
            instance_name: instance_name.to_string(),
            command: command.to_string(),
            args: Vec::new(),
            env: HashMap::new(),
        }
    }

    /// Set arguments (builder pattern)
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Set environment variables (builder pattern)
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Full argument list for an engine start
    pub fn arguments(&self, identity: &EngineIdentity) -> Vec<String> {
        let mut args = self.args.clone();
        args.push("--host-config".to_string());
        args.push(identity.host_config.display().to_string());
        args.push("--root-config".to_string());
        args.push(identity.root_config.display().to_string());
        args.push("--connection-pool-size".to_string());
        args.push(identity.connection_pool_size.to_string());
        args
    }
}

impl EngineLauncher for CommandLauncher {
    fn launch(&self, identity: &EngineIdentity) -> Result<Arc<dyn HostingEngine>, ProvisionError> {
        info!(instance = %self.instance_name, command = %self.command, "Starting engine process");

        let mut cmd = Command::new(&self.command);
        cmd.args(self.arguments(identity));
        cmd.stdin(Stdio::null());
        cmd.kill_on_drop(true);
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        cmd.env("LIVESITE_INSTANCE", &self.instance_name);

        let child = cmd.spawn().map_err(|e| ProvisionError::EngineStart {
            reason: format!("cannot spawn '{}': {}", self.command, e),
        })?;
        let pid = child.id().unwrap_or(0);
        if pid != 0 {
            exit_teardown::register(pid);
        }
        info!(instance = %self.instance_name, pid, "Engine process spawned");

        Ok(Arc::new(ProcessEngine {
            instance_name: self.instance_name.clone(),
            identity: identity.clone(),
            pid,
            child: Mutex::new(child),
        }))
    }
}
