//! Process-wide registry of running children, destroyed on host shutdown.
//!
//! [`ProcessRegistry::global`] starts a signal watcher the first time a
//! process is registered. While at least one process is registered the
//! registry is armed: SIGINT or SIGTERM (Ctrl+C elsewhere) destroys every
//! registered child and the host exits with `128 + signal`. A signal that
//! arrives while the registry is disarmed is left to the host's own
//! handlers. Hosts that end by returning from `main` call
//! [`ProcessRegistry::shutdown`] themselves.

use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use tracing::{debug, error, warn};

use crate::listener::ProcessListener;
use crate::process::ProcessHandle;

#[derive(Default)]
struct RegistryState {
    processes: Vec<ProcessHandle>,
    armed: bool,
    hook_installed: bool,
    shutdown_started: bool,
}

/// Lock-guarded set of processes to destroy when the host shuts down.
pub struct ProcessRegistry {
    state: Mutex<RegistryState>,
    install_hook: bool,
}

impl ProcessRegistry {
    /// A registry without a signal hook; shutdown is triggered explicitly.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            install_hook: false,
        }
    }

    /// The process-wide registry, hooked to host termination signals.
    pub fn global() -> &'static ProcessRegistry {
        static GLOBAL: OnceLock<ProcessRegistry> = OnceLock::new();
        GLOBAL.get_or_init(|| Self {
            state: Mutex::new(RegistryState::default()),
            install_hook: true,
        })
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `process`.
    ///
    /// The first registration arms the shutdown hook. Once shutdown has
    /// started the process is destroyed instead and `false` is returned.
    pub fn add(&'static self, process: &ProcessHandle) -> bool {
        let mut state = self.lock();
        if state.shutdown_started {
            drop(state);
            warn!(process = %process, "host is shutting down; destroying process");
            destroy(process);
            return false;
        }
        if state.processes.is_empty() {
            state.armed = true;
            if self.install_hook && !state.hook_installed {
                state.hook_installed = install_signal_hook(self);
            }
        }
        state.processes.push(Arc::clone(process));
        true
    }

    /// Unregister `process`. Disarms the hook when the registry empties.
    ///
    /// A no-op once shutdown has started.
    pub fn remove(&self, process: &ProcessHandle) -> bool {
        let mut state = self.lock();
        if state.shutdown_started {
            return false;
        }
        let before = state.processes.len();
        let target = Arc::as_ptr(process) as *const ();
        state
            .processes
            .retain(|p| Arc::as_ptr(p) as *const () != target);
        let removed = state.processes.len() != before;
        if removed && state.processes.is_empty() {
            state.armed = false;
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.lock().processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().processes.is_empty()
    }

    /// Whether registered processes will be destroyed on host shutdown.
    pub fn is_armed(&self) -> bool {
        self.lock().armed
    }

    pub fn is_shut_down(&self) -> bool {
        self.lock().shutdown_started
    }

    /// Destroy every registered process. Runs at most once.
    pub fn shutdown(&self) {
        self.begin_shutdown(false);
    }

    /// React to a termination signal that maps to `exit_code`.
    ///
    /// Only an armed registry shuts down; the exit code to leave the host
    /// with is returned in that case.
    fn on_signal(&self, exit_code: i32) -> Option<i32> {
        if self.begin_shutdown(true) {
            Some(exit_code)
        } else {
            debug!(exit_code, "no registered processes; leaving signal to the host");
            None
        }
    }

    /// Take and destroy every registered process. Returns whether this call
    /// performed the shutdown.
    fn begin_shutdown(&self, only_if_armed: bool) -> bool {
        let processes = {
            let mut state = self.lock();
            if state.shutdown_started || (only_if_armed && !state.armed) {
                return false;
            }
            state.shutdown_started = true;
            state.armed = false;
            std::mem::take(&mut state.processes)
        };
        debug!(count = processes.len(), "destroying registered processes");
        for process in &processes {
            destroy(process);
        }
        true
    }
}

impl Default for ProcessRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn destroy(process: &ProcessHandle) {
    if let Err(e) = process.destroy() {
        error!(process = %process, error = %e, "unable to terminate process during shutdown");
    }
}

/// Spawn the watcher thread. Returns `false` if it could not be started.
fn install_signal_hook(registry: &'static ProcessRegistry) -> bool {
    let spawned = std::thread::Builder::new()
        .name("process-registry-shutdown".into())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    warn!(error = %e, "failed to build signal runtime");
                    return;
                }
            };
            let code = runtime.block_on(watch_signals(registry));
            std::process::exit(code);
        });
    match spawned {
        Ok(_) => true,
        Err(e) => {
            warn!(error = %e, "failed to install shutdown hook");
            false
        }
    }
}

/// Watch for termination signals until one arrives while `registry` is
/// armed, and resolve with the exit code for it.
///
/// Never resolves if no signal handler could be registered.
async fn watch_signals(registry: &'static ProcessRegistry) -> i32 {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut interrupt, mut terminate) =
            match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
                (Ok(i), Ok(t)) => (i, t),
                (Err(e), _) | (_, Err(e)) => {
                    warn!(error = %e, "failed to register signal handlers");
                    return std::future::pending().await;
                }
            };
        loop {
            let signal_code = tokio::select! {
                _ = interrupt.recv() => 128 + libc::SIGINT,
                _ = terminate.recv() => 128 + libc::SIGTERM,
            };
            if let Some(code) = registry.on_signal(signal_code) {
                return code;
            }
        }
    }

    #[cfg(not(unix))]
    {
        loop {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to register Ctrl+C handler");
                return std::future::pending().await;
            }
            if let Some(code) = registry.on_signal(130) {
                return code;
            }
        }
    }
}

/// Listener that keeps a launch registered while its process runs.
pub struct RegistryListener {
    registry: &'static ProcessRegistry,
}

impl RegistryListener {
    pub fn new(registry: &'static ProcessRegistry) -> Self {
        Self { registry }
    }

    /// Listener bound to [`ProcessRegistry::global`].
    pub fn global() -> Self {
        Self::new(ProcessRegistry::global())
    }
}

impl ProcessListener for RegistryListener {
    fn after_start(&self, process: &ProcessHandle, _: &crate::execution::ProcessExecutor) {
        self.registry.add(process);
    }

    fn after_stop(&self, process: &ProcessHandle) {
        self.registry.remove(process);
    }
}
