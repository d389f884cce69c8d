use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{error, info, warn};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
type StartFn = Box<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;
type StopFn = Box<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

struct Component {
    name: String,
    start: StartFn,
    stop: StopFn,
}

/// Ordered, atomic bring-up and guaranteed teardown of the core's fixed
/// dependency graph (§4.1). Components are registered once at construction
/// in dependency order; `start()` walks them forward and rolls back the
/// already-started prefix on the first failure; `stop()` walks the
/// started set in reverse, best-effort, idempotently.
pub struct StartupOrchestrator {
    components: Vec<Component>,
    started: std::sync::Mutex<Vec<usize>>,
}

impl StartupOrchestrator {
    pub fn new() -> Self {
        Self {
            components: Vec::new(),
            started: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Register a component's start/stop pair. Registration only happens
    /// during construction, before `start()` is ever called (§4.1).
    pub fn register<S, T, Fs, Ft>(&mut self, name: impl Into<String>, start: S, stop: T)
    where
        S: Fn() -> Fs + Send + Sync + 'static,
        Fs: Future<Output = anyhow::Result<()>> + Send + 'static,
        T: Fn() -> Ft + Send + Sync + 'static,
        Ft: Future<Output = ()> + Send + 'static,
    {
        self.components.push(Component {
            name: name.into(),
            start: Box::new(move || Box::pin(start())),
            stop: Box::new(move || Box::pin(stop())),
        });
    }

    /// Start every registered component in order. On the first failure,
    /// stop the already-started prefix in reverse order and return the
    /// original error — the registry is left in the empty-started state
    /// either way (§4.1).
    pub async fn start(&self) -> anyhow::Result<()> {
        for (index, component) in self.components.iter().enumerate() {
            info!(component = %component.name, "starting component");
            if let Err(e) = (component.start)().await {
                error!(component = %component.name, error = %e, "component failed to start, rolling back");
                self.rollback(index).await;
                return Err(e);
            }
            self.started.lock().unwrap().push(index);
        }
        info!("all components started");
        Ok(())
    }

    async fn rollback(&self, failed_index: usize) {
        for index in (0..failed_index).rev() {
            let component = &self.components[index];
            warn!(component = %component.name, "rolling back");
            (component.stop)().await;
        }
        self.started.lock().unwrap().clear();
    }

    /// Idempotent reverse-order teardown of every started component.
    /// Individual stop failures are swallowed by each component's stop
    /// closure and never abort the sweep (§4.1).
    pub async fn stop(&self) {
        let started: Vec<usize> = std::mem::take(&mut *self.started.lock().unwrap());
        if started.is_empty() {
            info!("stop called with nothing started, no-op");
            return;
        }
        for index in started.into_iter().rev() {
            let component = &self.components[index];
            info!(component = %component.name, "stopping component");
            (component.stop)().await;
        }
        info!("all components stopped");
    }
}

impl Default for StartupOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

/// The single process-termination shutdown flag for the entire core
/// (§4.1 — components must never register their own signal handler).
static SHUTDOWN: AtomicBool = AtomicBool::new(false);

/// Install the one process-termination signal handler for the entire
/// core. On SIGTERM or SIGINT, sets the shared shutdown flag; the main
/// loop observes it and drives `stop()`.
pub fn install_signal_handler() {
    for sig in [libc::SIGTERM, libc::SIGINT] {
        unsafe {
            libc::signal(sig, signal_handler as libc::sighandler_t);
        }
    }
}

pub fn shutdown_requested() -> bool {
    SHUTDOWN.load(Ordering::Relaxed)
}

extern "C" fn signal_handler(_sig: libc::c_int) {
    SHUTDOWN.store(true, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn starts_and_stops_components_in_order() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut orchestrator = StartupOrchestrator::new();

        for name in ["database", "certs", "session_tracker"] {
            let start_order = Arc::clone(&order);
            let stop_order = Arc::clone(&order);
            let start_name = name.to_string();
            let stop_name = name.to_string();
            orchestrator.register(
                name,
                move || {
                    let order = Arc::clone(&start_order);
                    let name = start_name.clone();
                    async move {
                        order.lock().unwrap().push(format!("start:{name}"));
                        Ok(())
                    }
                },
                move || {
                    let order = Arc::clone(&stop_order);
                    let name = stop_name.clone();
                    async move {
                        order.lock().unwrap().push(format!("stop:{name}"));
                    }
                },
            );
        }

        orchestrator.start().await.unwrap();
        orchestrator.stop().await;

        let recorded = order.lock().unwrap().clone();
        assert_eq!(
            recorded,
            vec![
                "start:database",
                "start:certs",
                "start:session_tracker",
                "stop:session_tracker",
                "stop:certs",
                "stop:database",
            ]
        );
    }

    #[tokio::test]
    async fn a_failed_start_rolls_back_the_started_prefix_in_reverse() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut orchestrator = StartupOrchestrator::new();

        let start_order = Arc::clone(&order);
        orchestrator.register(
            "database",
            move || {
                let order = Arc::clone(&start_order);
                async move {
                    order.lock().unwrap().push("start:database".to_string());
                    Ok(())
                }
            },
            {
                let order = Arc::clone(&order);
                move || {
                    let order = Arc::clone(&order);
                    async move {
                        order.lock().unwrap().push("stop:database".to_string());
                    }
                }
            },
        );

        orchestrator.register(
            "certs",
            || async { Err(anyhow::anyhow!("missing CA certificate")) },
            || async {},
        );

        let result = orchestrator.start().await;
        assert!(result.is_err());

        let recorded = order.lock().unwrap().clone();
        assert_eq!(recorded, vec!["start:database", "stop:database"]);
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut orchestrator = StartupOrchestrator::new();
        let stop_calls = Arc::clone(&calls);
        orchestrator.register(
            "only",
            || async { Ok(()) },
            move || {
                let calls = Arc::clone(&stop_calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                }
            },
        );

        orchestrator.start().await.unwrap();
        orchestrator.stop().await;
        orchestrator.stop().await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
