/// Renewal service: wires the wheel, queue, worker and coordinator together.
///
/// `RenewalService::spawn` is the composition root: it takes the three
/// collaborators, starts the wheel driver and the renewal worker, and hands
/// back a cloneable [`RenewalHandle`] plus the event receiver. Nothing is
/// global; two services in one process never share state.
mod worker;

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::RenewalConfig;
use crate::coordinator::{RenewalCoordinator, TeardownReport};
use crate::error::PotError;
use crate::events::RenewalEvent;
use crate::external::{ConfigWriter, HopResolver};
use crate::generator::ParameterGenerator;
use crate::metrics::RenewalMetrics;
use crate::registry::RenewalState;
use crate::types::{Path, PathId};
use crate::util::lock;
use crate::wheel::ScheduleWheel;

// ── RenewalHandle (app-facing API) ───────────────────────────────────

/// Handle to a running renewal service.
///
/// Cheap to clone. Lifecycle calls run on the caller's task; periodic work
/// and operator refreshes go through the queue to the single worker.
#[derive(Clone)]
pub struct RenewalHandle {
    coordinator: Arc<RenewalCoordinator>,
    shutdown: CancellationToken,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl RenewalHandle {
    /// A path was created or its definition changed.
    pub async fn on_path_updated(&self, path: &Path) -> Result<(), PotError> {
        self.ensure_running()?;
        self.coordinator.on_path_updated(path).await
    }

    /// A path was deleted. Stops renewal and removes its configuration.
    pub async fn on_path_deleted(&self, path: &Path) -> Result<TeardownReport, PotError> {
        self.ensure_running()?;
        Ok(self.coordinator.on_path_deleted(path).await)
    }

    /// Queue an immediate renewal for `path`.
    ///
    /// This is also how a stalled path is brought back: a successful pass
    /// re-arms its timer.
    pub fn request_refresh(&self, path: &PathId) -> Result<(), PotError> {
        self.ensure_running()?;
        if !self.coordinator.registry().contains(path) {
            return Err(PotError::UnknownPath(path.clone()));
        }
        tracing::info!(%path, "operator refresh requested");
        self.coordinator.queue().enqueue(path.clone());
        Ok(())
    }

    /// Snapshot of a path's renewal state.
    pub fn state(&self, path: &PathId) -> Option<RenewalState> {
        self.coordinator.registry().get(path)
    }

    /// Paths with live proof-of-transit.
    pub fn paths(&self) -> Vec<PathId> {
        self.coordinator.registry().paths()
    }

    /// Paths whose last renewal failed and that no longer auto-refresh.
    pub fn stalled_paths(&self) -> Vec<PathId> {
        self.coordinator.registry().stalled()
    }

    pub fn metrics(&self) -> Arc<RenewalMetrics> {
        self.coordinator.metrics().clone()
    }

    /// Renewal requests waiting for the worker.
    pub fn queue_len(&self) -> usize {
        self.coordinator.queue().len()
    }

    pub fn is_running(&self) -> bool {
        !self.shutdown.is_cancelled()
    }

    /// Stop the worker and the wheel driver and wait for both.
    ///
    /// A pass already in flight completes first. Provisioned configuration
    /// is left on the hops; tear paths down before shutting down to remove it.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let tasks = std::mem::take(&mut *lock(&self.tasks));
        for task in tasks {
            if let Err(e) = task.await {
                tracing::error!("renewal service task failed: {e}");
            }
        }
        tracing::info!("renewal service stopped");
    }

    fn ensure_running(&self) -> Result<(), PotError> {
        if self.shutdown.is_cancelled() {
            return Err(PotError::Shutdown);
        }
        Ok(())
    }
}

// ── RenewalChannels ──────────────────────────────────────────────────

/// Returned to the application when the service starts.
pub struct RenewalChannels {
    pub handle: RenewalHandle,
    /// Renewal events. Dropping the receiver is fine; events are then lost.
    pub events: mpsc::Receiver<RenewalEvent>,
}

// ── RenewalService ───────────────────────────────────────────────────

pub struct RenewalService;

impl RenewalService {
    /// Start the wheel driver and the renewal worker.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        config: RenewalConfig,
        generator: Arc<dyn ParameterGenerator>,
        resolver: Arc<dyn HopResolver>,
        writer: Arc<dyn ConfigWriter>,
    ) -> RenewalChannels {
        let (event_tx, event_rx) = mpsc::channel::<RenewalEvent>(config.event_buffer.max(1));
        let wheel = ScheduleWheel::new(config.tick(), config.wheel_slots);
        let shutdown = CancellationToken::new();

        let coordinator = Arc::new(
            RenewalCoordinator::new(config, wheel.clone(), generator, resolver, writer)
                .with_events(event_tx),
        );

        let driver = wheel.spawn_driver(shutdown.clone());
        let worker = tokio::spawn(worker::renewal_worker(
            coordinator.clone(),
            shutdown.clone(),
        ));
        tracing::info!(tick = ?wheel.tick(), "renewal service started");

        RenewalChannels {
            handle: RenewalHandle {
                coordinator,
                shutdown,
                tasks: Arc::new(Mutex::new(vec![driver, worker])),
            },
            events: event_rx,
        }
    }
}
