/// RenewalCoordinator: provisions, rotates and tears down a path's
/// proof-of-transit profiles.
///
/// Protocol for every activation (Distribute-and-Activate):
/// 1. Push every profile, inactive, to every hop in path order
/// 2. Only if all hops accepted: push the target profile to the first hop
///    with the activation flag set
///
/// Every hop therefore holds the material to validate the new index before
/// the first hop starts tagging traffic with it. The two phases are never
/// reordered or parallelized.
///
/// Failures stay local: they come back as `PotError`, a log line and an
/// event. A failed renewal leaves the previous profile live and does not
/// re-arm the timer; the path is marked stalled until an operator refresh
/// succeeds.
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::RenewalConfig;
use crate::error::PotError;
use crate::events::RenewalEvent;
use crate::external::{ConfigWriter, HopResolver};
use crate::generator::ParameterGenerator;
use crate::metrics::RenewalMetrics;
use crate::profile::ProfileSet;
use crate::queue::RefreshQueue;
use crate::record::ConfigTarget;
use crate::registry::{PathTimerRegistry, RenewalParams, RenewalState};
use crate::types::{
    duration_ms, now_ms, ConfigKey, EndpointId, HopName, Path, PathId, ProfileIndex, RefreshPeriod,
    MIN_POT_HOPS,
};
use crate::wheel::{ScheduleWheel, TimerHandle};

/// Result of a periodic renewal request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewalOutcome {
    Renewed {
        previous: ProfileIndex,
        current: ProfileIndex,
    },
    /// No state for the path (deleted before the request was processed).
    Skipped,
}

/// Outcome of a teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TeardownReport {
    pub had_state: bool,
    pub deletes: usize,
    pub delete_failures: usize,
}

pub struct RenewalCoordinator {
    config: RenewalConfig,
    registry: Arc<PathTimerRegistry>,
    queue: Arc<RefreshQueue>,
    generator: Arc<dyn ParameterGenerator>,
    resolver: Arc<dyn HopResolver>,
    writer: Arc<dyn ConfigWriter>,
    metrics: Arc<RenewalMetrics>,
    events: Option<mpsc::Sender<RenewalEvent>>,
}

impl RenewalCoordinator {
    pub fn new(
        config: RenewalConfig,
        wheel: ScheduleWheel,
        generator: Arc<dyn ParameterGenerator>,
        resolver: Arc<dyn HopResolver>,
        writer: Arc<dyn ConfigWriter>,
    ) -> Self {
        Self {
            config,
            registry: Arc::new(PathTimerRegistry::new(wheel)),
            queue: Arc::new(RefreshQueue::new()),
            generator,
            resolver,
            writer,
            metrics: Arc::new(RenewalMetrics::default()),
            events: None,
        }
    }

    /// Deliver [`RenewalEvent`]s on `tx`.
    pub fn with_events(mut self, tx: mpsc::Sender<RenewalEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn registry(&self) -> &Arc<PathTimerRegistry> {
        &self.registry
    }

    pub fn queue(&self) -> &Arc<RefreshQueue> {
        &self.queue
    }

    pub fn metrics(&self) -> &Arc<RenewalMetrics> {
        &self.metrics
    }

    pub fn config(&self) -> &RenewalConfig {
        &self.config
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    /// A path was created or changed.
    ///
    /// PoT enabled without state → provision. PoT enabled with state for a
    /// different hop list → tear down and provision again. PoT disabled →
    /// tear down whatever exists.
    pub async fn on_path_updated(&self, path: &Path) -> Result<(), PotError> {
        if !path.pot_enabled() {
            if self.registry.contains(&path.name) || self.registry.record(&path.name).is_some() {
                tracing::info!(path = %path.name, "proof-of-transit disabled, tearing down");
                self.teardown(&path.name).await;
            }
            return Ok(());
        }

        match self.registry.get(&path.name) {
            None => self.provision(path).await.map(|_| ()),
            Some(state) if state.hops != path.hops => {
                tracing::info!(path = %path.name, "hop list changed, re-provisioning");
                self.teardown(&path.name).await;
                self.provision(path).await.map(|_| ())
            }
            Some(_) => {
                tracing::debug!(path = %path.name, "path update with no PoT-relevant change");
                Ok(())
            }
        }
    }

    /// A path was deleted.
    pub async fn on_path_deleted(&self, path: &Path) -> TeardownReport {
        self.teardown(&path.name).await
    }

    // ── Initial provisioning ────────────────────────────────────────────

    /// Provision a path for the first time: generate, distribute, activate
    /// profile 0 and arm the renewal timer.
    ///
    /// On any failure no state is created and no timer armed.
    pub async fn provision(&self, path: &Path) -> Result<RenewalState, PotError> {
        match self.try_provision(path).await {
            Ok(state) => Ok(state),
            Err(e) => {
                tracing::warn!(path = %path.name, "provisioning failed: {e}");
                self.metrics.provision_failures.inc();
                self.generator.release(&path.name);
                self.emit(RenewalEvent::ProvisioningFailed {
                    path: path.name.clone(),
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn try_provision(&self, path: &Path) -> Result<RenewalState, PotError> {
        let settings = path.pot.ok_or_else(|| PotError::PotDisabled(path.name.clone()))?;

        let hop_count = path.hop_count();
        if hop_count < MIN_POT_HOPS {
            return Err(PotError::TooFewHops {
                path: path.name.clone(),
                hops: hop_count,
                min: MIN_POT_HOPS,
            });
        }

        let requested = settings.refresh.as_duration();
        let (refresh_interval, clamped) = self.config.clamp_interval(requested);
        if clamped {
            tracing::warn!(
                path = %path.name,
                ?requested,
                effective = ?refresh_interval,
                "refresh interval out of range, clamped"
            );
        }
        let (profile_count, clamped) = self.config.clamp_profile_count(settings.profile_count);
        if clamped {
            tracing::warn!(
                path = %path.name,
                requested = settings.profile_count,
                effective = profile_count,
                "profile count below minimum, using default"
            );
        }
        let (bit_width, clamped) = self.config.clamp_bit_width(settings.bit_width);
        if clamped {
            tracing::warn!(
                path = %path.name,
                requested = settings.bit_width,
                effective = bit_width,
                "bit width out of range, using default"
            );
        }

        let refresh = RefreshPeriod::millis(duration_ms(refresh_interval));
        let set = self
            .generator
            .get_parameters(&path.name, hop_count, refresh, bit_width, profile_count)
            .filter(|set| set.covers_hops(hop_count) && set.len() == profile_count as usize)
            .ok_or_else(|| PotError::GeneratorFailed(path.name.clone()))?;

        self.distribute_and_activate(&path.name, &path.hops, &set, 0)
            .await?;

        let params = RenewalParams {
            refresh_interval,
            profile_count,
            bit_width,
            hops: path.hops.clone(),
        };
        let mut state = self.registry.create(path.name.clone(), params, now_ms());
        let delay = self.config.rearm_delay(refresh_interval);
        let timer = self.arm_renewal(&path.name, delay);
        self.registry.set_timer(&path.name, timer);
        state.timer = Some(timer);

        self.metrics.provisioned.inc();
        self.metrics.active_paths.set(self.registry.len() as i64);
        tracing::info!(
            path = %path.name,
            hops = hop_count,
            profiles = profile_count,
            next_in = ?delay,
            "proof-of-transit provisioned"
        );
        self.emit(RenewalEvent::Provisioned {
            path: path.name.clone(),
            active_index: 0,
            hops: hop_count,
            profiles: profile_count,
            refresh_interval_ms: duration_ms(refresh_interval),
        });
        Ok(state)
    }

    // ── Periodic renewal ────────────────────────────────────────────────

    /// Rotate a path to its next profile. Called by the worker.
    pub async fn renew(&self, path: &PathId) -> Result<RenewalOutcome, PotError> {
        let Some(state) = self.registry.get(path) else {
            tracing::debug!(%path, "renewal requested for unknown path, skipping");
            self.metrics.renewals_skipped.inc();
            self.emit(RenewalEvent::RenewalSkipped { path: path.clone() });
            return Ok(RenewalOutcome::Skipped);
        };

        let refresh_value = duration_ms(state.refresh_interval);
        let result = self
            .try_refresh(path, state.active_index, state.hop_count, refresh_value)
            .await;

        let next = match result {
            Ok(next) => next,
            Err(e) => {
                if !self.registry.mark_stalled(path, now_ms(), e.to_string()) {
                    tracing::info!(%path, "path deleted during failed renewal, removing orphaned profiles: {e}");
                    self.delete_recorded(path).await;
                    self.metrics.renewals_skipped.inc();
                    self.emit(RenewalEvent::RenewalSkipped { path: path.clone() });
                    return Ok(RenewalOutcome::Skipped);
                }
                tracing::warn!(
                    %path,
                    active_index = state.active_index,
                    "renewal failed, keeping current profile and stopping auto-refresh: {e}"
                );
                self.metrics.renewal_failures.inc();
                self.emit(RenewalEvent::RenewalStalled {
                    path: path.clone(),
                    active_index: state.active_index,
                    reason: e.to_string(),
                });
                return Err(e);
            }
        };

        if !self.registry.set_active_index(path, next) {
            // Deleted while the pass was in flight: whatever it pushed is orphaned.
            tracing::info!(%path, "path deleted during renewal, removing orphaned profiles");
            self.delete_recorded(path).await;
            self.metrics.renewals_skipped.inc();
            self.emit(RenewalEvent::RenewalSkipped { path: path.clone() });
            return Ok(RenewalOutcome::Skipped);
        }
        self.registry.mark_renewed(path, now_ms());
        let timer = self.arm_renewal(path, self.config.rearm_delay(state.refresh_interval));
        self.registry.set_timer(path, timer);

        self.metrics.renewals.inc();
        tracing::info!(%path, previous = state.active_index, current = next, "profile rotated");
        self.emit(RenewalEvent::Renewed {
            path: path.clone(),
            previous: state.active_index,
            active_index: next,
        });
        Ok(RenewalOutcome::Renewed {
            previous: state.active_index,
            current: next,
        })
    }

    /// Move a path from `current` to the next profile.
    ///
    /// Returns the new active index, or `None` if the generator or the
    /// distribution failed. Registry state is not touched; the caller
    /// decides what to record.
    pub async fn refresh(
        &self,
        path: &PathId,
        current: ProfileIndex,
        hop_count: usize,
        refresh_value: u64,
    ) -> Option<ProfileIndex> {
        match self.try_refresh(path, current, hop_count, refresh_value).await {
            Ok(next) => Some(next),
            Err(e) => {
                tracing::warn!(%path, current, "refresh failed: {e}");
                None
            }
        }
    }

    async fn try_refresh(
        &self,
        path: &PathId,
        current: ProfileIndex,
        hop_count: usize,
        refresh_value: u64,
    ) -> Result<ProfileIndex, PotError> {
        let state = self
            .registry
            .get(path)
            .ok_or_else(|| PotError::UnknownPath(path.clone()))?;

        // A recomputed set also replaces the live profile, which the hops
        // must keep until the first hop switches away from it.
        let mut keep = None;
        if self.generator.parameters(path).is_none() {
            tracing::debug!(%path, "no cached parameters, recomputing the full set");
            keep = Some(current);
            self.generator
                .get_parameters(
                    path,
                    hop_count,
                    RefreshPeriod::millis(refresh_value),
                    state.bit_width,
                    state.profile_count,
                )
                .ok_or_else(|| PotError::GeneratorFailed(path.clone()))?;
        }

        let next = self
            .generator
            .next_active_index(path, hop_count, current)
            .ok_or_else(|| PotError::NoNextIndex {
                path: path.clone(),
                current,
            })?;
        let set = self
            .generator
            .parameters(path)
            .filter(|set| set.covers_hops(state.hops.len()))
            .ok_or_else(|| PotError::GeneratorFailed(path.clone()))?;

        if let Err(e) = self.distribute(path, &state.hops, &set, next, keep).await {
            if keep.is_some() {
                // The cached live profile no longer matches the hops.
                self.generator.release(path);
            }
            return Err(e);
        }
        Ok(next)
    }

    // ── Distribute-and-Activate ─────────────────────────────────────────

    /// Push every profile (inactive) to every hop, then activate `target`
    /// on the first hop.
    ///
    /// A hop that cannot be resolved or rejects a write fails the pass. The
    /// remaining hops of the sweep are still written, but no activation is
    /// sent. Nothing is rolled back; the next successful pass overwrites.
    pub async fn distribute_and_activate(
        &self,
        path: &PathId,
        hops: &[HopName],
        set: &ProfileSet,
        target: ProfileIndex,
    ) -> Result<(), PotError> {
        self.distribute(path, hops, set, target, None).await
    }

    /// Distribute-and-activate, leaving profile `keep` untouched on every hop.
    async fn distribute(
        &self,
        path: &PathId,
        hops: &[HopName],
        set: &ProfileSet,
        target: ProfileIndex,
        keep: Option<ProfileIndex>,
    ) -> Result<(), PotError> {
        let keep = keep.filter(|k| *k != target);
        let key = ConfigKey::for_path(path);
        let mut failed = Vec::new();
        let mut first_endpoint = None;

        for (hop_index, hop) in hops.iter().enumerate() {
            let Some(endpoint) = self.resolver.resolve(hop) else {
                tracing::warn!(%path, %hop, "hop has no reachable endpoint");
                self.metrics.push_failures.inc();
                failed.push(hop.clone());
                continue;
            };

            for profile_index in 0..set.len() as ProfileIndex {
                if keep == Some(profile_index) {
                    continue;
                }
                let payload = set
                    .hop_payload(profile_index, hop_index, None)
                    .ok_or_else(|| PotError::GeneratorFailed(path.clone()))?
                    .to_bytes()?;
                if self
                    .push(path, hop, &endpoint, &key, profile_index, None, &payload)
                    .await
                    .is_err()
                {
                    failed.push(hop.clone());
                    break;
                }
            }

            if hop_index == 0 {
                first_endpoint = Some(endpoint);
            }
        }

        if !failed.is_empty() {
            return Err(PotError::Distribution {
                path: path.clone(),
                failed,
            });
        }

        let (Some(first_hop), Some(endpoint)) = (hops.first(), first_endpoint) else {
            return Err(PotError::TooFewHops {
                path: path.clone(),
                hops: hops.len(),
                min: MIN_POT_HOPS,
            });
        };
        let payload = set
            .hop_payload(target, 0, Some(target))
            .ok_or_else(|| PotError::GeneratorFailed(path.clone()))?
            .to_bytes()?;
        self.push(path, first_hop, &endpoint, &key, target, Some(target), &payload)
            .await
            .map_err(|_| PotError::Distribution {
                path: path.clone(),
                failed: vec![first_hop.clone()],
            })?;

        tracing::debug!(%path, target, hops = hops.len(), "profile activated on first hop");
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn push(
        &self,
        path: &PathId,
        hop: &HopName,
        endpoint: &EndpointId,
        key: &ConfigKey,
        profile_index: ProfileIndex,
        activate: Option<ProfileIndex>,
        payload: &[u8],
    ) -> Result<(), String> {
        match self.writer.push_config(endpoint, key, payload).await {
            Ok(()) => {
                self.metrics.pushes.inc();
                self.registry.record_push(
                    path,
                    hop,
                    ConfigTarget {
                        endpoint: endpoint.clone(),
                        key: key.clone(),
                    },
                    profile_index,
                    activate,
                );
                tracing::debug!(%path, %hop, %endpoint, profile_index, ?activate, "pushed");
                Ok(())
            }
            Err(e) => {
                self.metrics.push_failures.inc();
                tracing::warn!(%path, %hop, %endpoint, profile_index, "push failed: {e}");
                Err(e)
            }
        }
    }

    // ── Teardown ────────────────────────────────────────────────────────

    /// Cancel the timer, delete every recorded configuration, drop all state.
    pub async fn teardown(&self, path: &PathId) -> TeardownReport {
        let had_state = self.registry.delete(path).is_some();
        let (deletes, delete_failures) = self.delete_recorded(path).await;
        self.generator.release(path);
        self.metrics.active_paths.set(self.registry.len() as i64);

        tracing::info!(%path, had_state, deletes, delete_failures, "proof-of-transit torn down");
        self.emit(RenewalEvent::TornDown {
            path: path.clone(),
            deletes,
            delete_failures,
        });
        TeardownReport {
            had_state,
            deletes,
            delete_failures,
        }
    }

    /// Issue one remote delete per recorded target. Returns (issued, failed).
    async fn delete_recorded(&self, path: &PathId) -> (usize, usize) {
        let Some(record) = self.registry.take_record(path) else {
            return (0, 0);
        };

        let mut failures = 0;
        for (target, entry) in record.targets() {
            self.metrics.deletes.inc();
            if let Err(e) = self.writer.delete_config(&target.endpoint, &target.key).await {
                failures += 1;
                self.metrics.delete_failures.inc();
                tracing::warn!(%path, hop = %entry.hop, endpoint = %target.endpoint, "delete failed: {e}");
            }
        }
        (record.len(), failures)
    }

    // ── Timers ──────────────────────────────────────────────────────────

    /// Arm a renewal task: when it fires, the path is queued for the worker.
    pub fn arm_renewal(&self, path: &PathId, delay: std::time::Duration) -> TimerHandle {
        let queue = self.queue.clone();
        let metrics = self.metrics.clone();
        let path = path.clone();
        self.registry.wheel().arm(
            move || {
                metrics.timers_fired.inc();
                queue.enqueue(path);
            },
            delay,
        )
    }

    fn emit(&self, event: RenewalEvent) {
        if let Some(tx) = &self.events {
            // try_send: never block a renewal pass on a slow consumer
            let _ = tx.try_send(event);
        }
    }
}
