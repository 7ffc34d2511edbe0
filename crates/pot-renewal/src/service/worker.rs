/// The renewal worker.
///
/// One task for the whole service. It waits on the refresh queue and runs
/// one renewal pass at a time, to completion, before taking the next path.
/// A failing or panicking pass is logged and the loop carries on.
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::coordinator::{RenewalCoordinator, RenewalOutcome};

pub(super) async fn renewal_worker(coordinator: Arc<RenewalCoordinator>, shutdown: CancellationToken) {
    tracing::debug!("renewal worker started");

    loop {
        let path = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            path = coordinator.queue().next() => path,
        };

        // Run the pass in its own task so a panic surfaces as a JoinError
        // instead of taking the worker down. Still awaited inline: passes
        // never overlap.
        let pass = {
            let coordinator = coordinator.clone();
            let path = path.clone();
            tokio::spawn(async move { coordinator.renew(&path).await })
        };

        match pass.await {
            Ok(Ok(RenewalOutcome::Renewed { previous, current })) => {
                tracing::debug!(%path, previous, current, "renewal pass done");
            }
            Ok(Ok(RenewalOutcome::Skipped)) => {
                tracing::debug!(%path, "renewal pass skipped");
            }
            Ok(Err(e)) => {
                tracing::warn!(%path, "renewal pass failed: {e}");
            }
            Err(e) => {
                tracing::error!(%path, "renewal pass aborted: {e}");
            }
        }
    }

    let dropped = coordinator.queue().len();
    if dropped > 0 {
        tracing::info!(dropped, "renewal worker stopped with requests pending");
    } else {
        tracing::debug!("renewal worker stopped");
    }
}
