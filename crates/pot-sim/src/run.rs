use std::sync::Arc;
use std::time::{Duration, Instant};

use pot_renewal::{
    EndpointId, HopName, InMemoryConfigStore, Path, PotSettings, RefreshPeriod, RenewalChannels,
    RenewalConfig, RenewalService, ShamirGenerator, StaticResolver,
};

use crate::events::{emit, now_iso, EventFault, EventRenewal, EventStarted, EventSummary};

pub struct RunConfig {
    pub paths: usize,
    pub hops: usize,
    pub interval_ms: u64,
    pub profiles: u32,
    pub bit_width: u32,
    pub duration_secs: u64,
    pub latency_ms: u64,
    pub fail_hop: Option<String>,
    pub fail_after_ms: u64,
    pub heal_after_ms: Option<u64>,
    pub seed: Option<u64>,
}

pub async fn run(renewal: RenewalConfig, config: RunConfig) -> anyhow::Result<()> {
    let start = Instant::now();

    let hop_names: Vec<HopName> = (1..=config.hops)
        .map(|i| HopName::new(format!("sff{i}")))
        .collect();
    let store = Arc::new(InMemoryConfigStore::new());
    if config.latency_ms > 0 {
        store.set_latency(Some(Duration::from_millis(config.latency_ms)));
    }
    let generator = match config.seed {
        Some(seed) => ShamirGenerator::with_seed(seed),
        None => ShamirGenerator::new(),
    };

    let RenewalChannels { handle, mut events } = RenewalService::spawn(
        renewal,
        Arc::new(generator),
        Arc::new(StaticResolver::for_hops(&hop_names)),
        store.clone(),
    );

    emit(&EventStarted::new("run", config.paths, config.hops));

    // Stream service events until the run ends.
    let printer = tokio::spawn(async move {
        while let Some(inner) = events.recv().await {
            emit(&EventRenewal {
                inner,
                elapsed_s: start.elapsed().as_secs_f64(),
                timestamp: now_iso(),
            });
        }
    });

    let paths: Vec<Path> = (1..=config.paths)
        .map(|i| {
            Path::new(format!("P{i}"), hop_names.iter().map(|h| h.as_str().to_string()))
                .with_chain(format!("chain-{i}"))
                .with_pot(PotSettings {
                    refresh: RefreshPeriod::millis(config.interval_ms),
                    profile_count: config.profiles,
                    bit_width: config.bit_width,
                })
        })
        .collect();

    for path in &paths {
        if let Err(e) = handle.on_path_updated(path).await {
            tracing::warn!(path = %path.name, "not provisioned: {e}");
        }
    }

    if let Some(hop) = &config.fail_hop {
        let endpoint = EndpointId::new(format!("ep-{hop}"));
        let store = store.clone();
        let fail_after = Duration::from_millis(config.fail_after_ms);
        let heal_after = config.heal_after_ms.map(Duration::from_millis);
        tokio::spawn(async move {
            tokio::time::sleep(fail_after).await;
            store.fail_endpoint(endpoint.clone());
            emit(&EventFault {
                event: "fault",
                action: "fail",
                endpoint: endpoint.to_string(),
                elapsed_s: start.elapsed().as_secs_f64(),
            });

            if let Some(heal_after) = heal_after {
                tokio::time::sleep(heal_after).await;
                store.heal_endpoint(&endpoint);
                emit(&EventFault {
                    event: "fault",
                    action: "heal",
                    endpoint: endpoint.to_string(),
                    elapsed_s: start.elapsed().as_secs_f64(),
                });
            }
        });
    }

    // Stalled paths are retried once per second after a heal.
    let deadline = tokio::time::sleep(Duration::from_secs(config.duration_secs));
    tokio::pin!(deadline);
    let mut retry = tokio::time::interval(Duration::from_secs(1));
    retry.tick().await;

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\nCtrl+C received, shutting down...");
                break;
            }
            _ = retry.tick() => {
                if config.heal_after_ms.is_some() {
                    for path in handle.stalled_paths() {
                        let _ = handle.request_refresh(&path);
                    }
                }
            }
        }
    }

    let stalled = handle
        .stalled_paths()
        .iter()
        .map(ToString::to_string)
        .collect();
    for path in &paths {
        handle.on_path_deleted(path).await?;
    }
    let metrics = handle.metrics();
    handle.shutdown().await;
    // Dropping the last handle closes the event channel.
    drop(handle);
    let _ = printer.await;

    let leftover = store.len();
    if leftover > 0 {
        tracing::warn!(leftover, "configuration left on hops after teardown");
    }
    emit(&EventSummary {
        event: "summary",
        duration_s: start.elapsed().as_secs_f64(),
        stalled,
        leftover_configs: leftover,
        metrics: &metrics,
        timestamp: now_iso(),
    });
    Ok(())
}
