/// Integration tests: the full renewal service.
///
/// Wheel driver, refresh queue, worker and coordinator running together
/// over the in-memory config store. Time is paused; tokio auto-advances it
/// whenever every task is idle, so timer-driven behaviour runs instantly.
use std::sync::Arc;
use std::time::Duration;

use pot_renewal::{
    EndpointId, HopName, InMemoryConfigStore, Path, PathId, PotSettings, RefreshPeriod,
    RenewalChannels, RenewalConfig, RenewalEvent, RenewalHealth, RenewalService,
    ShamirGenerator, StaticResolver, WriteOp,
};
use tokio::sync::mpsc;

const HOPS: [&str; 3] = ["sff1", "sff2", "sff3"];

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("warn")
        .try_init();
}

fn start(hops: &[&str], store: Arc<InMemoryConfigStore>) -> RenewalChannels {
    let hops: Vec<HopName> = hops.iter().map(|h| HopName::new(*h)).collect();
    RenewalService::spawn(
        RenewalConfig::new().wheel_tick(Duration::from_millis(10)),
        Arc::new(ShamirGenerator::with_seed(1)),
        Arc::new(StaticResolver::for_hops(&hops)),
        store,
    )
}

fn pot_path(name: &str, hops: &[&str], refresh: RefreshPeriod, profiles: u32) -> Path {
    Path::new(name, hops.iter().copied()).with_pot(PotSettings {
        refresh,
        profile_count: profiles,
        bit_width: 32,
    })
}

/// Wait for the first event matching `pred`, skipping the others.
async fn wait_for(
    events: &mut mpsc::Receiver<RenewalEvent>,
    pred: impl Fn(&RenewalEvent) -> bool,
) -> RenewalEvent {
    tokio::time::timeout(Duration::from_secs(30), async {
        loop {
            let event = events.recv().await.expect("event channel closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// P1 scenario: 3 hops, interval 0 ms (clamped to 500 ms), 1 profile
/// (clamped to 2). Seven writes, index 0, first renewal ~250 ms later.
#[tokio::test(start_paused = true)]
async fn provision_then_periodic_rotation() {
    init_tracing();
    let store = Arc::new(InMemoryConfigStore::new());
    let RenewalChannels { handle, mut events } = start(&HOPS, store.clone());
    let path = pot_path("P1", &HOPS, RefreshPeriod::millis(0), 1);

    handle.on_path_updated(&path).await.unwrap();

    let state = handle.state(&path.name).unwrap();
    assert_eq!(state.active_index, 0);
    assert_eq!(state.refresh_interval, Duration::from_millis(500));
    assert_eq!(state.profile_count, 2);
    assert_eq!(store.push_count(), 7);
    let trace = store.trace();
    assert!(trace[6].is_activation());
    assert!(trace[..6].iter().all(|op| !op.is_activation()));

    // Not yet: timer is armed for 500 - 250 ms
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(handle.state(&path.name).unwrap().active_index, 0);

    let event = wait_for(&mut events, |e| matches!(e, RenewalEvent::Renewed { .. })).await;
    assert_eq!(
        event,
        RenewalEvent::Renewed {
            path: path.name.clone(),
            previous: 0,
            active_index: 1,
        }
    );

    // And again, back to 0
    let event = wait_for(&mut events, |e| matches!(e, RenewalEvent::Renewed { .. })).await;
    assert!(matches!(event, RenewalEvent::Renewed { active_index: 0, .. }));
    assert_eq!(handle.metrics().renewals.get(), 2);
    assert!(handle.metrics().timers_fired.get() >= 2);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn duplicate_requests_run_sequentially() {
    init_tracing();
    let store = Arc::new(InMemoryConfigStore::new());
    let RenewalChannels { handle, mut events } = start(&HOPS, store.clone());
    let path = pot_path("P1", &HOPS, RefreshPeriod::secs(60), 2);
    handle.on_path_updated(&path).await.unwrap();

    store.set_latency(Some(Duration::from_millis(5)));
    handle.request_refresh(&path.name).unwrap();
    handle.request_refresh(&path.name).unwrap();

    wait_for(&mut events, |e| matches!(e, RenewalEvent::Renewed { active_index: 1, .. })).await;
    wait_for(&mut events, |e| matches!(e, RenewalEvent::Renewed { active_index: 0, .. })).await;

    assert_eq!(store.max_in_flight(), 1);
    let state = handle.state(&path.name).unwrap();
    assert_eq!(state.active_index, 0);
    assert_eq!(state.renewals, 2);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn stalled_path_recovers_on_operator_refresh() {
    init_tracing();
    let store = Arc::new(InMemoryConfigStore::new());
    let hops = ["sff1", "sff2", "sff3", "sff4"];
    let RenewalChannels { handle, mut events } = start(&hops, store.clone());
    let path = pot_path("P4", &hops, RefreshPeriod::secs(1), 2);
    handle.on_path_updated(&path).await.unwrap();

    store.fail_endpoint(EndpointId::new("ep-sff2"));
    store.clear_trace();

    let event = wait_for(&mut events, |e| matches!(e, RenewalEvent::RenewalStalled { .. })).await;
    assert!(matches!(event, RenewalEvent::RenewalStalled { active_index: 0, .. }));

    // Hops 1, 3, 4 still got their pushes, nobody got an activation
    let trace = store.trace();
    for ep in ["ep-sff1", "ep-sff3", "ep-sff4"] {
        assert!(trace.iter().any(|op| op.endpoint().as_str() == ep));
    }
    assert!(!trace.iter().any(WriteOp::is_activation));

    let state = handle.state(&path.name).unwrap();
    assert_eq!(state.active_index, 0);
    assert!(state.timer.is_none());
    assert!(matches!(state.health, RenewalHealth::Stalled { .. }));
    assert_eq!(handle.stalled_paths(), vec![path.name.clone()]);

    // No auto-refresh while stalled
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(handle.state(&path.name).unwrap().active_index, 0);

    store.heal_endpoint(&EndpointId::new("ep-sff2"));
    handle.request_refresh(&path.name).unwrap();
    wait_for(&mut events, |e| matches!(e, RenewalEvent::Renewed { .. })).await;

    let state = handle.state(&path.name).unwrap();
    assert_eq!(state.active_index, 1);
    assert_eq!(state.health, RenewalHealth::Active);
    assert!(state.timer.is_some());
    assert!(handle.stalled_paths().is_empty());

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn delete_during_pass_leaves_nothing_behind() {
    init_tracing();
    let store = Arc::new(InMemoryConfigStore::new());
    let RenewalChannels { handle, mut events } = start(&HOPS, store.clone());
    let path = pot_path("P1", &HOPS, RefreshPeriod::secs(60), 2);
    handle.on_path_updated(&path).await.unwrap();

    // 7 pushes at 10 ms each: the pass is mid-flight when the delete lands
    store.set_latency(Some(Duration::from_millis(10)));
    handle.request_refresh(&path.name).unwrap();
    tokio::time::sleep(Duration::from_millis(25)).await;

    let report = handle.on_path_deleted(&path).await.unwrap();
    assert!(report.had_state);
    assert_eq!(report.deletes, 3);

    wait_for(&mut events, |e| matches!(e, RenewalEvent::RenewalSkipped { .. })).await;

    assert!(handle.state(&path.name).is_none());
    assert!(store.is_empty());
    assert!(handle.paths().is_empty());

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn independent_paths_rotate_on_their_own_schedule() {
    init_tracing();
    let store = Arc::new(InMemoryConfigStore::new());
    let RenewalChannels { handle, mut events } = start(&HOPS, store.clone());
    let fast = pot_path("fast", &HOPS, RefreshPeriod::millis(600), 2);
    let slow = pot_path("slow", &HOPS, RefreshPeriod::secs(10), 2);
    handle.on_path_updated(&fast).await.unwrap();
    handle.on_path_updated(&slow).await.unwrap();

    for _ in 0..3 {
        let event = wait_for(&mut events, |e| matches!(e, RenewalEvent::Renewed { .. })).await;
        assert_eq!(event.path(), &fast.name);
    }
    assert_eq!(handle.state(&slow.name).unwrap().renewals, 0);
    assert_eq!(handle.state(&fast.name).unwrap().renewals, 3);

    handle.on_path_deleted(&fast).await.unwrap();
    handle.on_path_deleted(&slow).await.unwrap();
    assert!(store.is_empty());
    assert_eq!(handle.metrics().active_paths.get(), 0);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn two_hop_path_is_never_provisioned() {
    init_tracing();
    let store = Arc::new(InMemoryConfigStore::new());
    let RenewalChannels { handle, mut events } = start(&["a", "b"], store.clone());
    let path = pot_path("P2", &["a", "b"], RefreshPeriod::secs(1), 2);

    assert!(handle.on_path_updated(&path).await.is_err());
    let event = wait_for(&mut events, |e| {
        matches!(e, RenewalEvent::ProvisioningFailed { .. })
    })
    .await;
    assert_eq!(event.path(), &PathId::new("P2"));
    assert!(handle.state(&path.name).is_none());
    assert!(store.trace().is_empty());

    handle.shutdown().await;
}
