use std::sync::Arc;

use anyhow::{bail, Context};
use rand::{Rng, SeedableRng};

use pot_renewal::shamir::{add_mod, transit_step};
use pot_renewal::{
    ConfigKey, EndpointId, HopName, HopProfile, HopResolver, InMemoryConfigStore, Path,
    PotSettings, RefreshPeriod, RenewalConfig, RenewalCoordinator, ScheduleWheel,
    ShamirGenerator, StaticResolver,
};

use crate::events::{emit, EventStarted, EventVerify};

pub struct VerifyConfig {
    pub hops: usize,
    pub profiles: u32,
    pub bit_width: u32,
    pub packets: u32,
    pub rotations: u32,
    pub seed: u64,
}

/// Provision one path, then push packets through the profile every hop
/// actually received and check the validator's verdict. Repeated after
/// each rotation.
pub async fn run(renewal: RenewalConfig, config: VerifyConfig) -> anyhow::Result<()> {
    let hop_names: Vec<HopName> = (1..=config.hops)
        .map(|i| HopName::new(format!("sff{i}")))
        .collect();
    let resolver = Arc::new(StaticResolver::for_hops(&hop_names));
    let store = Arc::new(InMemoryConfigStore::new());
    let wheel = ScheduleWheel::new(renewal.tick(), 64);
    let coordinator = RenewalCoordinator::new(
        renewal,
        wheel,
        Arc::new(ShamirGenerator::with_seed(config.seed)),
        resolver.clone(),
        store.clone(),
    );

    let path = Path::new("verify", hop_names.iter().map(|h| h.as_str().to_string())).with_pot(
        PotSettings {
            refresh: RefreshPeriod::secs(60),
            profile_count: config.profiles,
            bit_width: config.bit_width,
        },
    );
    emit(&EventStarted::new("verify", 1, config.hops));

    coordinator.provision(&path).await?;
    let mut rng = rand::rngs::StdRng::seed_from_u64(config.seed ^ 0x5eed);

    for round in 0..=config.rotations {
        if round > 0 {
            coordinator.renew(&path.name).await?;
        }
        let key = ConfigKey::for_path(&path.name);

        // What each hop holds for the index the first hop activated.
        let first = store
            .config(&EndpointId::new(format!("ep-{}", hop_names[0])), &key)
            .context("first hop has no configuration")?;
        let active = first.active.context("first hop has no active profile")?;

        let mut hop_profiles: Vec<HopProfile> = Vec::with_capacity(hop_names.len());
        for hop in &hop_names {
            let endpoint = resolver
                .resolve(hop)
                .with_context(|| format!("hop {hop} does not resolve"))?;
            let held = store
                .config(&endpoint, &key)
                .with_context(|| format!("hop {hop} has no configuration"))?;
            let profile = held
                .profiles
                .get(&active)
                .copied()
                .with_context(|| format!("hop {hop} lacks profile {active}"))?;
            hop_profiles.push(profile);
        }

        let validator_secret = hop_profiles
            .last()
            .and_then(|p| p.validator_secret)
            .context("validator hop has no secret")?;
        let prime = hop_profiles[0].prime;
        if hop_profiles.iter().any(|p| p.prime != prime) {
            bail!("hops disagree on the prime of profile {active}");
        }

        let mut verified = 0;
        let mut tampered_rejected = 0;
        for _ in 0..config.packets {
            let rnd = rng.random_range(0..prime);
            let cumulative = hop_profiles
                .iter()
                .fold(0, |acc, p| transit_step(acc, &p.share, rnd, prime));
            if cumulative == add_mod(validator_secret, rnd, prime) {
                verified += 1;
            }

            // Same packet, one hop bypassed.
            let skip = rng.random_range(0..hop_profiles.len());
            let bypassed = hop_profiles
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != skip)
                .fold(0, |acc, (_, p)| transit_step(acc, &p.share, rnd, prime));
            if bypassed != add_mod(validator_secret, rnd, prime) {
                tampered_rejected += 1;
            }
        }

        emit(&EventVerify {
            event: "verify",
            path: path.name.to_string(),
            active_index: active,
            prime,
            packets: config.packets,
            verified,
            tampered_rejected,
        });
        if verified != config.packets {
            bail!(
                "profile {active}: {} of {} packets failed verification",
                config.packets - verified,
                config.packets
            );
        }
    }

    coordinator.teardown(&path.name).await;
    if !store.is_empty() {
        bail!("configuration left on hops after teardown");
    }
    Ok(())
}
