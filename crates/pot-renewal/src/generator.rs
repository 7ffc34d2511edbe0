/// Verification parameter generation.
///
/// The coordinator only sees [`ParameterGenerator`]. [`ShamirGenerator`] is
/// the in-process implementation built on [`crate::shamir`].
use std::collections::HashMap;
use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::profile::ProfileSet;
use crate::shamir::generate_profile;
use crate::types::{PathId, ProfileIndex, RefreshPeriod};
use crate::util::lock;

/// Source of per-path verification profile sets.
pub trait ParameterGenerator: Send + Sync {
    /// Compute a fresh set of `profile_count` profiles for a path of `hop_count` hops.
    ///
    /// Returns `None` if the generator cannot produce parameters for this path.
    fn get_parameters(
        &self,
        path: &PathId,
        hop_count: usize,
        refresh: RefreshPeriod,
        bit_width: u32,
        profile_count: u32,
    ) -> Option<ProfileSet>;

    /// Pick the index to activate after `current`, recomputing the set if needed.
    ///
    /// The profile at `current` must stay untouched: hops keep validating
    /// with it until the first hop switches.
    fn next_active_index(
        &self,
        path: &PathId,
        hop_count: usize,
        current: ProfileIndex,
    ) -> Option<ProfileIndex>;

    /// The current profile set for a path.
    fn parameters(&self, path: &PathId) -> Option<ProfileSet>;

    /// Forget everything about a path.
    fn release(&self, path: &PathId);
}

/// Shamir secret-sharing generator with round-robin rotation.
pub struct ShamirGenerator {
    sets: Mutex<HashMap<PathId, ProfileSet>>,
    rng: Mutex<StdRng>,
}

impl ShamirGenerator {
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_os_rng())
    }

    /// Deterministic generator (for testing and simulations).
    pub fn with_seed(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(rng: StdRng) -> Self {
        Self {
            sets: Mutex::new(HashMap::new()),
            rng: Mutex::new(rng),
        }
    }

    /// Number of paths with a cached set.
    pub fn len(&self) -> usize {
        lock(&self.sets).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ShamirGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl ParameterGenerator for ShamirGenerator {
    fn get_parameters(
        &self,
        path: &PathId,
        hop_count: usize,
        _refresh: RefreshPeriod,
        bit_width: u32,
        profile_count: u32,
    ) -> Option<ProfileSet> {
        if hop_count == 0 || profile_count == 0 {
            return None;
        }

        let profiles = {
            let mut rng = lock(&self.rng);
            (0..profile_count)
                .map(|_| generate_profile(hop_count, bit_width, &mut *rng))
                .collect()
        };
        let set = ProfileSet {
            path: path.clone(),
            profiles,
        };

        lock(&self.sets).insert(path.clone(), set.clone());
        Some(set)
    }

    fn next_active_index(
        &self,
        path: &PathId,
        hop_count: usize,
        current: ProfileIndex,
    ) -> Option<ProfileIndex> {
        let mut sets = lock(&self.sets);
        let set = sets.get_mut(path)?;
        if !set.covers_hops(hop_count) || current as usize >= set.len() {
            return None;
        }

        let next = (current + 1) % set.len() as ProfileIndex;

        // Regenerate everything except the live profile.
        let mut rng = lock(&self.rng);
        for (i, profile) in set.profiles.iter_mut().enumerate() {
            if i as ProfileIndex != current {
                *profile = generate_profile(hop_count, profile.bit_width, &mut *rng);
            }
        }

        tracing::debug!(%path, current, next, "recomputed inactive profiles");
        Some(next)
    }

    fn parameters(&self, path: &PathId) -> Option<ProfileSet> {
        lock(&self.sets).get(path).cloned()
    }

    fn release(&self, path: &PathId) {
        lock(&self.sets).remove(path);
    }
}
