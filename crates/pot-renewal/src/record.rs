/// Distribution record: what was written where for one path.
///
/// Teardown deletes exactly the targets recorded here, one remote delete
/// per `(endpoint, key)`, however many profiles were pushed to it.
use std::collections::{BTreeMap, BTreeSet};

use crate::types::{ConfigKey, EndpointId, HopName, ProfileIndex};

/// A remote configuration location.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConfigTarget {
    pub endpoint: EndpointId,
    pub key: ConfigKey,
}

/// What a single target is known to hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetRecord {
    pub hop: HopName,
    /// Profile indices successfully written to this target.
    pub profiles: BTreeSet<ProfileIndex>,
    /// Last activation index written to this target, if any.
    pub activated: Option<ProfileIndex>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DistributionRecord {
    targets: BTreeMap<ConfigTarget, TargetRecord>,
}

impl DistributionRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Note a successful write of `profile` (optionally activating it) to `target`.
    pub fn record_push(
        &mut self,
        hop: &HopName,
        target: ConfigTarget,
        profile: ProfileIndex,
        activate: Option<ProfileIndex>,
    ) {
        let entry = self.targets.entry(target).or_insert_with(|| TargetRecord {
            hop: hop.clone(),
            profiles: BTreeSet::new(),
            activated: None,
        });
        entry.profiles.insert(profile);
        if activate.is_some() {
            entry.activated = activate;
        }
    }

    pub fn targets(&self) -> impl Iterator<Item = (&ConfigTarget, &TargetRecord)> {
        self.targets.iter()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Whether every hop in `hops` holds profile `index` on some target.
    pub fn covers(&self, hops: &[HopName], index: ProfileIndex) -> bool {
        hops.iter().all(|hop| {
            self.targets
                .values()
                .any(|t| &t.hop == hop && t.profiles.contains(&index))
        })
    }

    /// Activation index last written to `hop`, if any.
    pub fn activated_on(&self, hop: &HopName) -> Option<ProfileIndex> {
        self.targets
            .values()
            .filter(|t| &t.hop == hop)
            .find_map(|t| t.activated)
    }
}
