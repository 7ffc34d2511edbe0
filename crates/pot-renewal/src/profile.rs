/// Verification profiles and the per-hop payloads pushed to hops.
///
/// A `ProfileSet` is immutable once generated. What a hop receives is a
/// `HopPayload`: its own slice of one profile, plus the activation flag that
/// only the first hop ever sees set.
///
/// Wire format: MessagePack.
use serde::{Deserialize, Serialize};

use crate::error::PotError;
use crate::types::{PathId, ProfileIndex};

/// One hop's slice of a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HopShare {
    /// Lagrange basis coefficient at zero for this hop's point.
    pub lpc: u64,
    /// Secret polynomial share.
    pub share: u64,
    /// Public polynomial evaluated at this hop's point.
    pub public_coefficient: u64,
}

/// One candidate verification profile for a path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub prime: u64,
    pub bit_width: u32,
    /// Full validation secret, only handed to the validating hop.
    pub validator_secret: u64,
    /// Per-hop slices, in hop order.
    pub shares: Vec<HopShare>,
}

/// Candidate profiles for one path; exactly one is active at a time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileSet {
    pub path: PathId,
    pub profiles: Vec<Profile>,
}

impl ProfileSet {
    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    pub fn get(&self, index: ProfileIndex) -> Option<&Profile> {
        self.profiles.get(index as usize)
    }

    /// Whether every profile carries exactly `hops` slices.
    pub fn covers_hops(&self, hops: usize) -> bool {
        !self.profiles.is_empty() && self.profiles.iter().all(|p| p.shares.len() == hops)
    }

    /// Build the payload for hop `hop_index` of profile `profile_index`.
    ///
    /// The last hop validates, so it also gets the secret.
    pub fn hop_payload(
        &self,
        profile_index: ProfileIndex,
        hop_index: usize,
        activate: Option<ProfileIndex>,
    ) -> Option<HopPayload> {
        let profile = self.get(profile_index)?;
        let share = *profile.shares.get(hop_index)?;
        let is_validator = hop_index + 1 == profile.shares.len();
        Some(HopPayload {
            path: self.path.clone(),
            hop_index: hop_index as u32,
            profile_index,
            profile: HopProfile {
                prime: profile.prime,
                bit_width: profile.bit_width,
                share,
                validator_secret: is_validator.then_some(profile.validator_secret),
            },
            activate,
        })
    }
}

/// The profile material one hop needs to participate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HopProfile {
    pub prime: u64,
    pub bit_width: u32,
    pub share: HopShare,
    pub validator_secret: Option<u64>,
}

/// What is written under a path's config key on a hop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HopPayload {
    pub path: PathId,
    pub hop_index: u32,
    pub profile_index: ProfileIndex,
    pub profile: HopProfile,
    /// `Some(i)` tells the hop to start tagging traffic with profile `i`.
    pub activate: Option<ProfileIndex>,
}

impl HopPayload {
    pub fn to_bytes(&self) -> Result<Vec<u8>, PotError> {
        Ok(rmp_serde::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PotError> {
        Ok(rmp_serde::from_slice(bytes)?)
    }

    pub fn is_activation(&self) -> bool {
        self.activate.is_some()
    }
}
