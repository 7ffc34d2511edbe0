use crate::types::{HopName, PathId};

/// Errors raised while provisioning, renewing or tearing down a path's
/// proof-of-transit profile.
///
/// Parameter-bound violations (refresh interval, profile count, bit width)
/// are clamped and never surface here.
#[derive(Debug, thiserror::Error)]
pub enum PotError {
    #[error("path {path} has {hops} hops, proof-of-transit needs at least {min}")]
    TooFewHops {
        path: PathId,
        hops: usize,
        min: usize,
    },

    #[error("proof-of-transit is not enabled on path {0}")]
    PotDisabled(PathId),

    #[error("parameter generator returned no profiles for path {0}")]
    GeneratorFailed(PathId),

    #[error("parameter generator has no next index for path {path} (current {current})")]
    NoNextIndex { path: PathId, current: u32 },

    #[error("distribution failed for path {path} on hops {failed:?}")]
    Distribution { path: PathId, failed: Vec<HopName> },

    #[error("no renewal state for path {0}")]
    UnknownPath(PathId),

    #[error("payload encoding failed: {0}")]
    Encode(String),

    #[error("payload decoding failed: {0}")]
    Decode(String),

    #[error("renewal service is shut down")]
    Shutdown,
}

impl From<rmp_serde::encode::Error> for PotError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        PotError::Encode(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for PotError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        PotError::Decode(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_too_few_hops() {
        let err = PotError::TooFewHops {
            path: PathId::new("P1"),
            hops: 2,
            min: 3,
        };
        assert_eq!(
            err.to_string(),
            "path P1 has 2 hops, proof-of-transit needs at least 3"
        );
    }

    #[test]
    fn test_display_distribution() {
        let err = PotError::Distribution {
            path: PathId::new("P1"),
            failed: vec![HopName::new("sff2")],
        };
        assert_eq!(
            err.to_string(),
            "distribution failed for path P1 on hops [HopName(\"sff2\")]"
        );
    }

    #[test]
    fn test_display_generator_failed() {
        let err = PotError::GeneratorFailed(PathId::new("P9"));
        assert_eq!(
            err.to_string(),
            "parameter generator returned no profiles for path P9"
        );
    }

    #[test]
    fn test_display_shutdown() {
        assert_eq!(PotError::Shutdown.to_string(), "renewal service is shut down");
    }
}
