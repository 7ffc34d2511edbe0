use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Minimum number of hops for proof-of-transit on a path.
pub const MIN_POT_HOPS: usize = 3;

/// Stable name of a rendered service path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PathId(String);

impl PathId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PathId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PathId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Name of a hop (service function forwarder) along a path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HopName(String);

impl HopName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HopName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for HopName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A reachable configuration endpoint for a hop, as returned by the resolver.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EndpointId(String);

impl EndpointId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Key under which a path's PoT configuration is written on a hop.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConfigKey(String);

impl ConfigKey {
    /// The per-path key used on every hop of `path`.
    pub fn for_path(path: &PathId) -> Self {
        Self(format!("pot/{path}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Index of a profile inside a [`ProfileSet`](crate::profile::ProfileSet).
pub type ProfileIndex = u32;

/// Unit of a requested refresh period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Milliseconds,
    Seconds,
}

/// Refresh period as requested on the path (unit + value).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshPeriod {
    pub unit: TimeUnit,
    pub value: u64,
}

impl RefreshPeriod {
    pub fn millis(value: u64) -> Self {
        Self {
            unit: TimeUnit::Milliseconds,
            value,
        }
    }

    pub fn secs(value: u64) -> Self {
        Self {
            unit: TimeUnit::Seconds,
            value,
        }
    }

    pub fn as_duration(&self) -> Duration {
        match self.unit {
            TimeUnit::Milliseconds => Duration::from_millis(self.value),
            TimeUnit::Seconds => Duration::from_secs(self.value),
        }
    }
}

/// Proof-of-transit settings attached to a path. Absent means PoT is disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PotSettings {
    pub refresh: RefreshPeriod,
    pub profile_count: u32,
    pub bit_width: u32,
}

/// A rendered service path, as seen by this subsystem.
///
/// Owned by the path renderer; only identity and hop order are read here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Path {
    pub name: PathId,
    pub hops: Vec<HopName>,
    /// Service function chain the path was rendered from.
    pub chain: String,
    pub pot: Option<PotSettings>,
}

impl Path {
    pub fn new(name: impl Into<String>, hops: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            name: PathId::new(name),
            hops: hops.into_iter().map(HopName::new).collect(),
            chain: String::new(),
            pot: None,
        }
    }

    /// Enable proof-of-transit with the given settings.
    pub fn with_pot(mut self, settings: PotSettings) -> Self {
        self.pot = Some(settings);
        self
    }

    pub fn with_chain(mut self, chain: impl Into<String>) -> Self {
        self.chain = chain.into();
        self
    }

    pub fn hop_count(&self) -> usize {
        self.hops.len()
    }

    pub fn pot_enabled(&self) -> bool {
        self.pot.is_some()
    }
}

/// Current Unix time in milliseconds.
pub fn now_ms() -> u64 {
    duration_ms(
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default(),
    )
}

/// Whole milliseconds in `d`, saturating at `u64::MAX`.
pub fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_period_units() {
        assert_eq!(RefreshPeriod::millis(750).as_duration(), Duration::from_millis(750));
        assert_eq!(RefreshPeriod::secs(3).as_duration(), Duration::from_secs(3));
    }

    #[test]
    fn duration_ms_saturates() {
        assert_eq!(duration_ms(Duration::from_millis(1500)), 1500);
        assert_eq!(duration_ms(Duration::MAX), u64::MAX);
    }

    #[test]
    fn config_key_is_per_path() {
        let key = ConfigKey::for_path(&PathId::new("rsp-7"));
        assert_eq!(key.as_str(), "pot/rsp-7");
    }

    #[test]
    fn path_builder() {
        let path = Path::new("P1", ["sff1", "sff2", "sff3"]).with_chain("sfc-a");
        assert_eq!(path.hop_count(), 3);
        assert!(!path.pot_enabled());
        assert_eq!(path.hops[1], HopName::from("sff2"));

        let path = path.with_pot(PotSettings {
            refresh: RefreshPeriod::secs(5),
            profile_count: 2,
            bit_width: 64,
        });
        assert!(path.pot_enabled());
    }

    #[test]
    fn time_unit_serializes_lowercase() {
        let json = serde_json::to_string(&RefreshPeriod::secs(2)).unwrap();
        assert_eq!(json, r#"{"unit":"seconds","value":2}"#);
    }
}
