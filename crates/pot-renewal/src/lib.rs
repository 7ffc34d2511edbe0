//! Proof-of-transit profile renewal.
//!
//! Keeps the proof-of-transit material of every enabled service path fresh.
//! Each path gets a set of verification profiles; one is active at a time
//! and is rotated periodically without ever exposing a hop to an index it
//! cannot validate.
//!
//! Pieces: a hashed timer wheel arms one renewal per path, a fired timer
//! queues the path, a single worker drains the queue, and the coordinator
//! runs generate → distribute (inactive, every hop) → activate (first hop).
//!
//! Wire format for hop configuration: MessagePack.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod external;
pub mod generator;
pub mod memory;
pub mod metrics;
pub mod profile;
pub mod queue;
pub mod record;
pub mod registry;
pub mod service;
pub mod shamir;
pub mod types;
pub mod wheel;

mod util;

pub use config::{RenewalConfig, MAX_BIT_WIDTH, MIN_BIT_WIDTH};
pub use coordinator::{RenewalCoordinator, RenewalOutcome, TeardownReport};
pub use error::PotError;
pub use events::RenewalEvent;
pub use external::{ConfigWriter, HopResolver};
pub use generator::{ParameterGenerator, ShamirGenerator};
pub use memory::{HopConfig, InMemoryConfigStore, StaticResolver, WriteOp};
pub use metrics::{Counter, Gauge, RenewalMetrics};
pub use profile::{HopPayload, HopProfile, HopShare, Profile, ProfileSet};
pub use queue::RefreshQueue;
pub use record::{ConfigTarget, DistributionRecord, TargetRecord};
pub use registry::{PathTimerRegistry, RenewalHealth, RenewalParams, RenewalState};
pub use service::{RenewalChannels, RenewalHandle, RenewalService};
pub use types::{
    duration_ms, now_ms, ConfigKey, EndpointId, HopName, Path, PathId, PotSettings, ProfileIndex,
    RefreshPeriod, TimeUnit, MIN_POT_HOPS,
};
pub use wheel::{ScheduleWheel, TimerHandle};
