use crate::types::{ConfigKey, EndpointId, HopName};

/// Resolves a hop to the endpoint its configuration is written to.
///
/// In production: backed by the controller's topology store.
/// In tests and the simulator: [`StaticResolver`](crate::memory::StaticResolver).
pub trait HopResolver: Send + Sync {
    /// `None` when the hop is unknown or currently unreachable.
    fn resolve(&self, hop: &HopName) -> Option<EndpointId>;
}

/// Remote configuration writes on hops.
///
/// Each call is one blocking round trip from the caller's point of view;
/// the coordinator never issues two at once.
#[async_trait::async_trait]
pub trait ConfigWriter: Send + Sync {
    /// Write (merge) `payload` under `key` on `endpoint`.
    async fn push_config(
        &self,
        endpoint: &EndpointId,
        key: &ConfigKey,
        payload: &[u8],
    ) -> Result<(), String>;

    /// Remove everything under `key` on `endpoint`.
    async fn delete_config(&self, endpoint: &EndpointId, key: &ConfigKey) -> Result<(), String>;
}
