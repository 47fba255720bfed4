//! Backend client contract.

use crate::config::CallOptions;
use crate::Result;
use async_trait::async_trait;

/// A backend that answers for many keys in one round trip.
///
/// Implementations are identified by [`endpoint`](BackendClient::endpoint):
/// two clients reporting the same endpoint share one coalescing channel.
#[async_trait]
pub trait BackendClient: Send + Sync + 'static {
    type Record: Clone + Send + Sync + 'static;

    /// Stable destination identity, e.g. the RPC URL.
    fn endpoint(&self) -> &str;

    /// Fetch `keys` in one call.
    ///
    /// On success the returned list is positionally aligned with `keys`; a
    /// missing trailing entry or `None` means the key has no record. The call
    /// fails atomically for the whole key list.
    async fn fetch_many(
        &self,
        keys: &[String],
        options: &CallOptions,
    ) -> Result<Vec<Option<Self::Record>>>;
}
