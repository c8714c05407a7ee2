use crate::core::domain::{error::SyncResult, model::netbox::EntityKind};
use async_trait::async_trait;
use serde_json::Value;

/// Query parameters of a filtered listing. Keys may repeat (`device_id=1&device_id=2`).
pub type Criteria = Vec<(String, String)>;

/// CRUD access to the inventory, in its JSON wire representation.
///
/// Typed records and field maps are converted at this boundary by the
/// upsert engine.
#[async_trait]
pub trait Inventory: Send + Sync {
    async fn filter(&self, kind: EntityKind, criteria: &Criteria) -> SyncResult<Vec<Value>>;

    async fn create(&self, kind: EntityKind, fields: Value) -> SyncResult<Value>;

    /// Writes `fields` onto the record `id`, leaving unlisted fields untouched.
    async fn update(&self, kind: EntityKind, id: u64, fields: Value) -> SyncResult<Value>;

    async fn delete(&self, kind: EntityKind, id: u64) -> SyncResult<()>;
}
