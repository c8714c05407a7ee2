use crate::core::domain::{
    error::{SyncError, SyncResult},
    model::{
        netbox::DownstreamRecord,
        reconciled::{Reconciled, SyncAction},
    },
    port::{Criteria, Inventory},
};
use crate::core::infrastructure::worker_pool::WorkerPool;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info};

/// Applies create/update/delete decisions for matched pairs and keeps every
/// record it writes tagged as externally managed.
///
/// The marker is a boolean custom field; managed fetches filter on it so
/// hand-made records are never matched, updated or deleted.
#[derive(Clone)]
pub struct UpsertService {
    inventory: Arc<dyn Inventory>,
    marker: Arc<str>,
    max_parallelism: usize,
}

impl UpsertService {
    pub fn new(inventory: Arc<dyn Inventory>, marker: &str, max_parallelism: usize) -> Self {
        Self {
            inventory,
            marker: Arc::from(marker),
            max_parallelism,
        }
    }

    /// Fetches records of `R` matching `criteria`, regardless of the marker.
    pub async fn fetch<R: DownstreamRecord>(&self, criteria: Criteria) -> SyncResult<Vec<R>> {
        let raw = self.inventory.filter(R::KIND, &criteria).await?;
        raw.into_iter().map(|value| decode::<R>(value)).collect()
    }

    /// Fetches the externally managed records of `R` matching `criteria`.
    pub async fn fetch_managed<R: DownstreamRecord>(
        &self,
        mut criteria: Criteria,
    ) -> SyncResult<Vec<R>> {
        criteria.push((format!("cf_{}", self.marker), "true".to_string()));
        self.fetch(criteria).await
    }

    /// Reconciles each `(downstream, authoritative)` pair:
    ///
    /// | downstream | authoritative | action |
    /// |---|---|---|
    /// | present | absent | delete |
    /// | absent | present | create from `to_fields` |
    /// | present | present | write `to_fields` over the record |
    ///
    /// Pairs are applied concurrently. The output holds one result per input
    /// pair, in input order, so a rejected write only fails its own slot.
    pub async fn upsert<R, A, F, M>(
        &self,
        pairs: Vec<(Option<R>, Option<A>)>,
        to_fields: M,
    ) -> Vec<SyncResult<Reconciled<R, A>>>
    where
        R: DownstreamRecord,
        A: Send + 'static,
        F: Serialize,
        M: Fn(&A) -> F,
    {
        let mut pool = WorkerPool::new(self.max_parallelism);

        for (record, source) in pairs {
            let payload = source
                .as_ref()
                .map(|source| managed_payload(&to_fields(source), &self.marker));
            let inventory = Arc::clone(&self.inventory);
            pool.spawn(async move { apply_pair(inventory.as_ref(), record, source, payload).await });
        }

        pool.join_all()
            .await
            .into_iter()
            .map(|joined| joined.and_then(|result| result))
            .collect()
    }

    /// Writes `fields` onto record `id` of `R`, tagged as externally managed.
    pub async fn patch<R, F>(&self, id: u64, fields: &F) -> SyncResult<R>
    where
        R: DownstreamRecord,
        F: Serialize,
    {
        let payload = managed_payload(fields, &self.marker)?;
        debug!(kind = %R::KIND, id, "patching record");
        decode(self.inventory.update(R::KIND, id, payload).await?)
    }
}

async fn apply_pair<R, A>(
    inventory: &dyn Inventory,
    record: Option<R>,
    source: Option<A>,
    payload: Option<SyncResult<Value>>,
) -> SyncResult<Reconciled<R, A>>
where
    R: DownstreamRecord,
{
    match (record, source, payload) {
        (Some(record), None, _) => {
            inventory.delete(R::KIND, record.id()).await?;
            info!(kind = %R::KIND, id = record.id(), "deleted record");
            Ok(Reconciled {
                record,
                source: None,
                action: SyncAction::Deleted,
            })
        }
        (None, Some(source), Some(payload)) => {
            let created: R = decode(inventory.create(R::KIND, payload?).await?)?;
            info!(kind = %R::KIND, id = created.id(), "created record");
            Ok(Reconciled {
                record: created,
                source: Some(source),
                action: SyncAction::Created,
            })
        }
        (Some(record), Some(source), Some(payload)) => {
            let updated: R = decode(inventory.update(R::KIND, record.id(), payload?).await?)?;
            debug!(kind = %R::KIND, id = updated.id(), "updated record");
            Ok(Reconciled {
                record: updated,
                source: Some(source),
                action: SyncAction::Updated,
            })
        }
        _ => Err(SyncError::InvalidInput(format!(
            "{} pair without either side",
            R::KIND
        ))),
    }
}

/// Serializes a field map and sets the externally managed marker in its
/// `custom_fields`, keeping any custom fields the map already carries.
pub(crate) fn managed_payload<F: Serialize>(fields: &F, marker: &str) -> SyncResult<Value> {
    let mut value =
        serde_json::to_value(fields).map_err(|e| SyncError::decode("field map", e))?;
    let object = value.as_object_mut().ok_or_else(|| {
        SyncError::InvalidInput("field map did not serialize to an object".to_string())
    })?;
    let custom_fields = object
        .entry("custom_fields")
        .or_insert_with(|| Value::Object(Map::new()));
    if !custom_fields.is_object() {
        *custom_fields = Value::Object(Map::new());
    }
    if let Some(custom_fields) = custom_fields.as_object_mut() {
        custom_fields.insert(marker.to_string(), Value::Bool(true));
    }
    Ok(value)
}

fn decode<R: DownstreamRecord>(value: Value) -> SyncResult<R> {
    serde_json::from_value(value).map_err(|e| SyncError::decode(R::KIND.to_string(), e))
}

/// Collapses per-pair results, failing on the first rejected write.
pub fn all_or_first_error<T>(results: Vec<SyncResult<T>>) -> SyncResult<Vec<T>> {
    results.into_iter().collect()
}
