use std::fmt;

/// What the upsert engine did with one matched pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncAction {
    Created,
    Updated,
    Deleted,
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SyncAction::Created => "created",
            SyncAction::Updated => "updated",
            SyncAction::Deleted => "deleted",
        })
    }
}

/// The outcome of reconciling one pair.
///
/// `record` is the downstream record as returned by the inventory after the
/// write (for deletions, the record as it was before removal). `source` is
/// the authoritative snapshot the record now reflects; it is `None` exactly
/// when `action` is [`SyncAction::Deleted`].
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled<R, A> {
    pub record: R,
    pub source: Option<A>,
    pub action: SyncAction,
}
