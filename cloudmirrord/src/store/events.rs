#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Created,
    Updated,
    Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Item,
    Directory,
}

/// Advisory change notification, published after the owning transaction
/// commits. Nothing in the store depends on it being received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEvent {
    pub kind: EventKind,
    pub record: RecordKind,
    pub account: String,
    pub id: String,
    pub path: String,
    pub etag: String,
}
