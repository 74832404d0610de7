use crate::store::ItemRecord;

#[derive(Debug, Clone, PartialEq)]
pub struct ListingPartition {
    pub own: ItemRecord,
    pub child_directories: Vec<ItemRecord>,
    pub children: Vec<ItemRecord>,
}

/// Splits one directory listing in a single pass. The first record pushed
/// describes the listed directory; every later record is a child. Pages of
/// the same listing can be pushed one after another.
#[derive(Debug, Default)]
pub struct ListingPartitioner {
    own: Option<ItemRecord>,
    child_directories: Vec<ItemRecord>,
    children: Vec<ItemRecord>,
}

impl ListingPartitioner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: ItemRecord) {
        if self.own.is_none() {
            self.own = Some(record);
            return;
        }
        if record.is_directory {
            self.child_directories.push(record.clone());
        }
        self.children.push(record);
    }

    /// `None` when nothing was pushed.
    pub fn finish(self) -> Option<ListingPartition> {
        let own = self.own?;
        Some(ListingPartition {
            own,
            child_directories: self.child_directories,
            children: self.children,
        })
    }
}

pub fn partition(records: impl IntoIterator<Item = ItemRecord>) -> Option<ListingPartition> {
    let mut partitioner = ListingPartitioner::new();
    for record in records {
        partitioner.push(record);
    }
    partitioner.finish()
}
