//! Partition ranges and the partition-probe seam.
//!
//! Partition *table parsing* is not part of this layer. Whoever knows the
//! on-disk table formats installs a [`PartitionProber`]; [`Disk::open`]
//! invokes it for device names that carry a partition specification.

use alloc::{boxed::Box, sync::Arc};
use spin::Mutex;

use crate::{Disk, DiskError};

/// A partition range in logical sectors, relative to its parent.
///
/// Nested partitioning schemes chain from innermost to outermost through
/// `parent`; address translation applies each `start` in that order and
/// checks containment at every level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    /// First sector of the partition, relative to the parent.
    pub start: u64,
    /// Length in logical sectors.
    pub len: u64,
    /// Enclosing partition, if nested.
    pub parent: Option<Box<Partition>>,
}

/// Resolves a partition specification against an open disk.
pub trait PartitionProber: Send + Sync {
    /// Resolve `spec` (the part after the comma in a device name) into a
    /// partition chain, innermost first.
    ///
    /// The prober may read from `disk`; addressing is still whole-device
    /// at this point since no chain is attached yet.
    fn probe(&self, disk: &mut Disk, spec: &str) -> Result<Partition, DiskError>;
}

static PROBER: Mutex<Option<Arc<dyn PartitionProber>>> = Mutex::new(None);

/// Install (or clear) the partition prober used by [`Disk::open`].
pub fn set_partition_prober(prober: Option<Arc<dyn PartitionProber>>) {
    *PROBER.lock() = prober;
}

pub(crate) fn prober() -> Option<Arc<dyn PartitionProber>> {
    PROBER.lock().clone()
}
