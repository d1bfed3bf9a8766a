use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use page_store_common::{PageNumber, TransactionId};

use crate::index::IndexPage;

/// In-memory state of one page within a snapshot.
///
/// `baseline` is what the backend holds (or held after materializing
/// patches) and is never mutated once set; `working` exists only after
/// `get_for_update` and is the transaction's private mutable copy. A clean
/// entry hands readers the baseline itself, so reads allocate nothing.
pub(crate) struct PageEntry {
    pub baseline: Arc<Vec<u8>>,
    pub working: Option<Vec<u8>>,
}

impl PageEntry {
    pub fn new(baseline: Arc<Vec<u8>>) -> Self {
        Self {
            baseline,
            working: None,
        }
    }

    pub fn current(&self) -> &[u8] {
        self.working.as_deref().unwrap_or(&self.baseline)
    }

    pub fn is_dirty(&self) -> bool {
        self.working.is_some()
    }
}

/// In-memory view pinned to one index transaction id. Pages load lazily;
/// the tree-page cache keeps resolved locator pages around for the life of
/// the snapshot.
pub(crate) struct Snapshot {
    pub transaction_id: TransactionId,
    pub index: IndexPage,
    pub entries: HashMap<PageNumber, PageEntry>,
    pub tree_pages: HashMap<PageNumber, Arc<Vec<u8>>>,
}

impl Snapshot {
    pub fn new(transaction_id: TransactionId, index: IndexPage) -> Self {
        Self {
            transaction_id,
            index,
            entries: HashMap::new(),
            tree_pages: HashMap::new(),
        }
    }

    /// Discard the writes of a failed closure attempt. Baselines stay, so
    /// the rerun sees the same snapshot without refetching anything.
    pub fn reset_dirty(&mut self) {
        for entry in self.entries.values_mut() {
            entry.working = None;
        }
    }
}

/// Why a page access could not be served from the snapshot. `NeedsPage` is
/// an internal signal: closures propagate it with `?` and only the engine's
/// run loops handle it, by loading the page and rerunning the closure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessError {
    /// The page is not in the snapshot yet; the engine must fetch it.
    NeedsPage(PageNumber),
    /// The page number is above `max_normal_page_number`.
    PageOutOfRange(PageNumber),
}

pub type AccessResult<T> = Result<T, AccessError>;

/// The read/write surface handed to transaction closures and read actions.
/// Synchronous by design: both operations either answer from the snapshot
/// or fail with `NeedsPage`.
pub struct PageAccess<'a> {
    snapshot: &'a mut Snapshot,
    recorded: Option<&'a mut HashSet<PageNumber>>,
}

impl<'a> PageAccess<'a> {
    pub(crate) fn new(
        snapshot: &'a mut Snapshot,
        recorded: Option<&'a mut HashSet<PageNumber>>,
    ) -> Self {
        Self { snapshot, recorded }
    }

    fn entry(&mut self, page: PageNumber) -> AccessResult<&mut PageEntry> {
        if page > self.snapshot.index.max_normal_page_number {
            return Err(AccessError::PageOutOfRange(page));
        }
        if let Some(recorded) = self.recorded.as_deref_mut() {
            recorded.insert(page);
        }
        match self.snapshot.entries.get_mut(&page) {
            Some(entry) => Ok(entry),
            None => Err(AccessError::NeedsPage(page)),
        }
    }

    /// Current bytes of a page. After `get_for_update` in the same attempt
    /// this returns the mutable buffer's contents.
    pub fn get(&mut self, page: PageNumber) -> AccessResult<&[u8]> {
        Ok(self.entry(page)?.current())
    }

    /// Mutable bytes of a page, marking it dirty. The first call copies the
    /// baseline; later calls return the same buffer.
    pub fn get_for_update(&mut self, page: PageNumber) -> AccessResult<&mut [u8]> {
        let entry = self.entry(page)?;
        let PageEntry {
            baseline, working, ..
        } = entry;
        Ok(working.get_or_insert_with(|| baseline.as_ref().clone()))
    }
}
