use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex, Weak};

use page_store_codec::{compressed_u32_len, read_uint48, write_uint48, CodecError, UINT48_LEN};
use page_store_common::{
    BackendIndexPage, BackendPage, BackendPageIdentifier, PageNumber, PageStoreBackend, ReadResult,
    TransactionId, MAX_UINT48, UNINITIALIZED_TRANSACTION_ID,
};
use tokio::sync::Mutex;
use tracing::debug;

use crate::cache::PageCache;
use crate::config::PageStoreConfig;
use crate::index::{IndexEntry, IndexPage};
use crate::patch::{create_patches, patches_serialized_len};
use crate::recorder::{PageReadsRecorder, Subscription};
use crate::snapshot::{AccessError, AccessResult, PageAccess, PageEntry, Snapshot};
use crate::tree::{TreeCalc, TREE_ENTRY_SIZE};
use crate::StoreError;

/// Result of one `run_transaction` call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransactionOutcome {
    /// The commit went through; this is the new index transaction id.
    Committed(TransactionId),
    /// The closure returned `false`; nothing was written.
    Aborted,
    /// The combined stale-page and CAS-conflict budget ran out.
    RetryExhausted,
}

#[derive(Clone)]
struct CachedIndex {
    transaction_id: TransactionId,
    page: IndexPage,
}

struct StoreState {
    index: Option<CachedIndex>,
}

/// The transactional page store.
///
/// Presents fixed-size byte pages addressed by 48-bit page numbers on top
/// of any `PageStoreBackend`. Writers run an optimistic transaction
/// against a pinned snapshot and commit by compare-and-swap on the index
/// page; readers share snapshots freely.
pub struct PageStore {
    backend: Arc<dyn PageStoreBackend>,
    config: PageStoreConfig,
    tree: TreeCalc,
    state: Mutex<StoreState>,
    /// Serializes in-process writers; CAS handles everyone else.
    writer_lock: Mutex<()>,
    page_cache: PageCache,
    subscriptions: StdMutex<Vec<Weak<Subscription>>>,
}

impl PageStore {
    pub fn new(
        backend: Arc<dyn PageStoreBackend>,
        config: PageStoreConfig,
    ) -> Result<Self, StoreError> {
        config.validate(backend.max_page_size())?;
        let tree = TreeCalc::new(
            config.page_size,
            TREE_ENTRY_SIZE,
            config.max_normal_page_number,
        );
        if tree.max_page_number() > u32::MAX as u64 {
            return Err(StoreError::InvalidConfig(format!(
                "max page number {} exceeds the index encoding range",
                tree.max_page_number()
            )));
        }

        Ok(Self {
            backend,
            config,
            tree,
            state: Mutex::new(StoreState { index: None }),
            writer_lock: Mutex::new(()),
            page_cache: PageCache::new(1024),
            subscriptions: StdMutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &PageStoreConfig {
        &self.config
    }

    /// The transaction-id tree geometry of this store.
    pub fn tree_calc(&self) -> &TreeCalc {
        &self.tree
    }

    // -----------------------------------------------------------------
    // Public transaction surface
    // -----------------------------------------------------------------

    /// Run a transaction closure with the configured retry budget.
    ///
    /// The closure must be synchronous; it observes a fixed snapshot
    /// through the `PageAccess` and decides with its return value whether
    /// to commit (`true`) or abort (`false`). It may run several times:
    /// missing pages and commit conflicts both cause a rerun, and all
    /// uncommitted writes of a failed attempt are discarded.
    pub async fn run_transaction<F>(&self, closure: F) -> Result<TransactionOutcome, StoreError>
    where
        F: FnMut(&mut PageAccess<'_>) -> AccessResult<bool>,
    {
        self.run_transaction_with_retries(closure, self.config.retries)
            .await
    }

    /// `run_transaction` with an explicit retry budget.
    pub async fn run_transaction_with_retries<F>(
        &self,
        mut closure: F,
        retries: u32,
    ) -> Result<TransactionOutcome, StoreError>
    where
        F: FnMut(&mut PageAccess<'_>) -> AccessResult<bool>,
    {
        let _writer = self.writer_lock.lock().await;
        let mut retries_left = retries;

        'attempt: loop {
            let mut snapshot = self.acquire_snapshot().await?;

            let commit = loop {
                snapshot.reset_dirty();
                let result = {
                    let mut access = PageAccess::new(&mut snapshot, None);
                    closure(&mut access)
                };
                match result {
                    Ok(commit) => break commit,
                    Err(AccessError::NeedsPage(page)) => {
                        if !self.load_page(&mut snapshot, page).await? {
                            if retries_left == 0 {
                                return Ok(TransactionOutcome::RetryExhausted);
                            }
                            retries_left -= 1;
                            self.drop_cached_index().await;
                            continue 'attempt;
                        }
                    }
                    Err(AccessError::PageOutOfRange(page)) => {
                        return Err(StoreError::PageOutOfRange(page))
                    }
                }
            };

            if !commit {
                return Ok(TransactionOutcome::Aborted);
            }

            match self.commit_snapshot(snapshot).await? {
                Some(transaction_id) => {
                    return Ok(TransactionOutcome::Committed(transaction_id));
                }
                None => {
                    if retries_left == 0 {
                        return Ok(TransactionOutcome::RetryExhausted);
                    }
                    retries_left -= 1;
                    debug!(retries_left, "commit conflict, retrying");
                    self.drop_cached_index().await;
                }
            }
        }
    }

    /// Run a read-only action against the current snapshot. Records
    /// nothing and never invalidates.
    pub async fn read_only<T, F>(&self, action: F) -> Result<T, StoreError>
    where
        F: FnMut(&mut PageAccess<'_>) -> AccessResult<T>,
    {
        self.run_read(None, action).await
    }

    /// Create a recorder that tracks the pages its read actions observe
    /// and fires `callback` when a commit overwrites any of them.
    pub fn page_reads_recorder(
        self: Arc<Self>,
        callback: impl Fn() + Send + Sync + 'static,
    ) -> PageReadsRecorder {
        let subscription = Arc::new(Subscription::new(Box::new(callback)));
        self.subscriptions
            .lock()
            .unwrap()
            .push(Arc::downgrade(&subscription));
        PageReadsRecorder::new(self, subscription)
    }

    pub(crate) async fn run_read<T, F>(
        &self,
        subscription: Option<&Subscription>,
        mut action: F,
    ) -> Result<T, StoreError>
    where
        F: FnMut(&mut PageAccess<'_>) -> AccessResult<T>,
    {
        let mut retries_left = self.config.retries;

        'attempt: loop {
            let mut snapshot = self.acquire_snapshot().await?;
            loop {
                let result = {
                    let mut recorded = subscription.map(|s| s.recorded.lock().unwrap());
                    let mut access = PageAccess::new(&mut snapshot, recorded.as_deref_mut());
                    action(&mut access)
                };
                match result {
                    Ok(value) => return Ok(value),
                    Err(AccessError::NeedsPage(page)) => {
                        if !self.load_page(&mut snapshot, page).await? {
                            if retries_left == 0 {
                                return Err(StoreError::RetryExhausted);
                            }
                            retries_left -= 1;
                            self.drop_cached_index().await;
                            continue 'attempt;
                        }
                    }
                    Err(AccessError::PageOutOfRange(page)) => {
                        return Err(StoreError::PageOutOfRange(page))
                    }
                }
            }
        }
    }

    // -----------------------------------------------------------------
    // Snapshot acquisition and page loading
    // -----------------------------------------------------------------

    async fn acquire_snapshot(&self) -> Result<Snapshot, StoreError> {
        let mut state = self.state.lock().await;
        let cached = match &state.index {
            Some(cached) => cached.clone(),
            None => {
                let fetched = self.fetch_index().await?;
                state.index = Some(fetched.clone());
                fetched
            }
        };
        Ok(Snapshot::new(cached.transaction_id, cached.page))
    }

    async fn drop_cached_index(&self) {
        self.state.lock().await.index = None;
    }

    async fn fetch_index(&self) -> Result<CachedIndex, StoreError> {
        let result = self.read_with_retry(true, &[]).await?;
        match result.index_page {
            Some(index_page) if !index_page.is_uninitialized() => {
                let page = IndexPage::decode(&index_page.data, self.config.page_size)
                    .map_err(StoreError::CorruptIndex)?;
                if page.max_normal_page_number != self.config.max_normal_page_number {
                    return Err(StoreError::GeometryMismatch {
                        stored: page.max_normal_page_number,
                        configured: self.config.max_normal_page_number,
                    });
                }
                Ok(CachedIndex {
                    transaction_id: index_page.transaction_id,
                    page,
                })
            }
            _ => Ok(CachedIndex {
                transaction_id: UNINITIALIZED_TRANSACTION_ID,
                page: IndexPage::empty(self.config.max_normal_page_number),
            }),
        }
    }

    async fn read_with_retry(
        &self,
        include_index: bool,
        ids: &[BackendPageIdentifier],
    ) -> Result<ReadResult, StoreError> {
        match self.backend.read_pages(include_index, ids).await {
            Ok(result) => Ok(result),
            Err(err) => {
                debug!(%err, "backend read failed, retrying once");
                Ok(self.backend.read_pages(include_index, ids).await?)
            }
        }
    }

    /// Load one page into the snapshot. Returns `false` when a row the
    /// snapshot references no longer exists — the snapshot raced a
    /// concurrent commit's garbage collection and must be rebuilt.
    async fn load_page(
        &self,
        snapshot: &mut Snapshot,
        page: PageNumber,
    ) -> Result<bool, StoreError> {
        let index_entry = snapshot.index.entries.get(&page).cloned();
        let entry = match index_entry {
            Some(IndexEntry::Stored(transaction_id)) => {
                match self.fetch_page_bytes(page, transaction_id).await? {
                    Some(bytes) => PageEntry::new(bytes),
                    None => return Ok(false),
                }
            }
            Some(IndexEntry::Patches(patches)) => {
                let base = match self.load_base(snapshot, page).await? {
                    Some(base) => base,
                    None => return Ok(false),
                };
                let mut bytes = base.as_ref().clone();
                for patch in &patches {
                    patch.apply_to(&mut bytes);
                }
                PageEntry::new(Arc::new(bytes))
            }
            None => match self.load_base(snapshot, page).await? {
                Some(bytes) => PageEntry::new(bytes),
                None => return Ok(false),
            },
        };
        snapshot.entries.insert(page, entry);
        Ok(true)
    }

    /// The page's base version: the bytes stored under the transaction id
    /// its tree slot holds. Slot value 0 means the page was never stored
    /// and reads as zeroes.
    async fn load_base(
        &self,
        snapshot: &mut Snapshot,
        page: PageNumber,
    ) -> Result<Option<Arc<Vec<u8>>>, StoreError> {
        let transaction_id = match self.resolve_transaction_id(snapshot, page).await? {
            Some(transaction_id) => transaction_id,
            None => return Ok(None),
        };
        if transaction_id == UNINITIALIZED_TRANSACTION_ID {
            return Ok(Some(Arc::new(vec![0u8; self.config.page_size as usize])));
        }
        self.fetch_page_bytes(page, transaction_id).await
    }

    /// Walk the transaction-id tree to the slot holding `page`'s id.
    /// `Ok(None)` means a tree page row was missing (stale snapshot).
    async fn resolve_transaction_id(
        &self,
        snapshot: &mut Snapshot,
        page: PageNumber,
    ) -> Result<Option<TransactionId>, StoreError> {
        let root = self.tree.root_page_number();
        let root_transaction_id = match snapshot.index.entries.get(&root) {
            Some(IndexEntry::Stored(transaction_id)) => *transaction_id,
            Some(IndexEntry::Patches(_)) => {
                return Err(StoreError::CorruptIndex(CodecError::InvalidEncoding(
                    "tree root stored as patches",
                )))
            }
            None => UNINITIALIZED_TRANSACTION_ID,
        };
        if page == root {
            return Ok(Some(root_transaction_id));
        }

        let mut holder_transaction_id = root_transaction_id;
        for location in self.tree.path(page) {
            if holder_transaction_id == UNINITIALIZED_TRANSACTION_ID {
                return Ok(Some(UNINITIALIZED_TRANSACTION_ID));
            }
            let bytes = match self
                .fetch_tree_page(snapshot, location.page_number, holder_transaction_id)
                .await?
            {
                Some(bytes) => bytes,
                None => return Ok(None),
            };
            holder_transaction_id = read_uint48(&bytes, location.offset as usize)
                .map_err(StoreError::CorruptIndex)?;
        }
        Ok(Some(holder_transaction_id))
    }

    async fn fetch_tree_page(
        &self,
        snapshot: &mut Snapshot,
        page: PageNumber,
        transaction_id: TransactionId,
    ) -> Result<Option<Arc<Vec<u8>>>, StoreError> {
        if let Some(bytes) = snapshot.tree_pages.get(&page) {
            return Ok(Some(bytes.clone()));
        }
        match self.fetch_page_bytes(page, transaction_id).await? {
            Some(bytes) => {
                snapshot.tree_pages.insert(page, bytes.clone());
                Ok(Some(bytes))
            }
            None => Ok(None),
        }
    }

    async fn fetch_page_bytes(
        &self,
        page: PageNumber,
        transaction_id: TransactionId,
    ) -> Result<Option<Arc<Vec<u8>>>, StoreError> {
        let id = BackendPageIdentifier::new(page, transaction_id);
        if let Some(bytes) = self.page_cache.get(id) {
            return Ok(Some(bytes));
        }

        let result = self.read_with_retry(false, &[id]).await?;
        let found = result.pages.into_iter().find(|p| p.identifier == id);
        let mut data = match found {
            Some(page) => page.data,
            None => return Ok(None),
        };

        let page_size = self.config.page_size as usize;
        if data.len() > page_size {
            return Err(StoreError::CorruptIndex(CodecError::InvalidEncoding(
                "stored page larger than the page size",
            )));
        }
        data.resize(page_size, 0);
        let bytes = Arc::new(data);
        self.page_cache.insert(id, bytes.clone());
        Ok(Some(bytes))
    }

    // -----------------------------------------------------------------
    // Commit path
    // -----------------------------------------------------------------

    /// Build and submit the commit for a snapshot whose closure returned
    /// `true`. `Ok(None)` means the CAS lost (or the snapshot turned out
    /// stale while building) and the caller should retry.
    async fn commit_snapshot(
        &self,
        mut snapshot: Snapshot,
    ) -> Result<Option<TransactionId>, StoreError> {
        let previous = snapshot.transaction_id;
        let new_transaction_id = previous + 1;
        if new_transaction_id > MAX_UINT48 {
            return Err(StoreError::TransactionIdExhausted);
        }

        let page_size = self.config.page_size as usize;
        let mut new_index = snapshot.index.clone();
        let mut data_pages: Vec<BackendPage> = Vec::new();
        let mut changed: Vec<PageNumber> = Vec::new();

        let mut dirty: Vec<PageNumber> = snapshot
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_dirty())
            .map(|(&page, _)| page)
            .collect();
        dirty.sort_unstable();

        for page in dirty {
            let entry = match snapshot.entries.get(&page) {
                Some(entry) => entry,
                None => continue,
            };
            let working = match entry.working.as_ref() {
                Some(working) => working,
                None => continue,
            };
            let new_patches = create_patches(&entry.baseline, working);
            if new_patches.is_empty() {
                continue;
            }
            changed.push(page);

            // Patches stay relative to the page's tree-resolved base, so a
            // page that already graduated to a full-page entry keeps
            // getting full pages until a spill moves its id into the tree.
            let combined = match new_index.entries.get(&page) {
                Some(IndexEntry::Stored(_)) => None,
                Some(IndexEntry::Patches(existing)) => {
                    let mut all = existing.clone();
                    all.extend(new_patches);
                    Some(all)
                }
                None => Some(new_patches),
            };
            match combined.filter(|all| patches_serialized_len(all) < page_size / 2) {
                Some(all) => {
                    new_index.entries.insert(page, IndexEntry::Patches(all));
                }
                None => {
                    data_pages.push(BackendPage::new(page, new_transaction_id, working.clone()));
                    new_index
                        .entries
                        .insert(page, IndexEntry::Stored(new_transaction_id));
                }
            }
        }

        let encoded = match self
            .encode_index_with_spill(
                &mut snapshot,
                &mut new_index,
                &mut data_pages,
                new_transaction_id,
            )
            .await?
        {
            Some(encoded) => encoded,
            None => return Ok(None),
        };

        let cache_rows: Vec<(BackendPageIdentifier, Arc<Vec<u8>>)> = data_pages
            .iter()
            .map(|page| (page.identifier, Arc::new(page.data.clone())))
            .collect();

        let committed = self
            .backend
            .write_pages(
                BackendIndexPage::new(new_transaction_id, encoded),
                previous,
                data_pages,
            )
            .await?;
        if !committed {
            return Ok(None);
        }

        for (id, bytes) in cache_rows {
            self.page_cache.insert(id, bytes);
        }
        {
            let mut state = self.state.lock().await;
            state.index = Some(CachedIndex {
                transaction_id: new_transaction_id,
                page: new_index,
            });
        }
        debug!(
            transaction_id = new_transaction_id,
            pages = changed.len(),
            "committed"
        );
        self.publish_invalidations(&changed);
        Ok(Some(new_transaction_id))
    }

    /// Encode the new index page, spilling entries into tree pages when it
    /// exceeds `max_index_page_size`. `Ok(None)` signals a stale snapshot.
    async fn encode_index_with_spill(
        &self,
        snapshot: &mut Snapshot,
        new_index: &mut IndexPage,
        data_pages: &mut Vec<BackendPage>,
        new_transaction_id: TransactionId,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        let max = self.config.max_index_page_size as usize;
        let encoded = new_index.encode().map_err(StoreError::IndexEncoding)?;
        if encoded.len() <= max {
            return Ok(Some(encoded));
        }

        debug!(
            len = encoded.len(),
            max, "index page overflow, spilling into the tree"
        );
        let root = self.tree.root_page_number();
        let max_normal = self.tree.max_normal_page_number();
        let mut tree_working: HashMap<PageNumber, Vec<u8>> = HashMap::new();

        // Move every full-page entry for a normal page into its leaf slot.
        let stored: Vec<(PageNumber, TransactionId)> = new_index
            .entries
            .iter()
            .filter_map(|(&page, entry)| match entry {
                IndexEntry::Stored(transaction_id) if page <= max_normal => {
                    Some((page, *transaction_id))
                }
                _ => None,
            })
            .collect();
        for (page, transaction_id) in stored {
            if !self
                .set_tree_slot(snapshot, &mut tree_working, page, transaction_id)
                .await?
            {
                return Ok(None);
            }
            new_index.entries.remove(&page);
        }

        // Still too big: graduate the largest patch entries to full pages
        // and push them into the tree as well.
        loop {
            let root_entry_len = if tree_working.is_empty() || new_index.entries.contains_key(&root)
            {
                0
            } else {
                stored_entry_len(root)
            };
            if new_index.encoded_len() + root_entry_len <= max {
                break;
            }

            let victim = new_index
                .entries
                .iter()
                .filter_map(|(&page, entry)| match entry {
                    IndexEntry::Patches(patches) if page <= max_normal => {
                        Some((patches_serialized_len(patches), std::cmp::Reverse(page)))
                    }
                    _ => None,
                })
                .max();
            let page = match victim {
                Some((_, std::cmp::Reverse(page))) => page,
                None => return Err(StoreError::IndexOverflow),
            };

            if !snapshot.entries.contains_key(&page) {
                if !self.load_page(snapshot, page).await? {
                    return Ok(None);
                }
            }
            let bytes = match snapshot.entries.get(&page) {
                Some(entry) => entry.current().to_vec(),
                None => return Err(StoreError::IndexOverflow),
            };
            data_pages.push(BackendPage::new(page, new_transaction_id, bytes));
            if !self
                .set_tree_slot(snapshot, &mut tree_working, page, new_transaction_id)
                .await?
            {
                return Ok(None);
            }
            new_index.entries.remove(&page);
        }

        if !tree_working.is_empty() {
            // Record every rewritten tree page in its parent, deepest
            // levels first (numbering ascends root to leaf, so descending
            // page order walks leaves before their parents). Updating a
            // parent can pull it into the working set, so iterate to a
            // fixpoint.
            let mut recorded: HashSet<PageNumber> = HashSet::new();
            loop {
                let mut pending: Vec<PageNumber> = tree_working
                    .keys()
                    .copied()
                    .filter(|page| *page != root && !recorded.contains(page))
                    .collect();
                if pending.is_empty() {
                    break;
                }
                pending.sort_unstable_by(|a, b| b.cmp(a));
                for page in pending {
                    let location = match self.tree.transaction_id_location(page) {
                        Some(location) => location,
                        None => continue,
                    };
                    if !self
                        .ensure_tree_working(snapshot, &mut tree_working, location.page_number)
                        .await?
                    {
                        return Ok(None);
                    }
                    if let Some(buffer) = tree_working.get_mut(&location.page_number) {
                        write_uint48(buffer, location.offset as usize, new_transaction_id)
                            .map_err(StoreError::IndexEncoding)?;
                    }
                    recorded.insert(page);
                }
            }

            for (page, bytes) in tree_working.drain() {
                data_pages.push(BackendPage::new(page, new_transaction_id, bytes));
            }
            new_index
                .entries
                .insert(root, IndexEntry::Stored(new_transaction_id));
        }

        let encoded = new_index.encode().map_err(StoreError::IndexEncoding)?;
        if encoded.len() > max {
            return Err(StoreError::IndexOverflow);
        }
        Ok(Some(encoded))
    }

    /// Write `transaction_id` into the tree slot for `page`, pulling the
    /// slot's tree page into the working set first.
    async fn set_tree_slot(
        &self,
        snapshot: &mut Snapshot,
        tree_working: &mut HashMap<PageNumber, Vec<u8>>,
        page: PageNumber,
        transaction_id: TransactionId,
    ) -> Result<bool, StoreError> {
        let location = match self.tree.transaction_id_location(page) {
            Some(location) => location,
            None => return Ok(true), // the root's id lives in the index page
        };
        if !self
            .ensure_tree_working(snapshot, tree_working, location.page_number)
            .await?
        {
            return Ok(false);
        }
        if let Some(buffer) = tree_working.get_mut(&location.page_number) {
            write_uint48(buffer, location.offset as usize, transaction_id)
                .map_err(StoreError::IndexEncoding)?;
        }
        Ok(true)
    }

    /// Make sure a tree page's committed content is in the working set.
    async fn ensure_tree_working(
        &self,
        snapshot: &mut Snapshot,
        tree_working: &mut HashMap<PageNumber, Vec<u8>>,
        page: PageNumber,
    ) -> Result<bool, StoreError> {
        if tree_working.contains_key(&page) {
            return Ok(true);
        }
        let transaction_id = match self.resolve_transaction_id(snapshot, page).await? {
            Some(transaction_id) => transaction_id,
            None => return Ok(false),
        };
        let bytes = if transaction_id == UNINITIALIZED_TRANSACTION_ID {
            vec![0u8; self.config.page_size as usize]
        } else {
            match self.fetch_page_bytes(page, transaction_id).await? {
                Some(bytes) => bytes.as_ref().clone(),
                None => return Ok(false),
            }
        };
        tree_working.insert(page, bytes);
        Ok(true)
    }

    // -----------------------------------------------------------------
    // Invalidation
    // -----------------------------------------------------------------

    fn publish_invalidations(&self, changed: &[PageNumber]) {
        if changed.is_empty() {
            return;
        }
        let live: Vec<Arc<Subscription>> = {
            let mut subscriptions = self.subscriptions.lock().unwrap();
            subscriptions.retain(|weak| weak.strong_count() > 0);
            subscriptions.iter().filter_map(Weak::upgrade).collect()
        };
        for subscription in live {
            subscription.notify_if_overlapping(changed);
        }
    }
}

fn stored_entry_len(page: PageNumber) -> usize {
    compressed_u32_len(page as u32) + compressed_u32_len(1) + UINT48_LEN
}

#[cfg(test)]
mod tests {
    use super::*;
    use page_store_backend::MemoryBackend;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn open(page_size: u32) -> (Arc<MemoryBackend>, Arc<PageStore>) {
        let backend = Arc::new(MemoryBackend::new(page_size));
        let store = Arc::new(
            PageStore::new(backend.clone(), PageStoreConfig::with_page_size(page_size)).unwrap(),
        );
        (backend, store)
    }

    #[tokio::test]
    async fn test_empty_commit_initializes_store() {
        let (backend, store) = open(1024);

        let outcome = store.run_transaction(|_| Ok(true)).await.unwrap();
        assert_eq!(outcome, TransactionOutcome::Committed(1));
        assert_eq!(backend.index_transaction_id(), 1);

        let first_byte = store
            .read_only(|access| Ok(access.get(0)?.to_vec()))
            .await
            .unwrap();
        assert_eq!(first_byte, vec![0u8; 1024]);
    }

    #[tokio::test]
    async fn test_read_before_any_commit_sees_zeroes() {
        let (backend, store) = open(1024);
        let page = store
            .read_only(|access| Ok(access.get(7)?.to_vec()))
            .await
            .unwrap();
        assert_eq!(page, vec![0u8; 1024]);
        assert_eq!(backend.index_transaction_id(), 0);
    }

    #[tokio::test]
    async fn test_single_byte_write_read_back() {
        let (_backend, store) = open(1024);

        let outcome = store
            .run_transaction(|access| {
                let buffer = access.get_for_update(0)?;
                buffer[10] = 42;
                Ok(true)
            })
            .await
            .unwrap();
        assert!(matches!(outcome, TransactionOutcome::Committed(_)));

        let page = store
            .read_only(|access| Ok(access.get(0)?.to_vec()))
            .await
            .unwrap();
        assert_eq!(page[10], 42);
        assert!(page.iter().enumerate().all(|(i, &b)| i == 10 || b == 0));
    }

    #[tokio::test]
    async fn test_abort_discards_writes() {
        let (backend, store) = open(1024);

        let outcome = store
            .run_transaction(|access| {
                access.get_for_update(0)?[0] = 9;
                Ok(false)
            })
            .await
            .unwrap();
        assert_eq!(outcome, TransactionOutcome::Aborted);
        assert_eq!(backend.index_transaction_id(), 0);

        let page = store
            .read_only(|access| Ok(access.get(0)?.to_vec()))
            .await
            .unwrap();
        assert_eq!(page[0], 0);
    }

    #[tokio::test]
    async fn test_small_change_inlines_patches() {
        let (backend, store) = open(1024);

        store
            .run_transaction(|access| {
                access.get_for_update(0)?[100] = 1;
                Ok(true)
            })
            .await
            .unwrap();

        // No data page was written; the change lives in the index page.
        assert_eq!(backend.row_count(), 0);
        let decoded = IndexPage::decode(
            &backend
                .read_pages(true, &[])
                .await
                .unwrap()
                .index_page
                .unwrap()
                .data,
            1024,
        )
        .unwrap();
        assert!(matches!(
            decoded.entries.get(&0),
            Some(IndexEntry::Patches(_))
        ));
    }

    #[tokio::test]
    async fn test_large_change_writes_full_page() {
        let (backend, store) = open(1024);

        store
            .run_transaction(|access| {
                let buffer = access.get_for_update(3)?;
                for (i, byte) in buffer.iter_mut().enumerate() {
                    *byte = i as u8;
                }
                Ok(true)
            })
            .await
            .unwrap();

        assert_eq!(backend.row_count(), 1);
        assert!(backend.row(BackendPageIdentifier::new(3, 1)).is_some());

        let page = store
            .read_only(|access| Ok(access.get(3)?.to_vec()))
            .await
            .unwrap();
        assert!(page.iter().enumerate().all(|(i, &b)| b == i as u8));
    }

    #[tokio::test]
    async fn test_patch_accumulation_graduates_to_full_page() {
        let (backend, store) = open(1024);

        for round in 0..2u8 {
            store
                .run_transaction(|access| {
                    let buffer = access.get_for_update(1)?;
                    let start = 300 * round as usize;
                    for byte in &mut buffer[start..start + 300] {
                        *byte = round + 1;
                    }
                    Ok(true)
                })
                .await
                .unwrap();
        }

        // Round one stayed inline (about 300 bytes of patches), round two
        // pushed the combined size past half a page.
        assert!(backend.row(BackendPageIdentifier::new(1, 2)).is_some());

        let page = store
            .read_only(|access| Ok(access.get(1)?.to_vec()))
            .await
            .unwrap();
        assert!(page[..300].iter().all(|&b| b == 1));
        assert!(page[300..600].iter().all(|&b| b == 2));
        assert!(page[600..].iter().all(|&b| b == 0));
    }

    #[tokio::test]
    async fn test_reopened_store_reads_committed_state() {
        let (backend, store) = open(1024);
        store
            .run_transaction(|access| {
                access.get_for_update(5)?[0] = 77;
                Ok(true)
            })
            .await
            .unwrap();

        let reopened = Arc::new(
            PageStore::new(backend.clone(), PageStoreConfig::with_page_size(1024)).unwrap(),
        );
        let page = reopened
            .read_only(|access| Ok(access.get(5)?.to_vec()))
            .await
            .unwrap();
        assert_eq!(page[0], 77);
    }

    #[tokio::test]
    async fn test_transaction_reads_its_own_writes() {
        let (_backend, store) = open(1024);

        store
            .run_transaction(|access| {
                access.get_for_update(0)?[0] = 5;
                // A plain read in the same transaction sees the write.
                assert_eq!(access.get(0)?[0], 5);
                Ok(true)
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_page_out_of_range_is_an_error() {
        let (_backend, store) = open(1024);
        let max_normal = store.config().max_normal_page_number;
        let result = store
            .read_only(|access| Ok(access.get(max_normal + 1)?.to_vec()))
            .await;
        assert!(matches!(result, Err(StoreError::PageOutOfRange(_))));
    }

    #[tokio::test]
    async fn test_transaction_ids_strictly_increase() {
        let (_backend, store) = open(1024);
        let mut last = 0;
        for _ in 0..5 {
            let outcome = store
                .run_transaction(|access| {
                    access.get_for_update(0)?[0] ^= 1;
                    Ok(true)
                })
                .await
                .unwrap();
            match outcome {
                TransactionOutcome::Committed(txn) => {
                    assert!(txn > last);
                    last = txn;
                }
                other => panic!("unexpected outcome {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_recorder_fires_once_per_overlapping_commit() {
        let (_backend, store) = open(1024);
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let recorder = store.clone().page_reads_recorder(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        recorder
            .record(|access| Ok(access.get(0)?.to_vec()))
            .await
            .unwrap();

        // Disjoint commit: silent.
        store
            .run_transaction(|access| {
                access.get_for_update(9)?[0] = 1;
                Ok(true)
            })
            .await
            .unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 0);

        // Overlapping commit: fires once.
        store
            .run_transaction(|access| {
                access.get_for_update(0)?[0] = 1;
                Ok(true)
            })
            .await
            .unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // Not re-armed until the next record call.
        store
            .run_transaction(|access| {
                access.get_for_update(0)?[0] = 2;
                Ok(true)
            })
            .await
            .unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        recorder
            .record(|access| Ok(access.get(0)?.to_vec()))
            .await
            .unwrap();
        store
            .run_transaction(|access| {
                access.get_for_update(0)?[0] = 3;
                Ok(true)
            })
            .await
            .unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_dropped_recorder_is_pruned() {
        let (_backend, store) = open(1024);
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let recorder = store.clone().page_reads_recorder(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        recorder
            .record(|access| Ok(access.get(0)?.to_vec()))
            .await
            .unwrap();
        drop(recorder);

        store
            .run_transaction(|access| {
                access.get_for_update(0)?[0] = 1;
                Ok(true)
            })
            .await
            .unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
