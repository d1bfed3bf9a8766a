use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use page_store_common::{
    BackendError, BackendIndexPage, BackendPage, BackendPageIdentifier, PageStoreBackend,
    ReadResult, TransactionId, UNINITIALIZED_TRANSACTION_ID,
};
use tracing::trace;

/// In-process backend holding all rows in a map. The reference
/// implementation of the write contract: page inserts conflict on existing
/// keys, the index row is compare-and-swapped, and stale page versions are
/// cleaned up after a successful swap.
pub struct MemoryBackend {
    max_page_size: u32,
    inner: Mutex<MemoryInner>,
}

struct MemoryInner {
    index_row: Option<BackendIndexPage>,
    rows: HashMap<BackendPageIdentifier, Vec<u8>>,
}

impl MemoryBackend {
    pub fn new(max_page_size: u32) -> Self {
        Self {
            max_page_size,
            inner: Mutex::new(MemoryInner {
                index_row: None,
                rows: HashMap::new(),
            }),
        }
    }

    /// Number of page rows currently stored (index row excluded).
    pub fn row_count(&self) -> usize {
        self.inner.lock().unwrap().rows.len()
    }

    /// Raw bytes of one stored row, if present.
    pub fn row(&self, id: BackendPageIdentifier) -> Option<Vec<u8>> {
        self.inner.lock().unwrap().rows.get(&id).cloned()
    }

    /// Transaction id of the stored index row (0 when none exists).
    pub fn index_transaction_id(&self) -> TransactionId {
        self.inner
            .lock()
            .unwrap()
            .index_row
            .as_ref()
            .map(|row| row.transaction_id)
            .unwrap_or(UNINITIALIZED_TRANSACTION_ID)
    }
}

#[async_trait]
impl PageStoreBackend for MemoryBackend {
    fn max_page_size(&self) -> u32 {
        self.max_page_size
    }

    async fn read_pages(
        &self,
        include_index: bool,
        ids: &[BackendPageIdentifier],
    ) -> Result<ReadResult, BackendError> {
        let inner = self.inner.lock().unwrap();

        let index_page = if include_index {
            inner.index_row.clone()
        } else {
            None
        };
        let pages = ids
            .iter()
            .filter_map(|id| {
                inner
                    .rows
                    .get(id)
                    .map(|data| BackendPage::new(id.page_number, id.transaction_id, data.clone()))
            })
            .collect();

        Ok(ReadResult { index_page, pages })
    }

    async fn write_pages(
        &self,
        index_page: BackendIndexPage,
        previous_transaction_id: TransactionId,
        pages: Vec<BackendPage>,
    ) -> Result<bool, BackendError> {
        if index_page.data.len() > self.max_page_size as usize {
            return Err(BackendError::PageTooLarge {
                len: index_page.data.len(),
                max: self.max_page_size,
            });
        }
        for page in &pages {
            if page.data.len() > self.max_page_size as usize {
                return Err(BackendError::PageTooLarge {
                    len: page.data.len(),
                    max: self.max_page_size,
                });
            }
        }

        let mut inner = self.inner.lock().unwrap();

        // Insert the data pages; an existing key means a concurrent writer
        // got here first. Rows inserted before the conflict stay behind,
        // which is fine: their transaction id will never be reused.
        let mut written = Vec::with_capacity(pages.len());
        for page in pages {
            if inner.rows.contains_key(&page.identifier) {
                trace!(
                    page = page.identifier.page_number,
                    txn = page.identifier.transaction_id,
                    "page insert conflict"
                );
                return Ok(false);
            }
            written.push(page.identifier);
            inner.rows.insert(page.identifier, page.data);
        }

        // Compare-and-swap the index row.
        let current = inner
            .index_row
            .as_ref()
            .map(|row| row.transaction_id)
            .unwrap_or(UNINITIALIZED_TRANSACTION_ID);
        if current != previous_transaction_id {
            trace!(current, previous_transaction_id, "index CAS conflict");
            return Ok(false);
        }
        inner.index_row = Some(index_page);

        // Best-effort cleanup of older versions of the pages just written.
        for id in written {
            inner.rows.retain(|other, _| {
                other.page_number != id.page_number || other.transaction_id >= id.transaction_id
            });
        }

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index(txn: TransactionId) -> BackendIndexPage {
        BackendIndexPage::new(txn, vec![txn as u8])
    }

    #[tokio::test]
    async fn test_empty_store_reads_nothing() {
        let backend = MemoryBackend::new(1024);
        let result = backend
            .read_pages(true, &[BackendPageIdentifier::new(1, 1)])
            .await
            .unwrap();
        assert!(result.index_page.is_none());
        assert!(result.pages.is_empty());
    }

    #[tokio::test]
    async fn test_first_write_requires_previous_zero() {
        let backend = MemoryBackend::new(1024);
        assert!(!backend
            .write_pages(index(1), 5, vec![])
            .await
            .unwrap());
        assert!(backend.write_pages(index(1), 0, vec![]).await.unwrap());
        assert_eq!(backend.index_transaction_id(), 1);
    }

    #[tokio::test]
    async fn test_cas_conflict_leaves_index_unchanged() {
        let backend = MemoryBackend::new(1024);
        assert!(backend.write_pages(index(1), 0, vec![]).await.unwrap());

        // Stale writer: expects previous 0, sees 1.
        let committed = backend
            .write_pages(index(2), 0, vec![BackendPage::new(3, 2, vec![0xAB])])
            .await
            .unwrap();
        assert!(!committed);
        assert_eq!(backend.index_transaction_id(), 1);
        // The orphaned page row is tolerated.
        assert_eq!(backend.row_count(), 1);
    }

    #[tokio::test]
    async fn test_page_key_conflict_fails_write() {
        let backend = MemoryBackend::new(1024);
        assert!(backend
            .write_pages(index(1), 0, vec![BackendPage::new(3, 1, vec![1])])
            .await
            .unwrap());

        let committed = backend
            .write_pages(index(2), 1, vec![BackendPage::new(3, 1, vec![2])])
            .await
            .unwrap();
        assert!(!committed);
        assert_eq!(backend.row(BackendPageIdentifier::new(3, 1)).unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn test_stale_versions_deleted_after_commit() {
        let backend = MemoryBackend::new(1024);
        assert!(backend
            .write_pages(index(1), 0, vec![BackendPage::new(3, 1, vec![1])])
            .await
            .unwrap());
        assert!(backend
            .write_pages(index(2), 1, vec![BackendPage::new(3, 2, vec![2])])
            .await
            .unwrap());

        assert!(backend.row(BackendPageIdentifier::new(3, 1)).is_none());
        assert_eq!(backend.row(BackendPageIdentifier::new(3, 2)).unwrap(), vec![2]);
    }

    #[tokio::test]
    async fn test_missing_pages_omitted() {
        let backend = MemoryBackend::new(1024);
        assert!(backend
            .write_pages(index(1), 0, vec![BackendPage::new(3, 1, vec![1])])
            .await
            .unwrap());

        let result = backend
            .read_pages(
                false,
                &[
                    BackendPageIdentifier::new(3, 1),
                    BackendPageIdentifier::new(4, 1),
                ],
            )
            .await
            .unwrap();
        assert!(result.index_page.is_none());
        assert_eq!(result.pages.len(), 1);
        assert_eq!(result.pages[0].identifier.page_number, 3);
    }

    #[tokio::test]
    async fn test_oversized_page_rejected() {
        let backend = MemoryBackend::new(8);
        let result = backend
            .write_pages(index(1), 0, vec![BackendPage::new(1, 1, vec![0; 9])])
            .await;
        assert!(matches!(result, Err(BackendError::PageTooLarge { .. })));
    }
}
