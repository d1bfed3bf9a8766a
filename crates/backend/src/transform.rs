use std::sync::Arc;

use async_trait::async_trait;
use page_store_common::{
    BackendError, BackendIndexPage, BackendPage, BackendPageIdentifier, PageStoreBackend,
    ReadResult, TransactionId,
};

/// A reversible byte-array transform applied to page data on its way to and
/// from a backend.
#[async_trait]
pub trait PageDataTransform: Send + Sync {
    /// Worst-case number of bytes the transform adds to its input.
    fn overhead(&self) -> u32;

    /// Applied to every page's data (and the index page data) before the
    /// write is delegated.
    async fn transform(&self, data: Vec<u8>) -> Result<Vec<u8>, BackendError>;

    /// Applied to every blob read back from the delegate.
    async fn reverse_transform(&self, data: Vec<u8>) -> Result<Vec<u8>, BackendError>;
}

/// Wraps a backend with a transform, preserving the backend's semantics.
///
/// `max_page_size` shrinks by the transform's declared overhead so callers
/// never produce a blob the delegate would reject after transformation. The
/// uninitialized index page (transaction id 0, no data) passes through
/// untouched in both directions.
pub struct TransformingBackend {
    inner: Arc<dyn PageStoreBackend>,
    transform: Arc<dyn PageDataTransform>,
}

impl TransformingBackend {
    pub fn new(inner: Arc<dyn PageStoreBackend>, transform: Arc<dyn PageDataTransform>) -> Self {
        Self { inner, transform }
    }

    async fn transform_index(
        &self,
        index_page: BackendIndexPage,
    ) -> Result<BackendIndexPage, BackendError> {
        if index_page.is_uninitialized() {
            return Ok(index_page);
        }
        Ok(BackendIndexPage::new(
            index_page.transaction_id,
            self.transform.transform(index_page.data).await?,
        ))
    }

    async fn reverse_index(
        &self,
        index_page: BackendIndexPage,
    ) -> Result<BackendIndexPage, BackendError> {
        if index_page.is_uninitialized() {
            return Ok(index_page);
        }
        Ok(BackendIndexPage::new(
            index_page.transaction_id,
            self.transform.reverse_transform(index_page.data).await?,
        ))
    }
}

#[async_trait]
impl PageStoreBackend for TransformingBackend {
    fn max_page_size(&self) -> u32 {
        self.inner
            .max_page_size()
            .saturating_sub(self.transform.overhead())
    }

    async fn read_pages(
        &self,
        include_index: bool,
        ids: &[BackendPageIdentifier],
    ) -> Result<ReadResult, BackendError> {
        let raw = self.inner.read_pages(include_index, ids).await?;

        let index_page = match raw.index_page {
            Some(page) => Some(self.reverse_index(page).await?),
            None => None,
        };
        let mut pages = Vec::with_capacity(raw.pages.len());
        for page in raw.pages {
            pages.push(BackendPage {
                identifier: page.identifier,
                data: self.transform.reverse_transform(page.data).await?,
            });
        }
        Ok(ReadResult { index_page, pages })
    }

    async fn write_pages(
        &self,
        index_page: BackendIndexPage,
        previous_transaction_id: TransactionId,
        pages: Vec<BackendPage>,
    ) -> Result<bool, BackendError> {
        let index_page = self.transform_index(index_page).await?;
        let mut transformed = Vec::with_capacity(pages.len());
        for page in pages {
            transformed.push(BackendPage {
                identifier: page.identifier,
                data: self.transform.transform(page.data).await?,
            });
        }
        self.inner
            .write_pages(index_page, previous_transaction_id, transformed)
            .await
    }
}
