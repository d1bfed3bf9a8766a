use async_trait::async_trait;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

/// Logical page number. Unsigned 48-bit; pages above a store's
/// `max_normal_page_number` are tree pages carrying transaction-id slots.
pub type PageNumber = u64;

/// Monotonically increasing transaction id (1-based; 0 means "uninitialized").
pub type TransactionId = u64;

/// Largest value representable in 48 bits — the upper bound for both page
/// numbers and transaction ids.
pub const MAX_UINT48: u64 = (1 << 48) - 1;

/// Transaction id reserved for a store that has never been written.
pub const UNINITIALIZED_TRANSACTION_ID: TransactionId = 0;

/// Key of one page version in the backend.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct BackendPageIdentifier {
    pub page_number: PageNumber,
    pub transaction_id: TransactionId,
}

impl BackendPageIdentifier {
    pub fn new(page_number: PageNumber, transaction_id: TransactionId) -> Self {
        Self {
            page_number,
            transaction_id,
        }
    }
}

/// One page version: its key plus the stored bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackendPage {
    pub identifier: BackendPageIdentifier,
    pub data: Vec<u8>,
}

impl BackendPage {
    pub fn new(page_number: PageNumber, transaction_id: TransactionId, data: Vec<u8>) -> Self {
        Self {
            identifier: BackendPageIdentifier::new(page_number, transaction_id),
            data,
        }
    }
}

/// The authoritative snapshot descriptor: given this record, the current
/// version of every other page in the store can be located.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackendIndexPage {
    pub transaction_id: TransactionId,
    pub data: Vec<u8>,
}

impl BackendIndexPage {
    pub fn new(transaction_id: TransactionId, data: Vec<u8>) -> Self {
        Self {
            transaction_id,
            data,
        }
    }

    /// An index page for a store that has never been committed to.
    pub fn uninitialized() -> Self {
        Self {
            transaction_id: UNINITIALIZED_TRANSACTION_ID,
            data: Vec::new(),
        }
    }

    pub fn is_uninitialized(&self) -> bool {
        self.transaction_id == UNINITIALIZED_TRANSACTION_ID && self.data.is_empty()
    }
}

/// Result of a batched read: the index page (if requested and present) plus
/// whichever of the requested pages exist. Missing pages are omitted.
#[derive(Clone, Debug, Default)]
pub struct ReadResult {
    pub index_page: Option<BackendIndexPage>,
    pub pages: Vec<BackendPage>,
}

// ---------------------------------------------------------------------------
// PageStoreBackend trait — the engine ↔ storage boundary
// ---------------------------------------------------------------------------

#[async_trait]
pub trait PageStoreBackend: Send + Sync {
    /// Hard upper bound on any single `data` blob this backend accepts.
    fn max_page_size(&self) -> u32;

    /// Read the given page versions, optionally including the index page.
    /// The order of the returned pages is unspecified; missing pages are
    /// silently omitted.
    async fn read_pages(
        &self,
        include_index: bool,
        ids: &[BackendPageIdentifier],
    ) -> Result<ReadResult, BackendError>;

    /// Atomically publish a new index page plus its data pages.
    ///
    /// Inserts every page under its `(page_number, transaction_id)` key, then
    /// compare-and-swaps the index row against `previous_transaction_id`
    /// (0 means "no index row yet"). Returns `false` without changing the
    /// index row when any page key already exists or the CAS fails. On
    /// success, stale older versions of the just-written page numbers are
    /// deleted best-effort.
    async fn write_pages(
        &self,
        index_page: BackendIndexPage,
        previous_transaction_id: TransactionId,
        pages: Vec<BackendPage>,
    ) -> Result<bool, BackendError>;
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("backend transport error: {0}")]
    Transport(String),

    #[error("page data of {len} bytes exceeds max page size {max}")]
    PageTooLarge { len: usize, max: u32 },

    #[error("encryption key is not a valid AES-GCM key")]
    InvalidKey,

    #[error("decryption failed (wrong key or corrupted data)")]
    DecryptionFailed,

    #[error("invalid stored data: {0}")]
    InvalidData(String),

    #[error("{0}")]
    Other(String),
}
