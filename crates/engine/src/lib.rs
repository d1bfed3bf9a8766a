//! The transactional page-store engine: snapshot-consistent reads,
//! copy-on-write page modification, patch generation, index-page encoding
//! with a transaction-id tree for overflow, and commit-with-CAS retry on
//! top of any `PageStoreBackend`.

pub mod cache;
pub mod config;
pub mod index;
pub mod patch;
pub mod recorder;
pub mod snapshot;
pub mod store;
pub mod tree;

pub use config::PageStoreConfig;
pub use recorder::PageReadsRecorder;
pub use snapshot::{AccessError, AccessResult, PageAccess};
pub use store::{PageStore, TransactionOutcome};

use page_store_codec::CodecError;
use page_store_common::{BackendError, PageNumber};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("store geometry mismatch: index says max normal page {stored}, configured {configured}")]
    GeometryMismatch {
        stored: PageNumber,
        configured: PageNumber,
    },

    #[error("page number {0} exceeds the addressable range")]
    PageOutOfRange(PageNumber),

    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// The backend returned an index page (or a page referenced by one)
    /// that cannot be decoded. Fatal: the store must be rebuilt.
    #[error("corrupt index page: {0}")]
    CorruptIndex(CodecError),

    /// Our own encoder failed while building a commit.
    #[error("index encoding failed: {0}")]
    IndexEncoding(CodecError),

    #[error("index page exceeds its size limit even after spilling into the tree")]
    IndexOverflow,

    #[error("retries exhausted")]
    RetryExhausted,

    #[error("transaction id space exhausted")]
    TransactionIdExhausted,
}
