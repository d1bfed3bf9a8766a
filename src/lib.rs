//! Client-side transactional page store.
//!
//! Fixed-size byte pages addressed by 48-bit page numbers, persisted
//! through a pluggable key-value backend. A single index page pins each
//! snapshot; writers mutate pages copy-on-write and commit by
//! compare-and-swap on the index row, with small changes inlined as
//! patches and large working sets spilled into a tree of transaction-id
//! pages. Backends can be wrapped with compression and authenticated
//! encryption without changing their semantics.

pub use page_store_backend::{
    AesGcmTransform, DeflateTransform, MemoryBackend, PageDataTransform, TransformingBackend,
};
pub use page_store_common::{
    BackendError, BackendIndexPage, BackendPage, BackendPageIdentifier, PageNumber,
    PageStoreBackend, ReadResult, TransactionId, MAX_UINT48, UNINITIALIZED_TRANSACTION_ID,
};
pub use page_store_engine::index::{IndexEntry, IndexPage};
pub use page_store_engine::tree::{TransactionIdLocation, TreeCalc};
pub use page_store_engine::{
    AccessError, AccessResult, PageAccess, PageReadsRecorder, PageStore, PageStoreConfig,
    StoreError, TransactionOutcome,
};

/// Binary codecs used by the index-page format, re-exported for layers
/// that store ordered keys inside pages.
pub mod codec {
    pub use page_store_codec::*;
}
