//! Backend-side building blocks: the data-transforming wrapper that
//! composes compression or authenticated encryption over any
//! `PageStoreBackend`, the two concrete transforms, and an in-memory
//! reference backend implementing the compare-and-swap write contract.

pub mod compress;
pub mod encrypt;
pub mod memory;
pub mod transform;

pub use compress::DeflateTransform;
pub use encrypt::AesGcmTransform;
pub use memory::MemoryBackend;
pub use transform::{PageDataTransform, TransformingBackend};
