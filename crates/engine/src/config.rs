use page_store_common::{PageNumber, MAX_UINT48};
use serde::{Deserialize, Serialize};

use crate::StoreError;

/// Construction-time configuration of a page store. There is no file or
/// environment surface; callers build one of these and hand it to
/// `PageStore::new`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PageStoreConfig {
    /// Size of every data and tree page. Power of two, at least 1024.
    pub page_size: u32,
    /// Upper bound on the serialized index page. Defaults to `page_size`.
    pub max_index_page_size: u32,
    /// Largest page number callers may address; everything above it belongs
    /// to the transaction-id tree.
    pub max_normal_page_number: PageNumber,
    /// Combined budget for CAS-conflict and stale-page retries.
    pub retries: u32,
}

impl Default for PageStoreConfig {
    fn default() -> Self {
        Self::with_page_size(8192)
    }
}

impl PageStoreConfig {
    /// A configuration with the given page size and the index page capped
    /// at one page.
    pub fn with_page_size(page_size: u32) -> Self {
        Self {
            page_size,
            max_index_page_size: page_size,
            max_normal_page_number: (1 << 31) - 1,
            retries: 8,
        }
    }

    pub(crate) fn validate(&self, backend_max_page_size: u32) -> Result<(), StoreError> {
        if !self.page_size.is_power_of_two() || self.page_size < 1024 {
            return Err(StoreError::InvalidConfig(format!(
                "page size {} must be a power of two >= 1024",
                self.page_size
            )));
        }
        if self.page_size > backend_max_page_size {
            return Err(StoreError::InvalidConfig(format!(
                "page size {} exceeds the backend's max page size {}",
                self.page_size, backend_max_page_size
            )));
        }
        if self.max_index_page_size > backend_max_page_size {
            return Err(StoreError::InvalidConfig(format!(
                "max index page size {} exceeds the backend's max page size {}",
                self.max_index_page_size, backend_max_page_size
            )));
        }
        if self.max_normal_page_number > MAX_UINT48 {
            return Err(StoreError::InvalidConfig(format!(
                "max normal page number {} out of range",
                self.max_normal_page_number
            )));
        }
        Ok(())
    }
}
