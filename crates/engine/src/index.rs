use std::collections::BTreeMap;

use page_store_codec::{
    compressed_u32_len, push_compressed_u32, read_tuple, read_uint48, tuple_len, write_tuple,
    write_uint48, CodecError, TupleType, TupleValue, UINT48_LEN,
};
use page_store_common::{PageNumber, TransactionId};

use crate::patch::{patches_serialized_len, push_patch, read_bounded_u32, read_patch, Patch};

/// Index page schema version.
pub const INDEX_FORMAT_VERSION: u32 = 1;

const PAYLOAD_PATCHES: u32 = 0;
const PAYLOAD_STORED: u32 = 1;

/// How one page's current content is located.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IndexEntry {
    /// Patches applied, in order, on top of the page's tree-resolved base
    /// version (slot value 0 means a zeroed page).
    Patches(Vec<Patch>),
    /// The full page is stored under this transaction id.
    Stored(TransactionId),
}

impl IndexEntry {
    fn encoded_len(&self, page_number: PageNumber) -> usize {
        let payload = match self {
            IndexEntry::Patches(patches) => {
                compressed_u32_len(PAYLOAD_PATCHES)
                    + compressed_u32_len(patches.len() as u32)
                    + patches_serialized_len(patches)
            }
            IndexEntry::Stored(_) => compressed_u32_len(PAYLOAD_STORED) + UINT48_LEN,
        };
        compressed_u32_len(page_number as u32) + payload
    }
}

/// Decoded index page: the store generation's `max_normal_page_number` plus
/// an entry per logically-modified page. Pages without an entry resolve
/// through the transaction-id tree.
#[derive(Clone, Debug, PartialEq)]
pub struct IndexPage {
    pub max_normal_page_number: PageNumber,
    pub entries: BTreeMap<PageNumber, IndexEntry>,
}

impl IndexPage {
    pub fn empty(max_normal_page_number: PageNumber) -> Self {
        Self {
            max_normal_page_number,
            entries: BTreeMap::new(),
        }
    }

    fn header(&self) -> [TupleValue; 3] {
        [
            TupleValue::Uint32Raw(INDEX_FORMAT_VERSION),
            TupleValue::Uint32(self.max_normal_page_number as u32),
            TupleValue::Uint32(self.entries.len() as u32),
        ]
    }

    /// Serialized size without encoding.
    pub fn encoded_len(&self) -> usize {
        tuple_len(&self.header())
            + self
                .entries
                .iter()
                .map(|(&page, entry)| entry.encoded_len(page))
                .sum::<usize>()
    }

    /// Serialize. Page numbers must fit the compressed-u32 payload; the
    /// store guarantees that by bounding `max_normal_page_number` at
    /// construction.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        if self.max_normal_page_number > u32::MAX as u64 {
            return Err(CodecError::InvalidEncoding(
                "max normal page number exceeds the index encoding range",
            ));
        }

        let header = self.header();
        let mut out = vec![0u8; tuple_len(&header)];
        write_tuple(&mut out, 0, &header)?;

        for (&page, entry) in &self.entries {
            if page > u32::MAX as u64 {
                return Err(CodecError::InvalidEncoding(
                    "page number exceeds the index encoding range",
                ));
            }
            push_compressed_u32(&mut out, page as u32);
            match entry {
                IndexEntry::Patches(patches) => {
                    push_compressed_u32(&mut out, PAYLOAD_PATCHES);
                    push_compressed_u32(&mut out, patches.len() as u32);
                    for patch in patches {
                        push_patch(&mut out, patch);
                    }
                }
                IndexEntry::Stored(transaction_id) => {
                    push_compressed_u32(&mut out, PAYLOAD_STORED);
                    let start = out.len();
                    out.resize(start + UINT48_LEN, 0);
                    write_uint48(&mut out, start, *transaction_id)?;
                }
            }
        }
        Ok(out)
    }

    /// Parse an index page read back from the backend. Every failure is a
    /// sign of corruption, including trailing bytes and patches that do not
    /// fit inside a page of `page_size` bytes.
    pub fn decode(data: &[u8], page_size: u32) -> Result<Self, CodecError> {
        let types = [TupleType::Uint32Raw, TupleType::Uint32, TupleType::Uint32];
        let (header, mut pos) = read_tuple(data, 0, &types)?;
        let (version, max_normal_page_number, count) = match header.as_slice() {
            [TupleValue::Uint32Raw(v), TupleValue::Uint32(m), TupleValue::Uint32(n)] => {
                (*v, *m as u64, *n)
            }
            _ => return Err(CodecError::InvalidEncoding("malformed index header")),
        };
        if version != INDEX_FORMAT_VERSION {
            return Err(CodecError::InvalidEncoding("unsupported index version"));
        }

        let mut entries = BTreeMap::new();
        for _ in 0..count {
            let page = read_bounded_u32(data, &mut pos)? as u64;
            let entry = match read_bounded_u32(data, &mut pos)? {
                PAYLOAD_PATCHES => {
                    let patch_count = read_bounded_u32(data, &mut pos)?;
                    let mut patches = Vec::with_capacity(patch_count as usize);
                    for _ in 0..patch_count {
                        let patch = read_patch(data, &mut pos)?;
                        let end = patch.offset as u64 + patch.bytes.len() as u64;
                        if end > page_size as u64 {
                            return Err(CodecError::InvalidEncoding(
                                "patch reaches past the end of the page",
                            ));
                        }
                        patches.push(patch);
                    }
                    IndexEntry::Patches(patches)
                }
                PAYLOAD_STORED => {
                    let transaction_id = read_uint48(data, pos)?;
                    pos += UINT48_LEN;
                    IndexEntry::Stored(transaction_id)
                }
                _ => return Err(CodecError::InvalidEncoding("unknown index payload type")),
            };
            if entries.insert(page, entry).is_some() {
                return Err(CodecError::InvalidEncoding("duplicate index entry"));
            }
        }
        if pos != data.len() {
            return Err(CodecError::InvalidEncoding("trailing bytes in index page"));
        }

        Ok(Self {
            max_normal_page_number,
            entries,
        })
    }
}
