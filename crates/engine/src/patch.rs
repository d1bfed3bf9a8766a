use page_store_codec::{
    compressed_u32_len, push_compressed_u32, read_compressed_u32, CodecError,
};

/// Longest run of bytes a single patch carries. Longer runs split into
/// consecutive patches; the on-wire length is a compressed u32, so this is
/// an encoding-size optimization rather than a format limit.
pub const MAX_PATCH_LEN: usize = 255;

/// A gap of up to this many equal bytes between two differing runs is
/// cheaper to carry as literal bytes than as a second patch header.
const MERGE_GAP: usize = 3;

/// A localized overwrite: `bytes` copied to `offset`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Patch {
    pub offset: u32,
    pub bytes: Vec<u8>,
}

impl Patch {
    /// Copy this patch into `page`. The caller guarantees
    /// `offset + bytes.len() <= page.len()`; decoded patches are
    /// bounds-checked when the index page is parsed.
    pub fn apply_to(&self, page: &mut [u8]) {
        let start = self.offset as usize;
        page[start..start + self.bytes.len()].copy_from_slice(&self.bytes);
    }

    /// On-wire size: compressed offset, compressed length, literal bytes.
    pub fn serialized_len(&self) -> usize {
        compressed_u32_len(self.offset)
            + compressed_u32_len(self.bytes.len() as u32)
            + self.bytes.len()
    }
}

/// Total on-wire size of a patch list.
pub fn patches_serialized_len(patches: &[Patch]) -> usize {
    patches.iter().map(Patch::serialized_len).sum()
}

/// Compute the patch list whose sequential application turns `base` into
/// `next`. Runs of differing bytes separated by at most `MERGE_GAP` equal
/// bytes merge into one patch; four or more equal bytes split strictly.
pub fn create_patches(base: &[u8], next: &[u8]) -> Vec<Patch> {
    debug_assert_eq!(base.len(), next.len());

    let mut patches = Vec::new();
    let mut start = usize::MAX;
    let mut end = 0usize;

    for i in 0..base.len().min(next.len()) {
        if base[i] == next[i] {
            continue;
        }
        if start == usize::MAX {
            start = i;
        } else if i - end > MERGE_GAP {
            flush_group(&mut patches, next, start, end);
            start = i;
        }
        end = i + 1;
    }
    if start != usize::MAX {
        flush_group(&mut patches, next, start, end);
    }
    patches
}

fn flush_group(patches: &mut Vec<Patch>, next: &[u8], start: usize, end: usize) {
    let mut chunk_start = start;
    while chunk_start < end {
        let chunk_end = (chunk_start + MAX_PATCH_LEN).min(end);
        patches.push(Patch {
            offset: chunk_start as u32,
            bytes: next[chunk_start..chunk_end].to_vec(),
        });
        chunk_start = chunk_end;
    }
}

/// Append one patch record to `out`.
pub fn push_patch(out: &mut Vec<u8>, patch: &Patch) {
    push_compressed_u32(out, patch.offset);
    push_compressed_u32(out, patch.bytes.len() as u32);
    out.extend_from_slice(&patch.bytes);
}

/// Read one patch record at `buf[pos..]`, advancing `pos`.
pub fn read_patch(buf: &[u8], pos: &mut usize) -> Result<Patch, CodecError> {
    let offset = read_bounded_u32(buf, pos)?;
    let len = read_bounded_u32(buf, pos)? as usize;
    let bytes = buf
        .get(*pos..*pos + len)
        .ok_or(CodecError::InvalidEncoding("truncated patch bytes"))?;
    *pos += len;
    Ok(Patch {
        offset,
        bytes: bytes.to_vec(),
    })
}

/// A compressed-u32 read that refuses to run past the end of the buffer
/// (the raw reader zero-extends instead).
pub(crate) fn read_bounded_u32(buf: &[u8], pos: &mut usize) -> Result<u32, CodecError> {
    if *pos >= buf.len() {
        return Err(CodecError::InvalidEncoding("truncated compressed u32"));
    }
    let (value, consumed) = read_compressed_u32(buf, *pos);
    if *pos + consumed > buf.len() {
        return Err(CodecError::InvalidEncoding("truncated compressed u32"));
    }
    *pos += consumed;
    Ok(value)
}
