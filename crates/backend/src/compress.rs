use std::io::{Read, Write};

use async_trait::async_trait;
use flate2::read::{DeflateDecoder, GzDecoder};
use flate2::write::DeflateEncoder;
use flate2::Compression;
use page_store_common::BackendError;

use crate::transform::PageDataTransform;

/// Trailing marker byte selecting the decoder.
const MARKER_NONE: u8 = 0;
const MARKER_GZIP: u8 = 1;
const MARKER_DEFLATE_RAW: u8 = 2;

/// Raw-deflate page compression with a one-byte trailing marker.
///
/// When deflate does not shrink the data the original bytes are stored
/// verbatim under `MARKER_NONE`, so the transformed size never exceeds the
/// input size plus the declared overhead. Gzip is accepted on the read path
/// only, for blobs written by earlier store generations.
pub struct DeflateTransform {
    level: Compression,
}

impl DeflateTransform {
    pub fn new() -> Self {
        Self {
            level: Compression::default(),
        }
    }
}

impl Default for DeflateTransform {
    fn default() -> Self {
        Self::new()
    }
}

fn io_err(e: std::io::Error) -> BackendError {
    BackendError::InvalidData(format!("deflate: {e}"))
}

#[async_trait]
impl PageDataTransform for DeflateTransform {
    fn overhead(&self) -> u32 {
        1
    }

    async fn transform(&self, data: Vec<u8>) -> Result<Vec<u8>, BackendError> {
        let mut encoder = DeflateEncoder::new(Vec::new(), self.level);
        encoder.write_all(&data).map_err(io_err)?;
        let mut compressed = encoder.finish().map_err(io_err)?;

        if compressed.len() >= data.len() {
            let mut out = data;
            out.push(MARKER_NONE);
            Ok(out)
        } else {
            compressed.push(MARKER_DEFLATE_RAW);
            Ok(compressed)
        }
    }

    async fn reverse_transform(&self, data: Vec<u8>) -> Result<Vec<u8>, BackendError> {
        let (marker, body) = match data.split_last() {
            Some((marker, body)) => (*marker, body),
            None => {
                return Err(BackendError::InvalidData(
                    "compressed blob is empty".to_string(),
                ))
            }
        };

        match marker {
            MARKER_NONE => Ok(body.to_vec()),
            MARKER_DEFLATE_RAW => {
                let mut out = Vec::new();
                DeflateDecoder::new(body)
                    .read_to_end(&mut out)
                    .map_err(io_err)?;
                Ok(out)
            }
            MARKER_GZIP => {
                let mut out = Vec::new();
                GzDecoder::new(body).read_to_end(&mut out).map_err(io_err)?;
                Ok(out)
            }
            other => Err(BackendError::InvalidData(format!(
                "unknown compression marker {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};

    async fn round_trip(data: Vec<u8>) -> u8 {
        let transform = DeflateTransform::new();
        let stored = transform.transform(data.clone()).await.unwrap();
        let marker = *stored.last().unwrap();
        assert_eq!(transform.reverse_transform(stored).await.unwrap(), data);
        marker
    }

    #[tokio::test]
    async fn test_compressible_data_deflates() {
        let marker = round_trip(vec![0x42; 4096]).await;
        assert_eq!(marker, MARKER_DEFLATE_RAW);
    }

    #[tokio::test]
    async fn test_incompressible_data_stored_verbatim() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let data: Vec<u8> = (0..1024).map(|_| rng.gen()).collect();

        let transform = DeflateTransform::new();
        let stored = transform.transform(data.clone()).await.unwrap();
        assert_eq!(*stored.last().unwrap(), MARKER_NONE);
        assert_eq!(stored.len(), data.len() + 1);
        assert_eq!(&stored[..data.len()], data.as_slice());
        assert_eq!(transform.reverse_transform(stored).await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_empty_data() {
        round_trip(Vec::new()).await;
    }

    #[tokio::test]
    async fn test_gzip_marker_read_path() {
        let data = b"legacy gzip blob contents".to_vec();
        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&data).unwrap();
        let mut stored = encoder.finish().unwrap();
        stored.push(MARKER_GZIP);

        let transform = DeflateTransform::new();
        assert_eq!(transform.reverse_transform(stored).await.unwrap(), data);
    }

    #[tokio::test]
    async fn test_unknown_marker_rejected() {
        let transform = DeflateTransform::new();
        assert!(transform.reverse_transform(vec![1, 2, 3, 9]).await.is_err());
        assert!(transform.reverse_transform(Vec::new()).await.is_err());
    }
}
