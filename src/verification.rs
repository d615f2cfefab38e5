//! QR identity verification
//!
//! A scanned QR payload proves the transporter is physically holding the
//! batch. Matching is exact after trimming surrounding whitespace: no case
//! folding, no partial credit.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Result of comparing a scanned payload against the expected batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum QrVerification {
    Match { batch_id: String },
    Mismatch { scanned: String, expected: String },
}

impl QrVerification {
    pub fn is_match(&self) -> bool {
        matches!(self, QrVerification::Match { .. })
    }

    /// Message shown to the user so they can self-correct
    pub fn describe(&self) -> String {
        match self {
            QrVerification::Match { batch_id } => format!("QR code verified for batch {batch_id}"),
            QrVerification::Mismatch { scanned, expected } => {
                format!("QR code mismatch: scanned {scanned}, expected {expected}")
            }
        }
    }
}

pub fn verify(decoded_payload: &str, expected_batch_id: &str) -> QrVerification {
    let scanned = decoded_payload.trim();
    let expected = expected_batch_id.trim();
    if scanned == expected {
        QrVerification::Match {
            batch_id: expected.to_string(),
        }
    } else {
        QrVerification::Mismatch {
            scanned: scanned.to_string(),
            expected: expected.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QrDecodeError {
    #[error("Image could not be read: {0}")]
    UnreadableImage(String),
    #[error("No QR code found in image")]
    NoCodeFound,
    #[error("QR code could not be decoded: {0}")]
    Undecodable(String),
    #[error("QR decoding timed out after {0:?}")]
    Timeout(Duration),
}

/// Decodes an image to the text payload of the QR code it contains
pub trait QrDecoder: Send + Sync {
    fn decode(&self, image: &[u8]) -> Result<String, QrDecodeError>;
}

/// Decoder built on `image` for parsing and `rqrr` for detection
#[derive(Debug, Clone, Default)]
pub struct RqrrDecoder;

impl QrDecoder for RqrrDecoder {
    fn decode(&self, image: &[u8]) -> Result<String, QrDecodeError> {
        let luma = image::load_from_memory(image)
            .map_err(|e| QrDecodeError::UnreadableImage(e.to_string()))?
            .to_luma8();

        let (width, height) = (luma.width() as usize, luma.height() as usize);
        let mut prepared = rqrr::PreparedImage::prepare_from_greyscale(width, height, |x, y| {
            luma.get_pixel(x as u32, y as u32).0[0]
        });

        let grids = prepared.detect_grids();
        debug!(grids = grids.len(), width, height, "QR grid detection finished");

        let mut last_error = None;
        for grid in grids {
            match grid.decode() {
                Ok((_meta, content)) => return Ok(content),
                Err(e) => last_error = Some(e.to_string()),
            }
        }

        Err(match last_error {
            Some(reason) => QrDecodeError::Undecodable(reason),
            None => QrDecodeError::NoCodeFound,
        })
    }
}

/// Runs a decode on the blocking pool, bounded by `limit`
pub async fn decode_with_timeout(
    decoder: Arc<dyn QrDecoder>,
    image: Vec<u8>,
    limit: Duration,
) -> Result<String, QrDecodeError> {
    let task = tokio::task::spawn_blocking(move || decoder.decode(&image));
    match tokio::time::timeout(limit, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_error)) => Err(QrDecodeError::Undecodable(join_error.to_string())),
        Err(_) => Err(QrDecodeError::Timeout(limit)),
    }
}
