//! Output types: the scan result, the per-attempt log and run statistics.

use crate::error::{AttemptError, ScanError};
use crate::pipeline::aamva::FieldMap;
use crate::session::Dimensions;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// The result of a successful scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    /// Parsed license fields. May be empty if the symbol held no known tags.
    pub fields: FieldMap,
    /// Text exactly as the decoder returned it.
    pub raw_text: String,
    /// AAMVA tags present in `raw_text` with no field mapping.
    pub unmapped_tags: Vec<String>,
    /// Every decode attempt of the session, the successful one last.
    pub attempts: Vec<ScanAttempt>,
    pub stats: ScanStats,
}

/// One decode attempt in a session's log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanAttempt {
    /// Position in the log, starting at 0.
    pub index: u32,
    pub stage: AttemptStage,
    /// Requested canvas; `None` for the direct decode of the original.
    pub target: Option<Dimensions>,
    /// Pixel size of the image actually decoded, when it was normalised.
    pub canvas: Option<Dimensions>,
    pub outcome: AttemptOutcome,
}

impl ScanAttempt {
    pub(crate) fn pending(index: u32, stage: AttemptStage, target: Option<Dimensions>) -> Self {
        Self {
            index,
            stage,
            target,
            canvas: None,
            outcome: AttemptOutcome::Pending,
        }
    }
}

/// Which rung of the escalation ladder an attempt belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum AttemptStage {
    /// The unmodified back image.
    Direct,
    /// The original re-normalised to the upscale size.
    Upscale,
    /// A manual crop; `attempt_index` counts earlier failed crops.
    Cropped { attempt_index: u32 },
}

impl fmt::Display for AttemptStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptStage::Direct => f.write_str("direct decode"),
            AttemptStage::Upscale => f.write_str("upscale retry"),
            AttemptStage::Cropped { attempt_index } => {
                write!(f, "cropped decode #{}", attempt_index + 1)
            }
        }
    }
}

/// How an attempt ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// Still running, or cancelled by a reset before it finished.
    Pending,
    /// Raw symbol text.
    Decoded(String),
    DecodeFailed(AttemptError),
}

impl AttemptOutcome {
    pub fn is_decoded(&self) -> bool {
        matches!(self, AttemptOutcome::Decoded(_))
    }
}

/// Timing and counters for a finished scan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanStats {
    /// Wall-clock time from accepting the back image to the decode.
    pub duration_ms: u64,
    /// Decode attempts in the log, including the successful one.
    pub decode_attempts: usize,
    /// Failed manual-crop attempts before success.
    pub crop_attempts: u32,
    /// Whether the upscale retry ran.
    pub upscaled: bool,
}

impl ScanStats {
    pub(crate) fn from_attempts(attempts: &[ScanAttempt], crop_attempts: u32, duration_ms: u64) -> Self {
        Self {
            duration_ms,
            decode_attempts: attempts.len(),
            crop_attempts,
            upscaled: attempts.iter().any(|a| a.stage == AttemptStage::Upscale),
        }
    }
}

/// Serialise `value` as pretty JSON at `path`.
///
/// Written to a sibling temp file first and renamed into place, so a reader
/// never sees a half-written file.
pub async fn write_json<T: Serialize>(path: impl AsRef<Path>, value: &T) -> Result<(), ScanError> {
    let path = path.as_ref();
    let write_failed = |source: std::io::Error| ScanError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    let mut json = serde_json::to_vec_pretty(value)
        .map_err(|e| ScanError::Internal(format!("Failed to serialise output: {e}")))?;
    json.push(b'\n');

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_failed)?;
    }

    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, &json).await.map_err(write_failed)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_failed)?;

    Ok(())
}
