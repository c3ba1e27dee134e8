//! Hand-off of a completed enrollment to a matching/search service.

use crate::sequencer::CompletedEnrollment;
use crate::types::FaceDescriptor;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MatchError {
    #[error("gallery io: {0}")]
    Io(#[from] std::io::Error),
    #[error("gallery parse: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("descriptor length mismatch: gallery entry {label} has {found}, enrollment has {expected}")]
    DimensionMismatch {
        label: String,
        expected: usize,
        found: usize,
    },
}

/// One item returned by the matching service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedItem {
    pub url: String,
    pub label: String,
    pub similarity: f32,
}

/// The external matching collaborator.
pub trait MatchService {
    fn find_matches(&self, enrollment: &CompletedEnrollment) -> Result<Vec<MatchedItem>, MatchError>;
}

/// A photo in the sample gallery with the descriptor of the face in it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GalleryEntry {
    pub url: String,
    pub label: String,
    pub descriptor: FaceDescriptor,
}

/// Cosine-similarity matcher over an in-memory gallery.
///
/// An entry's score is its best similarity against any of the three pose
/// descriptors. Every entry is scored; there is no early exit.
pub struct GalleryMatcher {
    entries: Vec<GalleryEntry>,
    threshold: f32,
}

impl GalleryMatcher {
    pub fn new(entries: Vec<GalleryEntry>, threshold: f32) -> Self {
        Self { entries, threshold }
    }

    /// Load a JSON array of [`GalleryEntry`].
    pub fn from_json_file(path: &Path, threshold: f32) -> Result<Self, MatchError> {
        let raw = std::fs::read_to_string(path)?;
        let entries: Vec<GalleryEntry> = serde_json::from_str(&raw)?;
        tracing::info!(path = %path.display(), entries = entries.len(), threshold, "gallery loaded");
        Ok(Self::new(entries, threshold))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl MatchService for GalleryMatcher {
    fn find_matches(&self, enrollment: &CompletedEnrollment) -> Result<Vec<MatchedItem>, MatchError> {
        let expected = enrollment.descriptors[0].len();
        let mut matches = Vec::new();

        for entry in &self.entries {
            if entry.descriptor.len() != expected {
                return Err(MatchError::DimensionMismatch {
                    label: entry.label.clone(),
                    expected,
                    found: entry.descriptor.len(),
                });
            }
            let best = enrollment
                .descriptors
                .iter()
                .map(|d| d.similarity(&entry.descriptor))
                .fold(f32::NEG_INFINITY, f32::max);

            if best >= self.threshold {
                matches.push(MatchedItem {
                    url: entry.url.clone(),
                    label: entry.label.clone(),
                    similarity: best,
                });
            }
        }

        matches.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        tracing::info!(
            session = %enrollment.session_id,
            scanned = self.entries.len(),
            matched = matches.len(),
            "gallery search finished"
        );
        Ok(matches)
    }
}
