//! Reconciliation pass output.

use serde::{Deserialize, Serialize};

use crate::types::{BlobRef, ContentHash};

/// Result of one reconciliation pass. Produced fresh each pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationReport {
    /// Cache entries whose blob ref matched no known anchor; purged.
    pub orphaned_blob_refs: Vec<BlobRef>,
    /// Anchors whose blob could not be fetched. Informational only.
    pub missing_blobs_for_anchors: Vec<ContentHash>,
    /// Entries upserted by replaying anchors missing from the cache.
    pub repaired_count: usize,
    /// Anchors examined inside the lookback window.
    pub anchors_checked: usize,
}

impl ReconciliationReport {
    /// Whether the pass found nothing to report.
    pub fn is_clean(&self) -> bool {
        self.orphaned_blob_refs.is_empty()
            && self.missing_blobs_for_anchors.is_empty()
            && self.repaired_count == 0
    }
}
