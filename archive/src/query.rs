//! Record filters for registry queries.

use serde::{Deserialize, Serialize};

use crate::record::SubmissionRecord;
use crate::types::{Epoch, Metal, SubmissionStatus};

/// Result ordering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryOrder {
    /// Oldest first; registry index = position
    #[default]
    Insertion,
    /// Newest first
    ReverseInsertion,
}

/// Query parameters for listing records.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordFilter {
    pub status: Option<SubmissionStatus>,
    pub metal: Option<Metal>,
    pub epoch: Option<Epoch>,
    pub contributor_id: Option<String>,
    pub category: Option<String>,
    #[serde(default)]
    pub order: QueryOrder,
    #[serde(default)]
    pub offset: usize,
    pub limit: Option<usize>,
}

impl RecordFilter {
    /// Match everything, insertion order.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: SubmissionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_metal(mut self, metal: Metal) -> Self {
        self.metal = Some(metal);
        self
    }

    pub fn with_epoch(mut self, epoch: Epoch) -> Self {
        self.epoch = Some(epoch);
        self
    }

    pub fn with_contributor(mut self, contributor_id: impl Into<String>) -> Self {
        self.contributor_id = Some(contributor_id.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_order(mut self, order: QueryOrder) -> Self {
        self.order = order;
        self
    }

    pub fn with_page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = Some(limit);
        self
    }

    /// Whether `record` passes every set criterion.
    pub fn matches(&self, record: &SubmissionRecord) -> bool {
        if let Some(status) = self.status {
            if record.status != status {
                return false;
            }
        }
        if let Some(metal) = self.metal {
            if !record.metals.contains(&metal) {
                return false;
            }
        }
        if let Some(epoch) = self.epoch {
            if record.epoch != Some(epoch) {
                return false;
            }
        }
        if let Some(contributor) = &self.contributor_id {
            if &record.contributor_id != contributor {
                return false;
            }
        }
        if let Some(category) = &self.category {
            if &record.category != category {
                return false;
            }
        }
        true
    }
}
