//! Read-only view for the downstream registration step.

use std::sync::Arc;

use poc_archive::{ContributionArchive, SubmissionStatus};
use poc_ledger::{TokenAllocation, TokenLedger};

#[derive(Clone)]
pub struct RegistrationView {
    archive: Arc<ContributionArchive>,
    ledger: Arc<TokenLedger>,
}

impl RegistrationView {
    pub fn new(archive: Arc<ContributionArchive>, ledger: Arc<TokenLedger>) -> Self {
        Self { archive, ledger }
    }

    /// True for a QUALIFIED record, and for an ARCHIVED one that was paid
    /// while qualified. Unknown hashes are not qualified.
    pub async fn is_qualified(&self, hash: &str) -> bool {
        let Ok(record) = self.archive.get(hash).await else {
            return false;
        };
        match record.status {
            SubmissionStatus::Qualified => true,
            SubmissionStatus::Archived => self.ledger.get_allocation(hash).await.is_some(),
            _ => false,
        }
    }

    pub async fn get_allocation(&self, hash: &str) -> Option<TokenAllocation> {
        self.ledger.get_allocation(hash).await
    }
}
