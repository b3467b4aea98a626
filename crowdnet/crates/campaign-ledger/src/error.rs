use thiserror::Error;

use crate::campaign::{AccountId, CampaignId};

/// Failures reported by [`crate::CampaignLedger`] operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Creation or donation arguments outside the accepted range.
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("campaign {0} not found")]
    CampaignNotFound(CampaignId),

    #[error("donation {index} of campaign {campaign_id} not found")]
    DonationNotFound { campaign_id: CampaignId, index: usize },

    /// Donation amount of zero.
    #[error("donation amount must be positive")]
    InvalidAmount,

    #[error("campaign {campaign_id} expired at {deadline}")]
    CampaignExpired { campaign_id: CampaignId, deadline: u64 },

    #[error("campaign {campaign_id} is active until {deadline}")]
    CampaignStillActive { campaign_id: CampaignId, deadline: u64 },

    /// The campaign met its target; funds go to the creator, not back to donors.
    #[error("campaign {0} reached its target, use withdraw")]
    TargetReached(CampaignId),

    #[error("campaign {0} missed its target, use refund")]
    TargetNotReached(CampaignId),

    #[error("campaign {0} was already withdrawn")]
    AlreadyWithdrawn(CampaignId),

    #[error("collected amount of campaign {0} overflows")]
    AmountOverflow(CampaignId),

    /// One or more outbound transfers failed. The listed donations (or the
    /// withdrawal, when `donations` is empty) are unsettled and may be retried.
    #[error("transfer failed for campaign {campaign_id} (unsettled donations: {donations:?}): {source}")]
    TransferFailed {
        campaign_id: CampaignId,
        donations: Vec<usize>,
        #[source]
        source: TransferError,
    },

    #[error("snapshot rejected: {0}")]
    SnapshotCorrupt(String),
}

/// Failure of the underlying value-transfer capability.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransferError {
    #[error("payee {account} rejected the transfer")]
    Rejected { account: AccountId },

    #[error("balance of {account} overflows")]
    BalanceOverflow { account: AccountId },

    #[error("insufficient funds in account {account}")]
    InsufficientFunds { account: AccountId },
}
