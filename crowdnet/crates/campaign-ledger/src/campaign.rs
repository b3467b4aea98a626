use serde::{Deserialize, Serialize};

pub type AccountId = String;
pub type CampaignId = u64;
pub type Amount = u128;

pub const SECONDS_PER_DAY: u64 = 86_400;

/// Phase of a campaign, derived from the clock and its funding totals.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CampaignState {
    /// Deadline not reached; donations accepted.
    Active,
    /// Deadline passed with the target met; the creator may withdraw once.
    Fundable,
    /// Deadline passed below target; every donation may be refunded once.
    Refundable,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Campaign {
    pub id: CampaignId,
    pub creator: AccountId,
    pub description: String,
    pub target_amount: Amount,
    pub created_at: u64,
    pub deadline: u64,
    pub amount_collected: Amount,
    /// Set once a refund pass finished with every donation paid back, or once
    /// the creator withdrew.
    pub settled: bool,
    pub withdrawn: bool,
}

impl Campaign {
    pub fn state(&self, now: u64) -> CampaignState {
        if now < self.deadline {
            CampaignState::Active
        } else if self.amount_collected >= self.target_amount {
            CampaignState::Fundable
        } else {
            CampaignState::Refundable
        }
    }

    /// Funds still held for this campaign.
    pub fn custody_balance(&self) -> Amount {
        if self.withdrawn {
            0
        } else {
            self.amount_collected
        }
    }
}

/// One contribution. Repeated donations from the same donor stay separate.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Donation {
    pub campaign_id: CampaignId,
    pub index: usize,
    pub donor: AccountId,
    pub amount: Amount,
    pub refunded: bool,
}
