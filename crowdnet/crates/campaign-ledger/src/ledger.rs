use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::{
    campaign::{
        AccountId, Amount, Campaign, CampaignId, CampaignState, Donation, SECONDS_PER_DAY,
    },
    clock::Clock,
    config::LedgerConfig,
    error::{LedgerError, TransferError},
    transfer::Transfer,
};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SnapshotMetadata {
    pub height: u64,
    pub timestamp: u64,
}

/// A campaign together with its donations in insertion order.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CampaignRecord {
    pub campaign: Campaign,
    pub donations: Vec<Donation>,
}

impl CampaignRecord {
    fn outstanding(&self) -> Amount {
        self.donations
            .iter()
            .filter(|d| !d.refunded)
            .map(|d| d.amount)
            .sum()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub meta: SnapshotMetadata,
    pub campaigns: Vec<CampaignRecord>,
    pub events: Vec<LedgerEvent>,
    #[serde(with = "hex_root")]
    pub state_root: [u8; 32],
}

impl LedgerSnapshot {
    pub fn state_root_hex(&self) -> String {
        hex::encode(self.state_root)
    }

    pub fn verify_root(&self) -> bool {
        compute_state_root(&self.campaigns) == self.state_root
    }
}

/// Kept externally tagged so `u128` amounts survive a JSON round trip.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEvent {
    CampaignCreated {
        campaign_id: CampaignId,
        creator: AccountId,
        target_amount: Amount,
        deadline: u64,
    },
    DonationReceived {
        campaign_id: CampaignId,
        index: usize,
        donor: AccountId,
        amount: Amount,
    },
    DonationRefunded {
        campaign_id: CampaignId,
        index: usize,
        donor: AccountId,
        amount: Amount,
    },
    FundsWithdrawn {
        campaign_id: CampaignId,
        creator: AccountId,
        amount: Amount,
    },
}

/// One outbound transfer made during settlement. `donation` is `None` for a
/// creator withdrawal.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Payout {
    pub donation: Option<usize>,
    pub to: AccountId,
    pub amount: Amount,
}

impl Payout {
    fn event(&self, campaign_id: CampaignId) -> LedgerEvent {
        match self.donation {
            Some(index) => LedgerEvent::DonationRefunded {
                campaign_id,
                index,
                donor: self.to.clone(),
                amount: self.amount,
            },
            None => LedgerEvent::FundsWithdrawn {
                campaign_id,
                creator: self.to.clone(),
                amount: self.amount,
            },
        }
    }
}

/// Transfers performed by a refund or withdraw call, in execution order.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Settlement {
    pub campaign_id: CampaignId,
    pub payouts: Vec<Payout>,
}

impl Settlement {
    fn new(campaign_id: CampaignId) -> Self {
        Self {
            campaign_id,
            payouts: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.payouts.is_empty()
    }

    pub fn total_amount(&self) -> Amount {
        self.payouts.iter().map(|p| p.amount).sum()
    }
}

#[derive(Default)]
struct LedgerState {
    meta: SnapshotMetadata,
    campaigns: Vec<CampaignRecord>,
    events: Vec<LedgerEvent>,
}

impl LedgerState {
    fn record(&self, campaign_id: CampaignId) -> Result<&CampaignRecord, LedgerError> {
        usize::try_from(campaign_id)
            .ok()
            .and_then(|idx| self.campaigns.get(idx))
            .ok_or(LedgerError::CampaignNotFound(campaign_id))
    }

    fn record_mut(&mut self, campaign_id: CampaignId) -> Result<&mut CampaignRecord, LedgerError> {
        find_record_mut(&mut self.campaigns, campaign_id)
    }

    fn commit(&mut self, events: impl IntoIterator<Item = LedgerEvent>, timestamp: u64) {
        let before = self.events.len();
        self.events.extend(events);
        if self.events.len() == before {
            return;
        }
        self.meta.height += 1;
        self.meta.timestamp = timestamp;
    }

    fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            meta: self.meta.clone(),
            campaigns: self.campaigns.clone(),
            events: self.events.clone(),
            state_root: compute_state_root(&self.campaigns),
        }
    }
}

/// Owner of every campaign and donation record.
///
/// All mutations hold the write lock for their full duration, outbound
/// transfers included, so operations on a campaign never interleave. The
/// clock is read only once the lock is held. State paired with a transfer is
/// only written after the transfer returned `Ok`.
pub struct CampaignLedger<C, T> {
    config: LedgerConfig,
    clock: C,
    transfer: T,
    state: RwLock<LedgerState>,
}

impl<C: Clock, T: Transfer> CampaignLedger<C, T> {
    pub fn new(config: LedgerConfig, clock: C, transfer: T) -> Self {
        Self {
            config,
            clock,
            transfer,
            state: RwLock::new(LedgerState::default()),
        }
    }

    /// Rebuilds a ledger from a snapshot after checking its root and the
    /// per-campaign accounting.
    pub fn restore(
        snapshot: LedgerSnapshot,
        config: LedgerConfig,
        clock: C,
        transfer: T,
    ) -> Result<Self, LedgerError> {
        validate_records(&snapshot.campaigns)?;
        if !snapshot.verify_root() {
            return Err(LedgerError::SnapshotCorrupt("state root mismatch".into()));
        }
        let state = LedgerState {
            meta: snapshot.meta,
            campaigns: snapshot.campaigns,
            events: snapshot.events,
        };
        Ok(Self {
            config,
            clock,
            transfer,
            state: RwLock::new(state),
        })
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn transfer(&self) -> &T {
        &self.transfer
    }

    fn read(&self) -> RwLockReadGuard<'_, LedgerState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, LedgerState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn create_campaign(
        &self,
        creator: &str,
        description: &str,
        target_amount: Amount,
        duration_days: u64,
    ) -> Result<CampaignId, LedgerError> {
        let creator = creator.trim();
        if creator.is_empty() {
            return Err(LedgerError::InvalidParameters("creator must not be empty".into()));
        }
        if target_amount == 0 {
            return Err(LedgerError::InvalidParameters("target amount must be positive".into()));
        }
        if duration_days == 0 {
            return Err(LedgerError::InvalidParameters("duration must be at least one day".into()));
        }
        if duration_days > self.config.max_duration_days {
            return Err(LedgerError::InvalidParameters(format!(
                "duration of {duration_days} days exceeds the limit of {}",
                self.config.max_duration_days
            )));
        }
        if description.len() > self.config.max_description_len {
            return Err(LedgerError::InvalidParameters(format!(
                "description longer than {} bytes",
                self.config.max_description_len
            )));
        }

        let mut state = self.write();
        let now = self.clock.now();
        let deadline = duration_days
            .checked_mul(SECONDS_PER_DAY)
            .and_then(|secs| now.checked_add(secs))
            .ok_or_else(|| LedgerError::InvalidParameters("deadline out of range".into()))?;
        let id = state.campaigns.len() as CampaignId;
        state.campaigns.push(CampaignRecord {
            campaign: Campaign {
                id,
                creator: creator.to_string(),
                description: description.to_string(),
                target_amount,
                created_at: now,
                deadline,
                amount_collected: 0,
                settled: false,
                withdrawn: false,
            },
            donations: Vec::new(),
        });
        state.commit(
            [LedgerEvent::CampaignCreated {
                campaign_id: id,
                creator: creator.to_string(),
                target_amount,
                deadline,
            }],
            now,
        );
        info!(campaign_id = id, creator, target_amount = %target_amount, deadline, "campaign created");
        Ok(id)
    }

    pub fn donate(
        &self,
        campaign_id: CampaignId,
        donor: &str,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        let mut state = self.write();
        let now = self.clock.now();
        let record = state.record_mut(campaign_id)?;
        let deadline = record.campaign.deadline;
        if now >= deadline {
            return Err(LedgerError::CampaignExpired {
                campaign_id,
                deadline,
            });
        }
        if amount == 0 {
            return Err(LedgerError::InvalidAmount);
        }
        let donor = donor.trim();
        if donor.is_empty() {
            return Err(LedgerError::InvalidParameters("donor must not be empty".into()));
        }
        let collected = record
            .campaign
            .amount_collected
            .checked_add(amount)
            .ok_or(LedgerError::AmountOverflow(campaign_id))?;

        let index = record.donations.len();
        record.donations.push(Donation {
            campaign_id,
            index,
            donor: donor.to_string(),
            amount,
            refunded: false,
        });
        record.campaign.amount_collected = collected;
        state.commit(
            [LedgerEvent::DonationReceived {
                campaign_id,
                index,
                donor: donor.to_string(),
                amount,
            }],
            now,
        );
        info!(campaign_id, index, donor, amount = %amount, collected = %collected, "donation recorded");
        Ok(())
    }

    /// Pays back every donation not yet refunded, in insertion order.
    ///
    /// A failing transfer does not stop the pass: the other donations are
    /// still settled and the failed indices come back in
    /// [`LedgerError::TransferFailed`] for retry via [`Self::refund_donation`]
    /// or another `refund` call.
    pub fn refund(&self, campaign_id: CampaignId) -> Result<Settlement, LedgerError> {
        let mut state = self.write();
        let now = self.clock.now();
        let LedgerState {
            meta,
            campaigns,
            events,
        } = &mut *state;
        let record = find_record_mut(campaigns, campaign_id)?;
        ensure_refundable(&record.campaign, now)?;

        let pending: Vec<usize> = record
            .donations
            .iter()
            .filter(|d| !d.refunded)
            .map(|d| d.index)
            .collect();
        if pending.is_empty() {
            debug!(campaign_id, "refund pass found nothing outstanding");
        }

        let mut settlement = Settlement::new(campaign_id);
        let mut failed = Vec::new();
        let mut last_error = None;
        for index in pending {
            match self.refund_one(record, index) {
                Ok(payout) => {
                    // logged with the payout, not after the pass
                    events.push(payout.event(campaign_id));
                    if settlement.is_empty() {
                        meta.height += 1;
                    }
                    meta.timestamp = now;
                    settlement.payouts.push(payout);
                }
                Err(err) => {
                    warn!(campaign_id, index, error = %err, "refund transfer failed");
                    failed.push(index);
                    last_error = Some(err);
                }
            }
        }
        if failed.is_empty() {
            record.campaign.settled = true;
        }

        match last_error {
            Some(source) => Err(LedgerError::TransferFailed {
                campaign_id,
                donations: failed,
                source,
            }),
            None => {
                if !settlement.is_empty() {
                    info!(
                        campaign_id,
                        transfers = settlement.payouts.len(),
                        total = %settlement.total_amount(),
                        "campaign refunded"
                    );
                }
                Ok(settlement)
            }
        }
    }

    /// Refunds a single donation; used to retry one that failed during
    /// [`Self::refund`]. An already refunded donation is a no-op.
    pub fn refund_donation(
        &self,
        campaign_id: CampaignId,
        index: usize,
    ) -> Result<Settlement, LedgerError> {
        let mut state = self.write();
        let now = self.clock.now();
        let record = state.record_mut(campaign_id)?;
        ensure_refundable(&record.campaign, now)?;
        let refunded = record
            .donations
            .get(index)
            .map(|d| d.refunded)
            .ok_or(LedgerError::DonationNotFound { campaign_id, index })?;

        let mut settlement = Settlement::new(campaign_id);
        if refunded {
            debug!(campaign_id, index, "donation already refunded");
            return Ok(settlement);
        }

        let payout = self.refund_one(record, index).map_err(|source| {
            warn!(campaign_id, index, error = %source, "refund transfer failed");
            LedgerError::TransferFailed {
                campaign_id,
                donations: vec![index],
                source,
            }
        })?;
        if record.donations.iter().all(|d| d.refunded) {
            record.campaign.settled = true;
        }
        let event = payout.event(campaign_id);
        settlement.payouts.push(payout);
        state.commit([event], now);
        info!(campaign_id, index, "donation refunded");
        Ok(settlement)
    }

    /// Sends the collected amount to the creator of a campaign that met its
    /// target. Succeeds at most once per campaign.
    pub fn withdraw(&self, campaign_id: CampaignId) -> Result<Settlement, LedgerError> {
        let mut state = self.write();
        let now = self.clock.now();
        let record = state.record_mut(campaign_id)?;
        let campaign = &mut record.campaign;
        match campaign.state(now) {
            CampaignState::Active => {
                return Err(LedgerError::CampaignStillActive {
                    campaign_id,
                    deadline: campaign.deadline,
                })
            }
            CampaignState::Refundable => return Err(LedgerError::TargetNotReached(campaign_id)),
            CampaignState::Fundable => {}
        }
        if campaign.withdrawn {
            return Err(LedgerError::AlreadyWithdrawn(campaign_id));
        }

        let amount = campaign.amount_collected;
        self.transfer
            .transfer(&campaign.creator, amount)
            .map_err(|source| {
                warn!(campaign_id, error = %source, "withdrawal transfer failed");
                LedgerError::TransferFailed {
                    campaign_id,
                    donations: Vec::new(),
                    source,
                }
            })?;
        campaign.withdrawn = true;
        campaign.settled = true;

        let payout = Payout {
            donation: None,
            to: campaign.creator.clone(),
            amount,
        };
        let event = payout.event(campaign_id);
        state.commit([event], now);
        info!(campaign_id, amount = %amount, "campaign funds withdrawn");
        Ok(Settlement {
            campaign_id,
            payouts: vec![payout],
        })
    }

    fn refund_one(
        &self,
        record: &mut CampaignRecord,
        index: usize,
    ) -> Result<Payout, TransferError> {
        let donation = &mut record.donations[index];
        self.transfer.transfer(&donation.donor, donation.amount)?;
        donation.refunded = true;
        record.campaign.amount_collected -= donation.amount;
        Ok(Payout {
            donation: Some(index),
            to: donation.donor.clone(),
            amount: donation.amount,
        })
    }

    pub fn campaign(&self, campaign_id: CampaignId) -> Result<Campaign, LedgerError> {
        Ok(self.read().record(campaign_id)?.campaign.clone())
    }

    pub fn campaigns(&self) -> Vec<Campaign> {
        self.read()
            .campaigns
            .iter()
            .map(|r| r.campaign.clone())
            .collect()
    }

    pub fn donations(&self, campaign_id: CampaignId) -> Result<Vec<Donation>, LedgerError> {
        Ok(self.read().record(campaign_id)?.donations.clone())
    }

    pub fn campaign_state(&self, campaign_id: CampaignId) -> Result<CampaignState, LedgerError> {
        let now = self.clock.now();
        Ok(self.read().record(campaign_id)?.campaign.state(now))
    }

    pub fn custody_balance(&self, campaign_id: CampaignId) -> Result<Amount, LedgerError> {
        Ok(self.read().record(campaign_id)?.campaign.custody_balance())
    }

    pub fn events(&self) -> Vec<LedgerEvent> {
        self.read().events.clone()
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        self.read().snapshot()
    }
}

fn find_record_mut(
    campaigns: &mut [CampaignRecord],
    campaign_id: CampaignId,
) -> Result<&mut CampaignRecord, LedgerError> {
    usize::try_from(campaign_id)
        .ok()
        .and_then(|idx| campaigns.get_mut(idx))
        .ok_or(LedgerError::CampaignNotFound(campaign_id))
}

fn ensure_refundable(campaign: &Campaign, now: u64) -> Result<(), LedgerError> {
    match campaign.state(now) {
        CampaignState::Active => Err(LedgerError::CampaignStillActive {
            campaign_id: campaign.id,
            deadline: campaign.deadline,
        }),
        CampaignState::Fundable => Err(LedgerError::TargetReached(campaign.id)),
        CampaignState::Refundable => Ok(()),
    }
}

fn validate_records(records: &[CampaignRecord]) -> Result<(), LedgerError> {
    for (pos, record) in records.iter().enumerate() {
        let campaign = &record.campaign;
        if campaign.id != pos as CampaignId {
            return Err(LedgerError::SnapshotCorrupt(format!(
                "campaign at position {pos} has id {}",
                campaign.id
            )));
        }
        for (idx, donation) in record.donations.iter().enumerate() {
            if donation.campaign_id != campaign.id || donation.index != idx {
                return Err(LedgerError::SnapshotCorrupt(format!(
                    "donation {idx} of campaign {} is misfiled",
                    campaign.id
                )));
            }
        }
        if record.outstanding() != campaign.amount_collected {
            return Err(LedgerError::SnapshotCorrupt(format!(
                "campaign {} collected amount does not match its donations",
                campaign.id
            )));
        }
        if campaign.withdrawn && !campaign.settled {
            return Err(LedgerError::SnapshotCorrupt(format!(
                "campaign {} withdrawn but not settled",
                campaign.id
            )));
        }
    }
    Ok(())
}

fn hash_str(hasher: &mut Sha256, value: &str) {
    hasher.update((value.len() as u64).to_le_bytes());
    hasher.update(value.as_bytes());
}

fn compute_state_root(records: &[CampaignRecord]) -> [u8; 32] {
    let mut leaves: Vec<[u8; 32]> = Vec::new();
    for record in records {
        let c = &record.campaign;
        let mut hasher = Sha256::new();
        hasher.update(b"campaign");
        hasher.update(c.id.to_le_bytes());
        hash_str(&mut hasher, &c.creator);
        hash_str(&mut hasher, &c.description);
        hasher.update(c.target_amount.to_le_bytes());
        hasher.update(c.created_at.to_le_bytes());
        hasher.update(c.deadline.to_le_bytes());
        hasher.update(c.amount_collected.to_le_bytes());
        hasher.update([u8::from(c.settled), u8::from(c.withdrawn)]);
        leaves.push(hasher.finalize().into());

        for d in &record.donations {
            let mut hasher = Sha256::new();
            hasher.update(b"donation");
            hasher.update(d.campaign_id.to_le_bytes());
            hasher.update((d.index as u64).to_le_bytes());
            hash_str(&mut hasher, &d.donor);
            hasher.update(d.amount.to_le_bytes());
            hasher.update([u8::from(d.refunded)]);
            leaves.push(hasher.finalize().into());
        }
    }
    build_tree(leaves)
}

fn build_tree(mut leaves: Vec<[u8; 32]>) -> [u8; 32] {
    if leaves.is_empty() {
        return Sha256::digest(b"crowdnet-ledger-empty").into();
    }
    while leaves.len() > 1 {
        let mut next = Vec::with_capacity(leaves.len().div_ceil(2));
        for chunk in leaves.chunks(2) {
            let mut hasher = Sha256::new();
            hasher.update(b"node");
            hasher.update(chunk[0]);
            hasher.update(chunk.get(1).unwrap_or(&chunk[0]));
            next.push(hasher.finalize().into());
        }
        leaves = next;
    }
    leaves[0]
}

mod hex_root {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        let bytes = hex::decode(&encoded).map_err(D::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| D::Error::custom("state root must be 32 bytes"))
    }
}
