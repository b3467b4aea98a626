//! Accounting core for Crowdnet funding campaigns.
//!
//! The crate is a standalone state machine with no notion of where it runs:
//!
//! * [`campaign`]: campaign and donation records plus the derived
//!   [`CampaignState`].
//! * [`ledger`]: [`CampaignLedger`], the single owner of all records, with the
//!   create/donate/refund/withdraw operations, the event log and snapshots.
//! * [`clock`]: the time source the ledger reads to decide expiry.
//! * [`transfer`]: the value-transfer capability used to pay donors and
//!   creators, with an in-memory [`Bank`].
//! * [`units`]: conversion between decimal unit strings and smallest units.
//!
//! Expiry is evaluated lazily on every call; nothing in here spawns tasks or
//! acts on its own when a deadline passes.

pub mod campaign;
pub mod clock;
pub mod config;
pub mod ledger;
pub mod transfer;
pub mod units;

mod error;

pub use campaign::{AccountId, Amount, Campaign, CampaignId, CampaignState, Donation};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::LedgerConfig;
pub use error::{LedgerError, TransferError};
pub use ledger::{CampaignLedger, LedgerEvent, LedgerSnapshot, Payout, Settlement};
pub use transfer::{Bank, Transfer};
