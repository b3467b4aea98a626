use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use campaign_ledger::{
    AccountId, Amount, Bank, CampaignLedger, LedgerConfig, LedgerSnapshot, SystemClock,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const STATE_VERSION: u8 = 1;

pub type CliLedger = CampaignLedger<SystemClock, Bank>;

/// Everything the CLI keeps between invocations.
#[derive(Serialize, Deserialize)]
pub struct StateFile {
    pub version: u8,
    /// Simulated time added on top of the wall clock by `advance`.
    pub clock_offset_secs: u64,
    pub balances: BTreeMap<AccountId, Amount>,
    pub ledger: LedgerSnapshot,
}

impl StateFile {
    pub fn empty() -> Self {
        let blank = CliLedger::new(LedgerConfig::default(), SystemClock::new(), Bank::new());
        Self::capture(&blank)
    }

    pub fn capture(ledger: &CliLedger) -> Self {
        Self {
            version: STATE_VERSION,
            clock_offset_secs: ledger.clock().offset_secs(),
            balances: ledger.transfer().balances(),
            ledger: ledger.snapshot(),
        }
    }

    pub fn into_ledger(self, config: LedgerConfig) -> Result<CliLedger> {
        let ledger = CampaignLedger::restore(
            self.ledger,
            config,
            SystemClock::with_offset(self.clock_offset_secs),
            Bank::from_balances(self.balances),
        )?;
        Ok(ledger)
    }
}

/// Reads the state file, or starts from an empty ledger if it does not exist.
pub fn read_state(path: &Path) -> Result<StateFile> {
    if !path.exists() {
        debug!(path = %path.display(), "no state file yet, starting empty");
        return Ok(StateFile::empty());
    }
    let bytes = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let state: StateFile =
        serde_json::from_slice(&bytes).with_context(|| format!("parse {}", path.display()))?;
    if state.version != STATE_VERSION {
        bail!(
            "{}: unsupported state version {} (expected {STATE_VERSION})",
            path.display(),
            state.version
        );
    }
    Ok(state)
}

/// Writes next to the target and renames over it, so a crash never leaves a
/// half-written state file.
pub fn write_state(path: &Path, state: &StateFile) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("mkdir {}", parent.display()))?;
    }
    let json = serde_json::to_vec_pretty(state).context("encode state")?;
    let tmp = tmp_path(path);
    fs::write(&tmp, json).with_context(|| format!("write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("replace {}", path.display()))?;
    debug!(path = %path.display(), height = state.ledger.meta.height, "state saved");
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_reads_as_empty_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let state = read_state(&dir.path().join("absent.json")).unwrap();
        assert_eq!(state.version, STATE_VERSION);
        assert_eq!(state.clock_offset_secs, 0);
        assert!(state.ledger.campaigns.is_empty());
        assert!(state.ledger.verify_root());
    }

    #[test]
    fn state_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");

        let ledger = StateFile::empty().into_ledger(LedgerConfig::default()).unwrap();
        ledger.transfer().credit(&"donor1".to_string(), 7).unwrap();
        let id = ledger.create_campaign("creator", "Save the Pandas", 10, 30).unwrap();
        ledger.donate(id, "donor1", 3).unwrap();
        write_state(&path, &StateFile::capture(&ledger)).unwrap();
        assert!(!tmp_path(&path).exists());

        let restored = read_state(&path)
            .unwrap()
            .into_ledger(LedgerConfig::default())
            .unwrap();
        assert_eq!(restored.campaign(id).unwrap(), ledger.campaign(id).unwrap());
        assert_eq!(restored.donations(id).unwrap().len(), 1);
        assert_eq!(restored.transfer().balance("donor1"), 7);
    }

    #[test]
    fn tampered_state_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let ledger = StateFile::empty().into_ledger(LedgerConfig::default()).unwrap();
        let id = ledger.create_campaign("creator", "roof", 10, 1).unwrap();
        ledger.donate(id, "alice", 4).unwrap();

        let mut state = StateFile::capture(&ledger);
        state.ledger.campaigns[0].donations[0].amount = 9;
        state.ledger.campaigns[0].campaign.amount_collected = 9;
        write_state(&path, &state).unwrap();

        let err = read_state(&path)
            .unwrap()
            .into_ledger(LedgerConfig::default())
            .err()
            .unwrap();
        assert!(err.to_string().contains("state root mismatch"), "{err:#}");
    }

    #[test]
    fn unknown_version_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let mut state = StateFile::empty();
        state.version = 9;
        write_state(&path, &state).unwrap();
        assert!(read_state(&path).is_err());
    }
}
