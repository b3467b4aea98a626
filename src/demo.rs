use std::sync::Arc;

use anyhow::Result;
use campaign_ledger::{
    campaign::SECONDS_PER_DAY,
    units::{format_units, parse_units},
    Bank, CampaignLedger, Clock, LedgerConfig, ManualClock, SystemClock,
};

const STARTING_BALANCE: &str = "10000";

/// Walks a campaign through creation, a partial donation, expiry and refund
/// on a throwaway in-memory ledger.
pub fn run(config: LedgerConfig) -> Result<()> {
    let clock = ManualClock::new(SystemClock::new().now());
    let bank = Arc::new(Bank::new());
    let ledger = CampaignLedger::new(config, clock.clone(), Arc::clone(&bank));

    let (creator, donor) = ("creator".to_string(), "donor1".to_string());
    for account in ["owner", creator.as_str(), donor.as_str()] {
        bank.credit(&account.to_string(), parse_units(STARTING_BALANCE)?)?;
    }

    println!("--- 1. create campaign ---");
    let target = parse_units("1")?;
    let id = ledger.create_campaign(&creator, "Save the Pandas", target, 30)?;
    println!(
        "campaign {id} 'Save the Pandas' created: target {} over 30 days",
        format_units(target)
    );

    println!("\n--- 2. donate ---");
    let donation = parse_units("0.5")?;
    bank.debit(&donor, donation)?;
    ledger.donate(id, &donor, donation)?;
    println!("{donor} donated {}", format_units(donation));
    let campaign = ledger.campaign(id)?;
    println!("collected so far: {}", format_units(campaign.amount_collected));

    println!("\n--- 3. 31 days later ---");
    clock.advance(31 * SECONDS_PER_DAY);
    println!("campaign state: {:?}", ledger.campaign_state(id)?);

    println!("\n--- 4. refund ---");
    let before = bank.balance(&donor);
    let settlement = ledger.refund(id)?;
    let after = bank.balance(&donor);
    println!(
        "refund done: {} transfer(s), {} balance change +{}",
        settlement.payouts.len(),
        donor,
        format_units(after - before)
    );

    let again = ledger.refund(id)?;
    println!("second refund call: {} transfer(s)", again.payouts.len());
    println!("state root {}", ledger.snapshot().state_root_hex());
    Ok(())
}
