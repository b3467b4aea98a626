use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use campaign_ledger::{
    campaign::SECONDS_PER_DAY,
    units::{format_units, parse_units},
    Amount, CampaignId, Clock, LedgerConfig, LedgerError, LedgerEvent, Settlement,
};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod demo;
mod store;

use store::{read_state, write_state, CliLedger, StateFile};

#[derive(Parser)]
#[command(name = "crowdfund", version, about = "Crowdfunding campaign ledger")]
struct Cli {
    /// Ledger state file, created on first use.
    #[arg(long, global = true, env = "CROWDFUND_STATE", default_value = "crowdfund_state.json")]
    state: PathBuf,

    #[arg(long, global = true, env = "CROWDFUND_MAX_DESCRIPTION_LEN")]
    max_description_len: Option<usize>,

    #[arg(long, global = true, env = "CROWDFUND_MAX_DURATION_DAYS")]
    max_duration_days: Option<u64>,

    /// Log ledger activity to stderr (RUST_LOG overrides).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    fn ledger_config(&self) -> LedgerConfig {
        let defaults = LedgerConfig::default();
        LedgerConfig {
            max_description_len: self
                .max_description_len
                .unwrap_or(defaults.max_description_len),
            max_duration_days: self.max_duration_days.unwrap_or(defaults.max_duration_days),
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Credit an account in the local account book.
    Fund {
        account: String,
        #[arg(value_parser = parse_units)]
        amount: Amount,
    },
    /// Start a campaign; prints its id.
    Create {
        creator: String,
        description: String,
        #[arg(value_parser = parse_units)]
        target: Amount,
        days: u64,
    },
    /// Move funds from the donor's account into a campaign.
    Donate {
        campaign: CampaignId,
        donor: String,
        #[arg(value_parser = parse_units)]
        amount: Amount,
    },
    /// Pay back donations of an expired campaign that missed its target.
    Refund {
        campaign: CampaignId,
        /// Retry a single donation by index.
        #[arg(long)]
        donation: Option<usize>,
        /// Make transfers to this account fail for this invocation.
        #[arg(long = "fail-payee")]
        fail_payees: Vec<String>,
    },
    /// Pay the collected amount of a funded campaign to its creator.
    Withdraw {
        campaign: CampaignId,
        #[arg(long = "fail-payee")]
        fail_payees: Vec<String>,
    },
    /// Print a campaign and its donations.
    Show {
        campaign: CampaignId,
    },
    List,
    /// Account book balance.
    Balance {
        account: String,
    },
    /// Print the ledger event log.
    Events,
    /// Push the ledger clock forward.
    Advance {
        days: u64,
    },
    /// Check the state file's root and accounting.
    Verify,
    /// Replay the create/donate/expire/refund walkthrough in memory.
    Demo,
}

fn init_logging(verbose: bool) {
    let fallback = if verbose { "info" } else { "warn" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    if let Err(err) = run(cli) {
        eprintln!("error: {err:#}");
        std::process::exit(2);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = cli.ledger_config();
    let path = cli.state;
    match cli.command {
        Command::Fund { account, amount } => with_ledger(&path, config, |ledger| {
            ledger.transfer().credit(&account, amount)?;
            println!(
                "{account} funded: balance {}",
                format_units(ledger.transfer().balance(&account))
            );
            Ok(())
        }),
        Command::Create {
            creator,
            description,
            target,
            days,
        } => with_ledger(&path, config, |ledger| {
            let id = ledger.create_campaign(&creator, &description, target, days)?;
            println!("{id}");
            Ok(())
        }),
        Command::Donate {
            campaign,
            donor,
            amount,
        } => with_ledger(&path, config, |ledger| {
            donate_cmd(ledger, campaign, &donor, amount)
        }),
        Command::Refund {
            campaign,
            donation,
            fail_payees,
        } => with_ledger(&path, config, |ledger| {
            for payee in fail_payees {
                ledger.transfer().reject_payee(payee);
            }
            let settlement = match donation {
                Some(index) => ledger.refund_donation(campaign, index),
                None => ledger.refund(campaign),
            };
            print_settlement("refund", settlement)
        }),
        Command::Withdraw {
            campaign,
            fail_payees,
        } => with_ledger(&path, config, |ledger| {
            for payee in fail_payees {
                ledger.transfer().reject_payee(payee);
            }
            print_settlement("withdraw", ledger.withdraw(campaign))
        }),
        Command::Show { campaign } => show_cmd(&open_ledger(&path, config)?, campaign),
        Command::List => {
            let ledger = open_ledger(&path, config)?;
            let now = ledger.clock().now();
            for c in ledger.campaigns() {
                println!(
                    "{:>4}  {:<10}  {} / {}  {}",
                    c.id,
                    format!("{:?}", c.state(now)),
                    format_units(c.amount_collected),
                    format_units(c.target_amount),
                    c.description
                );
            }
            Ok(())
        }
        Command::Balance { account } => {
            let ledger = open_ledger(&path, config)?;
            println!("{}", format_units(ledger.transfer().balance(&account)));
            Ok(())
        }
        Command::Events => {
            for event in open_ledger(&path, config)?.events() {
                println!("{}", describe_event(&event));
            }
            Ok(())
        }
        Command::Advance { days } => advance_cmd(&path, days),
        Command::Verify => verify_cmd(&path, config),
        Command::Demo => demo::run(config),
    }
}

fn open_ledger(path: &Path, config: LedgerConfig) -> Result<CliLedger> {
    read_state(path)?.into_ledger(config)
}

/// Runs a mutating command and saves the ledger afterwards, also when the
/// command failed: a refund pass may have settled some donations before a
/// transfer error.
fn with_ledger<F>(path: &Path, config: LedgerConfig, f: F) -> Result<()>
where
    F: FnOnce(&CliLedger) -> Result<()>,
{
    let ledger = open_ledger(path, config)?;
    let outcome = f(&ledger);
    write_state(path, &StateFile::capture(&ledger))?;
    outcome
}

fn donate_cmd(ledger: &CliLedger, campaign: CampaignId, donor: &str, amount: Amount) -> Result<()> {
    // the ledger records trimmed ids, so debit the same account it will refund
    let donor = donor.trim();
    let donor_id = donor.to_string();
    ledger
        .transfer()
        .debit(&donor_id, amount)
        .with_context(|| format!("fund {donor} first"))?;
    if let Err(err) = ledger.donate(campaign, donor, amount) {
        ledger.transfer().credit(&donor_id, amount)?;
        return Err(err.into());
    }
    let collected = ledger.campaign(campaign)?.amount_collected;
    println!(
        "{donor} donated {} to campaign {campaign}; collected {}",
        format_units(amount),
        format_units(collected)
    );
    Ok(())
}

fn print_settlement(action: &str, settlement: Result<Settlement, LedgerError>) -> Result<()> {
    let settlement = settlement?;
    if settlement.is_empty() {
        println!("{action}: nothing outstanding for campaign {}", settlement.campaign_id);
        return Ok(());
    }
    for payout in &settlement.payouts {
        match payout.donation {
            Some(index) => println!(
                "{action}: donation {index} → {} {}",
                payout.to,
                format_units(payout.amount)
            ),
            None => println!("{action}: → {} {}", payout.to, format_units(payout.amount)),
        }
    }
    println!(
        "{action}: {} transfer(s), total {}",
        settlement.payouts.len(),
        format_units(settlement.total_amount())
    );
    Ok(())
}

fn show_cmd(ledger: &CliLedger, campaign_id: CampaignId) -> Result<()> {
    let campaign = ledger.campaign(campaign_id)?;
    let now = ledger.clock().now();
    println!("campaign {}: {}", campaign.id, campaign.description);
    println!("  creator:   {}", campaign.creator);
    println!("  target:    {}", format_units(campaign.target_amount));
    println!("  collected: {}", format_units(campaign.amount_collected));
    println!("  custody:   {}", format_units(campaign.custody_balance()));
    println!("  state:     {:?}", campaign.state(now));
    if now < campaign.deadline {
        let left = campaign.deadline - now;
        println!(
            "  deadline:  {} ({}d {}h left)",
            campaign.deadline,
            left / SECONDS_PER_DAY,
            left % SECONDS_PER_DAY / 3_600
        );
    } else {
        println!("  deadline:  {} (passed)", campaign.deadline);
    }
    println!("  settled:   {}  withdrawn: {}", campaign.settled, campaign.withdrawn);
    for d in ledger.donations(campaign_id)? {
        println!(
            "  #{:<3} {:<16} {:>24}{}",
            d.index,
            d.donor,
            format_units(d.amount),
            if d.refunded { "  refunded" } else { "" }
        );
    }
    Ok(())
}

fn describe_event(event: &LedgerEvent) -> String {
    match event {
        LedgerEvent::CampaignCreated {
            campaign_id,
            creator,
            target_amount,
            deadline,
        } => format!(
            "created   #{campaign_id} by {creator}, target {}, deadline {deadline}",
            format_units(*target_amount)
        ),
        LedgerEvent::DonationReceived {
            campaign_id,
            index,
            donor,
            amount,
        } => format!(
            "donated   #{campaign_id}/{index} {donor} {}",
            format_units(*amount)
        ),
        LedgerEvent::DonationRefunded {
            campaign_id,
            index,
            donor,
            amount,
        } => format!(
            "refunded  #{campaign_id}/{index} {donor} {}",
            format_units(*amount)
        ),
        LedgerEvent::FundsWithdrawn {
            campaign_id,
            creator,
            amount,
        } => format!("withdrawn #{campaign_id} {creator} {}", format_units(*amount)),
    }
}

fn advance_cmd(path: &Path, days: u64) -> Result<()> {
    if days == 0 {
        bail!("advance needs at least one day");
    }
    let mut state = read_state(path)?;
    state.clock_offset_secs = days
        .checked_mul(SECONDS_PER_DAY)
        .and_then(|secs| state.clock_offset_secs.checked_add(secs))
        .context("clock offset overflow")?;
    write_state(path, &state)?;
    println!(
        "clock advanced {days} day(s); total offset {} day(s)",
        state.clock_offset_secs / SECONDS_PER_DAY
    );
    Ok(())
}

fn verify_cmd(path: &Path, config: LedgerConfig) -> Result<()> {
    let state = read_state(path)?;
    let root = state.ledger.state_root_hex();
    let ledger = state.into_ledger(config)?;
    println!(
        "verify: OK ({} campaigns, height {}, root {root})",
        ledger.campaigns().len(),
        ledger.snapshot().meta.height
    );
    Ok(())
}
