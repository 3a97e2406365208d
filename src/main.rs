//! crmhealth CLI.

use std::process::ExitCode;

use argh::FromArgs;

use crmhealth_lib::error::{CommandError, HealthError};
use crmhealth_lib::services::health as health_service;
use crmhealth_lib::state::{load_config, load_config_from, AppState};
use crmhealth_lib::types::{AccountHealth, OrgContext};

#[derive(FromArgs, PartialEq, Debug)]
/// Account health scoring and at-risk detection.
struct TopLevel {
    #[argh(subcommand)]
    command: Command,
    /// organization ID (defaults to defaultOrgId from config)
    #[argh(option)]
    org: Option<String>,
    /// actor recorded in the audit trail
    #[argh(option, default = "String::from(\"cli\")")]
    actor: String,
    /// path to config.json (defaults to ~/.crmhealth/config.json)
    #[argh(option)]
    config: Option<String>,
    /// print JSON instead of text
    #[argh(switch)]
    json: bool,
}

#[derive(FromArgs, PartialEq, Debug)]
#[argh(subcommand)]
enum Command {
    Recalc(RecalcCommand),
    RecalcAll(RecalcAllCommand),
    Show(ShowCommand),
    AtRisk(AtRiskCommand),
    PruneAudit(PruneAuditCommand),
}

/// recalculate one account
#[derive(FromArgs, PartialEq, Debug)]
#[argh(subcommand, name = "recalc")]
struct RecalcCommand {
    /// account ID or name
    #[argh(positional)]
    account: String,
}

/// recalculate every active account of the organization
#[derive(FromArgs, PartialEq, Debug)]
#[argh(subcommand, name = "recalc-all")]
struct RecalcAllCommand {}

/// show the stored health of one account
#[derive(FromArgs, PartialEq, Debug)]
#[argh(subcommand, name = "show")]
struct ShowCommand {
    /// account ID or name
    #[argh(positional)]
    account: String,
}

/// list HIGH and CRITICAL accounts, lowest score first
#[derive(FromArgs, PartialEq, Debug)]
#[argh(subcommand, name = "at-risk")]
struct AtRiskCommand {}

/// delete audit files older than auditRetentionDays
#[derive(FromArgs, PartialEq, Debug)]
#[argh(subcommand, name = "prune-audit")]
struct PruneAuditCommand {}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: TopLevel = argh::from_env();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if args.json {
                let body = serde_json::to_string_pretty(&CommandError::from(&e))
                    .unwrap_or_else(|_| e.to_string());
                eprintln!("{}", body);
            } else {
                eprintln!("Error: {}", e);
                eprintln!("{}", e.recovery_suggestion());
            }
            ExitCode::FAILURE
        }
    }
}

fn run(args: &TopLevel) -> Result<(), HealthError> {
    let config = match &args.config {
        Some(path) => load_config_from(std::path::Path::new(path)),
        None => load_config(),
    }
    .map_err(HealthError::InvalidConfig)?;
    let state = AppState::open(config)?;

    if let Command::PruneAudit(_) = args.command {
        let pruned = health_service::prune_audit(&state)?;
        println!("Pruned {} audit files", pruned);
        return Ok(());
    }

    let ctx = args
        .org
        .clone()
        .map(OrgContext::new)
        .or_else(|| state.default_context())
        .ok_or_else(|| {
            HealthError::InvalidConfig("Pass --org or set defaultOrgId in config".to_string())
        })?
        .with_actor(args.actor.clone());

    match &args.command {
        Command::Recalc(cmd) => {
            let id = health_service::resolve_account_id(&state, &ctx, &cmd.account)?;
            let health = health_service::recalculate_health(&state, &ctx, &id)?;
            print_health(&health, args.json);
        }
        Command::RecalcAll(_) => {
            let summary = health_service::recalculate_all_health(&state, &ctx)?;
            if args.json {
                print_json(&summary);
            } else {
                println!(
                    "Updated {} accounts ({} newly scored, {} failed)",
                    summary.updated_count,
                    summary.newly_scored_count,
                    summary.failures.len()
                );
                for f in &summary.failures {
                    println!("  FAILED {}: {}", f.account_id, f.error);
                }
            }
        }
        Command::Show(cmd) => {
            let id = health_service::resolve_account_id(&state, &ctx, &cmd.account)?;
            match health_service::get_account_health(&state, &ctx, &id)? {
                Some(health) => print_health(&health, args.json),
                None => println!("{} has not been scored yet", id),
            }
        }
        Command::AtRisk(_) => {
            let rows = health_service::list_at_risk_accounts(&state, &ctx)?;
            if args.json {
                print_json(&rows);
            } else if rows.is_empty() {
                println!("No accounts at risk");
            } else {
                for h in &rows {
                    println!(
                        "{:>3}  {:<8}  {}  {}",
                        h.score,
                        h.risk_level,
                        h.account_id,
                        h.risk_reason_messages().join("; ")
                    );
                }
            }
        }
        Command::PruneAudit(_) => {}
    }
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{}", s),
        Err(e) => eprintln!("Error: {}", e),
    }
}

fn print_health(h: &AccountHealth, json: bool) {
    if json {
        print_json(h);
        return;
    }
    let trend = match h.trend() {
        Some(d) if d > 0 => format!(" (+{})", d),
        Some(d) if d < 0 => format!(" ({})", d),
        Some(_) => " (=)".to_string(),
        None => String::new(),
    };
    println!("{}: {}{} {}", h.account_id, h.score, trend, h.risk_level);
    let s = &h.sub_scores;
    println!(
        "  engagement {}  support {}  relationship {}  financial {}  adoption {}",
        s.engagement, s.support, s.relationship, s.financial, s.adoption
    );
    for reason in h.risk_reason_messages() {
        println!("  - {}", reason);
    }
    println!("  calculated {}", h.calculated_at);
}
