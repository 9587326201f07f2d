//! Concurrent funding simulation.
//!
//! Opens a handful of investor accounts and one project, lets every investor
//! hammer the project from its own thread, then prints the final project
//! state and a full ledger verification as JSON.

use std::sync::Arc;
use std::thread;

use anyhow::{Context, bail};
use serde_json::json;
use tracing::{info, warn};

use fundhub_core::{Money, OwnerId};
use fundhub_events::{EventEnvelope, InMemoryEventBus};
use fundhub_infra::service::{
    CreateAccountRequest, CreateProjectRequest, InvestmentRequest, TransactionQuery,
};
use fundhub_infra::{
    BusNotificationEmitter, EngineConfig, FinanceService, InMemoryCategoryStore, NotificationWorker,
};
use fundhub_ledger::{AccountKind, LedgerEvent};

const INVESTORS: usize = 6;
const ROUNDS: usize = 25;
const TICKET: i64 = 1_500;
const TARGET: i64 = 150_000;

fn main() -> anyhow::Result<()> {
    fundhub_observability::init();

    let config = EngineConfig::from_env();
    let currency = config.default_currency;

    let bus = Arc::new(InMemoryEventBus::<EventEnvelope<LedgerEvent>>::new());
    let notifier = NotificationWorker::spawn("fundhub-notifier", bus.clone(), |env| {
        info!(
            event_type = env.event_type(),
            sequence = env.sequence_number(),
            subject = %env.subject_id(),
            "notification delivered"
        );
        Ok::<(), std::convert::Infallible>(())
    })
    .context("spawning notification worker")?;

    let svc = Arc::new(FinanceService::new(
        config,
        Arc::new(InMemoryCategoryStore::new()),
        BusNotificationEmitter::new(bus),
    ));

    let project = svc
        .create_project(CreateProjectRequest {
            owner_id: OwnerId::new(),
            title: "Neighbourhood solar co-op".to_string(),
            description: Some("Rooftop panels for twelve buildings".to_string()),
            target: Money::new(TARGET, currency),
            auto_activate: true,
        })
        .context("creating project")?;

    let mut accounts = Vec::with_capacity(INVESTORS);
    for n in 0..INVESTORS {
        let account = svc
            .create_account(CreateAccountRequest {
                owner_id: OwnerId::new(),
                name: format!("investor-{n}"),
                kind: AccountKind::Investment,
                currency: currency.to_string(),
                opening_balance: 40_000,
                credit_limit: None,
            })
            .with_context(|| format!("opening account for investor {n}"))?;
        accounts.push(account.id);
    }

    let handles: Vec<_> = accounts
        .iter()
        .copied()
        .enumerate()
        .map(|(n, account_id)| {
            let svc = svc.clone();
            let project_id = project.id;
            thread::Builder::new()
                .name(format!("investor-{n}"))
                .spawn(move || {
                    let mut accepted = 0u32;
                    for round in 0..ROUNDS {
                        let req = InvestmentRequest {
                            project_id,
                            account_id,
                            amount: Money::new(TICKET, currency),
                            idempotency_key: Some(format!("sim-{n}-{round}")),
                        };
                        match svc.invest(req) {
                            Ok(_) => accepted += 1,
                            Err(e) => warn!(investor = n, round, error = %e, "investment rejected"),
                        }
                    }
                    accepted
                })
        })
        .collect::<Result<_, _>>()
        .context("spawning investor threads")?;

    let mut accepted = 0;
    for handle in handles {
        accepted += handle
            .join()
            .map_err(|_| anyhow::anyhow!("investor thread panicked"))?;
    }

    let project = svc.get_project(project.id)?;
    let mismatches = svc.verify_ledger()?;
    let audit = svc.funding().audit_project(project.id)?;
    let recent = svc.list_transactions(TransactionQuery {
        size: Some(5),
        ..TransactionQuery::default()
    })?;
    notifier.shutdown();

    let report = json!({
        "project": project,
        "accepted_investments": accepted,
        "audit": audit,
        "balance_mismatches": mismatches,
        "recent_transactions": recent.items,
        "journal_rows": recent.total,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    if !mismatches.is_empty() || !audit.is_consistent() {
        bail!("ledger verification failed");
    }
    if project.current.amount_minor > TARGET {
        bail!("project overfunded: {}", project.current);
    }
    info!(
        current = project.current.amount_minor,
        status = ?project.status,
        "simulation finished"
    );
    Ok(())
}
