use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use chrono::{NaiveDate, Utc};
use fundhub_core::{AccountId, Currency, Money, OwnerId};
use fundhub_infra::{
    BudgetAggregator, ConsistencyGuard, FundingCoordinator, InMemoryCategoryStore, InMemoryJournal,
    InvestRequest, LedgerStore, NoopEmitter, Posting, TransactionJournal,
};
use fundhub_ledger::{AccountKind, BudgetPeriod, NewBudget, NewProject, OpenAccount, TransactionDraft};
use std::sync::Arc;
use std::time::Duration;

type Ledger = LedgerStore<Arc<InMemoryJournal>>;

fn usd(amount: i64) -> Money {
    Money::new(amount, Currency::USD)
}

fn ledger() -> Arc<Ledger> {
    let guard = Arc::new(ConsistencyGuard::new(Duration::from_millis(250)));
    Arc::new(LedgerStore::new(guard, Arc::new(InMemoryJournal::new()), 0))
}

fn open(ledger: &Ledger, balance: i64) -> AccountId {
    ledger
        .open_account(OpenAccount {
            owner: OwnerId::new(),
            name: "bench".to_string(),
            kind: AccountKind::Checking,
            currency: Currency::USD,
            opening_balance: balance,
            credit_limit: None,
        })
        .unwrap()
        .id_typed()
}

fn bench_invest_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("invest_latency");

    let coordinator = FundingCoordinator::new(ledger(), NoopEmitter);
    let investor = open(coordinator.ledger(), i64::MAX / 2);
    let project = coordinator
        .create_project(
            NewProject {
                owner: OwnerId::new(),
                title: "Bench".to_string(),
                description: None,
                target: usd(i64::MAX / 2),
            },
            true,
        )
        .unwrap()
        .id_typed();

    group.bench_function("single_investor", |b| {
        b.iter(|| {
            black_box(
                coordinator
                    .invest(InvestRequest {
                        project,
                        investor_account: investor,
                        amount: usd(1),
                        idempotency_key: None,
                    })
                    .unwrap(),
            );
        });
    });

    group.finish();
}

fn bench_transfer_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("transfer_throughput");

    for batch_size in [1, 10, 100].iter() {
        group.throughput(Throughput::Elements(*batch_size as u64));
        group.bench_with_input(
            BenchmarkId::new("sequential_transfers", batch_size),
            batch_size,
            |b, &size| {
                let ledger = ledger();
                let a = open(&ledger, i64::MAX / 4);
                let z = open(&ledger, 0);

                b.iter(|| {
                    for _ in 0..size {
                        black_box(ledger.transfer(a, z, usd(1), Posting::default()).unwrap());
                    }
                });
            },
        );
    }

    group.finish();
}

fn bench_balance_reconstruction(c: &mut Criterion) {
    let mut group = c.benchmark_group("balance_reconstruction");

    for rows in [100, 1_000, 10_000].iter() {
        group.throughput(Throughput::Elements(*rows as u64));
        group.bench_with_input(BenchmarkId::new("replay", rows), rows, |b, &rows| {
            let journal = InMemoryJournal::new();
            let account = AccountId::new();
            for _ in 0..rows {
                journal.append(TransactionDraft::income(account, usd(3))).unwrap();
            }

            b.iter(|| black_box(journal.reconstruct_balance(account).unwrap()));
        });
    }

    group.finish();
}

fn bench_budget_recompute(c: &mut Criterion) {
    let mut group = c.benchmark_group("budget_recompute");

    for rows in [100, 1_000, 10_000].iter() {
        group.bench_with_input(BenchmarkId::new("status", rows), rows, |b, &rows| {
            let journal = Arc::new(InMemoryJournal::new());
            let aggregator =
                BudgetAggregator::new(journal.clone(), Arc::new(InMemoryCategoryStore::new()), 80);
            let today = Utc::now().date_naive();
            let budget = aggregator
                .create_budget(NewBudget {
                    name: "bench".to_string(),
                    category_id: None,
                    period: BudgetPeriod::Monthly,
                    anchor: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                    amount: usd(1_000_000),
                    warning_percent: None,
                })
                .unwrap();
            let account = AccountId::new();
            for _ in 0..rows {
                journal.append(TransactionDraft::expense(account, usd(1))).unwrap();
            }

            b.iter(|| black_box(aggregator.status(budget.id, today).unwrap()));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_invest_latency,
    bench_transfer_throughput,
    bench_balance_reconstruction,
    bench_budget_recompute
);
criterion_main!(benches);
