use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::Utc;

use wirepay_core::{AggregateId, ConversionRate, Currency, MoneyValue, UserAccountId, UserId};
use wirepay_infra::cdc::OutboxCdcPublisher;
use wirepay_infra::event_store::InMemoryEventStore;
use wirepay_infra::outbox::InMemoryOutboxStore;
use wirepay_infra::write_repository::PaymentWriteRepository;
use wirepay_payments::{Payment, PaymentId};

/// Naive CRUD simulation: direct key-value updates (no events, no history).
#[derive(Debug, Clone)]
struct NaiveCrudStore {
    inner: Arc<RwLock<HashMap<AggregateId, CrudState>>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CrudState {
    status: String,
    amount: i64,
}

impl NaiveCrudStore {
    fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn create(&self, id: AggregateId, amount: i64) {
        let mut map = self.inner.write().unwrap();
        map.insert(
            id,
            CrudState {
                status: "ToPay".to_string(),
                amount,
            },
        );
    }
}

fn rates() -> Vec<ConversionRate> {
    vec![ConversionRate::new(Currency::Usd, Currency::Eur, 8_500)]
}

fn place(rates: &[ConversionRate]) -> Payment {
    Payment::place(
        PaymentId::new(AggregateId::new()),
        UserId::new(),
        UserAccountId::new(),
        MoneyValue::of(10_000, Currency::Usd),
        Currency::Eur,
        rates,
        Utc::now(),
    )
    .unwrap()
}

fn bench_place_and_save(c: &mut Criterion) {
    let mut group = c.benchmark_group("write_path");
    group.throughput(Throughput::Elements(1));

    group.bench_function("event_sourced_place_and_save", |b| {
        let store = Arc::new(InMemoryEventStore::new());
        let outbox = InMemoryOutboxStore::arc();
        let repo = PaymentWriteRepository::new(store, OutboxCdcPublisher::new(outbox));
        let rates = rates();

        b.iter(|| {
            let mut payment = place(&rates);
            repo.save(black_box(&mut payment)).unwrap();
        });
    });

    group.bench_function("naive_crud_create", |b| {
        let store = NaiveCrudStore::new();

        b.iter(|| {
            store.create(black_box(AggregateId::new()), 10_000);
        });
    });

    group.finish();
}

fn bench_rehydration(c: &mut Criterion) {
    let mut group = c.benchmark_group("rehydration");

    for events in [2u64, 3] {
        let store = Arc::new(InMemoryEventStore::new());
        let outbox = InMemoryOutboxStore::arc();
        let repo = PaymentWriteRepository::new(store, OutboxCdcPublisher::new(outbox));
        let rates = rates();

        let mut payment = place(&rates);
        repo.save(&mut payment).unwrap();
        if events >= 3 {
            payment.start_processing(Utc::now()).unwrap();
            payment.complete(Utc::now()).unwrap();
            repo.save(&mut payment).unwrap();
        } else {
            payment.start_processing(Utc::now()).unwrap();
            repo.save(&mut payment).unwrap();
        }
        let payment_id = payment.payment_id();

        group.bench_with_input(
            BenchmarkId::new("load_and_replay", events),
            &events,
            |b, _| {
                b.iter(|| {
                    let loaded = repo.load(black_box(payment_id)).unwrap();
                    black_box(loaded);
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_place_and_save, bench_rehydration);
criterion_main!(benches);
