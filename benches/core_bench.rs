//! Benchmarks for core ledger operations.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use air_core::{
    balance,
    records::{LedgerEntry, LedgerFields, TransactionType},
    signing, util,
    verify,
};

fn sample_entries(n: usize) -> Vec<LedgerEntry> {
    (0..n)
        .map(|i| {
            let kind = match i % 4 {
                0 if i == 0 => TransactionType::SetBalance,
                0 | 1 => TransactionType::Receipt,
                2 => TransactionType::Shipment,
                _ => TransactionType::NuclearLoss,
            };
            let fields = LedgerFields {
                date: "260101".into(),
                reference: format!("ICD-{i:05}"),
                icd_code: "RD".into(),
                kind,
                element_weight: 1000.0 + i as f64,
                fissile_weight: 20.0,
                items: 1,
            };
            LedgerEntry {
                id: i as i64 + 1,
                signature: signing::sign(&fields),
                fields,
            }
        })
        .collect()
}

fn bench_sign(c: &mut Criterion) {
    let entry = sample_entries(1).remove(0);
    c.bench_function("sign_ledger_entry", |b| {
        b.iter(|| signing::sign(black_box(&entry.fields)))
    });
}

fn bench_sha256(c: &mut Criterion) {
    let data = vec![0u8; 1024];
    c.bench_function("sha256_1kb", |b| b.iter(|| util::sha256(black_box(&data))));
}

fn bench_verify_and_balance(c: &mut Criterion) {
    let entries = sample_entries(10_000);
    c.bench_function("verify_10k", |b| {
        b.iter(|| verify::verify_all(black_box(entries.clone())))
    });
    c.bench_function("running_balance_10k", |b| {
        b.iter(|| balance::compute_running_balances(black_box(entries.iter())))
    });
}

criterion_group!(benches, bench_sign, bench_sha256, bench_verify_and_balance);
criterion_main!(benches);
