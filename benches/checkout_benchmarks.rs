use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rust_decimal::Decimal;
use std::time::Duration;
use uuid::Uuid;

use reczone_api::services::carts::{line_key, normalized_member_ids};
use reczone_api::services::pricing::{expected_total, total_in_cents, within_tolerance};

// Benchmark for cart line identity derivation
fn line_key_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("line_key");

    for member_count in [1usize, 2, 4, 8].iter() {
        let item_id = Uuid::new_v4();
        let members: Vec<Uuid> = (0..*member_count).map(|_| Uuid::new_v4()).collect();

        group.bench_with_input(
            BenchmarkId::from_parameter(member_count),
            member_count,
            |b, _| {
                b.iter(|| {
                    let key = line_key(black_box(item_id), black_box(&members));
                    black_box(key)
                });
            },
        );
    }

    group.finish();
}

// Benchmark for member id normalization
fn member_normalization_benchmark(c: &mut Criterion) {
    let members: Vec<Uuid> = (0..8).map(|_| Uuid::new_v4()).collect();
    let mut with_duplicates = members.clone();
    with_duplicates.extend_from_slice(&members);

    c.bench_function("normalize_member_ids", |b| {
        b.iter(|| {
            let normalized = normalized_member_ids(black_box(&with_duplicates));
            black_box(normalized)
        });
    });
}

// Benchmark for checkout totals (fee application and cents conversion)
fn pricing_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("pricing");

    let subtotal = Decimal::new(12_345, 2);

    group.bench_function("expected_total", |b| {
        b.iter(|| {
            let total = expected_total(black_box(subtotal));
            black_box(total)
        });
    });

    group.bench_function("total_in_cents", |b| {
        let total = expected_total(subtotal);
        b.iter(|| {
            let cents = total_in_cents(black_box(total)).unwrap();
            black_box(cents)
        });
    });

    group.bench_function("within_tolerance", |b| {
        let expected = expected_total(subtotal);
        let submitted = expected + Decimal::new(1, 2);
        b.iter(|| black_box(within_tolerance(black_box(submitted), black_box(expected))));
    });

    group.finish();
}

// Benchmark for webhook signature computation (HMAC-SHA256 over "{ts}.{body}")
fn webhook_signature_benchmark(c: &mut Criterion) {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    let secret = b"whsec_benchmark_secret";
    let timestamp = "1735689600";
    let payload = serde_json::json!({
        "id": "evt_bench_001",
        "type": "payment_intent.succeeded",
        "data": {
            "object": {
                "id": "pi_bench_001",
                "status": "succeeded"
            }
        }
    })
    .to_string();

    c.bench_function("webhook_hmac_sha256", |b| {
        b.iter(|| {
            let mut mac =
                Hmac::<Sha256>::new_from_slice(black_box(secret)).expect("hmac accepts any key");
            mac.update(timestamp.as_bytes());
            mac.update(b".");
            mac.update(payload.as_bytes());
            let digest = hex::encode(mac.finalize().into_bytes());
            black_box(digest)
        });
    });
}

// Benchmark for JSON serialization of a cart response payload
fn json_serialization_benchmark(c: &mut Criterion) {
    use serde_json::json;

    let data = json!({
        "cart": {
            "id": "550e8400-e29b-41d4-a716-446655440000",
            "family_id": "123e4567-e89b-12d3-a456-426614174000",
            "status": "populated",
            "subtotal": "150.00"
        },
        "items": [
            {
                "item_id": "9b2f8c1e-4a6d-4f2b-9c3e-1a2b3c4d5e6f",
                "item_type": "class",
                "quantity": 1,
                "unit_price": "50.00",
                "member_ids": ["0f1e2d3c-4b5a-6978-8796-a5b4c3d2e1f0"]
            },
            {
                "item_id": "7c6b5a49-3827-4160-95e4-d3c2b1a09f8e",
                "item_type": "membership",
                "quantity": 2,
                "unit_price": "50.00",
                "member_ids": []
            }
        ]
    });

    c.bench_function("cart_json_serialize", |b| {
        b.iter(|| {
            let serialized = serde_json::to_string(&data).unwrap();
            black_box(serialized)
        });
    });

    c.bench_function("cart_json_deserialize", |b| {
        let serialized = serde_json::to_string(&data).unwrap();
        b.iter(|| {
            let deserialized: serde_json::Value = serde_json::from_str(&serialized).unwrap();
            black_box(deserialized)
        });
    });
}

criterion_group! {
    name = benches;
    config = Criterion::default()
        .measurement_time(Duration::from_secs(10))
        .sample_size(100);
    targets =
        line_key_benchmark,
        member_normalization_benchmark,
        pricing_benchmark,
        webhook_signature_benchmark,
        json_serialization_benchmark
}

criterion_main!(benches);
