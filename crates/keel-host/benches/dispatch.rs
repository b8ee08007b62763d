//! Hot-path benchmarks: exception codec and token vault.
//!
//! Run with: cargo bench -p keel-host

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use keel::vault;
use keel_abi::error::AbiError;
use keel_abi::exception::{self, ExceptionRecord};
use keel_abi::token::CancelToken;

fn chain_fixture() -> AbiError {
    AbiError::network(502, -7, "mirror list fetch failed")
        .with_cause(AbiError::io(110, "connection timed out"))
        .with_backtrace("bench frame 0\nbench frame 1")
}

fn bench_codec(c: &mut Criterion) {
    let err = chain_fixture();

    c.bench_function("exception/encode_chain", |b| {
        b.iter(|| {
            let (count, records) = exception::encode_chain(black_box(&err));
            unsafe { exception::free_chain(count, records) };
        })
    });

    c.bench_function("exception/encode_decode_round_trip", |b| {
        b.iter(|| {
            let (count, records) = exception::encode_chain(black_box(&err));
            let decoded = unsafe { exception::decode_chain(count, records) };
            unsafe { exception::free_chain(count, records) };
            black_box(decoded)
        })
    });

    c.bench_function("exception/encode_single_record", |b| {
        b.iter(|| {
            let mut record = ExceptionRecord::encode(black_box(&err));
            record.dispose();
        })
    });
}

fn bench_vault(c: &mut Criterion) {
    vault::init();

    c.bench_function("vault/register_unregister", |b| {
        b.iter(|| {
            let token = CancelToken::fresh();
            let source = vault::register(black_box(token));
            vault::unregister(token);
            black_box(source)
        })
    });

    c.bench_function("vault/cancel_registered", |b| {
        b.iter(|| {
            let token = CancelToken::fresh();
            vault::register(token);
            black_box(vault::cancel(token, true))
        })
    });

    c.bench_function("vault/cancel_unknown_token", |b| {
        let token = CancelToken::fresh();
        b.iter(|| black_box(vault::cancel(black_box(token), true)))
    });
}

criterion_group!(benches, bench_codec, bench_vault);
criterion_main!(benches);
