//! Performance benchmarks for frame classification and routing

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use hitbtc_ws::{
    auth,
    data::{Params, RequestId},
    registry::RequestRegistry,
    report::Reporter,
    router::{classify, MessageRouter},
    sink,
};
use std::sync::Arc;

const TICKER: &str = r#"{
    "jsonrpc": "2.0",
    "method": "ticker",
    "params": {
        "ask": "0.054464", "bid": "0.054463", "last": "0.054463",
        "open": "0.057133", "low": "0.053615", "high": "0.057559",
        "volume": "33068.346", "volumeQuote": "1832.687530809",
        "timestamp": "2018-10-19T16:34:25.041Z", "symbol": "ETHBTC"
    }
}"#;

const RESPONSE: &str = r#"{"jsonrpc":"2.0","result":[{"id":54469456,"price":"0.054656","quantity":"0.245","side":"sell","timestamp":"2017-10-19T16:34:25.041Z"}],"id":7}"#;

fn bench_classify(c: &mut Criterion) {
    let ticker: serde_json::Value = serde_json::from_str(TICKER).unwrap();
    let response: serde_json::Value = serde_json::from_str(RESPONSE).unwrap();

    c.bench_function("classify_stream", |b| {
        b.iter(|| classify(black_box(ticker.clone())))
    });
    c.bench_function("classify_response", |b| {
        b.iter(|| classify(black_box(response.clone())))
    });
}

fn bench_route(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let registry = Arc::new(RequestRegistry::new());
    let (sink, mut receiver) = sink::channel(1024, true);
    let router = MessageRouter::new(registry.clone(), sink, Reporter::new(true), false);

    c.bench_function("route_stream", |b| {
        b.iter(|| {
            runtime.block_on(async {
                router.route(black_box(TICKER)).await;
                receiver.drain();
            })
        })
    });

    c.bench_function("route_response", |b| {
        b.iter(|| {
            registry
                .register(RequestId::Int(7), "getTrades", Params::new())
                .unwrap();
            runtime.block_on(async {
                router.route(black_box(RESPONSE)).await;
                receiver.drain();
            })
        })
    });
}

fn bench_registry(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry_insert_pop");
    for size in [10usize, 1_000, 10_000] {
        let registry = RequestRegistry::new();
        for n in 0..size {
            registry
                .register(RequestId::Int(n as i64 + 1_000_000), "getSymbols", Params::new())
                .unwrap();
        }

        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                registry
                    .register(RequestId::Int(1), "getTrades", Params::new())
                    .unwrap();
                black_box(registry.pop(&RequestId::Int(1)).unwrap());
            })
        });
    }
    group.finish();
}

fn bench_sign(c: &mut Criterion) {
    c.bench_function("sign_login", |b| {
        b.iter(|| auth::sign(black_box("secret"), black_box("key"), black_box("1700000000000")))
    });
}

criterion_group!(benches, bench_classify, bench_route, bench_registry, bench_sign);
criterion_main!(benches);
