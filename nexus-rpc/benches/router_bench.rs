//! Router performance benchmarks
//!
//! These benchmarks measure the performance of key call paths:
//! - Simple procedure calls
//! - Procedures with a middleware stack
//! - Path lookup in routers of growing size

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use nexus_rpc::prelude::*;
use nexus_rpc::{ProcedurePath, RpcResult};
use serde::{Deserialize, Serialize};
use std::hint::black_box;

struct BenchState {
    factor: i64,
}

impl Default for BenchState {
    fn default() -> Self {
        Self { factor: 2 }
    }
}

#[derive(Deserialize, Serialize)]
struct Scale {
    value: i64,
}

async fn scale(ctx: Context<BenchState>, input: Scale) -> RpcResult<i64> {
    Ok(input.value * ctx.factor)
}

async fn passthrough(
    ctx: Context<BenchState>,
    req: Request,
    next: Next<BenchState>,
) -> RpcResult<Response> {
    next.run(ctx, req).await
}

fn bench_simple_call(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    let simple = procedure::<BenchState>()
        .input(typed::<Scale>())
        .query(scale);
    let caller = Caller::new(router([("bench", router([("simple", simple.into())]).unwrap().into())]).unwrap());
    let input = serde_json::json!({"value": 42});

    c.bench_function("simple_call", |b| {
        b.iter(|| {
            rt.block_on(async {
                black_box(
                    caller
                        .query("bench.simple", input.clone(), Context::default())
                        .await,
                )
            })
        });
    });
}

fn bench_call_with_middleware(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("middleware_depth");

    for depth in [1usize, 4, 16] {
        let def = (0..depth)
            .fold(procedure::<BenchState>(), |builder, _| {
                builder.use_middleware(passthrough)
            })
            .input(typed::<Scale>())
            .query(scale);
        let caller = Caller::new(router([("bench", def.into())]).unwrap());
        let input = serde_json::json!({"value": 42});

        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, _| {
            b.iter(|| {
                rt.block_on(async {
                    black_box(caller.query("bench", input.clone(), Context::default()).await)
                })
            });
        });
    }

    group.finish();
}

fn bench_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("router_lookup");

    for size in [10usize, 100, 1000] {
        let app = (0..size)
            .fold(Router::builder(), |builder, i| {
                builder.procedure(
                    format!("proc{}", i),
                    procedure::<BenchState>().query(|_ctx, _: ()| async { Ok(()) }),
                )
            })
            .build()
            .unwrap();
        let path = ProcedurePath::from(format!("proc{}", size / 2));

        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| black_box(app.get(black_box(&path)).is_some()))
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_simple_call,
    bench_call_with_middleware,
    bench_lookup
);
criterion_main!(benches);
