use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use sato_core::pipeline::pipes::{ParseIntPipe, RangePipe};
use sato_core::{
    AccessDenied, AdapterRegistry, ControllerOptions, Method, PipeBinding, Registry, Request, Response, Value,
};
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Clone)]
struct Meters(f64);
#[derive(Debug, Clone)]
struct Feet(f64);
#[derive(Debug, Clone)]
struct Inches(f64);

struct ItemsController;

fn bench_adapter_resolution(c: &mut Criterion) {
    let mut group = c.benchmark_group("adapter_resolution");

    let registry = AdapterRegistry::new();
    registry.register::<Meters, Feet, _>(|m| Ok(Feet(m.0 * 3.28084)));
    registry.register::<Feet, Inches, _>(|f| Ok(Inches(f.0 * 12.0)));

    group.bench_function("identity", |b| {
        b.iter(|| registry.adapt_to::<i64>(black_box(Value::from(7i64))))
    });
    group.bench_function("direct_string_to_int", |b| {
        b.iter(|| registry.adapt_to::<i64>(black_box(Value::from("12345"))))
    });
    group.bench_function("two_hop_string_to_float", |b| {
        b.iter(|| registry.adapt_to::<f64>(black_box(Value::from("12345"))))
    });
    group.bench_function("two_hop_custom_types", |b| {
        b.iter(|| registry.adapt_to::<Inches>(black_box(Value::new(Meters(1.0)))))
    });

    group.finish();
}

fn bench_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline_dispatch");
    group.throughput(Throughput::Elements(1));

    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("tokio runtime");

    for guards in [0usize, 1, 8] {
        let mut registry = Registry::new();
        let mut options = ControllerOptions::new(Arc::new(ItemsController)).path("/items");
        for _ in 0..guards {
            options = options.guard(|req: &mut Request| -> Result<(), AccessDenied> {
                req.header("x-user").map(|_| ()).ok_or_else(|| AccessDenied::new("anonymous"))
            });
        }
        let options = options.get("/:id", "find_one", |_ctl, req| async move {
            let id = *req.arg::<i64>("id")?;
            Ok(Response::ok(json!({ "id": id })))
        });
        let ctl = registry.declare_controller(options).expect("declare");
        registry
            .attach_pipes(
                ctl,
                "find_one",
                vec![
                    PipeBinding::param("id", ParseIntPipe),
                    PipeBinding::param("id", RangePipe::new(0.0, 1_000_000.0)),
                ],
            )
            .expect("attach");

        let routes = registry.compile(Arc::new(AdapterRegistry::new())).expect("compile");
        let route = &routes[0];

        group.bench_with_input(BenchmarkId::new("guards", guards), &guards, |b, _| {
            b.iter(|| {
                let req = Request::new(Method::Get, "/items/42")
                    .with_header("x-user", "bench")
                    .with_param("id", "42");
                runtime.block_on(route.dispatch(black_box(req)))
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_adapter_resolution, bench_dispatch);
criterion_main!(benches);
