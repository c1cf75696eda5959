//! Performance benchmarks for a3s-edfs
//!
//! Run with: cargo bench

use a3s_edfs::datasource::render_publish_input;
use a3s_edfs::plan::{build_event_data, extract_argument_templates};
use a3s_edfs::provider::redis::RedisSubscriptionConfiguration;
use a3s_edfs::{receive_hook, HookContext, Hooks, StreamEvent, Variables};
use criterion::{criterion_group, criterion_main, Criterion};
use tokio_util::sync::CancellationToken;

fn bench_planning(c: &mut Criterion) {
    let argument_names = vec!["id".to_string(), "name".to_string()];

    c.bench_function("extract_argument_templates", |b| {
        b.iter(|| {
            let mut variables = Variables::new();
            extract_argument_templates(
                "employees.{{ args.id }}.{{ args.name }}",
                "employeeUpdated",
                &argument_names,
                &mut variables,
            )
            .unwrap()
        });
    });

    c.bench_function("render_publish_input", |b| {
        b.iter(|| {
            render_publish_input(
                "subject",
                "employees.$$0$$",
                br#"{"id":$$1$$,"name":$$2$$}"#,
                "default",
                "updateEmployee",
            )
            .unwrap()
        });
    });
}

fn bench_render(c: &mut Criterion) {
    let argument_names = vec!["id".to_string(), "name".to_string()];
    let mut variables = Variables::new();
    let subject =
        extract_argument_templates("employees.{{ args.id }}", "updateEmployee", &argument_names, &mut variables)
            .unwrap();
    let data = build_event_data(&argument_names, &mut variables).unwrap();
    let input = render_publish_input(
        "subject",
        &subject,
        data.as_bytes(),
        "default",
        "updateEmployee",
    )
    .unwrap();
    let arguments = serde_json::json!({"id": 42, "name": "Ada \"the first\" Lovelace"});

    c.bench_function("Variables::render", |b| {
        b.iter(|| variables.render(&input, &arguments).unwrap());
    });
}

fn bench_receive_hooks(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let config = RedisSubscriptionConfiguration {
        provider_id: "default".to_string(),
        channels: vec!["prices".to_string()],
        root_field_name: "priceChanged".to_string(),
    };
    let hooks = Hooks::new()
        .with_on_receive_events(receive_hook(|_ctx, _conf, events| {
            Ok(events.into_iter().filter(|e| !e.data().is_empty()).collect())
        }))
        .with_on_receive_events(receive_hook(|_ctx, _conf, events| {
            Ok(events
                .into_iter()
                .map(|e| {
                    let wrapped = format!(r#"{{"wrapped":{}}}"#, String::from_utf8_lossy(e.data()));
                    e.with_data(wrapped)
                })
                .collect())
        }));
    let ctx = HookContext::new(CancellationToken::new());

    let mut group = c.benchmark_group("receive_hooks");
    for count in [1, 10, 100] {
        let batch: Vec<StreamEvent> = (0..count)
            .map(|i| StreamEvent::new(format!(r#"{{"price":{}}}"#, i)))
            .collect();
        group.bench_function(format!("{} events", count), |b| {
            b.to_async(&rt).iter(|| async {
                hooks
                    .apply_receive_event_hooks(&ctx, &config, batch.clone())
                    .await
                    .unwrap()
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_planning, bench_render, bench_receive_hooks);
criterion_main!(benches);
