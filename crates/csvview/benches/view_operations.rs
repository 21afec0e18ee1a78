// view_operations.rs - Performance benchmarks for csvview view operations
//
// Run with: cargo bench --features test-support --bench view_operations
// Compare baselines: cargo bench --features test-support --bench view_operations -- --baseline before

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use csvview::config::ViewConfig;
use csvview::engine;
use csvview::identity::compute_row_identifier;
use csvview::query::{Filter, QueryRequest};
use csvview::test_utils::fixture_table::{create_fixture_table, generate_row, FixtureConfig};
use csvview::view::CsvView;

fn fixture_view(path: std::path::PathBuf) -> CsvView {
    CsvView::open(
        ViewConfig::new("fixture", path)
            .with_searchable(["Material", "Family"])
            .with_range_filters(["zT"])
            .with_categorical_filters(["Family"]),
    )
    .expect("open view")
}

// ---------------------------------------------------------------------------
// Benchmark: CSV ingestion and table rebuild
// ---------------------------------------------------------------------------

fn bench_rebuild(c: &mut Criterion) {
    let mut group = c.benchmark_group("rebuild");
    group.sample_size(10);

    let configs: &[(&str, FixtureConfig)] = &[
        ("small_100", FixtureConfig::small()),
        ("medium_5k", FixtureConfig::medium()),
    ];

    for (label, config) in configs {
        // Pre-create the file so fixture generation isn't measured.
        let (_dir, path) = create_fixture_table(config);

        group.bench_with_input(BenchmarkId::new("read_csv", *label), &path, |b, path| {
            b.iter(|| black_box(engine::read_csv(black_box(path), &[]).expect("read")))
        });

        group.bench_with_input(
            BenchmarkId::new("ensure_current", *label),
            &path,
            |b, path| {
                b.iter(|| {
                    let view = fixture_view(path.clone());
                    black_box(view.ensure_current().expect("load"))
                })
            },
        );
    }

    group.finish();
}

// ---------------------------------------------------------------------------
// Benchmark: queries against a loaded view
// ---------------------------------------------------------------------------

fn bench_queries(c: &mut Criterion) {
    let mut group = c.benchmark_group("query");

    let (_dir, path) = create_fixture_table(&FixtureConfig::medium());
    let view = fixture_view(path);
    view.ensure_current().expect("load");

    let requests: Vec<(&str, QueryRequest)> = vec![
        ("unfiltered", QueryRequest::new()),
        ("substring_search", QueryRequest::new().search("te")),
        (
            "regex_search",
            QueryRequest::new().search("^(bi|pb)[0-9]").regex(true),
        ),
        (
            "range_and_categorical",
            QueryRequest::new()
                .filter(Filter::Range {
                    column: "zT".to_string(),
                    min: Some("0.5".to_string()),
                    max: None,
                })
                .filter(Filter::Categorical {
                    column: "Family".to_string(),
                    values: vec!["oxide".to_string()],
                }),
        ),
        ("deep_page", QueryRequest::new().page(200, 20)),
    ];

    for (label, request) in &requests {
        group.bench_with_input(BenchmarkId::new("medium_5k", *label), request, |b, req| {
            b.iter(|| black_box(view.query(black_box(req)).expect("query")))
        });
    }

    group.finish();
}

// ---------------------------------------------------------------------------
// Benchmark: identifier computation and lookup
// ---------------------------------------------------------------------------

fn bench_identifiers(c: &mut Criterion) {
    let mut group = c.benchmark_group("identifiers");

    let config = FixtureConfig::medium();
    let row: Vec<Option<String>> = generate_row(42, &config).into_iter().map(Some).collect();
    group.bench_function("compute_row_identifier", |b| {
        b.iter(|| black_box(compute_row_identifier(black_box(&row), "ROW", 12)))
    });

    let (_dir, path) = create_fixture_table(&config);
    let view = fixture_view(path);
    let last = view
        .query(&QueryRequest::new().page(config.row_count as u64, 1))
        .expect("query");
    let first = view.query(&QueryRequest::new().page(1, 1)).expect("query");

    group.sample_size(20);
    group.bench_function("resolve_first_row", |b| {
        b.iter(|| black_box(view.resolve_by_identifier(&first.items[0].id).expect("resolve")))
    });
    group.bench_function("resolve_last_row", |b| {
        b.iter(|| black_box(view.resolve_by_identifier(&last.items[0].id).expect("resolve")))
    });

    group.finish();
}

criterion_group!(benches, bench_rebuild, bench_queries, bench_identifiers);
criterion_main!(benches);
