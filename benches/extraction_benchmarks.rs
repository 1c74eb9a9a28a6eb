//! Performance benchmarks for ipwatch components.
//!
//! Page extraction runs on every page load and store mutations sit on the
//! single writer task, so both need to stay cheap on large inputs.

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use std::net::Ipv4Addr;

use ipwatch::extract::{Extractor, find_ipv4, visible_text};
use ipwatch::model::TabId;
use ipwatch::netutil::AddressPolicy;
use ipwatch::store::AddressStore;

/// Sample page with a mix of public, private and hidden addresses.
const SAMPLE_PAGE: &str = r#"<!doctype html>
<html>
<head>
  <style>.ip { color: red }</style>
  <script>const internal = "10.0.0.12";</script>
</head>
<body>
  <h1>Incident report</h1>
  <p>Scanning traffic from 185.220.101.1 and 45.155.205.233 was blocked.</p>
  <p>Our resolvers: 8.8.8.8, 1.1.1.1; gateway 192.168.1.1.</p>
  <!-- staging box 172.16.4.2 -->
  <noscript>203.0.113.77</noscript>
  <table><tr><td>94.156.175.86</td><td>127.0.0.1</td></tr></table>
</body>
</html>
"#;

/// Large page with many table rows for stress testing
fn generate_large_page(rows: usize) -> String {
    let mut page = String::with_capacity(rows * 64);
    page.push_str("<html><body><table>\n");
    for i in 0..rows {
        page.push_str(&format!(
            "<tr><td>host{i}</td><td>{}.{}.{}.{}</td></tr>\n",
            (i % 200) + 11,
            (i / 7) % 256,
            (i / 3) % 256,
            i % 254 + 1
        ));
    }
    page.push_str("</table></body></html>\n");
    page
}

fn bench_extraction(c: &mut Criterion) {
    let extractor = Extractor::default();
    c.bench_function("extract_sample_page", |b| {
        b.iter(|| extractor.extract(black_box(SAMPLE_PAGE)))
    });

    c.bench_function("visible_text_sample_page", |b| {
        b.iter(|| visible_text(black_box(SAMPLE_PAGE)))
    });

    let plain = visible_text(SAMPLE_PAGE);
    c.bench_function("find_ipv4_plain_text", |b| {
        b.iter(|| find_ipv4(black_box(&plain)))
    });

    let mut group = c.benchmark_group("extract_large_page");
    for rows in [100usize, 1_000, 10_000] {
        let page = generate_large_page(rows);
        group.throughput(Throughput::Bytes(page.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(rows), &page, |b, page| {
            b.iter(|| extractor.extract(black_box(page)))
        });
    }
    group.finish();
}

fn bench_policy(c: &mut Criterion) {
    let policy = AddressPolicy::default();
    let ips: Vec<Ipv4Addr> = (0..1024u32).map(|i| Ipv4Addr::from(i.wrapping_mul(4_194_319))).collect();
    c.bench_function("policy_is_public_1024", |b| {
        b.iter(|| ips.iter().filter(|ip| policy.is_public(**ip)).count())
    });
}

fn bench_store(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let ips = Extractor::new(AddressPolicy::permissive()).extract(&generate_large_page(500));

    c.bench_function("record_sightings_500", |b| {
        b.iter(|| {
            runtime.block_on(async {
                let store = AddressStore::in_memory();
                store
                    .record_sightings(TabId(1), black_box(&ips), "https://bench.example")
                    .await
                    .unwrap();
                store.get_tab_records(TabId(1)).await.len()
            })
        })
    });
}

criterion_group!(benches, bench_extraction, bench_policy, bench_store);
criterion_main!(benches);
