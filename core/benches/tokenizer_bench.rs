use criterion::{criterion_group, criterion_main, Criterion};
use linkrec_core::similarity::{cosine, TfIdfVector};
use linkrec_core::tokenizer::tokenize;

const PAGE: &str = "<article><h1>Modular office buildings</h1><p>Our modular office buildings are \
    delivered ready for occupancy, with climate control, data cabling and ADA compliant ramps. \
    Commercial customers choose modular construction to cut schedules and control costs.</p>\
    <p>Financing options and lease-to-own programs are available for schools, clinics and \
    construction sites.</p></article>";

fn bench_tokenize(c: &mut Criterion) {
    let text = PAGE.repeat(20);
    c.bench_function("tokenize_page", |b| b.iter(|| tokenize(&text)));
}

fn bench_cosine(c: &mut Criterion) {
    let a = TfIdfVector::new((0..100u32).map(|t| (t * 2, 1.0 + f64::from(t % 7))).collect());
    let b = TfIdfVector::new((0..100u32).map(|t| (t * 3, 1.0 + f64::from(t % 5))).collect());
    c.bench_function("cosine_100_terms", |bench| bench.iter(|| cosine(&a, &b)));
}

criterion_group!(benches, bench_tokenize, bench_cosine);
criterion_main!(benches);
