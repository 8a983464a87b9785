use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use tessel::runtime::counter::{Counter, FlushPolarity, flush_all_counters};

fn tokens_direct(counter: &Counter, n: u64) {
    for _ in 0..n {
        counter.new_token();
    }
    for _ in 0..n {
        counter.halt_token();
    }
}

fn tokens_batched(counter: &Counter, n: u64) {
    for _ in 0..n {
        counter.new_token_optimized();
    }
    flush_all_counters(FlushPolarity::Positive);
    for _ in 0..n {
        counter.halt_token_optimized();
    }
    flush_all_counters(FlushPolarity::All);
}

fn bench_counter_offsets(c: &mut Criterion) {
    let mut group = c.benchmark_group("counter/tokens");
    let counter = Counter::root(|_| {});
    counter.new_token();

    for n in [64_u64, 1_024, 16_384] {
        group.throughput(Throughput::Elements(n * 2));
        group.bench_with_input(BenchmarkId::new("direct", n), &n, |b, &n| {
            b.iter(|| tokens_direct(black_box(&counter), n));
        });
        group.bench_with_input(BenchmarkId::new("batched", n), &n, |b, &n| {
            b.iter(|| tokens_batched(black_box(&counter), n));
        });
    }

    group.finish();
}

fn bench_nested_counters(c: &mut Criterion) {
    let mut group = c.benchmark_group("counter/nested");
    let root = Counter::root(|_| {});
    root.new_token();

    for width in [8_u64, 128] {
        group.throughput(Throughput::Elements(width));
        group.bench_with_input(BenchmarkId::from_parameter(width), &width, |b, &width| {
            b.iter(|| {
                let inner = Counter::nested(&root);
                inner.new_token();
                for _ in 0..width {
                    inner.new_token_optimized();
                    inner.halt_token_optimized();
                }
                inner.halt_token();
                black_box(inner.is_halted())
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_counter_offsets, bench_nested_counters);
criterion_main!(benches);
