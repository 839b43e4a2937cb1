use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use transfer_bench::{
    buffer::HostBuffer,
    tensor::{Location, Tensor},
};

pub fn criterion_benchmark(c: &mut Criterion) {
    let lens = [1_000_000, 16_000_000];
    {
        let mut g = c.benchmark_group("alloc");
        for n in lens {
            let id = BenchmarkId::new("pageable", n);
            g.bench_function(id, |b| {
                b.iter(|| HostBuffer::<i8>::pageable(black_box(n)).unwrap())
            });
        }
        g.finish();
    }
    {
        let buffer = HostBuffer::<i8>::pageable(*lens.last().unwrap()).unwrap();
        let mut g = c.benchmark_group("cast");
        g.bench_function("as_array_view", |b| {
            b.iter(|| black_box(buffer.as_array_view()))
        });
        g.bench_function("as_tensor", |b| {
            b.iter(|| black_box(Tensor::from_array_view(buffer.as_array_view())))
        });
        g.finish();
    }
    {
        let len = 16_000_000;
        let src = Tensor::from_vec(vec![1i8; len]);
        let mut dst = Tensor::<i8>::zeros(Location::Host, len).unwrap();
        let mut g = c.benchmark_group("copy");
        g.bench_function("h to h", |b| b.iter(|| dst.copy_from(&src).unwrap()));
        g.finish();
    }
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
