//! Forward-pass benchmarks
//!
//! - grouped vs dense 3x3 convolution at the network's feature width
//! - one cascading residual block
//! - the full 4x network on small patches

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use ecarn::{Carb, Conv2d, ECarn, Module, RawTensor, Tensor};

fn patch(channels: usize, size: usize) -> Tensor {
    let len = channels * size * size;
    let data: Vec<f32> = (0..len).map(|i| (i as f32 * 0.01).sin()).collect();
    RawTensor::new(data, &[1, channels, size, size], false)
}

fn bench_conv_groups(c: &mut Criterion) {
    let mut group = c.benchmark_group("conv3x3_64ch");
    let input = patch(64, 16);
    for groups in [1, 4] {
        let conv = Conv2d::same(64, 64, 3, groups).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(groups), &input, |b, x| {
            b.iter(|| black_box(&conv).forward(black_box(x)));
        });
    }
    group.finish();
}

fn bench_carb(c: &mut Criterion) {
    let carb = Carb::new(64, 3, 4).unwrap();
    let input = patch(64, 12);
    c.bench_function("carb_64ch_12x12", |b| {
        b.iter(|| black_box(&carb).forward(black_box(&input)));
    });
}

fn bench_network(c: &mut Criterion) {
    let mut group = c.benchmark_group("ecarn_x4");
    group.sample_size(10);
    let net = ECarn::new().unwrap();
    for size in [8, 16] {
        let input = patch(3, size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &input, |b, x| {
            b.iter(|| black_box(&net).forward(black_box(x)));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_conv_groups, bench_carb, bench_network);
criterion_main!(benches);
