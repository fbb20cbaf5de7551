use criterion::{Criterion, black_box, criterion_group, criterion_main};
use pyramid_flow::core_modules::block_aggregator::{BlockGeometry, GradientBlockAggregator, aggregate_brightness_centers};
use pyramid_flow::core_modules::buffer2d::ScalarField;
use pyramid_flow::core_modules::convolution::{convolve_full, convolve_separable};
use pyramid_flow::core_modules::kernel::Kernel;
use pyramid_flow::core_modules::pyramid::{GaussianPyramid, compress, compressed_size, expand};

const WIDTH: usize = 640;
const HEIGHT: usize = 480;

fn test_field() -> ScalarField {
    ScalarField::from_fn(WIDTH, HEIGHT, |x, y| ((x * 7 + y * 13) % 251) as f32 / 250.0)
}

fn bench_convolution(c: &mut Criterion) {
    let field = test_field();
    let kernel = Kernel::weighted_angular(7).expect("valid kernel");

    c.bench_function("convolve_full_7x7_640x480", |b| {
        b.iter(|| black_box(convolve_full(black_box(&field), &kernel, 1.0)))
    });
    c.bench_function("convolve_separable_7x7_640x480", |b| {
        b.iter(|| black_box(convolve_separable(black_box(&field), &kernel, 1.0)))
    });
}

fn bench_pyramid(c: &mut Criterion) {
    let field = test_field();
    let coarse = compress(&field);

    c.bench_function("compress_640x480", |b| b.iter(|| black_box(compress(black_box(&field)))));
    c.bench_function("expand_320x240", |b| {
        b.iter(|| black_box(expand(black_box(&coarse), WIDTH, HEIGHT)))
    });
    c.bench_function("gaussian_pyramid_4_levels_640x480", |b| {
        b.iter(|| black_box(GaussianPyramid::build(field.clone(), 4)))
    });
}

fn bench_aggregation(c: &mut Criterion) {
    let field = test_field();
    let geometry = BlockGeometry::new(WIDTH, HEIGHT, 16, 16).expect("valid geometry");
    let (w, h) = (compressed_size(WIDTH), compressed_size(HEIGHT));
    let level = ScalarField::from_fn(w, h, |x, y| ((x + y) % 17) as f32 / 16.0);
    let gradient = GradientBlockAggregator::angular(w, h, 15).expect("valid aggregator");

    c.bench_function("brightness_centers_16x16_640x480", |b| {
        b.iter(|| black_box(aggregate_brightness_centers(black_box(&field), &geometry)))
    });
    c.bench_function("gradient_blocks_15x15_320x240", |b| {
        b.iter(|| black_box(gradient.aggregate(black_box(&level))))
    });
}

criterion_group!(benches, bench_convolution, bench_pyramid, bench_aggregation);
criterion_main!(benches);
