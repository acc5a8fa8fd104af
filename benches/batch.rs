use criterion::{black_box, criterion_group, criterion_main, Criterion};
use cvbatch::prelude::*;
use image::{DynamicImage, Rgb, RgbImage};

fn checkerboard(side: u32) -> ImageValue {
    let img = RgbImage::from_fn(side, side, |x, y| {
        if (x / 16 + y / 16) % 2 == 0 {
            Rgb([220, 210, 200])
        } else {
            Rgb([30, 40, 50])
        }
    });
    ImageValue::new(DynamicImage::ImageRgb8(img))
}

fn filter_batch(c: &mut Criterion) {
    let engine = Engine::builtin(EngineConfig::default()).expect("engine");
    let base = checkerboard(256);
    let tasks = vec![
        TaskDescriptor::filter("gaussian_blur").with_param("sigma", 2.0),
        TaskDescriptor::filter("median_blur"),
        TaskDescriptor::filter("sobel"),
        TaskDescriptor::filter("canny"),
        TaskDescriptor::filter("laplacian"),
        TaskDescriptor::filter("threshold"),
    ];

    c.bench_function("filter_batch_256", |b| {
        b.iter(|| engine.run_batch(black_box(&base), Family::Filter, &tasks).expect("batch"))
    });
}

fn feature_batch(c: &mut Criterion) {
    let engine = Engine::builtin(EngineConfig::default()).expect("engine");
    let base = checkerboard(256);
    let tasks = vec![
        TaskDescriptor::feature("fast_corners"),
        TaskDescriptor::feature("orb"),
        TaskDescriptor::feature("hog"),
        TaskDescriptor::feature("log_dog_blob"),
    ];

    c.bench_function("feature_batch_256", |b| {
        b.iter(|| engine.run_batch(black_box(&base), Family::Feature, &tasks).expect("batch"))
    });
}

fn transform_chain(c: &mut Criterion) {
    let engine = Engine::builtin(EngineConfig::default()).expect("engine");
    let base = checkerboard(256);
    let steps = vec![
        TaskDescriptor::transform("rotation").with_param("angle", 30.0),
        TaskDescriptor::transform("scaling").with_param("fx", 0.5),
        TaskDescriptor::filter("grayscale"),
    ];

    c.bench_function("transform_chain_256", |b| {
        b.iter(|| engine.run_chain_on(black_box(&base), &steps).expect("chain"))
    });
}

criterion_group!(benches, filter_batch, feature_batch, transform_chain);
criterion_main!(benches);
