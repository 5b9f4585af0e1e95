use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use meshsplat::camera::{Camera, Viewport};
use meshsplat::config::{ConversionSettings, RenderMode, Resolution};
use meshsplat::conversion::convert;
use meshsplat::mesh::Mesh;
use meshsplat::prepass::{self, PrepassOutput, Projection};
use std::time::Duration;

fn settings(r: u32) -> ConversionSettings {
    ConversionSettings::new().with_resolution(Resolution::new(r).unwrap())
}

fn bench_conversion(c: &mut Criterion) {
    let mut group = c.benchmark_group("conversion");
    group.measurement_time(Duration::from_secs(3));
    let mesh = Mesh::unit_cube();

    for &r in &[128u32, 512, 1024] {
        let s = settings(r);
        group.bench_with_input(BenchmarkId::from_parameter(r), &r, |b, _| {
            b.iter(|| black_box(convert(&mesh, &s)))
        });
    }
    group.finish();
}

fn bench_prepass(c: &mut Criterion) {
    let mut group = c.benchmark_group("prepass");
    group.measurement_time(Duration::from_secs(3));
    let mesh = Mesh::unit_cube();
    let viewport = Viewport::new(1080, 720);
    let camera = Camera::framing(&mesh.bounds(), 30.0, 20.0, 1.0, 45.0, viewport.aspect());
    let projection = Projection::new(&camera, viewport, RenderMode::Albedo);

    for &r in &[512u32, 1024] {
        let (buffer, _) = convert(&mesh, &settings(r));
        let mut out = PrepassOutput::default();
        group.bench_with_input(BenchmarkId::from_parameter(r), &r, |b, _| {
            b.iter(|| {
                prepass::run(&buffer, &projection, &mut out);
                black_box(out.visible_count())
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_conversion, bench_prepass);
criterion_main!(benches);
