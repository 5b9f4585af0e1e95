#![cfg(feature = "gpu")]

use meshsplat::backend::{CpuBackend, SplatBackend};
use meshsplat::camera::{Camera, Viewport};
use meshsplat::compositor::Framebuffer;
use meshsplat::config::{ConversionSettings, RenderSettings, Resolution};
use meshsplat::gpu::{GpuBackend, GpuContext, GpuRadixSort};
use meshsplat::mesh::Mesh;
use meshsplat::sort::sort_indices;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Machines without any adapter (including a software one) skip GPU tests.
fn context() -> Option<GpuContext> {
    match GpuContext::new() {
        Ok(ctx) => {
            eprintln!("GPU tests on {}", ctx.adapter_info().name);
            Some(ctx)
        }
        Err(e) => {
            eprintln!("skipping GPU test: {}", e);
            None
        }
    }
}

#[test]
fn test_gpu_sort_matches_cpu_sort() {
    let Some(ctx) = context() else { return };
    let sorter = GpuRadixSort::new(&ctx);
    let mut rng = StdRng::seed_from_u64(3);
    for &n in &[1usize, 255, 256, 1000, 70_000] {
        let keys: Vec<u32> = (0..n).map(|_| rng.gen_range(0..1024) << 16).collect();
        let values: Vec<u32> = (0..n as u32).collect();
        let gpu = sorter.sort(&ctx, &keys, &values).unwrap();
        assert_eq!(gpu, sort_indices(&keys, &values).unwrap(), "n = {}", n);
    }
}

#[test]
fn test_gpu_sort_rejects_mismatched_lengths() {
    let Some(ctx) = context() else { return };
    let sorter = GpuRadixSort::new(&ctx);
    assert!(sorter.sort(&ctx, &[1, 2, 3], &[0, 1]).is_err());
}

#[test]
fn test_gpu_backend_agrees_with_cpu_backend() {
    let Some(ctx) = context() else { return };
    let mut gpu = GpuBackend::with_context(ctx);
    let mut cpu = CpuBackend::new();
    let mesh = Mesh::unit_cube();
    let settings = ConversionSettings::new().with_resolution(Resolution::new(64).unwrap());

    let (gpu_buffer, gpu_stats) = gpu.convert(&mesh, &settings).unwrap();
    let (cpu_buffer, cpu_stats) = cpu.convert(&mesh, &settings).unwrap();
    assert_eq!(gpu_stats.total_triangles, cpu_stats.total_triangles);
    let diff = gpu_buffer.valid_count().abs_diff(cpu_buffer.valid_count());
    assert!(diff <= cpu_buffer.valid_count() / 100, "coverage differs by {}", diff);

    let render = RenderSettings {
        viewport: Viewport::new(96, 96),
        ..RenderSettings::default()
    };
    let camera = Camera::framing(&mesh.bounds(), 30.0, 20.0, 1.0, 45.0, 1.0);
    let gpu_visible = gpu.prepass(&cpu_buffer, &camera, &render).unwrap();
    let cpu_visible = cpu.prepass(&cpu_buffer, &camera, &render).unwrap();
    assert!(gpu_visible.abs_diff(cpu_visible) <= cpu_visible / 100 + 1);

    gpu.sort().unwrap();
    let order = gpu.read_draw_order().unwrap();
    assert_eq!(order.len(), gpu_visible);
    assert!(order.windows(2).all(|w| w[0] != w[1]));

    let mut fb = Framebuffer::new(render.viewport, render.background);
    gpu.splat(&render, &mut fb).unwrap();
    let center = fb.pixel(48, 48).unwrap();
    assert!(center[0] > 0.1, "cube should cover the image center");
}
