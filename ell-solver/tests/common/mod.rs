#![allow(dead_code)]

use ell_solver::GpuBlas;
use pollster::block_on;

pub fn init_logger() {
    let _ = env_logger::builder()
        .is_test(true)
        .filter_module("wgpu", log::LevelFilter::Off)
        .try_init();
}

/// Set to make a missing adapter fail the tests that otherwise skip their GPU half.
pub const REQUIRE_GPU_ENV: &str = "ELL_REQUIRE_GPU";

/// An initialized GPU backend, or `None` (with a warning) when the machine has no adapter.
///
/// Panics instead of skipping when `ELL_REQUIRE_GPU` is set.
pub fn gpu_blas() -> Option<GpuBlas> {
    init_logger();
    let mut blas = GpuBlas::new();
    match block_on(blas.initialize()) {
        Ok(()) => Some(blas),
        Err(e) if std::env::var_os(REQUIRE_GPU_ENV).is_some() => {
            panic!("{} is set but no GPU adapter is usable: {}", REQUIRE_GPU_ENV, e)
        }
        Err(e) => {
            log::warn!("Skipping GPU part of the test, no usable adapter: {}", e);
            None
        }
    }
}

/// An initialized GPU backend for the `#[ignore]`d GPU-only tests, which run
/// with `cargo test -- --ignored` on a machine with an adapter.
pub fn require_gpu_blas() -> GpuBlas {
    init_logger();
    let mut blas = GpuBlas::new();
    if let Err(e) = block_on(blas.initialize()) {
        panic!("GPU-only test needs a usable adapter: {}", e);
    }
    blas
}

// Helper for float comparison in tests
pub fn assert_approx_eq_vec(a: &[f32], b: &[f32], tolerance: f32) {
    assert_eq!(a.len(), b.len(), "Vector lengths differ");
    for i in 0..a.len() {
        let diff = (a[i] - b[i]).abs();
        assert!(
            diff <= tolerance,
            "Verification failed at index {}: expected {}, got {}, diff {}",
            i,
            b[i],
            a[i],
            diff
        );
    }
}
