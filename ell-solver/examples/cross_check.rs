use ell_solver::{
    validation::{CrossCheck, SweepConfig},
    CpuBlas, GpuBlas, TransferStats,
};
use std::time::Instant;

/// Runs the randomized CPU vs GPU sweep.
///
/// Optional arguments: `min_exp max_exp seed`.
#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .filter_module("wgpu", log::LevelFilter::Off)
        .init();

    let args: Vec<u64> = std::env::args()
        .skip(1)
        .filter_map(|arg| arg.parse().ok())
        .collect();
    let defaults = SweepConfig::default();
    let config = SweepConfig::with_params(
        args.first().map_or(defaults.min_exp, |&v| v as u32),
        args.get(1).map_or(defaults.max_exp, |&v| v as u32),
        args.get(2).copied().unwrap_or(defaults.seed),
    );

    let mut gpu = GpuBlas::new();
    if let Err(e) = gpu.initialize().await {
        log::error!("Failed to initialize GPU backend: {}", e);
        std::process::exit(1);
    }
    let cpu = CpuBlas::new();

    let start_time = Instant::now();
    let report = CrossCheck::new(&cpu, &gpu, config).run_all().await;
    let duration = start_time.elapsed();

    if let Some(TransferStats {
        bytes_to_gpu,
        bytes_from_gpu,
    }) = gpu.transfer_stats()
    {
        log::info!("GPU Transfer Stats:");
        log::info!("  Bytes CPU -> GPU: {}", bytes_to_gpu);
        log::info!("  Bytes GPU -> CPU: {}", bytes_from_gpu);
    }
    log::info!("Time elapsed: {:?}", duration);

    for failure in &report.failures {
        log::warn!("  {}", failure);
    }
    gpu.teardown();
    if !report.all_passed() {
        std::process::exit(1);
    }
}
