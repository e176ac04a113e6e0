use ell_solver::{
    algorithms::SolveAlgorithm, Blas, ConjugateGradient, CpuBlas, EllCoreError, EllMatrix,
    GpuBlas, Preconditioner,
};
use std::time::Instant;

/// Creates a pentadiagonal ELL matrix A of size n x n.
/// Diagonals:
/// - Main: 4.0
/// - Adjacent (+1, -1): -1.0
/// - Outer (+2, -2): -0.5
fn create_pentadiagonal_matrix(n: usize) -> Result<EllMatrix<f32>, EllCoreError> {
    let mut matrix = EllMatrix::new(n, n, 5);
    for row in 0..n {
        for (offset, value) in [(-2, -0.5), (-1, -1.0), (0, 4.0), (1, -1.0), (2, -0.5)] {
            let col = row as isize + offset;
            if (0..n as isize).contains(&col) {
                matrix.set_value(row, col as usize, value)?;
            }
        }
    }
    Ok(matrix)
}

/// Creates a vector b of size n with b[i] = sin(i / n).
fn create_sin_vector(n: usize) -> Vec<f32> {
    (0..n).map(|i| (i as f32 / n as f32).sin()).collect()
}

async fn solve_and_report<B: Blas>(
    blas: &B,
    algorithm: &ConjugateGradient,
    a: &EllMatrix<f32>,
    b: &[f32],
) {
    let start_time = Instant::now();
    let x_result = algorithm.solve(blas, a, b).await;
    let duration = start_time.elapsed();

    match x_result {
        Ok(result) => {
            log::info!("Solver ({}) finished successfully!", blas.name());
            log::info!("  Iterations: {}", result.metadata.iterations);
            log::info!(
                "  Final Residual Norm: {:.6e}",
                result.metadata.residual_norm
            );
            log::info!("  Time elapsed: {:?}", duration);
            log::debug!("Solution vector x (first 10 elements): {:?}", &result.x[..10.min(b.len())]);
        }
        Err(e) => {
            log::error!("Solver ({}) failed: {:?}", blas.name(), e);
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), EllCoreError> {
    // Initialize logging based on RUST_LOG environment variable
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .filter_module("wgpu", log::LevelFilter::Off)
        .init();

    let n = 500;
    log::info!(
        "Setting up {}x{} pentadiagonal matrix A and sin vector b...",
        n,
        n
    );
    let a = create_pentadiagonal_matrix(n)?;
    let b = create_sin_vector(n);

    let algorithm = ConjugateGradient::with_params(1e-5, n * 5, Preconditioner::Jacobi);
    log::info!("Running Conjugate Gradient solver...");
    log::info!("  Size: {}", n);
    log::info!("  Threshold: {}", algorithm.threshold);
    log::info!("  Max Iterations: {}", algorithm.max_iterations);

    solve_and_report(&CpuBlas::new(), &algorithm, &a, &b).await;

    let mut gpu = GpuBlas::new();
    gpu.initialize().await?;
    gpu.reset_transfer_stats();
    solve_and_report(&gpu, &algorithm, &a, &b).await;
    if let Some(stats) = gpu.transfer_stats() {
        log::info!("GPU Transfer Stats:");
        log::info!("  Bytes CPU -> GPU: {}", stats.bytes_to_gpu);
        log::info!("  Bytes GPU -> CPU: {}", stats.bytes_from_gpu);
    }
    Ok(())
}
