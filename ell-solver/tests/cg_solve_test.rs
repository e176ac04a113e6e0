mod common;

use common::{assert_approx_eq_vec, gpu_blas, init_logger, require_gpu_blas};
use ell_solver::{
    algorithms::SolveAlgorithm,
    validation::{random_vector, randomize_ell_spd, randomize_ell_spd_quantized, residual_norm},
    Blas, ConjugateGradient, CpuBlas, EllCoreError, EllMatrix, Preconditioner,
};
use fastrand::Rng;
use pollster::block_on;

fn small_spd_system() -> Result<(EllMatrix<f32>, Vec<f32>), EllCoreError> {
    let a = EllMatrix::from_entries(
        3,
        3,
        3,
        &[
            (0, 0, 4.0),
            (0, 1, -1.0),
            (1, 0, -1.0),
            (1, 1, 4.0),
            (1, 2, -1.0),
            (2, 1, -1.0),
            (2, 2, 4.0),
        ],
    )?;
    Ok((a, vec![1.0, 2.0, 3.0]))
}

fn check_small_system<B: Blas>(blas: &B) -> Result<(), EllCoreError> {
    let (a, b) = small_spd_system()?;
    let algorithm = ConjugateGradient::default();
    let x_result = block_on(algorithm.solve(blas, &a, &b))?;

    let expected_x = vec![0.464, 0.857, 0.964];
    assert_approx_eq_vec(&x_result.x, &expected_x, 1e-3);
    assert!(x_result.metadata.iterations <= 10);
    assert!(x_result.metadata.residual_norm < 1e-4);
    Ok(())
}

/// Solves random SPD systems and checks the true residual of the result.
fn check_random_systems<B: Blas>(
    blas: &B,
    preconditioner: Preconditioner,
) -> Result<(), EllCoreError> {
    let mut rng = Rng::with_seed(31);
    for (n, cpr) in [(8, 7), (45, 6), (64, 7), (90, 6), (128, 7)] {
        let mut mat = EllMatrix::new(n, n, cpr);
        randomize_ell_spd(&mut mat, &mut rng)?;
        let b = random_vector(n, 0.0, 1.0, &mut rng);
        let params = ConjugateGradient::with_params(1e-4, 1000, preconditioner);

        let mut x = vec![0.0; n];
        let iterations = block_on(blas.s_sp_conj_grad_ell(&mat, &b, &mut x, None, &params))?;
        let residual = residual_norm(&mat, &x, &b)?;
        assert!(
            residual < n as f32 * 1e-4,
            "{} n={}: residual {} after {} iterations",
            blas.name(),
            n,
            residual,
            iterations
        );
        assert!(iterations < 1000, "{} n={} did not converge", blas.name(), n);
    }
    Ok(())
}

#[test]
fn test_cpu_solve_conjugate_gradient() -> Result<(), EllCoreError> {
    init_logger();
    check_small_system(&CpuBlas::new())
}

#[test]
#[ignore = "needs a GPU adapter; run with --ignored"]
fn test_gpu_solve_conjugate_gradient() -> Result<(), EllCoreError> {
    let gpu = require_gpu_blas();
    check_small_system(&gpu)
}

#[test]
fn test_cpu_random_spd_systems() -> Result<(), EllCoreError> {
    init_logger();
    check_random_systems(&CpuBlas::new(), Preconditioner::None)?;
    check_random_systems(&CpuBlas::new(), Preconditioner::Jacobi)
}

#[test]
#[ignore = "needs a GPU adapter; run with --ignored"]
fn test_gpu_random_spd_systems() -> Result<(), EllCoreError> {
    let gpu = require_gpu_blas();
    check_random_systems(&gpu, Preconditioner::None)?;
    check_random_systems(&gpu, Preconditioner::Jacobi)
}

#[test]
fn test_initial_guess_at_solution_skips_iterations() -> Result<(), EllCoreError> {
    let (a, b) = small_spd_system()?;
    let cpu = CpuBlas::new();
    let first = block_on(ConjugateGradient::default().solve(&cpu, &a, &b))?;

    let mut x = vec![0.0; 3];
    let params = ConjugateGradient::with_params(1e-3, 100, Preconditioner::None);
    let iterations = block_on(cpu.s_sp_conj_grad_ell(&a, &b, &mut x, Some(&first.x), &params))?;
    assert_eq!(iterations, 0);
    assert_eq!(x, first.x);
    Ok(())
}

/// Symmetric pentadiagonal matrix with `diagonal` on the main diagonal and -1
/// on the first two off-diagonals.
fn pentadiagonal(n: usize, diagonal: f32) -> Result<EllMatrix<f32>, EllCoreError> {
    let mut entries = Vec::new();
    for i in 0..n {
        for offset in [-2isize, -1, 1, 2] {
            let j = i as isize + offset;
            if (0..n as isize).contains(&j) {
                entries.push((i, j as usize, -1.0));
            }
        }
        entries.push((i, i, diagonal));
    }
    EllMatrix::from_entries(n, n, 5, &entries)
}

#[test]
fn test_well_conditioned_systems_converge_within_n_iterations() -> Result<(), EllCoreError> {
    init_logger();
    let params = ConjugateGradient::with_params(1e-4, 1000, Preconditioner::None);

    let (a, b) = small_spd_system()?;
    let mut x = vec![0.0; 3];
    let iterations = block_on(CpuBlas.s_sp_conj_grad_ell(&a, &b, &mut x, None, &params))?;
    assert!(iterations <= 3, "3x3 system took {} iterations", iterations);

    let n = 16;
    let a = pentadiagonal(n, 6.0)?;
    let b: Vec<f32> = (0..n).map(|i| (i % 4) as f32 * 0.25).collect();
    let mut x = vec![0.0; n];
    let iterations = block_on(CpuBlas.s_sp_conj_grad_ell(&a, &b, &mut x, None, &params))?;
    assert!(iterations <= n, "pentadiagonal n={} took {} iterations", n, iterations);
    assert!(residual_norm(&a, &x, &b)? < 1e-3);
    Ok(())
}

#[test]
fn test_zero_rhs_with_zero_threshold_stays_finite() -> Result<(), EllCoreError> {
    let (a, _) = small_spd_system()?;
    let mut x = vec![1.0; 3];
    let params = ConjugateGradient::with_params(0.0, 10, Preconditioner::Jacobi);
    let iterations = block_on(CpuBlas.s_sp_conj_grad_ell(&a, &[0.0; 3], &mut x, None, &params))?;
    assert_eq!(iterations, 0);
    assert_eq!(x, vec![0.0; 3]);

    let quantized = ell_solver::QuantizedEllMatrix::from_f32(&a)?;
    let mut x = vec![1.0; 3];
    let iterations = block_on(CpuBlas.h_sp_conj_grad_ell(
        quantized.matrix(),
        &[0.0; 3],
        &mut x,
        None,
        &params,
    ))?;
    assert_eq!(iterations, 0);
    assert!(x.iter().all(|v| *v == 0.0));
    Ok(())
}

#[test]
fn test_max_iterations_bounds_the_solver() -> Result<(), EllCoreError> {
    let mut mat = EllMatrix::new(64, 64, 7);
    randomize_ell_spd(&mut mat, &mut Rng::with_seed(4))?;
    let b = vec![1.0; 64];
    let mut x = vec![0.0; 64];
    let params = ConjugateGradient::with_params(0.0, 5, Preconditioner::None);
    let iterations = block_on(CpuBlas.s_sp_conj_grad_ell(&mat, &b, &mut x, None, &params))?;
    assert_eq!(iterations, 5);
    Ok(())
}

#[test]
fn test_non_symmetric_matrix_is_rejected() {
    let mat = EllMatrix::from_entries(2, 2, 2, &[(0, 0, 1.0f32), (0, 1, 2.0), (1, 1, 1.0)])
        .unwrap();
    assert!(!mat.is_symmetric());
    let mut x = vec![5.0; 2];
    let result = block_on(CpuBlas.s_sp_conj_grad_ell(
        &mat,
        &[1.0, 1.0],
        &mut x,
        None,
        &ConjugateGradient::default(),
    ));
    assert!(matches!(result, Err(EllCoreError::NonSymmetricMatrix)));
    // Output untouched
    assert_eq!(x, vec![5.0; 2]);

    if let Some(gpu) = gpu_blas() {
        let result = block_on(gpu.s_sp_conj_grad_ell(
            &mat,
            &[1.0, 1.0],
            &mut x,
            None,
            &ConjugateGradient::default(),
        ));
        assert!(matches!(result, Err(EllCoreError::NonSymmetricMatrix)));
    }
}

#[test]
fn test_quantized_conjugate_gradient() -> Result<(), EllCoreError> {
    init_logger();
    let gpu = gpu_blas();
    let mut rng = Rng::with_seed(8);
    for (n, cpr) in [(8, 7), (45, 6), (64, 7)] {
        let mut mat: EllMatrix<i16> = EllMatrix::new(n, n, cpr);
        randomize_ell_spd_quantized(&mut mat, &mut rng)?;
        let b = random_vector(n, -0.5, 1.5, &mut rng);
        // The Jacobi request is ignored with a warning on the fixed-point path.
        let algorithm =
            ConjugateGradient::with_params(n as f32 * 1e-5, 1000, Preconditioner::Jacobi);

        let cpu_result = block_on(algorithm.solve(&CpuBlas::new(), &mat, &b))?;
        assert!(
            cpu_result.metadata.residual_norm < n as f32 * 1e-3,
            "cpu n={}: residual {}",
            n,
            cpu_result.metadata.residual_norm
        );

        if let Some(gpu) = &gpu {
            let gpu_result = block_on(algorithm.solve(gpu, &mat, &b))?;
            assert!(
                gpu_result.metadata.residual_norm < n as f32 * 1e-3,
                "gpu n={}: residual {}",
                n,
                gpu_result.metadata.residual_norm
            );
        }
    }
    Ok(())
}

#[test]
fn test_uninitialized_gpu_backend() {
    let gpu = ell_solver::GpuBlas::new();
    let (a, b) = small_spd_system().unwrap();
    let result = block_on(ConjugateGradient::default().solve(&gpu, &a, &b));
    assert!(matches!(result, Err(EllCoreError::NotInitialized)));
}
