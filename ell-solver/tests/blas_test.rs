mod common;

use common::{assert_approx_eq_vec, init_logger, require_gpu_blas};
use ell_solver::{
    validation::{
        cmp_vectors, ground_truth_fixed_matrix, ground_truth_fixed_y, ground_truth_matrix,
        random_vector, randomize_ell, relative_error, scaled_tolerance, sweep_sizes,
        GROUND_TRUTH_X, GROUND_TRUTH_Y,
    },
    Blas, CpuBlas, EllCoreError, EllMatrix, QuantizedEllMatrix,
};
use fastrand::Rng;
use pollster::block_on;

fn check_ground_truth<B: Blas>(blas: &B) -> Result<(), EllCoreError> {
    block_on(async {
        let mat = ground_truth_matrix()?;
        let mut result = [0.0f32; 8];
        blas.s_spmv_ell(&mat, &GROUND_TRUTH_X, &mut result).await?;
        assert_eq!(result, GROUND_TRUTH_Y, "{} SpMV ground truth", blas.name());

        let fixed = ground_truth_fixed_matrix()?;
        blas.h_spmv_ell(&fixed, &GROUND_TRUTH_X, &mut result).await?;
        assert!(
            cmp_vectors(&ground_truth_fixed_y(), &result, 1e-6),
            "{} hSpMV ground truth: {:?}",
            blas.name(),
            result
        );
        Ok(())
    })
}

fn check_axpy_identities<B: Blas>(blas: &B) -> Result<(), EllCoreError> {
    block_on(async {
        let mut rng = Rng::with_seed(1);
        let x = random_vector(100, -0.5, 0.5, &mut rng);
        let y = random_vector(100, -0.6, 1.4, &mut rng);
        let mut result = vec![0.0; 100];

        blas.s_axpy(&x, &y, 0.0, &mut result).await?;
        assert_eq!(result, y);

        blas.s_axpy(&x, &vec![0.0; 100], 1.0, &mut result).await?;
        assert_eq!(result, x);
        Ok(())
    })
}

#[test]
fn test_cpu_ground_truth() -> Result<(), EllCoreError> {
    init_logger();
    check_ground_truth(&CpuBlas::new())
}

#[test]
#[ignore = "needs a GPU adapter; run with --ignored"]
fn test_gpu_ground_truth() -> Result<(), EllCoreError> {
    let gpu = require_gpu_blas();
    check_ground_truth(&gpu)
}

#[test]
fn test_cpu_axpy_identities() -> Result<(), EllCoreError> {
    check_axpy_identities(&CpuBlas::new())
}

#[test]
#[ignore = "needs a GPU adapter; run with --ignored"]
fn test_gpu_axpy_identities() -> Result<(), EllCoreError> {
    let gpu = require_gpu_blas();
    check_axpy_identities(&gpu)
}

#[test]
#[ignore = "needs a GPU adapter; run with --ignored"]
fn test_gpu_primitives_match_cpu() -> Result<(), EllCoreError> {
    let gpu = require_gpu_blas();
    let cpu = CpuBlas::new();
    let mut rng = Rng::with_seed(2024);

    block_on(async {
        for n in sweep_sizes(1, 9) {
            let tolerance = scaled_tolerance(1e-5, n);
            let x = random_vector(n, 0.0, 1.0, &mut rng);
            let y = random_vector(n, -0.5, 1.5, &mut rng);

            let expected = cpu.s_dot(&x, &y).await?;
            let actual = gpu.s_dot(&x, &y).await?;
            assert!(
                relative_error(actual, expected) <= tolerance,
                "dot n={}: {} vs {}",
                n,
                actual,
                expected
            );

            let expected = cpu.s_nrm2(&x).await?;
            let actual = gpu.s_nrm2(&x).await?;
            assert!(relative_error(actual, expected) <= tolerance, "nrm2 n={}", n);

            let mut expected = vec![0.0; n];
            let mut actual = vec![0.0; n];
            cpu.s_axpy(&x, &y, -2.5, &mut expected).await?;
            gpu.s_axpy(&x, &y, -2.5, &mut actual).await?;
            assert_approx_eq_vec(&actual, &expected, 1e-6);

            let mut mat = EllMatrix::new(n, n + 3, 9.min(n + 3));
            randomize_ell(&mut mat, &mut rng);
            let v = random_vector(n + 3, -5.0, 5.0, &mut rng);
            cpu.s_spmv_ell(&mat, &v, &mut expected).await?;
            gpu.s_spmv_ell(&mat, &v, &mut actual).await?;
            assert_approx_eq_vec(&actual, &expected, 1e-3);

            let z = random_vector(n, -0.5, 1.5, &mut rng);
            let expected = cpu.s_sp_inner_product_ell(&mat, &z, &v).await?;
            let actual = gpu.s_sp_inner_product_ell(&mat, &z, &v).await?;
            assert!(
                (actual - expected).abs() <= tolerance * expected.abs().max(1.0),
                "inner product n={}: {} vs {}",
                n,
                actual,
                expected
            );
        }
        Ok(())
    })
}

#[test]
#[ignore = "needs a GPU adapter; run with --ignored"]
fn test_gpu_fixed_point_spmv_matches_cpu() -> Result<(), EllCoreError> {
    let gpu = require_gpu_blas();
    let cpu = CpuBlas::new();
    let mut rng = Rng::with_seed(77);
    block_on(async {
        for n in sweep_sizes(2, 8) {
            let mut mat: EllMatrix<i16> = EllMatrix::new(n, n, 5.min(n));
            randomize_ell(&mut mat, &mut rng);
            let x = random_vector(n, -5.0, 5.0, &mut rng);
            let mut expected = vec![0.0; n];
            let mut actual = vec![0.0; n];
            cpu.h_spmv_ell(&mat, &x, &mut expected).await?;
            gpu.h_spmv_ell(&mat, &x, &mut actual).await?;
            assert_approx_eq_vec(&actual, &expected, 1e-4);
        }
        Ok(())
    })
}

#[test]
fn test_quantized_spmv_within_bound() -> Result<(), EllCoreError> {
    init_logger();
    let cpu = CpuBlas::new();
    let mut rng = Rng::with_seed(9);
    let mut mat: EllMatrix<f32> = EllMatrix::new(300, 200, 8);
    randomize_ell(&mut mat, &mut rng);
    let x = random_vector(200, -5.0, 5.0, &mut rng);
    let quantized = QuantizedEllMatrix::from_f32(&mat)?;

    let mut exact = vec![0.0; 300];
    let mut approx = vec![0.0; 300];
    block_on(async {
        cpu.s_spmv_ell(&mat, &x, &mut exact).await?;
        cpu.h_spmv_ell(quantized.matrix(), &x, &mut approx).await
    })?;

    for row in 0..300 {
        let bound: f32 = mat
            .row_entries(row)
            .map(|(col, _)| 0.5 * quantized.step() * x[col].abs())
            .sum();
        let error = (approx[row] * quantized.rescale() - exact[row]).abs();
        assert!(
            error <= bound + 1e-3,
            "row {}: error {} exceeds bound {}",
            row,
            error,
            bound
        );
    }
    Ok(())
}

#[test]
fn test_dimension_mismatch_is_rejected() {
    let cpu = CpuBlas::new();
    let mat: EllMatrix<f32> = EllMatrix::new(4, 3, 2);
    let mut result = vec![0.0; 4];
    assert!(matches!(
        block_on(cpu.s_spmv_ell(&mat, &[1.0; 4], &mut result)),
        Err(EllCoreError::InvalidDimensions(_))
    ));
    assert!(block_on(cpu.s_sp_inner_product_ell(&mat, &[1.0; 3], &[1.0; 3])).is_err());
}
