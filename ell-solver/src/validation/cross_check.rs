use super::{
    cmp_vectors, ground_truth_fixed_matrix, ground_truth_fixed_y, ground_truth_matrix,
    random_vector, randomize_ell, randomize_ell_spd, randomize_ell_spd_quantized, relative_error,
    residual_norm, scaled_tolerance, size_kinds, GROUND_TRUTH_X, GROUND_TRUTH_Y,
};
use crate::algorithms::ConjugateGradient;
use crate::blas::Blas;
use crate::preconditioner::Preconditioner;
use ell_core::{EllCoreError, EllMatrix};
use fastrand::Rng;
use log::{error, info, warn};

/// Smallest power-of-two exponent of the CG sweeps; `2^2` rows leave the
/// voxel graphs too small to be representative systems.
pub const CG_MIN_EXP: u32 = 3;

/// Sizes, seed and tolerances of a cross-check sweep.
#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// Smallest power-of-two exponent swept.
    pub min_exp: u32,
    /// Largest power-of-two exponent swept.
    pub max_exp: u32,
    pub seed: u64,
    /// Relative tolerance before the `sqrt(n)` scaling.
    pub base_tolerance: f32,
    /// Relative tolerance of the ground-truth comparisons.
    pub ground_truth_tolerance: f32,
    /// CG stops once `sqrt(r . z)` is below `n * cg_threshold_per_row`.
    pub cg_threshold_per_row: f32,
    /// A CG solution passes when `||A x - b|| < n * residual_tolerance_per_row`.
    pub residual_tolerance_per_row: f32,
    pub max_iterations: usize,
    pub preconditioner: Preconditioner,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            min_exp: 2,
            max_exp: 12,
            seed: 42,
            base_tolerance: 1e-5,
            ground_truth_tolerance: 1e-6,
            cg_threshold_per_row: 1e-8,
            residual_tolerance_per_row: 1e-6,
            max_iterations: 1000,
            preconditioner: Preconditioner::None,
        }
    }
}

impl SweepConfig {
    /// Default tolerances over a custom size range and seed.
    pub fn with_params(min_exp: u32, max_exp: u32, seed: u64) -> Self {
        Self {
            min_exp,
            max_exp,
            seed,
            ..Self::default()
        }
    }
}

/// Outcome of [`CrossCheck::run_all`].
#[derive(Debug, Clone, Default)]
pub struct CrossCheckReport {
    /// Sub-tests whose randomized cases all passed.
    pub passed: usize,
    /// Sub-tests run.
    pub total: usize,
    /// One line per failed case.
    pub failures: Vec<String>,
}

impl CrossCheckReport {
    pub fn all_passed(&self) -> bool {
        self.passed == self.total
    }
}

/// Verdict and detail of one randomized case.
type CaseResult = Result<(bool, String), EllCoreError>;

/// Pass/fail bookkeeping of one sub-test.
struct Tally {
    name: &'static str,
    passed: usize,
    total: usize,
    failures: Vec<String>,
}

impl Tally {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            passed: 0,
            total: 0,
            failures: Vec::new(),
        }
    }

    fn record(&mut self, ok: bool, detail: String) {
        self.total += 1;
        if ok {
            self.passed += 1;
            info!("{} {}: passed", self.name, detail);
        } else {
            warn!("{} {}: FAILED", self.name, detail);
            self.failures.push(format!("{} {}", self.name, detail));
        }
    }

    /// Counts a backend error as a failed case.
    fn record_result(&mut self, result: CaseResult, case: String) {
        match result {
            Ok((ok, detail)) => self.record(ok, format!("{} ({})", case, detail)),
            Err(e) => {
                error!("{} {}: {}", self.name, case, e);
                self.total += 1;
                self.failures.push(format!("{} {}: {}", self.name, case, e));
            }
        }
    }

    fn finish(self, report: &mut CrossCheckReport) {
        info!(
            "{} Randomized Tests (passed/overall): {}/{}",
            self.name, self.passed, self.total
        );
        report.total += 1;
        if self.passed == self.total {
            report.passed += 1;
        }
        report.failures.extend(self.failures);
    }
}

fn diff_norm(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

fn norm(a: &[f32]) -> f32 {
    a.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Columns-per-row cap of the random SpMV matrices, shrinking with the size.
fn max_cols_per_row(rows: usize) -> f32 {
    match rows {
        r if r < 1 << 12 => 128.0,
        r if r < 1 << 16 => 32.0,
        r if r < 1 << 20 => 8.0,
        _ => 4.0,
    }
}

/// Verdict on a CG solution from its true residual.
///
/// More than `n` iterations is reported as anomalous in the detail and the log
/// but does not fail the case.
fn judge_cg_solution(
    backend: &str,
    n: usize,
    iterations: usize,
    residual: f32,
    residual_tolerance_per_row: f32,
) -> (bool, String) {
    let mut detail = format!("{}: residual {}, iterations {}", backend, residual, iterations);
    if iterations > n {
        warn!(
            "{}: {} iterations for {} rows is anomalous for CG",
            backend, iterations, n
        );
        detail.push_str(", anomalous");
    }
    (residual < n as f32 * residual_tolerance_per_row, detail)
}

/// Runs every primitive and both CG variants on a reference and an
/// accelerated backend over random inputs and compares the results.
#[derive(Debug)]
pub struct CrossCheck<'a, R: Blas, A: Blas> {
    reference: &'a R,
    accelerator: &'a A,
    config: SweepConfig,
}

impl<'a, R: Blas, A: Blas> CrossCheck<'a, R, A> {
    pub fn new(reference: &'a R, accelerator: &'a A, config: SweepConfig) -> Self {
        Self {
            reference,
            accelerator,
            config,
        }
    }

    pub fn config(&self) -> &SweepConfig {
        &self.config
    }

    /// Runs the eight sub-tests with a generator seeded from the config.
    pub async fn run_all(&self) -> CrossCheckReport {
        info!(
            "Cross-checking '{}' against '{}' (2^{}..2^{}, seed {})",
            self.accelerator.name(),
            self.reference.name(),
            self.config.min_exp,
            self.config.max_exp,
            self.config.seed
        );
        let mut rng = Rng::with_seed(self.config.seed);
        let mut report = CrossCheckReport::default();

        self.check_axpy(&mut rng).await.finish(&mut report);
        self.check_dot(&mut rng).await.finish(&mut report);
        self.check_nrm2(&mut rng).await.finish(&mut report);
        self.check_spmv(&mut rng).await.finish(&mut report);
        self.check_h_spmv(&mut rng).await.finish(&mut report);
        self.check_inner_product(&mut rng).await.finish(&mut report);
        self.check_conj_grad(&mut rng).await.finish(&mut report);
        self.check_h_conj_grad(&mut rng).await.finish(&mut report);

        if report.all_passed() {
            info!("SUCCESS: {}/{} sub tests passed", report.passed, report.total);
        } else {
            warn!("FAILED: {}/{} sub tests passed", report.passed, report.total);
        }
        report
    }

    fn exponents(&self) -> std::ops::RangeInclusive<u32> {
        self.config.min_exp..=self.config.max_exp
    }

    fn scaled(&self, n: usize) -> f32 {
        scaled_tolerance(self.config.base_tolerance, n)
    }

    async fn check_axpy(&self, rng: &mut Rng) -> Tally {
        let mut tally = Tally::new("sAXPY");
        for exp in self.exponents() {
            for (n, alpha) in size_kinds(exp).into_iter().zip([1.0, 0.5, -2.5]) {
                let x = random_vector(n, -0.5, 0.5, rng);
                let y = random_vector(n, -0.6, 1.4, rng);
                let result = self.axpy_case(&x, &y, alpha, n).await;
                tally.record_result(result, format!("n={} alpha={}", n, alpha));
            }
        }
        tally
    }

    async fn axpy_case(
        &self,
        x: &[f32],
        y: &[f32],
        alpha: f32,
        n: usize,
    ) -> CaseResult {
        let mut expected = vec![0.0; n];
        let mut actual = vec![0.0; n];
        self.reference.s_axpy(x, y, alpha, &mut expected).await?;
        self.accelerator.s_axpy(x, y, alpha, &mut actual).await?;
        let error = diff_norm(&actual, &expected);
        Ok((error <= self.scaled(n), format!("error: {}", error)))
    }

    async fn check_dot(&self, rng: &mut Rng) -> Tally {
        let mut tally = Tally::new("sDOT");
        for exp in self.exponents() {
            for n in size_kinds(exp) {
                let x = random_vector(n, 0.0, 1.0, rng);
                let y = random_vector(n, -0.5, 1.5, rng);
                let result: CaseResult = async {
                    let expected = self.reference.s_dot(&x, &y).await?;
                    let actual = self.accelerator.s_dot(&x, &y).await?;
                    let error = relative_error(actual, expected);
                    Ok((
                        error <= self.scaled(n),
                        format!("{} vs {}, rel. error {}", actual, expected, error),
                    ))
                }
                .await;
                tally.record_result(result, format!("n={}", n));
            }
        }
        tally
    }

    async fn check_nrm2(&self, rng: &mut Rng) -> Tally {
        let mut tally = Tally::new("sNRM2");
        for exp in self.exponents() {
            for n in size_kinds(exp) {
                let x = random_vector(n, -0.5, 0.5, rng);
                let result: CaseResult = async {
                    let expected = self.reference.s_nrm2(&x).await?;
                    let actual = self.accelerator.s_nrm2(&x).await?;
                    let error = relative_error(actual, expected);
                    Ok((
                        error <= self.scaled(n),
                        format!("{} vs {}, rel. error {}", actual, expected, error),
                    ))
                }
                .await;
                tally.record_result(result, format!("n={}", n));
            }
        }
        tally
    }

    /// Shape of the random SpMV matrix for the `kind`-th size around a power of two.
    fn spmv_shape(kind: usize, rows: usize, rng: &mut Rng) -> (usize, usize) {
        let cols = match kind {
            0 => rows,
            1 => (rows as f32 / 1.5).round() as usize + 7,
            _ => (rows as f32 * 1.1).round() as usize + 3,
        };
        let cpr = ((rng.f32() * max_cols_per_row(rows)).round() as usize)
            .max(2)
            .min(cols);
        (cols, cpr)
    }

    async fn check_spmv(&self, rng: &mut Rng) -> Tally {
        let mut tally = Tally::new("sSpMV-ELL");
        let ground_truth: CaseResult = async {
            let mat = ground_truth_matrix()?;
            let mut expected = [0.0; 8];
            let mut actual = [0.0; 8];
            self.reference.s_spmv_ell(&mat, &GROUND_TRUTH_X, &mut expected).await?;
            self.accelerator.s_spmv_ell(&mat, &GROUND_TRUTH_X, &mut actual).await?;
            let tol = self.config.ground_truth_tolerance;
            let ok = cmp_vectors(&GROUND_TRUTH_Y, &expected, tol)
                && cmp_vectors(&GROUND_TRUTH_Y, &actual, tol);
            Ok((ok, format!("{:?} / {:?}", expected, actual)))
        }
        .await;
        tally.record_result(ground_truth, "ground truth 8x6".to_string());

        for exp in self.exponents() {
            for (kind, rows) in size_kinds(exp).into_iter().enumerate() {
                let (cols, cpr) = Self::spmv_shape(kind, rows, rng);
                let mut mat = EllMatrix::new(rows, cols, cpr);
                randomize_ell(&mut mat, rng);
                let x = random_vector(cols, -5.0, 5.0, rng);
                let result: CaseResult = async {
                    let mut expected = vec![0.0; rows];
                    let mut actual = vec![0.0; rows];
                    self.reference.s_spmv_ell(&mat, &x, &mut expected).await?;
                    self.accelerator.s_spmv_ell(&mat, &x, &mut actual).await?;
                    let error = diff_norm(&actual, &expected) / norm(&expected).max(1.0);
                    Ok((error <= self.scaled(rows), format!("rel. error {}", error)))
                }
                .await;
                tally.record_result(
                    result,
                    format!("rows={} cols={} colsPerRow={}", rows, cols, cpr),
                );
            }
        }
        tally
    }

    async fn check_h_spmv(&self, rng: &mut Rng) -> Tally {
        let mut tally = Tally::new("hSpMV-ELL");
        let ground_truth: CaseResult = async {
            let mat = ground_truth_fixed_matrix()?;
            let truth = ground_truth_fixed_y();
            let mut expected = [0.0; 8];
            let mut actual = [0.0; 8];
            self.reference.h_spmv_ell(&mat, &GROUND_TRUTH_X, &mut expected).await?;
            self.accelerator.h_spmv_ell(&mat, &GROUND_TRUTH_X, &mut actual).await?;
            let tol = self.config.ground_truth_tolerance;
            let ok = cmp_vectors(&truth, &expected, tol) && cmp_vectors(&truth, &actual, tol);
            Ok((ok, format!("{:?} / {:?}", expected, actual)))
        }
        .await;
        tally.record_result(ground_truth, "ground truth 8x6".to_string());

        for exp in self.exponents() {
            for (kind, rows) in size_kinds(exp).into_iter().enumerate() {
                let (cols, cpr) = match kind {
                    0 => (rows, 1),
                    _ => Self::spmv_shape(kind, rows, rng),
                };
                let mut mat: EllMatrix<i16> = EllMatrix::new(rows, cols, cpr);
                randomize_ell(&mut mat, rng);
                let x = random_vector(cols, -5.0, 5.0, rng);
                let result: CaseResult = async {
                    let mut expected = vec![0.0; rows];
                    let mut actual = vec![0.0; rows];
                    self.reference.h_spmv_ell(&mat, &x, &mut expected).await?;
                    self.accelerator.h_spmv_ell(&mat, &x, &mut actual).await?;
                    let error = diff_norm(&actual, &expected) / norm(&expected).max(1.0);
                    Ok((error <= self.scaled(rows), format!("rel. error {}", error)))
                }
                .await;
                tally.record_result(
                    result,
                    format!("rows={} cols={} colsPerRow={}", rows, cols, cpr),
                );
            }
        }
        tally
    }

    async fn check_inner_product(&self, rng: &mut Rng) -> Tally {
        let mut tally = Tally::new("sSpInnerProduct-ELL");
        for exp in self.exponents() {
            for (kind, n) in size_kinds(exp).into_iter().enumerate() {
                let cpr = n.min(7);
                let mut mat = EllMatrix::new(n, n, cpr);
                if kind == 0 {
                    if let Err(e) = randomize_ell_spd(&mut mat, rng) {
                        tally.record_result(Err(e), format!("n={}", n));
                        continue;
                    }
                } else {
                    randomize_ell(&mut mat, rng);
                }
                let x = random_vector(n, -0.5, 1.5, rng);
                let y = random_vector(n, -0.5, 1.5, rng);
                let result: CaseResult = async {
                    let expected = self.reference.s_sp_inner_product_ell(&mat, &x, &y).await?;
                    let actual = self.accelerator.s_sp_inner_product_ell(&mat, &x, &y).await?;
                    let error = relative_error(actual, expected);
                    Ok((
                        error <= self.scaled(n),
                        format!("{} vs {}, rel. error {}", actual, expected, error),
                    ))
                }
                .await;
                tally.record_result(result, format!("n={} colsPerRow={}", n, cpr));
            }
        }
        tally
    }

    /// CG sizes from `2^CG_MIN_EXP` up: `(2^i, 7 slots)` and
    /// `(round(0.7 * 2^i), 6 slots)`, each with the range of its right-hand side.
    fn cg_cases(&self) -> Vec<(usize, usize, (f32, f32))> {
        (self.config.min_exp.max(CG_MIN_EXP)..=self.config.max_exp)
            .flat_map(|exp| {
                let n = 1usize << exp;
                let m = (n as f32 * 0.7).round() as usize;
                [(n, n.min(7), (0.0, 1.0)), (m, m.min(6), (-0.5, 1.5))]
            })
            .collect()
    }

    fn cg_params(&self, n: usize) -> ConjugateGradient {
        ConjugateGradient::with_params(
            n as f32 * self.config.cg_threshold_per_row,
            self.config.max_iterations,
            self.config.preconditioner,
        )
    }

    fn judge_solution(
        &self,
        backend: &str,
        n: usize,
        iterations: usize,
        residual: f32,
    ) -> (bool, String) {
        judge_cg_solution(
            backend,
            n,
            iterations,
            residual,
            self.config.residual_tolerance_per_row,
        )
    }

    async fn check_conj_grad(&self, rng: &mut Rng) -> Tally {
        let mut tally = Tally::new("sSpConjGrad-ELL");
        for (n, cpr, (lo, hi)) in self.cg_cases() {
            let mut mat = EllMatrix::new(n, n, cpr);
            if let Err(e) = randomize_ell_spd(&mut mat, rng) {
                tally.record_result(Err(e), format!("rows={}", n));
                continue;
            }
            let b = random_vector(n, lo, hi, rng);
            let params = self.cg_params(n);
            let case = format!("rows={} colsPerRow={}", n, cpr);

            let mut x = vec![0.0; n];
            let result: CaseResult = async {
                let iterations = self
                    .accelerator
                    .s_sp_conj_grad_ell(&mat, &b, &mut x, None, &params)
                    .await?;
                let residual = residual_norm(&mat, &x, &b)?;
                Ok(self.judge_solution(self.accelerator.name(), n, iterations, residual))
            }
            .await;
            tally.record_result(result, case.clone());

            let mut x = vec![0.0; n];
            let result: CaseResult = async {
                let iterations = self
                    .reference
                    .s_sp_conj_grad_ell(&mat, &b, &mut x, None, &params)
                    .await?;
                let residual = residual_norm(&mat, &x, &b)?;
                Ok(self.judge_solution(self.reference.name(), n, iterations, residual))
            }
            .await;
            tally.record_result(result, case);
        }
        tally
    }

    async fn check_h_conj_grad(&self, rng: &mut Rng) -> Tally {
        let mut tally = Tally::new("hSpConjGrad-ELL");
        for (n, cpr, (lo, hi)) in self.cg_cases() {
            let mut mat: EllMatrix<i16> = EllMatrix::new(n, n, cpr);
            if let Err(e) = randomize_ell_spd_quantized(&mut mat, rng) {
                tally.record_result(Err(e), format!("rows={}", n));
                continue;
            }
            let b = random_vector(n, lo, hi, rng);
            let params = ConjugateGradient {
                preconditioner: Preconditioner::None,
                ..self.cg_params(n)
            };
            let case = format!("rows={} colsPerRow={}", n, cpr);

            let mut x = vec![0.0; n];
            let result: CaseResult = async {
                let iterations = self
                    .accelerator
                    .h_sp_conj_grad_ell(&mat, &b, &mut x, None, &params)
                    .await?;
                let residual = residual_norm(&mat, &x, &b)?;
                Ok(self.judge_solution(self.accelerator.name(), n, iterations, residual))
            }
            .await;
            tally.record_result(result, case.clone());

            let mut x = vec![0.0; n];
            let result: CaseResult = async {
                let iterations = self
                    .reference
                    .h_sp_conj_grad_ell(&mat, &b, &mut x, None, &params)
                    .await?;
                let residual = residual_norm(&mat, &x, &b)?;
                Ok(self.judge_solution(self.reference.name(), n, iterations, residual))
            }
            .await;
            tally.record_result(result, case);
        }
        tally
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_counts_sub_tests() {
        let mut report = CrossCheckReport::default();
        let mut ok = Tally::new("ok");
        ok.record(true, "n=1".to_string());
        ok.finish(&mut report);
        let mut bad = Tally::new("bad");
        bad.record(true, "n=1".to_string());
        bad.record_result(Err(EllCoreError::NotInitialized), "n=2".to_string());
        bad.finish(&mut report);
        assert_eq!((report.passed, report.total), (1, 2));
        assert!(!report.all_passed());
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].contains("n=2"));
    }

    #[test]
    fn test_excess_iterations_are_reported_not_failed() {
        let (ok, detail) = judge_cg_solution("cpu", 8, 12, 1e-7, 1e-6);
        assert!(ok);
        assert!(detail.contains("anomalous"), "{}", detail);

        let (ok, detail) = judge_cg_solution("cpu", 8, 8, 1e-7, 1e-6);
        assert!(ok);
        assert!(!detail.contains("anomalous"));

        let (ok, _) = judge_cg_solution("cpu", 8, 3, f32::NAN, 1e-6);
        assert!(!ok);
    }

    #[test]
    fn test_cg_sweep_starts_at_eight_rows() {
        let cpu = crate::CpuBlas::new();
        let check = CrossCheck::new(&cpu, &cpu, SweepConfig::with_params(2, 4, 1));
        let sizes: Vec<(usize, usize)> = check
            .cg_cases()
            .into_iter()
            .map(|(n, cpr, _)| (n, cpr))
            .collect();
        assert_eq!(sizes, vec![(8, 7), (6, 6), (16, 7), (11, 6)]);
    }

    #[test]
    fn test_max_cols_per_row_shrinks() {
        assert_eq!(max_cols_per_row(100), 128.0);
        assert_eq!(max_cols_per_row(1 << 12), 32.0);
        assert_eq!(max_cols_per_row(1 << 20), 4.0);
    }
}
