//! Poisson distribution with a memoized cumulative table and
//! inverse-transform sampling.
//!
//! The PMF is evaluated with a multiplicative recurrence that interleaves the
//! `e^-λ` factor with the `λ^k / k!` growth, so neither the numerator nor the
//! factorial is ever materialised on its own. For very large λ the recurrence
//! peaks at roughly `e^(λ/e)` before the corrective division, which overflows
//! an `f64`; above [`LOG_SPACE_LAMBDA`] the PMF is evaluated in log space
//! instead.

use super::DistributionError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::E;
use tracing::debug;

/// Above this λ the PMF is computed as `exp(k·ln λ − λ − ln k!)`.
pub const LOG_SPACE_LAMBDA: f64 = 500.0;

/// Table length from which sampling switches from a linear scan to a binary
/// search over the memoized CDF.
pub const BINARY_SEARCH_THRESHOLD: usize = 64;

/// Poisson(λ) sampler.
///
/// The cumulative table is append-only: entry `k` is `P(X <= k)` and is never
/// recomputed once written. The random source is owned by the distribution,
/// so independent samplers never share seeding state.
#[derive(Debug, Clone)]
pub struct PoissonDistribution<R = StdRng> {
    lambda: f64,
    cdf: Vec<f64>,
    rng: R,
}

impl PoissonDistribution<StdRng> {
    /// Sampler seeded from operating-system entropy.
    pub fn from_entropy(lambda: f64) -> Result<Self, DistributionError> {
        Self::new(lambda, StdRng::from_entropy())
    }

    /// Deterministic sampler, used for reproducible runs and tests.
    pub fn seeded(lambda: f64, seed: u64) -> Result<Self, DistributionError> {
        Self::new(lambda, StdRng::seed_from_u64(seed))
    }
}

impl<R: Rng> PoissonDistribution<R> {
    /// Build a sampler for `lambda` drawing uniforms from `rng`.
    ///
    /// The CDF is pre-computed from 0 to `ceil(2λ)`, which covers all but a
    /// negligible tail for the λ values used for pacing.
    pub fn new(lambda: f64, rng: R) -> Result<Self, DistributionError> {
        if !lambda.is_finite() || lambda < 0.0 {
            return Err(DistributionError::InvalidLambda(lambda));
        }

        let mut distribution = Self {
            lambda,
            cdf: Vec::with_capacity((2.0 * lambda).ceil() as usize + 1),
            rng,
        };
        let first = distribution.pmf(0);
        distribution.cdf.push(first);
        distribution.cdf((2.0 * lambda).ceil() as usize);

        debug!(
            "Poisson(λ={}) initialised with {} cumulative entries",
            lambda,
            distribution.cdf.len()
        );
        Ok(distribution)
    }

    /// The rate parameter, which is also the mean.
    pub fn lambda(&self) -> f64 {
        self.lambda
    }

    /// Number of memoized cumulative entries.
    pub fn table_len(&self) -> usize {
        self.cdf.len()
    }

    /// `P(X = k)`, recomputed from scratch on every call.
    ///
    /// Early terms can underflow to zero for large λ, so caching them and
    /// building later terms on top would zero out the whole tail.
    pub fn pmf(&self, k: usize) -> f64 {
        if self.lambda > LOG_SPACE_LAMBDA {
            pmf_log_space(self.lambda, k)
        } else {
            pmf_recurrence(self.lambda, k)
        }
    }

    /// `P(X <= k)`, extending the memoized table forward as needed.
    pub fn cdf(&mut self, k: usize) -> f64 {
        while self.cdf.len() <= k {
            self.extend();
        }
        self.cdf[k]
    }

    /// Draw one value by inverse-transform sampling.
    pub fn sample(&mut self) -> usize {
        let u: f64 = self.rng.gen();
        self.quantile(u)
    }

    /// Smallest `k` such that `u < CDF(k)`.
    ///
    /// `u` is expected in `[0, 1)`. When `u` lies beyond what the table can
    /// resolve (the tail has underflowed to zero), the first `k` past the
    /// mode whose term vanished is returned.
    pub fn quantile(&mut self, u: f64) -> usize {
        let covered = self.cdf[self.cdf.len() - 1];
        if u < covered {
            return if self.cdf.len() > BINARY_SEARCH_THRESHOLD {
                self.cdf.partition_point(|&c| c <= u)
            } else {
                self.cdf.iter().take_while(|&&c| c <= u).count()
            };
        }

        loop {
            let term = self.extend();
            let k = self.cdf.len() - 1;
            if u < self.cdf[k] {
                return k;
            }
            if term <= 0.0 && k as f64 > self.lambda {
                debug!(
                    "Poisson(λ={}) tail exhausted at k={} for u={}",
                    self.lambda, k, u
                );
                return k;
            }
        }
    }

    /// Append one cumulative entry and return the PMF term that was added.
    fn extend(&mut self) -> f64 {
        let k = self.cdf.len();
        let term = self.pmf(k);
        let previous = self.cdf[k - 1];
        self.cdf.push(previous + term);
        term
    }
}

/// `p *= λ/i`, dividing by `e` once per step while `i <= λ`, followed by a
/// single division for whatever part of `e^λ` has not been applied yet.
///
/// When `λ > k` the remainder is exactly `e^(λ-k)`. For `k >= λ` and a
/// non-integer λ it is the fractional `e^(λ-⌊λ⌋)`.
fn pmf_recurrence(lambda: f64, k: usize) -> f64 {
    let mut result = 1.0_f64;
    let mut applied = 0.0_f64;

    for i in 1..=k {
        let i = i as f64;
        result *= lambda / i;
        if i <= lambda {
            result /= E;
            applied += 1.0;
        }
    }

    let remaining = lambda - applied;
    if remaining > 0.0 {
        result /= remaining.exp();
    }
    result
}

fn pmf_log_space(lambda: f64, k: usize) -> f64 {
    let k_f = k as f64;
    (k_f * lambda.ln() - lambda - ln_factorial(k)).exp()
}

/// `ln(n!)`: exact summation for small `n`, Stirling series otherwise.
fn ln_factorial(n: usize) -> f64 {
    if n < 32 {
        return (2..=n).map(|i| (i as f64).ln()).sum();
    }
    let n = n as f64;
    n * n.ln() - n + 0.5 * (2.0 * std::f64::consts::PI * n).ln() + 1.0 / (12.0 * n)
        - 1.0 / (360.0 * n.powi(3))
        + 1.0 / (1260.0 * n.powi(5))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: f64, expected: f64, tolerance: f64) {
        assert!(
            (actual - expected).abs() <= tolerance,
            "expected {} to be within {} of {}",
            actual,
            tolerance,
            expected
        );
    }

    #[test]
    fn test_negative_lambda_is_rejected() {
        assert!(PoissonDistribution::seeded(-0.5, 1).is_err());
        assert!(PoissonDistribution::seeded(f64::NAN, 1).is_err());
        assert!(PoissonDistribution::seeded(f64::INFINITY, 1).is_err());
    }

    #[test]
    fn test_table_precomputed_to_twice_lambda() {
        let poisson = PoissonDistribution::seeded(5.0, 1).unwrap();
        assert_eq!(poisson.table_len(), 11);

        let poisson = PoissonDistribution::seeded(2.2, 1).unwrap();
        assert_eq!(poisson.table_len(), 6);
    }

    #[test]
    fn test_cdf_zero_equals_pmf_zero() {
        for &lambda in &[0.0, 0.5, 2.5, 5.0, 40.0, 300.0] {
            let mut poisson = PoissonDistribution::seeded(lambda, 7).unwrap();
            let expected = (-lambda).exp();
            assert_close(poisson.pmf(0), expected, 1e-15);
            assert_close(poisson.cdf(0), expected, 1e-15);
        }
    }

    #[test]
    fn test_cdf_is_running_sum_of_pmf() {
        for &lambda in &[0.7, 3.0, 5.0, 12.5] {
            let mut poisson = PoissonDistribution::seeded(lambda, 7).unwrap();
            for k in 1..60 {
                let expected = poisson.cdf(k - 1) + poisson.pmf(k);
                assert_close(poisson.cdf(k), expected, 1e-12);
            }
        }
    }

    #[test]
    fn test_cdf_monotone_and_converges_to_one() {
        for &lambda in &[0.0, 1.0, 2.5, 5.0, 33.3, 150.0] {
            let mut poisson = PoissonDistribution::seeded(lambda, 3).unwrap();
            let mut previous = 0.0;
            let upper = (lambda * 4.0) as usize + 40;
            for k in 0..upper {
                let current = poisson.cdf(k);
                assert!(current >= previous, "CDF decreased at k={}", k);
                previous = current;
            }
            assert_close(previous, 1.0, 1e-9);
        }
    }

    #[test]
    fn test_pmf_matches_closed_form_for_small_values() {
        let poisson = PoissonDistribution::seeded(3.0, 1).unwrap();
        // λ^k e^-λ / k!
        let expected = [
            0.049_787_068_367_863_944,
            0.149_361_205_103_591_83,
            0.224_041_807_655_387_75,
            0.224_041_807_655_387_75,
            0.168_031_355_741_540_8,
        ];
        for (k, &p) in expected.iter().enumerate() {
            assert_close(poisson.pmf(k), p, 1e-12);
        }
    }

    #[test]
    fn test_fractional_lambda_sums_to_one() {
        let mut poisson = PoissonDistribution::seeded(2.5, 1).unwrap();
        assert_close(poisson.cdf(60), 1.0, 1e-12);
        // 2.5^3 e^-2.5 / 3!
        assert_close(poisson.pmf(3), 0.213_763_017_249_987_2, 1e-12);
    }

    #[test]
    fn test_recurrence_agrees_with_log_space() {
        for &lambda in &[50.0, 250.0, 450.0] {
            for k in [0usize, 10, 40, 100, 300, 500, 700] {
                let a = pmf_recurrence(lambda, k);
                let b = pmf_log_space(lambda, k);
                assert_close(a, b, 1e-12_f64.max(a * 1e-9));
            }
        }
    }

    #[test]
    fn test_large_lambda_stays_finite() {
        let mut poisson = PoissonDistribution::seeded(5_000.0, 11).unwrap();
        assert!(poisson.cdf(5_000).is_finite());
        assert_close(poisson.cdf(10_000), 1.0, 1e-9);
        for _ in 0..100 {
            let sample = poisson.sample();
            assert!((4_500..5_500).contains(&sample), "implausible sample {}", sample);
        }
    }

    #[test]
    fn test_zero_lambda_always_samples_zero() {
        let mut poisson = PoissonDistribution::seeded(0.0, 5).unwrap();
        for _ in 0..100 {
            assert_eq!(poisson.sample(), 0);
        }
    }

    #[test]
    fn test_quantile_is_smallest_k_above_u() {
        let mut poisson = PoissonDistribution::seeded(4.0, 5).unwrap();
        let cdf0 = poisson.cdf(0);
        let cdf1 = poisson.cdf(1);
        assert_eq!(poisson.quantile(0.0), 0);
        assert_eq!(poisson.quantile(cdf0), 1);
        assert_eq!(poisson.quantile((cdf0 + cdf1) / 2.0), 1);
    }

    #[test]
    fn test_quantile_extends_table_past_precomputed_range() {
        let mut poisson = PoissonDistribution::seeded(1.0, 5).unwrap();
        let initial = poisson.table_len();
        let k = poisson.quantile(0.999_999);
        assert!(k >= initial);
        assert!(poisson.table_len() > initial);
    }

    #[test]
    fn test_quantile_terminates_for_values_beyond_resolution() {
        let mut poisson = PoissonDistribution::seeded(3.0, 5).unwrap();
        let k = poisson.quantile(1.0 - f64::EPSILON / 4.0);
        assert!(k > 3);
    }

    #[test]
    fn test_binary_and_linear_search_agree() {
        let mut large = PoissonDistribution::seeded(80.0, 5).unwrap();
        assert!(large.table_len() > BINARY_SEARCH_THRESHOLD);
        for i in 1..100 {
            let u = i as f64 / 100.0;
            let via_table = large.quantile(u);
            let linear = (0..).find(|&k| u < large.cdf(k)).unwrap();
            assert_eq!(via_table, linear);
        }
    }

    #[test]
    fn test_sample_mean_approximates_lambda() {
        let lambda = 5.0;
        let mut poisson = PoissonDistribution::seeded(lambda, 42).unwrap();
        let n = 20_000;
        let total: usize = (0..n).map(|_| poisson.sample()).sum();
        let mean = total as f64 / n as f64;
        assert!(
            (mean - lambda).abs() < lambda * 0.05,
            "sample mean {} not within 5% of {}",
            mean,
            lambda
        );
    }

    #[test]
    fn test_same_seed_same_sequence() {
        let mut a = PoissonDistribution::seeded(9.0, 1234).unwrap();
        let mut b = PoissonDistribution::seeded(9.0, 1234).unwrap();
        for _ in 0..50 {
            assert_eq!(a.sample(), b.sample());
        }
    }
}
