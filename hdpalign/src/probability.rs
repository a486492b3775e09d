//! Pure probability computations over snapshots of the sampler's sufficient statistics.
//!
//! Nothing here reads the live hierarchy. The sampler takes the snapshots, calls these
//! functions and commits the outcome.
use std::f64::consts::PI;

use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use rand_distr::StandardNormal;
use tracing::warn;

use crate::params::HdpParams;

/// The sufficient statistics of one mass cluster
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct MassClusterStats {
    pub count: usize,
    pub log_mass_sum: f64,
}

impl MassClusterStats {
    pub fn new(count: usize, log_mass_sum: f64) -> Self {
        Self {
            count,
            log_mass_sum,
        }
    }
}

/// The top-level view of one live metabolite used when scoring a new RT cluster
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct MetaboliteSnapshot {
    /// The number of RT clusters assigned to this metabolite, `fi`
    pub rt_cluster_count: usize,
    /// The metabolite's RT mean, `ti`
    pub rt: f64,
    /// The marginal log-likelihood of the peak's log-mass under this metabolite's mass DP
    pub mass_log_likelihood: f64,
}

/// The log-density of `x` under a Normal distribution with mean `mu` and precision `prec`
#[inline]
pub fn log_normal_density(x: f64, mu: f64, prec: f64) -> f64 {
    let delta = x - mu;
    0.5 * prec.ln() - 0.5 * (2.0 * PI).ln() - 0.5 * prec * delta * delta
}

/// Numerically stable `ln(sum(exp(values)))`. Returns negative infinity for an empty
/// slice or when every value is negative infinity.
pub fn log_sum_exp(values: &[f64]) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY || max.is_nan() {
        return f64::NEG_INFINITY;
    }
    let total: f64 = values.iter().map(|v| (v - max).exp()).sum();
    max + total.ln()
}

/// Draw an index from unnormalised log-weights after subtracting their maximum.
///
/// Entries at negative infinity are never chosen. If no entry has positive weight,
/// the final entry is returned.
pub fn sample_log_categorical<R: Rng>(rng: &mut R, log_values: &[f64]) -> usize {
    assert!(!log_values.is_empty(), "Cannot sample from an empty distribution");
    let last = log_values.len() - 1;
    let max = log_values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        warn!("All {} options have zero probability, choosing the last", log_values.len());
        return last;
    }
    let weights: Vec<f64> = log_values.iter().map(|v| (v - max).exp()).collect();
    match WeightedIndex::new(&weights) {
        Ok(dist) => dist.sample(rng),
        Err(e) => {
            warn!("Failed to build a categorical distribution ({e}), choosing the last option");
            last
        }
    }
}

/// Draw from a Normal distribution with mean `mean` and precision `prec`
pub fn sample_normal<R: Rng>(rng: &mut R, mean: f64, prec: f64) -> f64 {
    let z: f64 = rng.sample(StandardNormal);
    mean + z / prec.sqrt()
}

/// The conjugate posterior `(mean, precision)` of a Normal mean given `n` observations
/// summing to `obs_sum`, each with precision `obs_prec`.
pub fn normal_posterior(
    prior_mean: f64,
    prior_prec: f64,
    obs_sum: f64,
    n: usize,
    obs_prec: f64,
) -> (f64, f64) {
    let prec = prior_prec + n as f64 * obs_prec;
    let mean = (prior_mean * prior_prec + obs_prec * obs_sum) / prec;
    (mean, prec)
}

/// The Dirichlet process mixture log-posterior of log-mass `x` over the existing mass
/// clusters of a metabolite plus one trailing new cluster slot.
///
/// `eligible` has one flag per cluster plus one for the new slot. Ineligible clusters
/// score negative infinity.
pub fn mass_dp_log_posterior(
    x: f64,
    clusters: &[MassClusterStats],
    eligible: &[bool],
    params: &HdpParams,
) -> Vec<f64> {
    debug_assert_eq!(clusters.len() + 1, eligible.len());
    let total: usize = clusters.iter().map(|c| c.count).sum();
    let log_denom = (total as f64 + params.alpha_mass).ln();

    let mut out = Vec::with_capacity(clusters.len() + 1);
    for c in clusters {
        let beta = params.rho_0_prec + params.rho_prec * c.count as f64;
        let mean = (params.rho_0_prec * params.psi_0 + params.rho_prec * c.log_mass_sum) / beta;
        let prec = 1.0 / (1.0 / beta + 1.0 / params.rho_prec);
        let log_prior = (c.count as f64).ln() - log_denom;
        out.push(log_prior + log_normal_density(x, mean, prec));
    }
    out.push(params.alpha_mass.ln() - log_denom + new_mass_cluster_log_likelihood(x, params));

    for (v, ok) in out.iter_mut().zip(eligible.iter()) {
        if !ok {
            *v = f64::NEG_INFINITY;
        }
    }
    out
}

/// The predictive log-likelihood of log-mass `x` under a brand new mass cluster
#[inline]
pub fn new_mass_cluster_log_likelihood(x: f64, params: &HdpParams) -> f64 {
    let prec = 1.0 / (1.0 / params.rho_0_prec + 1.0 / params.rho_prec);
    log_normal_density(x, params.psi_0, prec)
}

/// The predictive log-likelihood of `rt` for a new RT cluster under an existing metabolite
#[inline]
pub fn metabolite_rt_log_likelihood(rt: f64, metabolite_rt: f64, params: &HdpParams) -> f64 {
    let prec = 1.0 / (1.0 / params.gamma_prec + 1.0 / params.delta_prec);
    log_normal_density(rt, metabolite_rt, prec)
}

/// The predictive log-likelihood of `rt` for a new RT cluster under a new metabolite
#[inline]
pub fn new_metabolite_rt_log_likelihood(rt: f64, params: &HdpParams) -> f64 {
    let prec =
        1.0 / (1.0 / params.gamma_prec + 1.0 / params.delta_prec + 1.0 / params.sigma_0_prec);
    log_normal_density(rt, params.mu_0, prec)
}

/// Score placing a new RT cluster holding a peak with `rt` and log-mass `x` under each
/// live metabolite, plus one trailing slot for a new metabolite.
///
/// The log-sum-exp of the result is the new RT cluster's marginal log-likelihood.
pub fn new_rt_cluster_log_posterior(
    rt: f64,
    x: f64,
    metabolites: &[MetaboliteSnapshot],
    params: &HdpParams,
) -> Vec<f64> {
    let total: usize = metabolites.iter().map(|m| m.rt_cluster_count).sum();
    let log_denom = (total as f64 + params.top_alpha).ln();
    let mut out: Vec<f64> = metabolites
        .iter()
        .map(|m| {
            (m.rt_cluster_count as f64).ln() - log_denom
                + metabolite_rt_log_likelihood(rt, m.rt, params)
                + m.mass_log_likelihood
        })
        .collect();
    out.push(
        params.top_alpha.ln() - log_denom
            + new_metabolite_rt_log_likelihood(rt, params)
            + new_mass_cluster_log_likelihood(x, params),
    );
    out
}

/// The log-posterior over a file's existing RT clusters plus one trailing new cluster slot.
///
/// `existing` pairs each cluster's peak count with its log-likelihood for the peak.
pub fn rt_cluster_log_posterior(
    existing: &[(usize, f64)],
    new_log_likelihood: f64,
    alpha_rt: f64,
) -> Vec<f64> {
    let total: usize = existing.iter().map(|(n, _)| *n).sum();
    let log_denom = (total as f64 + alpha_rt).ln();
    existing
        .iter()
        .map(|(n, ll)| (*n as f64).ln() - log_denom + ll)
        .chain(std::iter::once(alpha_rt.ln() - log_denom + new_log_likelihood))
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::params::{HdpParams, HdpSettings};
    use crate::peaks::{FileId, InputFile, Peak};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn params() -> HdpParams {
        let files = vec![InputFile::new(
            FileId(0),
            vec![Peak::new(200.0, 100.0, 1.0), Peak::new(200.0, 100.0, 1.0)],
        )];
        HdpParams::from_settings(&files, &HdpSettings::default()).unwrap()
    }

    #[test]
    fn test_log_normal_density() {
        let v = log_normal_density(0.0, 0.0, 1.0);
        assert!((v - (-0.9189385332046727)).abs() < 1e-12);
        let v = log_normal_density(2.0, 1.0, 4.0);
        assert!((v - (0.5 * 4.0f64.ln() - 0.9189385332046727 - 2.0)).abs() < 1e-12);
    }

    #[test]
    fn test_log_sum_exp() {
        let v = log_sum_exp(&[0.0f64.ln(), 1.0f64.ln(), 3.0f64.ln()]);
        assert!((v - 4.0f64.ln()).abs() < 1e-12);
        assert_eq!(log_sum_exp(&[]), f64::NEG_INFINITY);
        assert_eq!(
            log_sum_exp(&[f64::NEG_INFINITY, f64::NEG_INFINITY]),
            f64::NEG_INFINITY
        );
        let v = log_sum_exp(&[-1000.0, -1000.0]);
        assert!((v - (-1000.0 + 2.0f64.ln())).abs() < 1e-9);
    }

    #[test]
    fn test_categorical_skips_vetoed() {
        let mut rng = StdRng::seed_from_u64(7);
        let values = [f64::NEG_INFINITY, -2000.0, f64::NEG_INFINITY];
        for _ in 0..100 {
            assert_eq!(sample_log_categorical(&mut rng, &values), 1);
        }
    }

    #[test]
    fn test_categorical_all_impossible() {
        let mut rng = StdRng::seed_from_u64(7);
        let values = [f64::NEG_INFINITY; 3];
        assert_eq!(sample_log_categorical(&mut rng, &values), 2);
    }

    #[test]
    fn test_normal_posterior() {
        let (mean, prec) = normal_posterior(0.0, 1.0, 10.0, 5, 1.0);
        assert!((prec - 6.0).abs() < 1e-12);
        assert!((mean - 10.0 / 6.0).abs() < 1e-12);
    }

    #[test]
    fn test_sample_normal_moments() {
        let mut rng = StdRng::seed_from_u64(11);
        let n = 5000;
        let draws: Vec<f64> = (0..n).map(|_| sample_normal(&mut rng, 5.0, 4.0)).collect();
        let mean = draws.iter().sum::<f64>() / n as f64;
        let var = draws.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / n as f64;
        assert!((mean - 5.0).abs() < 0.05, "{mean}");
        assert!((var - 0.25).abs() < 0.05, "{var}");
    }

    #[test]
    fn test_mass_dp_veto_and_preference() {
        let params = params();
        let x = 200.0f64.ln();
        let clusters = [
            MassClusterStats::new(3, 3.0 * x),
            MassClusterStats::new(2, 2.0 * 400.0f64.ln()),
        ];
        let post = mass_dp_log_posterior(x, &clusters, &[true, true, true], &params);
        assert_eq!(post.len(), 3);
        assert!(post[0] > post[1]);
        assert!(post[0] > post[2]);

        let post = mass_dp_log_posterior(x, &clusters, &[false, true, true], &params);
        assert_eq!(post[0], f64::NEG_INFINITY);
        assert!(post[2].is_finite());
    }

    #[test]
    fn test_empty_metabolite_mass_term() {
        let params = params();
        let x = 250.0f64.ln();
        let post = mass_dp_log_posterior(x, &[], &[true], &params);
        assert!((post[0] - new_mass_cluster_log_likelihood(x, &params)).abs() < 1e-12);
    }

    #[test]
    fn test_rt_cluster_posterior() {
        let post = rt_cluster_log_posterior(&[(3, 0.0), (1, 0.0)], 0.0, 4.0);
        let probs: Vec<f64> = post.iter().map(|v| v.exp()).collect();
        assert!((probs.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!((probs[0] - 3.0 / 8.0).abs() < 1e-12);
        assert!((probs[2] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_new_rt_cluster_prefers_close_metabolite() {
        let params = params();
        let x = 200.0f64.ln();
        let metabolites = [
            MetaboliteSnapshot {
                rt_cluster_count: 2,
                rt: 100.0,
                mass_log_likelihood: 5.0,
            },
            MetaboliteSnapshot {
                rt_cluster_count: 2,
                rt: 400.0,
                mass_log_likelihood: 5.0,
            },
        ];
        let post = new_rt_cluster_log_posterior(100.0, x, &metabolites, &params);
        assert_eq!(post.len(), 3);
        assert!(post[0] > post[1]);
    }
}
