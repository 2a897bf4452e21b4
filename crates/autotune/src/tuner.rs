//! Search driver: walks candidate configurations through cache check,
//! feasibility filter, binding and measurement.

use anyhow::anyhow;
use crate::cache::{DeviceInfo, Lookup, ResultCache};
use crate::error::{KernelError, Result, TuneError};
use crate::loader::{transform_space_id, TransformSpaceLoader};
use crate::options::TuneOptions;
use crate::params::{Configuration, ParameterSpace};
use crate::search::{SearchBackend, INFEASIBLE_COST};
use crate::transform::{BoundTransform, ParametrizedTransform};
use einforge_einsum::{EinsumProblem, Fingerprint};
use serde::Serialize;
use std::hash::Hash;
use std::path::Path;
use tracing::{debug, info, warn};

/// Compiles and times a bound transform on a device.
pub trait Measurement<K> {
    fn device(&self) -> &DeviceInfo;

    /// Runtime in seconds. [`KernelError::InvalidParameter`] marks the
    /// configuration infeasible; any other error aborts the search.
    fn measure(
        &self,
        problem: &EinsumProblem,
        bound: &BoundTransform<K>,
        long_dim_length: u64,
    ) -> Result<f64, KernelError>;
}

/// How a single candidate was scored.
#[derive(Debug, Clone, PartialEq)]
pub enum TrialOutcome {
    Cached(f64),
    Infeasible(String),
    Measured(f64),
}

impl TrialOutcome {
    /// Cost reported to the search backend.
    pub fn cost(&self) -> f64 {
        match self {
            TrialOutcome::Cached(runtime) | TrialOutcome::Measured(runtime) => *runtime,
            TrialOutcome::Infeasible(_) => INFEASIBLE_COST,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TuneReport {
    pub trials: usize,
    pub cache_hits: usize,
    pub measured: usize,
    pub infeasible: usize,
    pub best: Option<(Configuration, f64)>,
}

impl TuneReport {
    fn record(&mut self, config: &Configuration, outcome: &TrialOutcome) {
        self.trials += 1;
        match outcome {
            TrialOutcome::Cached(_) => self.cache_hits += 1,
            TrialOutcome::Measured(_) => self.measured += 1,
            TrialOutcome::Infeasible(_) => self.infeasible += 1,
        }

        let cost = outcome.cost();
        if cost.is_finite() && self.best.as_ref().map_or(true, |(_, best)| cost < *best) {
            self.best = Some((config.clone(), cost));
        }
    }
}

pub struct Autotuner<'a, K> {
    problem: &'a EinsumProblem,
    transform: &'a ParametrizedTransform<K>,
    transform_id: String,
    cache: &'a ResultCache,
    measurement: &'a dyn Measurement<K>,
    long_dim_length: u64,
    fingerprint: Fingerprint,
    space: ParameterSpace,
}

impl<'a, K> Autotuner<'a, K>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
{
    pub fn new(
        problem: &'a EinsumProblem,
        transform: &'a ParametrizedTransform<K>,
        transform_id: impl Into<String>,
        cache: &'a ResultCache,
        measurement: &'a dyn Measurement<K>,
        long_dim_length: u64,
    ) -> Result<Self> {
        problem.validate().map_err(TuneError::Validation)?;
        let fingerprint = problem.fingerprint(long_dim_length)?;
        let space = transform.parameter_space(problem)?;
        Ok(Self {
            problem,
            transform,
            transform_id: transform_id.into(),
            cache,
            measurement,
            long_dim_length,
            fingerprint,
            space,
        })
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn space(&self) -> &ParameterSpace {
        &self.space
    }

    pub fn transform_id(&self) -> &str {
        &self.transform_id
    }

    /// Score one candidate. Only non-parameter measurement failures and
    /// cache errors are returned as `Err`.
    pub fn evaluate(&self, config: &Configuration) -> Result<TrialOutcome> {
        if let Lookup::Hit(runtime) = self.cache.lookup(&self.fingerprint, &self.transform_id, config)? {
            info!(?config, runtime, "cache hit");
            return Ok(TrialOutcome::Cached(runtime));
        }

        if !self.space.contains(config) {
            let reason = "configuration is outside the declared parameter space".to_string();
            warn!(?config, %reason, "skipping configuration");
            return Ok(TrialOutcome::Infeasible(reason));
        }

        if let Err(reason) = self.transform.check_feasible(self.problem, config) {
            info!(?config, %reason, "infeasible configuration");
            return Ok(TrialOutcome::Infeasible(reason));
        }

        let bound = self.transform.bind_args(self.problem, config);
        let runtime = match self
            .measurement
            .measure(self.problem, &bound, self.long_dim_length)
        {
            Ok(runtime) => runtime,
            Err(KernelError::InvalidParameter(reason)) => {
                info!(?config, %reason, "invalid parameter for this problem");
                return Ok(TrialOutcome::Infeasible(reason));
            }
            Err(KernelError::Failed(err)) => return Err(TuneError::Measurement(err)),
        };

        if !runtime.is_finite() || runtime < 0.0 {
            return Err(TuneError::Measurement(anyhow!(
                "measurement of {config:?} returned invalid runtime {runtime}"
            )));
        }

        self.cache
            .insert(&self.fingerprint, &self.transform_id, config, runtime)?;
        info!(?config, runtime, "measured configuration");
        Ok(TrialOutcome::Measured(runtime))
    }

    /// Seed `backend` from the cache and search until it is exhausted or
    /// `stop_after` trials have run.
    pub fn run(
        &self,
        backend: &mut dyn SearchBackend,
        stop_after: Option<usize>,
    ) -> Result<TuneReport> {
        let seeds = self
            .cache
            .seed_configurations(&self.transform_id, &self.fingerprint)?;
        info!(
            backend = backend.name(),
            transform_id = %self.transform_id,
            seeds = seeds.len(),
            space_size = %self.space.size(),
            "starting search"
        );
        backend.initialize(&self.space, &seeds);

        let mut report = TuneReport::default();
        loop {
            if stop_after.is_some_and(|limit| report.trials >= limit) {
                debug!(trials = report.trials, "trial cap reached");
                break;
            }
            let Some(config) = backend.propose() else {
                debug!(trials = report.trials, "search backend exhausted");
                break;
            };

            let outcome = self.evaluate(&config)?;
            backend.report(&config, outcome.cost());
            report.record(&config, &outcome);
        }

        info!(
            trials = report.trials,
            cache_hits = report.cache_hits,
            measured = report.measured,
            infeasible = report.infeasible,
            "search finished"
        );
        Ok(report)
    }
}

/// Tune the transform space at `module_path` for `problem`, recording every
/// measurement in the cache at `options.db_path`.
pub fn autotune<K>(
    problem: &EinsumProblem,
    module_path: &Path,
    loader: &dyn TransformSpaceLoader<K>,
    measurement: &dyn Measurement<K>,
    backend: &mut dyn SearchBackend,
    options: &TuneOptions,
) -> Result<TuneReport>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
{
    if !module_path.is_absolute() {
        return Err(TuneError::Validation(format!(
            "autotune expects an absolute path for the module, got {}",
            module_path.display()
        )));
    }

    let transform = loader.load(module_path)?;
    let transform_id = transform_space_id(module_path, options.impls_dir.as_deref());
    let cache = ResultCache::open(&options.db_path, measurement.device().clone())?;

    let outcome = Autotuner::new(
        problem,
        &transform,
        transform_id,
        &cache,
        measurement,
        options.long_dim_length,
    )
    .and_then(|tuner| tuner.run(backend, options.stop_after));

    match (outcome, cache.close()) {
        (Ok(report), Ok(())) => Ok(report),
        (Err(err), Ok(())) => Err(err),
        (Ok(_), Err(err)) => Err(err),
        (Err(err), Err(close_err)) => {
            warn!(error = %close_err, "failed to close result cache");
            Err(err)
        }
    }
}
