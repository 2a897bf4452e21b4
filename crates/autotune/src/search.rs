//! Search backends that propose configurations and learn from their costs.

use crate::params::{Configuration, ParamValue, ParameterSpace, TuningParameter};
use std::collections::{HashSet, VecDeque};
use tracing::debug;

/// Cost reported for configurations that must never be picked. Backends
/// treat it as "reject" and keep searching.
pub const INFEASIBLE_COST: f64 = f64::INFINITY;

pub const DEFAULT_BAIL_THRESHOLD: usize = 100;

/// A black-box optimizer over a [`ParameterSpace`]. Costs are non-negative
/// and lower is better.
pub trait SearchBackend {
    fn name(&self) -> &str;

    /// Called once before the first proposal. `seeds` are configurations
    /// already measured in earlier runs.
    fn initialize(&mut self, space: &ParameterSpace, seeds: &[Configuration]);

    /// Next candidate, or `None` once the backend's budget is exhausted.
    fn propose(&mut self) -> Option<Configuration>;

    fn report(&mut self, config: &Configuration, cost: f64);
}

/// Uniform random sampling without repetition.
///
/// Seeds that fit the space are replayed first, in order.
#[derive(Debug)]
pub struct RandomSearch {
    rng: fastrand::Rng,
    space: ParameterSpace,
    seeds: VecDeque<Configuration>,
    seen: HashSet<Configuration>,
    bail_threshold: usize,
    max_trials: Option<usize>,
    proposed: usize,
    best: Option<(Configuration, f64)>,
}

impl RandomSearch {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: fastrand::Rng::with_seed(seed),
            space: ParameterSpace::new(),
            seeds: VecDeque::new(),
            seen: HashSet::new(),
            bail_threshold: DEFAULT_BAIL_THRESHOLD,
            max_trials: None,
            proposed: 0,
            best: None,
        }
    }

    /// Consecutive duplicate draws tolerated before giving up.
    pub fn with_bail_threshold(mut self, bail_threshold: usize) -> Self {
        self.bail_threshold = bail_threshold.max(1);
        self
    }

    pub fn with_max_trials(mut self, max_trials: usize) -> Self {
        self.max_trials = Some(max_trials);
        self
    }

    pub fn proposed(&self) -> usize {
        self.proposed
    }

    /// Lowest finite cost reported so far.
    pub fn best(&self) -> Option<(&Configuration, f64)> {
        self.best.as_ref().map(|(config, cost)| (config, *cost))
    }

    fn exhausted(&self) -> bool {
        self.seen.len() as u128 >= self.space.size()
    }

    fn sample(&mut self) -> Configuration {
        self.space
            .iter()
            .map(|(name, param)| {
                let value = match param {
                    TuningParameter::Int(range) => {
                        ParamValue::Int(self.rng.i64(range.low()..=range.high()))
                    }
                    TuningParameter::Bool(_) => ParamValue::Bool(self.rng.bool()),
                };
                (name.to_string(), value)
            })
            .collect()
    }

    fn accept(&mut self, config: Configuration) -> Configuration {
        self.seen.insert(config.clone());
        self.proposed += 1;
        config
    }
}

impl SearchBackend for RandomSearch {
    fn name(&self) -> &str {
        "random"
    }

    fn initialize(&mut self, space: &ParameterSpace, seeds: &[Configuration]) {
        self.space = space.clone();
        self.seen.clear();
        self.proposed = 0;
        self.best = None;
        self.seeds = seeds
            .iter()
            .filter(|seed| space.contains(seed))
            .cloned()
            .collect();
        debug!(
            space_size = %space.size(),
            seeds = self.seeds.len(),
            "random search initialized"
        );
    }

    fn propose(&mut self) -> Option<Configuration> {
        if self.max_trials.is_some_and(|max| self.proposed >= max) {
            return None;
        }

        while let Some(seed) = self.seeds.pop_front() {
            if !self.seen.contains(&seed) {
                return Some(self.accept(seed));
            }
        }

        let mut duplicates = 0;
        while !self.exhausted() {
            let candidate = self.sample();
            if !self.seen.contains(&candidate) {
                return Some(self.accept(candidate));
            }
            duplicates += 1;
            if duplicates >= self.bail_threshold {
                debug!(duplicates, "random search bailing out");
                return None;
            }
        }
        None
    }

    fn report(&mut self, config: &Configuration, cost: f64) {
        if !cost.is_finite() {
            return;
        }
        if self.best.as_ref().map_or(true, |(_, best)| cost < *best) {
            self.best = Some((config.clone(), cost));
        }
    }
}
