//! Parametrized transforms - kernel transformation templates together with
//! the arguments the autotuner has to supply to them.
//!
//! A template is a function `(kernel, args) -> kernel`. Its arguments come
//! from two kinds of bindings:
//!
//! - [`EinsumArg`]: a value derived once from the problem instance (index
//!   names, fixed extents, ...).
//! - [`TransformParam`]: a tunable knob whose admissible range may depend on
//!   the problem instance.
//!
//! Bindings are attached builder-style; attaching never touches the wrapped
//! callable, so every copy of a transform shares one memo table.

use crate::error::{KernelError, Result};
use crate::params::{Configuration, ParamValue, ParameterSpace, TuningParameter};
use einforge_einsum::{to_canonical_string, EinsumProblem};
use serde::Serialize;
use serde_json::Value;
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};

pub type TransformFn<K> = Arc<dyn Fn(&K, &TransformArgs) -> Result<K, KernelError> + Send + Sync>;
pub type EinsumArgFn = Arc<dyn Fn(&EinsumProblem) -> Value + Send + Sync>;
pub type TransformParamFn = Arc<dyn Fn(&EinsumProblem) -> Result<TuningParameter> + Send + Sync>;
pub type FeasibilityFn = Arc<dyn Fn(&EinsumProblem, &Configuration) -> Result<(), String> + Send + Sync>;

/// Keyword arguments handed to a transformation template.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TransformArgs(BTreeMap<String, Value>);

impl TransformArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn int(&self, name: &str) -> Result<i64, KernelError> {
        self.require(name)?
            .as_i64()
            .ok_or_else(|| KernelError::invalid(format!("argument '{name}' is not an integer")))
    }

    pub fn boolean(&self, name: &str) -> Result<bool, KernelError> {
        self.require(name)?
            .as_bool()
            .ok_or_else(|| KernelError::invalid(format!("argument '{name}' is not a boolean")))
    }

    pub fn str(&self, name: &str) -> Result<&str, KernelError> {
        self.require(name)?
            .as_str()
            .ok_or_else(|| KernelError::invalid(format!("argument '{name}' is not a string")))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn require(&self, name: &str) -> Result<&Value, KernelError> {
        self.0
            .get(name)
            .ok_or_else(|| KernelError::invalid(format!("missing argument '{name}'")))
    }

    fn cache_key(&self) -> String {
        to_canonical_string(&self.0).unwrap_or_else(|_| format!("{:?}", self.0))
    }
}

/// The raw template behind a memo table keyed on (kernel, arguments).
///
/// Applying a transform is code-generation work, so identical calls are
/// answered from the table. Failures are not remembered.
struct MemoizedTransform<K> {
    func: TransformFn<K>,
    memo: Mutex<HashMap<(K, String), K>>,
}

impl<K> MemoizedTransform<K>
where
    K: Clone + Eq + Hash,
{
    fn new(func: TransformFn<K>) -> Self {
        Self {
            func,
            memo: Mutex::new(HashMap::new()),
        }
    }

    fn call(&self, kernel: &K, args: &TransformArgs) -> Result<K, KernelError> {
        let key = (kernel.clone(), args.cache_key());
        if let Some(hit) = self
            .memo
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return Ok(hit.clone());
        }

        // The lock is not held while the template runs.
        let transformed = (self.func)(kernel, args)?;
        self.memo
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, transformed.clone());
        Ok(transformed)
    }
}

/// Binds a template argument to a value derived from the problem.
#[derive(Clone)]
pub struct EinsumArg {
    name: String,
    func: EinsumArgFn,
    values: Arc<Mutex<HashMap<String, Value>>>,
}

impl EinsumArg {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&EinsumProblem) -> Value + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
            values: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Value of the argument for `problem`, computed at most once per
    /// distinct problem.
    pub fn evaluate(&self, problem: &EinsumProblem) -> Value {
        let key = problem.cache_key();
        if let Some(hit) = self
            .values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return hit.clone();
        }

        // Run the user function unlocked; first writer wins on a race.
        let value = (self.func)(problem);
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key)
            .or_insert(value)
            .clone()
    }
}

impl fmt::Debug for EinsumArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EinsumArg").field("name", &self.name).finish()
    }
}

/// Declares a tunable template argument and its problem-dependent range.
#[derive(Clone)]
pub struct TransformParam {
    name: String,
    func: TransformParamFn,
}

impl TransformParam {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&EinsumProblem) -> Result<TuningParameter> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn evaluate(&self, problem: &EinsumProblem) -> Result<TuningParameter> {
        (self.func)(problem)
    }
}

impl fmt::Debug for TransformParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformParam").field("name", &self.name).finish()
    }
}

/// A transformation template plus its declared argument bindings.
pub struct ParametrizedTransform<K> {
    transform: Arc<MemoizedTransform<K>>,
    einsum_args: Vec<EinsumArg>,
    transform_params: Vec<TransformParam>,
    feasibility: Option<FeasibilityFn>,
    // Declared last so the closures above are dropped before the code
    // backing them is unmapped.
    guard: Option<Arc<dyn Any + Send + Sync>>,
}

impl<K> Clone for ParametrizedTransform<K> {
    fn clone(&self) -> Self {
        Self {
            transform: Arc::clone(&self.transform),
            einsum_args: self.einsum_args.clone(),
            transform_params: self.transform_params.clone(),
            feasibility: self.feasibility.clone(),
            guard: self.guard.clone(),
        }
    }
}

impl<K> fmt::Debug for ParametrizedTransform<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParametrizedTransform")
            .field("einsum_args", &self.einsum_args)
            .field("transform_params", &self.transform_params)
            .field("has_feasibility", &self.feasibility.is_some())
            .finish()
    }
}

impl<K> ParametrizedTransform<K>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
{
    /// Wrap a raw template with no bindings.
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(&K, &TransformArgs) -> Result<K, KernelError> + Send + Sync + 'static,
    {
        Self::from_fn(Arc::new(func))
    }

    pub fn from_fn(func: TransformFn<K>) -> Self {
        Self {
            transform: Arc::new(MemoizedTransform::new(func)),
            einsum_args: Vec::new(),
            transform_params: Vec::new(),
            feasibility: None,
            guard: None,
        }
    }

    /// Attach a problem-derived argument ahead of the existing ones.
    pub fn with_einsum_arg<F>(mut self, name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&EinsumProblem) -> Value + Send + Sync + 'static,
    {
        self.einsum_args.insert(0, EinsumArg::new(name, func));
        self
    }

    /// Attach a tunable parameter ahead of the existing ones.
    pub fn with_transform_param<F>(mut self, name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&EinsumProblem) -> Result<TuningParameter> + Send + Sync + 'static,
    {
        self.transform_params.insert(0, TransformParam::new(name, func));
        self
    }

    /// Cheap check run before any measurement, e.g. a work-group size or
    /// shared-memory budget. `Err` carries the reason for the log.
    pub fn with_feasibility<F>(mut self, func: F) -> Self
    where
        F: Fn(&EinsumProblem, &Configuration) -> Result<(), String> + Send + Sync + 'static,
    {
        self.feasibility = Some(Arc::new(func));
        self
    }

    pub(crate) fn with_guard(mut self, guard: Arc<dyn Any + Send + Sync>) -> Self {
        self.guard = Some(guard);
        self
    }

    pub fn einsum_args(&self) -> &[EinsumArg] {
        &self.einsum_args
    }

    pub fn transform_params(&self) -> &[TransformParam] {
        &self.transform_params
    }

    /// Evaluate every tunable-parameter binding on `problem`.
    pub fn parameter_space(&self, problem: &EinsumProblem) -> Result<ParameterSpace> {
        let mut space = ParameterSpace::new();
        for param in &self.transform_params {
            space.push(param.name(), param.evaluate(problem)?);
        }
        Ok(space)
    }

    pub fn check_feasible(&self, problem: &EinsumProblem, config: &Configuration) -> Result<(), String> {
        match &self.feasibility {
            Some(check) => check(problem, config),
            None => Ok(()),
        }
    }

    /// Apply the template directly with fully spelled-out arguments.
    pub fn call(&self, kernel: &K, args: &TransformArgs) -> Result<K, KernelError> {
        self.transform.call(kernel, args)
    }

    /// Fix every argument of the template for `problem` and `config`.
    ///
    /// Tunable values win over derived ones on a name clash.
    pub fn bind_args(&self, problem: &EinsumProblem, config: &Configuration) -> BoundTransform<K> {
        let mut args = TransformArgs::new();
        for arg in &self.einsum_args {
            args.insert(arg.name(), arg.evaluate(problem));
        }
        for (name, value) in config {
            let value = match value {
                ParamValue::Int(v) => Value::from(*v),
                ParamValue::Bool(v) => Value::from(*v),
            };
            args.insert(name.clone(), value);
        }

        BoundTransform {
            transform: Arc::clone(&self.transform),
            args,
            guard: self.guard.clone(),
        }
    }
}

/// A template with all of its arguments fixed.
pub struct BoundTransform<K> {
    transform: Arc<MemoizedTransform<K>>,
    args: TransformArgs,
    guard: Option<Arc<dyn Any + Send + Sync>>,
}

impl<K> Clone for BoundTransform<K> {
    fn clone(&self) -> Self {
        Self {
            transform: Arc::clone(&self.transform),
            args: self.args.clone(),
            guard: self.guard.clone(),
        }
    }
}

impl<K> fmt::Debug for BoundTransform<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundTransform").field("args", &self.args).finish()
    }
}

impl<K> BoundTransform<K>
where
    K: Clone + Eq + Hash,
{
    pub fn apply(&self, kernel: &K) -> Result<K, KernelError> {
        self.transform.call(kernel, &self.args)
    }

    pub fn args(&self) -> &TransformArgs {
        &self.args
    }
}
