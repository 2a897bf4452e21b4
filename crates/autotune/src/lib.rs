//! Autotuning of einsum kernel transformations.
//!
//! A transform space is a [`ParametrizedTransform`] loaded from a module
//! path. [`autotune`] searches its parameters for one [`EinsumProblem`],
//! measuring each candidate once per device and remembering the result in a
//! [`ResultCache`] so later runs start from what is already known.
//!
//! [`EinsumProblem`]: einforge_einsum::EinsumProblem

pub mod cache;
pub mod error;
pub mod loader;
pub mod options;
pub mod params;
pub mod search;
pub mod transform;
pub mod tuner;

pub use cache::{BestEntry, CacheRecord, DeviceInfo, Lookup, ResultCache};
pub use error::{KernelError, Result, TuneError};
pub use loader::{
    transform_space_id, DynamicLibraryLoader, TransformExport, TransformFactory, TransformRegistry,
    TransformSpaceLoader, TRANSFORM_SYMBOL,
};
pub use options::TuneOptions;
pub use params::{
    decode_configuration, encode_configuration, BoolParameter, Configuration, IntParameter,
    ParamValue, ParameterSpace, TuningParameter,
};
pub use search::{RandomSearch, SearchBackend, INFEASIBLE_COST};
pub use transform::{BoundTransform, EinsumArg, ParametrizedTransform, TransformArgs, TransformParam};
pub use tuner::{autotune, Autotuner, Measurement, TrialOutcome, TuneReport};
