//! Tuning parameters - the knobs a transform space exposes to the search.
//!
//! A transform space declares, per knob, either an inclusive integer range
//! or a boolean. A [`Configuration`] assigns one [`ParamValue`] to every
//! declared knob and is what gets proposed, measured and cached.

use crate::error::{Result, TuneError};
use einforge_einsum::{to_canonical_string, ShapeComponent};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A knob taking integer values in `[low, high]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IntParameter {
    low: i64,
    high: i64,
}

impl IntParameter {
    /// Both bounds must be finite integers with `low <= high`.
    ///
    /// Bounds are shape components so ranges can be read straight off a
    /// problem's extents; an unbounded extent is rejected.
    pub fn new(low: impl Into<ShapeComponent>, high: impl Into<ShapeComponent>) -> Result<Self> {
        let low = low
            .into()
            .as_fixed()
            .ok_or_else(|| TuneError::Validation("low must be an integer".into()))?;
        let high = high
            .into()
            .as_fixed()
            .ok_or_else(|| TuneError::Validation("high must be an integer".into()))?;
        if low > high {
            return Err(TuneError::Validation(format!(
                "low ({low}) must not exceed high ({high})"
            )));
        }
        Ok(Self { low, high })
    }

    pub fn low(&self) -> i64 {
        self.low
    }

    pub fn high(&self) -> i64 {
        self.high
    }

    pub fn contains(&self, value: i64) -> bool {
        (self.low..=self.high).contains(&value)
    }

    /// Number of admissible values.
    pub fn cardinality(&self) -> u128 {
        (self.high as i128 - self.low as i128 + 1) as u128
    }
}

/// A knob that is either on or off.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoolParameter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TuningParameter {
    Int(IntParameter),
    Bool(BoolParameter),
}

impl TuningParameter {
    pub fn contains(&self, value: &ParamValue) -> bool {
        match (self, value) {
            (TuningParameter::Int(range), ParamValue::Int(v)) => range.contains(*v),
            (TuningParameter::Bool(_), ParamValue::Bool(_)) => true,
            _ => false,
        }
    }

    pub fn cardinality(&self) -> u128 {
        match self {
            TuningParameter::Int(range) => range.cardinality(),
            TuningParameter::Bool(_) => 2,
        }
    }
}

impl From<IntParameter> for TuningParameter {
    fn from(value: IntParameter) -> Self {
        TuningParameter::Int(value)
    }
}

impl From<BoolParameter> for TuningParameter {
    fn from(value: BoolParameter) -> Self {
        TuningParameter::Bool(value)
    }
}

/// Value assigned to one knob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
}

impl ParamValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::Int(v) => Some(*v),
            ParamValue::Bool(_) => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(v) => Some(*v),
            ParamValue::Int(_) => None,
        }
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Int(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Bool(value)
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(v) => write!(f, "{v}"),
            ParamValue::Int(v) => write!(f, "{v}"),
        }
    }
}

/// One candidate: a value for every tunable parameter, ordered by name.
pub type Configuration = BTreeMap<String, ParamValue>;

/// Canonical text form of a configuration, as stored in the cache.
pub fn encode_configuration(config: &Configuration) -> serde_json::Result<String> {
    to_canonical_string(config)
}

pub fn decode_configuration(text: &str) -> serde_json::Result<Configuration> {
    serde_json::from_str(text)
}

/// The declared knobs of a transform space for one problem, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpace {
    params: Vec<(String, TuningParameter)>,
}

impl ParameterSpace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, param: impl Into<TuningParameter>) -> Self {
        self.push(name, param);
        self
    }

    pub fn push(&mut self, name: impl Into<String>, param: impl Into<TuningParameter>) {
        self.params.push((name.into(), param.into()));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TuningParameter)> {
        self.params.iter().map(|(name, param)| (name.as_str(), param))
    }

    pub fn get(&self, name: &str) -> Option<&TuningParameter> {
        self.params
            .iter()
            .find(|(candidate, _)| candidate == name)
            .map(|(_, param)| param)
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Total number of distinct configurations, saturating.
    pub fn size(&self) -> u128 {
        self.params
            .iter()
            .fold(1u128, |acc, (_, param)| acc.saturating_mul(param.cardinality()))
    }

    /// True when `config` assigns an in-range value to exactly the declared knobs.
    pub fn contains(&self, config: &Configuration) -> bool {
        config.len() == self.params.len()
            && self.params.iter().all(|(name, param)| {
                config
                    .get(name)
                    .map(|value| param.contains(value))
                    .unwrap_or(false)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_parameter_exposes_bounds() {
        for (low, high) in [(1, 1), (-4, 7), (0, 1_000_000)] {
            let param = IntParameter::new(low, high).unwrap();
            assert_eq!((param.low(), param.high()), (low, high));
        }
    }

    #[test]
    fn int_parameter_rejects_unbounded() {
        let err = IntParameter::new(ShapeComponent::Unbounded, 4).unwrap_err();
        assert!(matches!(&err, TuneError::Validation(msg) if msg.contains("low")));

        let err = IntParameter::new(1, ShapeComponent::Unbounded).unwrap_err();
        assert!(matches!(&err, TuneError::Validation(msg) if msg.contains("high")));
    }

    #[test]
    fn int_parameter_rejects_inverted_range() {
        assert!(matches!(
            IntParameter::new(5, 2),
            Err(TuneError::Validation(_))
        ));
    }

    #[test]
    fn configuration_encoding_is_order_independent() {
        let mut first = Configuration::new();
        first.insert("b".into(), ParamValue::Bool(true));
        first.insert("a".into(), ParamValue::Int(1));

        let mut second = Configuration::new();
        second.insert("a".into(), ParamValue::Int(1));
        second.insert("b".into(), ParamValue::Bool(true));

        let encoded = encode_configuration(&first).unwrap();
        assert_eq!(encoded, r#"{"a": 1, "b": true}"#);
        assert_eq!(encoded, encode_configuration(&second).unwrap());
        assert_eq!(decode_configuration(&encoded).unwrap(), first);
    }

    #[test]
    fn space_membership() {
        let space = ParameterSpace::new()
            .with("tile", IntParameter::new(1, 8).unwrap())
            .with("prefetch", BoolParameter);
        assert_eq!(space.size(), 16);

        let mut config = Configuration::new();
        config.insert("tile".into(), ParamValue::Int(4));
        config.insert("prefetch".into(), ParamValue::Bool(false));
        assert!(space.contains(&config));

        config.insert("tile".into(), ParamValue::Int(9));
        assert!(!space.contains(&config));

        config.insert("tile".into(), ParamValue::Bool(true));
        assert!(!space.contains(&config));
    }
}
