//! Problem instances and their cache fingerprints.

use crate::canonical::to_canonical_string;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Extent of one einsum index.
///
/// `Unbounded` marks the "long" axis (typically the element count of a mesh)
/// whose length is only fixed when the kernel is measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShapeComponent {
    Fixed(i64),
    Unbounded,
}

impl ShapeComponent {
    pub fn as_fixed(&self) -> Option<i64> {
        match self {
            ShapeComponent::Fixed(len) => Some(*len),
            ShapeComponent::Unbounded => None,
        }
    }

    /// Length of the axis once the long dimension is pinned down.
    pub fn resolve(&self, long_dim_length: u64) -> u64 {
        match self {
            ShapeComponent::Fixed(len) => (*len).max(0) as u64,
            ShapeComponent::Unbounded => long_dim_length,
        }
    }
}

impl From<i64> for ShapeComponent {
    fn from(value: i64) -> Self {
        ShapeComponent::Fixed(value)
    }
}

impl From<i32> for ShapeComponent {
    fn from(value: i32) -> Self {
        ShapeComponent::Fixed(value.into())
    }
}

impl From<u32> for ShapeComponent {
    fn from(value: u32) -> Self {
        ShapeComponent::Fixed(value.into())
    }
}

impl From<usize> for ShapeComponent {
    fn from(value: usize) -> Self {
        ShapeComponent::Fixed(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl fmt::Display for ShapeComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShapeComponent::Fixed(len) => write!(f, "{len}"),
            ShapeComponent::Unbounded => f.write_str("inf"),
        }
    }
}

impl Serialize for ShapeComponent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ShapeComponent::Fixed(len) => serializer.serialize_i64(*len),
            ShapeComponent::Unbounded => serializer.serialize_str("inf"),
        }
    }
}

impl<'de> Deserialize<'de> for ShapeComponent {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Fixed(i64),
            Named(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Fixed(len) => Ok(ShapeComponent::Fixed(len)),
            Repr::Named(name) if name == "inf" => Ok(ShapeComponent::Unbounded),
            Repr::Named(name) => Err(serde::de::Error::custom(format!(
                "expected an integer extent or \"inf\", got {name:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Float16,
    Bfloat16,
    Float32,
    Float64,
    Complex64,
    Complex128,
}

impl DataType {
    pub fn element_size_bytes(&self) -> usize {
        match self {
            DataType::Float16 | DataType::Bfloat16 => 2,
            DataType::Float32 => 4,
            DataType::Float64 | DataType::Complex64 => 8,
            DataType::Complex128 => 16,
        }
    }

    pub fn is_complex(&self) -> bool {
        matches!(self, DataType::Complex64 | DataType::Complex128)
    }

    pub fn name(&self) -> &'static str {
        match self {
            DataType::Float16 => "float16",
            DataType::Bfloat16 => "bfloat16",
            DataType::Float32 => "float32",
            DataType::Float64 => "float64",
            DataType::Complex64 => "complex64",
            DataType::Complex128 => "complex128",
        }
    }

    /// Type of the result when both operands meet in one expression.
    pub fn promote(self, other: DataType) -> DataType {
        let rank = |dtype: DataType| (dtype.is_complex(), dtype.element_size_bytes());
        if rank(other) > rank(self) {
            other
        } else {
            self
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A canonical tensor-contraction problem.
///
/// All maps are ordered so two problems built in different orders compare,
/// hash and fingerprint identically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EinsumProblem {
    subscripts: String,
    index_to_length: BTreeMap<String, ShapeComponent>,
    /// `use_matrix[output][input]` holds the values read in that operand slot.
    use_matrix: Vec<Vec<BTreeSet<String>>>,
    value_to_dtype: BTreeMap<String, DataType>,
}

impl EinsumProblem {
    pub fn new(subscripts: impl Into<String>) -> Self {
        Self {
            subscripts: subscripts.into(),
            index_to_length: BTreeMap::new(),
            use_matrix: Vec::new(),
            value_to_dtype: BTreeMap::new(),
        }
    }

    pub fn with_index(mut self, index: impl Into<String>, length: impl Into<ShapeComponent>) -> Self {
        self.index_to_length.insert(index.into(), length.into());
        self
    }

    pub fn with_unbounded_index(self, index: impl Into<String>) -> Self {
        self.with_index(index, ShapeComponent::Unbounded)
    }

    /// Append one output row: for each input slot, the values read there.
    pub fn with_output<R, S>(mut self, row: R) -> Self
    where
        R: IntoIterator,
        R::Item: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let row = row
            .into_iter()
            .map(|slot| slot.into_iter().map(Into::into).collect())
            .collect();
        self.use_matrix.push(row);
        self
    }

    pub fn with_value(mut self, name: impl Into<String>, dtype: DataType) -> Self {
        self.value_to_dtype.insert(name.into(), dtype);
        self
    }

    pub fn subscripts(&self) -> &str {
        &self.subscripts
    }

    pub fn index_to_length(&self) -> &BTreeMap<String, ShapeComponent> {
        &self.index_to_length
    }

    pub fn index_length(&self, index: &str) -> Option<ShapeComponent> {
        self.index_to_length.get(index).copied()
    }

    pub fn use_matrix(&self) -> &[Vec<BTreeSet<String>>] {
        &self.use_matrix
    }

    pub fn value_to_dtype(&self) -> &BTreeMap<String, DataType> {
        &self.value_to_dtype
    }

    pub fn num_outputs(&self) -> usize {
        self.use_matrix.len()
    }

    pub fn num_inputs(&self) -> usize {
        self.use_matrix.first().map(Vec::len).unwrap_or(0)
    }

    /// Promoted datatype of everything read by `output`.
    pub fn result_dtype(&self, output: usize) -> Option<DataType> {
        self.use_matrix
            .get(output)?
            .iter()
            .flatten()
            .filter_map(|value| self.value_to_dtype.get(value).copied())
            .reduce(DataType::promote)
    }

    /// Check the use matrix is rectangular and every value has a datatype.
    pub fn validate(&self) -> Result<(), String> {
        if self.use_matrix.is_empty() {
            return Err("einsum has no outputs".into());
        }
        let width = self.num_inputs();
        if width == 0 {
            return Err("einsum has no inputs".into());
        }
        if let Some(row) = self.use_matrix.iter().position(|row| row.len() != width) {
            return Err(format!(
                "output {row} reads {} operands, expected {width}",
                self.use_matrix[row].len()
            ));
        }
        for value in self.use_matrix.iter().flatten().flatten() {
            if !self.value_to_dtype.contains_key(value) {
                return Err(format!("value '{value}' has no datatype"));
            }
        }
        for (index, length) in &self.index_to_length {
            if matches!(length, ShapeComponent::Fixed(len) if *len <= 0) {
                return Err(format!("index '{index}' has non-positive length {length}"));
            }
        }
        Ok(())
    }

    /// Number of scalar operations, keyed by result datatype.
    ///
    /// Every output visits the full iteration space; each point costs one
    /// operation per operand slot (n-1 multiplies and one accumulate).
    /// Counts are floating point; iteration spaces easily exceed any
    /// integer width.
    pub fn op_counts(&self, long_dim_length: u64) -> BTreeMap<DataType, f64> {
        let points: f64 = self
            .index_to_length
            .values()
            .map(|len| len.resolve(long_dim_length) as f64)
            .product();

        let mut counts = BTreeMap::new();
        for (output, row) in self.use_matrix.iter().enumerate() {
            let Some(dtype) = self.result_dtype(output) else {
                continue;
            };
            *counts.entry(dtype).or_insert(0.0) += points * row.len() as f64;
        }
        counts
    }

    /// Giga-op summary stored with each cache row.
    pub fn op_info(&self, long_dim_length: u64) -> BTreeMap<String, f64> {
        self.op_counts(long_dim_length)
            .into_iter()
            .map(|(dtype, ops)| (dtype.name().to_string(), ops * 1e-9))
            .collect()
    }

    /// Stable identity of the problem, independent of the long dimension.
    pub fn cache_key(&self) -> String {
        to_canonical_string(self).unwrap_or_else(|_| format!("unencodable:{}", self.subscripts))
    }

    pub fn fingerprint(&self, long_dim_length: u64) -> serde_json::Result<Fingerprint> {
        Ok(Fingerprint {
            subscripts: self.subscripts.clone(),
            index_to_length: to_canonical_string(&self.index_to_length)?,
            use_matrix: to_canonical_string(&self.use_matrix)?,
            value_to_dtype: to_canonical_string(&self.value_to_dtype)?,
            op_info: to_canonical_string(&self.op_info(long_dim_length))?,
        })
    }
}

// BTreeMap<DataType, _> needs an order; follow declaration order.
impl PartialOrd for DataType {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DataType {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (*self as u8).cmp(&(*other as u8))
    }
}

/// Text columns identifying a problem in the result cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
    pub subscripts: String,
    pub index_to_length: String,
    pub use_matrix: String,
    pub value_to_dtype: String,
    pub op_info: String,
}
