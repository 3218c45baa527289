//! Generic document store contract.
//!
//! Mirrors the capabilities of a hosted document database: filtered and
//! ordered queries, inserts with store-assigned ids, and partial updates
//! addressed by field path.

use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;

use crate::repository::StorageError;

/// Top-level fields of a document.
pub type Fields = serde_json::Map<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub id: String,
    pub fields: Fields,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl FilterOp {
    /// Whether `field <op> value` holds, given `field.cmp(value)`.
    ///
    /// Incomparable values only satisfy `Ne`.
    #[must_use]
    pub fn holds(self, ordering: Option<Ordering>) -> bool {
        match (self, ordering) {
            (FilterOp::Eq, Some(o)) => o == Ordering::Equal,
            (FilterOp::Ne, Some(o)) => o != Ordering::Equal,
            (FilterOp::Ne, None) => true,
            (FilterOp::Lt, Some(o)) => o == Ordering::Less,
            (FilterOp::Le, Some(o)) => o != Ordering::Greater,
            (FilterOp::Gt, Some(o)) => o == Ordering::Greater,
            (FilterOp::Ge, Some(o)) => o != Ordering::Less,
            (_, None) => false,
        }
    }

    pub(crate) fn sql(self) -> &'static str {
        match self {
            FilterOp::Eq => "=",
            FilterOp::Ne => "<>",
            FilterOp::Lt => "<",
            FilterOp::Le => "<=",
            FilterOp::Gt => ">",
            FilterOp::Ge => ">=",
        }
    }
}

/// `field <op> value` on a top-level field.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Filter {
    #[must_use]
    pub fn new(field: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    #[must_use]
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOp::Eq, value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

impl OrderBy {
    #[must_use]
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: Direction::Asc,
        }
    }

    #[must_use]
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: Direction::Desc,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Field(String),
    Index(usize),
}

/// Address of a value inside a document, e.g. `answers.2`.
///
/// Numeric segments index into arrays; the first segment is always a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath(Vec<PathSegment>);

impl FieldPath {
    /// Path to a top-level field.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Serialization` if the name is not a valid field name.
    pub fn field(name: &str) -> Result<Self, StorageError> {
        validate_field_name(name)?;
        Ok(Self(vec![PathSegment::Field(name.to_owned())]))
    }

    /// Extend the path with an array index.
    #[must_use]
    pub fn index(mut self, index: usize) -> Self {
        self.0.push(PathSegment::Index(index));
        self
    }

    /// Parse a dotted path such as `answers.2` or `meta.owner`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Serialization` for empty segments, quoted names,
    /// or a leading index.
    pub fn parse(raw: &str) -> Result<Self, StorageError> {
        let mut segments = Vec::new();
        for part in raw.split('.') {
            if let Ok(index) = part.parse::<usize>() {
                if segments.is_empty() {
                    return Err(StorageError::Serialization(format!(
                        "path must start with a field: {raw}"
                    )));
                }
                segments.push(PathSegment::Index(index));
            } else {
                validate_field_name(part)?;
                segments.push(PathSegment::Field(part.to_owned()));
            }
        }
        Ok(Self(segments))
    }

    #[must_use]
    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    /// SQLite JSON path, e.g. `$."answers"[2]`.
    #[must_use]
    pub fn to_json_path(&self) -> String {
        Self::json_path_of(&self.0)
    }

    /// Every array index on this path, as the JSON path of the indexed array
    /// and the index itself. `answers.2` yields `($."answers", 2)`.
    #[must_use]
    pub fn indexed_arrays(&self) -> Vec<(String, usize)> {
        self.0
            .iter()
            .enumerate()
            .filter_map(|(pos, segment)| match segment {
                PathSegment::Index(i) => Some((Self::json_path_of(&self.0[..pos]), *i)),
                PathSegment::Field(_) => None,
            })
            .collect()
    }

    fn json_path_of(segments: &[PathSegment]) -> String {
        let mut out = String::from("$");
        for segment in segments {
            match segment {
                PathSegment::Field(name) => {
                    out.push_str(".\"");
                    out.push_str(name);
                    out.push('"');
                }
                PathSegment::Index(i) => {
                    out.push('[');
                    out.push_str(&i.to_string());
                    out.push(']');
                }
            }
        }
        out
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            match segment {
                PathSegment::Field(name) => f.write_str(name)?,
                PathSegment::Index(idx) => write!(f, "{idx}")?,
            }
        }
        Ok(())
    }
}

pub(crate) fn validate_field_name(name: &str) -> Result<(), StorageError> {
    if name.is_empty() || name.contains(['.', '"', '\'', '$', '[', ']']) {
        return Err(StorageError::Serialization(format!(
            "invalid field name: {name:?}"
        )));
    }
    Ok(())
}

/// Ordered set of `path = value` assignments applied together.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Patch {
    entries: Vec<(FieldPath, Value)>,
}

impl Patch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn set(mut self, path: FieldPath, value: impl Into<Value>) -> Self {
        self.entries.push((path, value.into()));
        self
    }

    #[must_use]
    pub fn entries(&self) -> &[(FieldPath, Value)] {
        &self.entries
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Apply the assignments to `fields` in place.
    ///
    /// Missing intermediate fields are created as objects. Array indices must
    /// already exist.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Serialization` if a path crosses a non-container
    /// value or indexes past the end of an array.
    pub fn apply(&self, fields: &mut Fields) -> Result<(), StorageError> {
        for (path, value) in &self.entries {
            set_path(fields, path, value.clone())?;
        }
        Ok(())
    }
}

fn set_path(fields: &mut Fields, path: &FieldPath, value: Value) -> Result<(), StorageError> {
    let bad_path = || StorageError::Serialization(format!("cannot set path {path}"));

    let (first, rest) = path.segments().split_first().ok_or_else(bad_path)?;
    let PathSegment::Field(name) = first else {
        return Err(bad_path());
    };
    if rest.is_empty() {
        fields.insert(name.clone(), value);
        return Ok(());
    }

    let mut cursor = fields
        .entry(name.clone())
        .or_insert_with(|| Value::Object(Fields::new()));
    let (last, middle) = rest.split_last().ok_or_else(bad_path)?;
    for segment in middle {
        cursor = match (segment, cursor) {
            (PathSegment::Field(key), Value::Object(map)) => map
                .entry(key.clone())
                .or_insert_with(|| Value::Object(Fields::new())),
            (PathSegment::Index(i), Value::Array(items)) => {
                items.get_mut(*i).ok_or_else(bad_path)?
            }
            _ => return Err(bad_path()),
        };
    }

    match (last, cursor) {
        (PathSegment::Field(key), Value::Object(map)) => {
            map.insert(key.clone(), value);
            Ok(())
        }
        (PathSegment::Index(i), Value::Array(items)) => {
            let slot = items.get_mut(*i).ok_or_else(bad_path)?;
            *slot = value;
            Ok(())
        }
        _ => Err(bad_path()),
    }
}

/// Total-enough ordering over JSON scalars of the same kind.
///
/// Values of different kinds, arrays and objects are incomparable.
#[must_use]
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => x.as_f64()?.partial_cmp(&y.as_f64()?),
        },
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Document database capabilities the session engine relies on.
///
/// Reads are allowed to be eventually consistent with writes.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// All documents of `collection` matching every filter.
    ///
    /// Documents missing the ordering field sort last in either direction.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on transport or decoding failures.
    async fn query(
        &self,
        collection: &str,
        filters: &[Filter],
        order_by: Option<&OrderBy>,
    ) -> Result<Vec<StoredDocument>, StorageError>;

    /// Fetch one document by id.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on transport or decoding failures.
    async fn get(&self, collection: &str, id: &str)
    -> Result<Option<StoredDocument>, StorageError>;

    /// Insert a document and return the id the store assigned.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the document cannot be written.
    async fn insert(&self, collection: &str, fields: Fields) -> Result<String, StorageError>;

    /// Apply `patch` to an existing document. Fields not named by the patch
    /// are left untouched.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if no document has this id.
    async fn update(&self, collection: &str, id: &str, patch: &Patch)
    -> Result<(), StorageError>;
}
