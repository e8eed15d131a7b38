//! Query types for the document store.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Filter comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    /// Exact equality.
    Eq,
    /// Not equal.
    Ne,
    /// Greater than or equal.
    Gte,
    /// Less than or equal.
    Lte,
    /// Membership in a list of values.
    In,
    /// String prefix match.
    StartsWith,
}

/// A single filter condition on a (dotted) field path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterField {
    /// Field path, segments separated by `.`.
    pub field: String,
    /// The comparison operator.
    pub op: FilterOp,
    /// The value to compare against.
    pub value: Value,
}

impl FilterField {
    /// Equality condition.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::Eq,
            value: value.into(),
        }
    }

    /// Condition with an explicit operator.
    pub fn new(field: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    /// Evaluate the condition against a JSON document.
    pub fn matches(&self, doc: &Value) -> bool {
        let actual = lookup(doc, &self.field);
        match self.op {
            FilterOp::Eq => actual == Some(&self.value),
            FilterOp::Ne => actual != Some(&self.value),
            FilterOp::Gte => actual
                .and_then(|a| compare(a, &self.value))
                .is_some_and(|o| o != Ordering::Less),
            FilterOp::Lte => actual
                .and_then(|a| compare(a, &self.value))
                .is_some_and(|o| o != Ordering::Greater),
            FilterOp::In => match (&self.value, actual) {
                (Value::Array(values), Some(a)) => values.contains(a),
                _ => false,
            },
            FilterOp::StartsWith => match (&self.value, actual) {
                (Value::String(p), Some(Value::String(a))) => a.starts_with(p.as_str()),
                _ => false,
            },
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    /// Ascending order.
    #[default]
    Asc,
    /// Descending order.
    Desc,
}

/// A sort specification consisting of a field path and direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SortField {
    /// Field path to sort by.
    pub field: String,
    /// Sort direction.
    #[serde(default)]
    pub direction: SortDirection,
}

impl SortField {
    /// Create an ascending sort on the given field.
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    /// Create a descending sort on the given field.
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }

    /// Order two documents according to this sort.
    pub fn cmp_docs(&self, a: &Value, b: &Value) -> Ordering {
        let ord = match (lookup(a, &self.field), lookup(b, &self.field)) {
            (Some(x), Some(y)) => compare(x, y).unwrap_or(Ordering::Equal),
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        match self.direction {
            SortDirection::Asc => ord,
            SortDirection::Desc => ord.reverse(),
        }
    }
}

/// A query against one doctype of a tenant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FindRequest {
    /// Doctype to search.
    pub doctype: String,
    /// Name of the index the query relies on, if any.
    pub index: Option<String>,
    /// All conditions must hold.
    pub selector: Vec<FilterField>,
    /// Sort order, applied in sequence.
    pub sort: Vec<SortField>,
    /// Maximum number of results.
    pub limit: Option<usize>,
}

impl FindRequest {
    /// Start a query on a doctype.
    pub fn new(doctype: impl Into<String>) -> Self {
        Self {
            doctype: doctype.into(),
            ..Default::default()
        }
    }

    /// Use a named index.
    pub fn use_index(mut self, index: impl Into<String>) -> Self {
        self.index = Some(index.into());
        self
    }

    /// Add a condition.
    pub fn filter(mut self, field: FilterField) -> Self {
        self.selector.push(field);
        self
    }

    /// Add a sort key.
    pub fn sort(mut self, sort: SortField) -> Self {
        self.sort.push(sort);
        self
    }

    /// Limit the number of results.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether a document satisfies every condition.
    pub fn matches(&self, doc: &Value) -> bool {
        self.selector.iter().all(|f| f.matches(doc))
    }
}

/// Resolve a dotted path inside a JSON document.
pub fn lookup<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(doc, |v, segment| v.get(segment))
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}
