//! Where-clause model and filter compiler
//!
//! A [`Where`] maps columns to [`Constraint`]s, plus an optional `OR` list of
//! single-column constraints. [`compile_where`] translates it into native
//! filter calls:
//!
//! - `OR` is compiled first, into one disjunction, and then removed
//! - remaining columns follow in insertion order
//! - `null` literals are skipped
//!
//! Supported verbs: `in`, `contains`, `equals`, `gte`, `lte`, `gt`, `lt`,
//! `not`, `notIn`. An object carrying none of them is compared for equality
//! against the object itself (see [`Constraint::Opaque`]).

use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};
use tracing::warn;

use super::builder::{BackendQuery, FilterCall};
use super::value::Value;

/// Verb precedence when an object carries more than one.
const VERBS: [&str; 9] = [
    "in", "contains", "equals", "gte", "lte", "gt", "lt", "not", "notIn",
];

/// A constraint on one column.
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    /// A bare value: equality. `null` literals are never compiled.
    Literal(Value),
    Equals(Value),
    In(Vec<Value>),
    /// Case-insensitive substring match.
    Contains(String),
    Gte(Value),
    Lte(Value),
    Gt(Value),
    Lt(Value),
    /// Inequality.
    Not(Value),
    NotIn(Vec<Value>),
    /// An object with no recognised verb, compared for equality as a whole.
    Opaque(Value),
}

impl Constraint {
    fn verb(&self) -> Option<&'static str> {
        match self {
            Constraint::Literal(_) | Constraint::Opaque(_) => None,
            Constraint::Equals(_) => Some("equals"),
            Constraint::In(_) => Some("in"),
            Constraint::Contains(_) => Some("contains"),
            Constraint::Gte(_) => Some("gte"),
            Constraint::Lte(_) => Some("lte"),
            Constraint::Gt(_) => Some("gt"),
            Constraint::Lt(_) => Some("lt"),
            Constraint::Not(_) => Some("not"),
            Constraint::NotIn(_) => Some("notIn"),
        }
    }

    /// The constraint in its descriptor form, e.g. `{"gte": 5}`.
    fn as_object(&self) -> Value {
        let inner = match self {
            Constraint::Literal(v) | Constraint::Opaque(v) => return v.clone(),
            Constraint::Equals(v)
            | Constraint::Gte(v)
            | Constraint::Lte(v)
            | Constraint::Gt(v)
            | Constraint::Lt(v)
            | Constraint::Not(v) => v.clone(),
            Constraint::In(vs) | Constraint::NotIn(vs) => Value::Array(vs.clone()),
            Constraint::Contains(s) => Value::String(s.clone()),
        };
        let verb = self.verb().unwrap_or_default().to_string();
        Value::Object([(verb, inner)].into_iter().collect())
    }

    /// Decode a descriptor value into a constraint.
    fn from_json(column: &str, value: JsonValue) -> Result<Self, DescriptorError> {
        let mut map = match value {
            JsonValue::Object(map) => map,
            other => return Ok(Constraint::Literal(Value::from(other))),
        };

        let present: Vec<&str> = VERBS
            .iter()
            .copied()
            .filter(|verb| map.contains_key(*verb))
            .collect();
        let Some(verb) = present.first().copied() else {
            return Ok(Constraint::Opaque(Value::from(JsonValue::Object(map))));
        };
        if present.len() > 1 {
            warn!(column = %column, verbs = ?present, used = verb, "Multiple constraint verbs on one column, using the first");
        }

        let operand = map.remove(verb).unwrap_or(JsonValue::Null);
        let list = |operand: JsonValue| -> Result<Vec<Value>, DescriptorError> {
            match operand {
                JsonValue::Array(items) => Ok(items.into_iter().map(Value::from).collect()),
                other => Err(DescriptorError(format!(
                    "{column}.{verb} expects a list, got {other}"
                ))),
            }
        };

        Ok(match verb {
            "in" => Constraint::In(list(operand)?),
            "notIn" => Constraint::NotIn(list(operand)?),
            "contains" => Constraint::Contains(Value::from(operand).to_text()),
            "equals" => Constraint::Equals(Value::from(operand)),
            "gte" => Constraint::Gte(Value::from(operand)),
            "lte" => Constraint::Lte(Value::from(operand)),
            "gt" => Constraint::Gt(Value::from(operand)),
            "lt" => Constraint::Lt(Value::from(operand)),
            _ => Constraint::Not(Value::from(operand)),
        })
    }
}

/// A where-clause could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct DescriptorError(pub String);

/// Column constraints plus an optional disjunction.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(try_from = "JsonValue")]
pub struct Where {
    or: Option<Vec<(String, Constraint)>>,
    fields: Vec<(String, Constraint)>,
}

impl Where {
    pub fn new() -> Self {
        Self::default()
    }

    /// `column = value`.
    pub fn eq(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.field(column, Constraint::Literal(value.into()))
    }

    pub fn field(mut self, column: impl Into<String>, constraint: Constraint) -> Self {
        self.fields.push((column.into(), constraint));
        self
    }

    /// Set the disjunction. Each branch constrains a single column.
    pub fn any_of<I, S>(mut self, branches: I) -> Self
    where
        I: IntoIterator<Item = (S, Constraint)>,
        S: Into<String>,
    {
        self.or = Some(
            branches
                .into_iter()
                .map(|(column, c)| (column.into(), c))
                .collect(),
        );
        self
    }

    pub fn has_or(&self) -> bool {
        self.or.is_some()
    }

    pub fn fields(&self) -> &[(String, Constraint)] {
        &self.fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.or.as_ref().is_none_or(Vec::is_empty)
    }

    /// Columns pinned to a single value (literals and `equals`).
    pub fn equalities(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().filter_map(|(column, c)| match c {
            Constraint::Literal(v) | Constraint::Equals(v) if !v.is_null() => {
                Some((column.as_str(), v))
            }
            _ => None,
        })
    }
}

impl TryFrom<JsonValue> for Where {
    type Error = DescriptorError;

    fn try_from(value: JsonValue) -> Result<Self, Self::Error> {
        let map: Map<String, JsonValue> = match value {
            JsonValue::Null => return Ok(Where::default()),
            JsonValue::Object(map) => map,
            other => return Err(DescriptorError(format!("where must be an object, got {other}"))),
        };

        let mut clause = Where::default();
        for (key, value) in map {
            if key == "OR" {
                let JsonValue::Array(items) = value else {
                    return Err(DescriptorError("OR must be a list".to_string()));
                };
                let mut branches = Vec::new();
                for item in items {
                    let JsonValue::Object(branch) = item else {
                        return Err(DescriptorError("OR entries must be objects".to_string()));
                    };
                    for (column, value) in branch {
                        let constraint = Constraint::from_json(&column, value)?;
                        branches.push((column, constraint));
                    }
                }
                clause.or = Some(branches);
            } else {
                let constraint = Constraint::from_json(&key, value)?;
                clause.fields.push((key, constraint));
            }
        }
        Ok(clause)
    }
}

/// Which verbs an operation compiles natively. Anything outside the set
/// falls back to equality against the constraint object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Every verb (reads, single-row writes).
    Full,
    /// `in, gte, lte, gt, lt, not` (row counts).
    Count,
    /// `in` only (bulk update/delete).
    Bulk,
}

impl Dispatch {
    fn supports(&self, constraint: &Constraint) -> bool {
        match (self, constraint) {
            (_, Constraint::Literal(_) | Constraint::Opaque(_)) => true,
            (Dispatch::Full, _) => true,
            (
                Dispatch::Count,
                Constraint::In(_)
                | Constraint::Gte(_)
                | Constraint::Lte(_)
                | Constraint::Gt(_)
                | Constraint::Lt(_)
                | Constraint::Not(_),
            ) => true,
            (Dispatch::Bulk, Constraint::In(_)) => true,
            _ => false,
        }
    }
}

fn native_call(column: &str, constraint: &Constraint) -> FilterCall {
    let column = column.to_string();
    match constraint {
        Constraint::Literal(v) | Constraint::Equals(v) | Constraint::Opaque(v) => {
            FilterCall::Eq(column, v.clone())
        }
        Constraint::In(vs) => FilterCall::In(column, vs.clone()),
        Constraint::Contains(s) => FilterCall::ILike(column, format!("%{s}%")),
        Constraint::Gte(v) => FilterCall::Gte(column, v.clone()),
        Constraint::Lte(v) => FilterCall::Lte(column, v.clone()),
        Constraint::Gt(v) => FilterCall::Gt(column, v.clone()),
        Constraint::Lt(v) => FilterCall::Lt(column, v.clone()),
        Constraint::Not(v) => FilterCall::Neq(column, v.clone()),
        Constraint::NotIn(vs) => FilterCall::NotIn(column, vs.clone()),
    }
}

/// Apply `clause` to `query`. The `OR` list is consumed.
pub fn compile_where(mut query: BackendQuery, clause: &mut Where, dispatch: Dispatch) -> BackendQuery {
    if let Some(branches) = clause.or.take() {
        if !branches.is_empty() {
            let calls = branches
                .iter()
                .map(|(column, constraint)| native_call(column, constraint))
                .collect();
            query = query.or(calls);
        }
    }

    for (column, constraint) in &clause.fields {
        if let Constraint::Literal(Value::Null) = constraint {
            continue;
        }
        let call = if dispatch.supports(constraint) {
            native_call(column, constraint)
        } else {
            warn!(
                table = %query.table,
                column = %column,
                verb = constraint.verb().unwrap_or_default(),
                dispatch = ?dispatch,
                "Constraint not supported here, comparing for equality"
            );
            FilterCall::Eq(column.clone(), constraint.as_object())
        };
        query = query.filter(call);
    }
    query
}
