//! Backend query builder
//!
//! [`BackendQuery`] is the native call sequence of the REST data service:
//! a table, an action, per-column filter calls, ordering, a range window and
//! a cardinality expectation. It is built fluently, the same way the service's
//! own client library chains `select().eq().order().range()`.
//!
//! The assembler half of this module turns the declarative parts of a query
//! descriptor (`select`, `orderBy`, `take/skip`) into those directives.

use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};

use super::value::Value;

/// Page size used when a descriptor names neither `take` nor `limit`.
pub const DEFAULT_PAGE_SIZE: u64 = 20;

/// A single native filter call.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterCall {
    Eq(String, Value),
    Neq(String, Value),
    Gt(String, Value),
    Gte(String, Value),
    Lt(String, Value),
    Lte(String, Value),
    In(String, Vec<Value>),
    NotIn(String, Vec<Value>),
    /// Case-insensitive pattern match; `%` is the wildcard.
    ILike(String, String),
    /// Disjunction of the inner calls, submitted as one `or` filter.
    Or(Vec<FilterCall>),
}

impl FilterCall {
    /// Column the call applies to. `Or` spans several columns.
    pub fn column(&self) -> Option<&str> {
        match self {
            FilterCall::Eq(c, _)
            | FilterCall::Neq(c, _)
            | FilterCall::Gt(c, _)
            | FilterCall::Gte(c, _)
            | FilterCall::Lt(c, _)
            | FilterCall::Lte(c, _)
            | FilterCall::In(c, _)
            | FilterCall::NotIn(c, _)
            | FilterCall::ILike(c, _) => Some(c),
            FilterCall::Or(_) => None,
        }
    }

    /// The `(key, value)` query parameter for this call.
    pub fn to_param(&self) -> (String, String) {
        match self {
            FilterCall::Or(branches) => ("or".to_string(), render_branches(branches)),
            _ => (
                self.column().unwrap_or_default().to_string(),
                self.operand(false),
            ),
        }
    }

    /// `column.operator.value` form used inside a disjunction.
    pub fn expression(&self) -> String {
        match self {
            FilterCall::Or(branches) => format!("or{}", render_branches(branches)),
            _ => format!(
                "{}.{}",
                self.column().unwrap_or_default(),
                self.operand(true)
            ),
        }
    }

    fn operand(&self, nested: bool) -> String {
        let scalar = |v: &Value| {
            if nested {
                quote(&v.to_text())
            } else {
                v.to_text()
            }
        };
        match self {
            FilterCall::Eq(_, v) => format!("eq.{}", scalar(v)),
            FilterCall::Neq(_, v) => format!("neq.{}", scalar(v)),
            FilterCall::Gt(_, v) => format!("gt.{}", scalar(v)),
            FilterCall::Gte(_, v) => format!("gte.{}", scalar(v)),
            FilterCall::Lt(_, v) => format!("lt.{}", scalar(v)),
            FilterCall::Lte(_, v) => format!("lte.{}", scalar(v)),
            FilterCall::In(_, vs) => format!("in.{}", render_list(vs)),
            FilterCall::NotIn(_, vs) => format!("not.in.{}", render_list(vs)),
            FilterCall::ILike(_, pattern) => {
                if nested {
                    format!("ilike.{}", quote(pattern))
                } else {
                    format!("ilike.{pattern}")
                }
            }
            FilterCall::Or(branches) => render_branches(branches),
        }
    }
}

fn render_branches(branches: &[FilterCall]) -> String {
    let parts: Vec<String> = branches.iter().map(FilterCall::expression).collect();
    format!("({})", parts.join(","))
}

fn render_list(values: &[Value]) -> String {
    let parts: Vec<String> = values.iter().map(|v| quote(&v.to_text())).collect();
    format!("({})", parts.join(","))
}

/// Double-quote a value that would otherwise break list or logic-tree parsing.
fn quote(text: &str) -> String {
    let reserved = text.is_empty()
        || text
            .chars()
            .any(|c| matches!(c, ',' | '(' | ')' | '"' | ':' | '\\') || c.is_whitespace());
    if !reserved {
        return text.to_string();
    }
    let escaped = text.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Asc => "asc",
            Direction::Desc => "desc",
        }
    }

    fn parse(text: &str) -> Option<Self> {
        match text.to_ascii_lowercase().as_str() {
            "asc" => Some(Direction::Asc),
            "desc" => Some(Direction::Desc),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderTerm {
    pub column: String,
    pub direction: Direction,
}

/// What the request does to the table.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Read rows. `head` asks for the count only, without a body.
    Select { head: bool },
    Insert(Vec<Map<String, JsonValue>>),
    Update(Map<String, JsonValue>),
    Delete,
}

/// One request against the data service.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendQuery {
    pub table: String,
    pub action: Action,
    /// Column list. For writes, `Some` asks the service to return the rows.
    pub columns: Option<String>,
    pub filters: Vec<FilterCall>,
    pub order: Vec<OrderTerm>,
    /// Inclusive row window.
    pub range: Option<(u64, u64)>,
    pub limit: Option<u64>,
    /// Expect exactly one row; the service errors otherwise.
    pub single: bool,
    /// Ask for an exact row count alongside the result.
    pub count: bool,
}

impl BackendQuery {
    /// Start a read of all columns from `table`.
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            action: Action::Select { head: false },
            columns: None,
            filters: Vec::new(),
            order: Vec::new(),
            range: None,
            limit: None,
            single: false,
            count: false,
        }
    }

    pub fn select(mut self, columns: impl Into<String>) -> Self {
        self.columns = Some(columns.into());
        self
    }

    /// Count-only read: no rows come back, just the exact count.
    pub fn head_count(mut self) -> Self {
        self.action = Action::Select { head: true };
        self.count = true;
        self
    }

    pub fn insert(mut self, rows: Vec<Map<String, JsonValue>>) -> Self {
        self.action = Action::Insert(rows);
        self
    }

    pub fn update(mut self, values: Map<String, JsonValue>) -> Self {
        self.action = Action::Update(values);
        self
    }

    pub fn delete(mut self) -> Self {
        self.action = Action::Delete;
        self
    }

    pub fn filter(mut self, call: FilterCall) -> Self {
        self.filters.push(call);
        self
    }

    pub fn eq(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(FilterCall::Eq(column.into(), value.into()))
    }

    pub fn neq(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(FilterCall::Neq(column.into(), value.into()))
    }

    pub fn gt(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(FilterCall::Gt(column.into(), value.into()))
    }

    pub fn gte(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(FilterCall::Gte(column.into(), value.into()))
    }

    pub fn lt(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(FilterCall::Lt(column.into(), value.into()))
    }

    pub fn lte(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(FilterCall::Lte(column.into(), value.into()))
    }

    pub fn in_list(self, column: impl Into<String>, values: Vec<Value>) -> Self {
        self.filter(FilterCall::In(column.into(), values))
    }

    pub fn not_in(self, column: impl Into<String>, values: Vec<Value>) -> Self {
        self.filter(FilterCall::NotIn(column.into(), values))
    }

    pub fn ilike(self, column: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.filter(FilterCall::ILike(column.into(), pattern.into()))
    }

    pub fn or(self, branches: Vec<FilterCall>) -> Self {
        self.filter(FilterCall::Or(branches))
    }

    pub fn order(mut self, column: impl Into<String>, direction: Direction) -> Self {
        self.order.push(OrderTerm {
            column: column.into(),
            direction,
        });
        self
    }

    /// Restrict to rows `from..=to`.
    pub fn range(mut self, from: u64, to: u64) -> Self {
        self.range = Some((from, to));
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn single(mut self) -> Self {
        self.single = true;
        self
    }

    /// Short operation label for logs.
    pub fn verb(&self) -> &'static str {
        match self.action {
            Action::Select { head: true } => "count",
            Action::Select { head: false } => "select",
            Action::Insert(_) => "insert",
            Action::Update(_) => "update",
            Action::Delete => "delete",
        }
    }
}

// ============================================================================
// Descriptor parts: selection, ordering, pagination
// ============================================================================

/// JavaScript-style truthiness, used wherever a descriptor maps keys to flags.
pub(crate) fn is_truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => false,
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        JsonValue::String(s) => !s.is_empty(),
        JsonValue::Array(_) | JsonValue::Object(_) => true,
    }
}

pub(crate) fn deserialize_truthy<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(is_truthy(&JsonValue::deserialize(deserializer)?))
}

/// Column projection: `{field: true}` keeps a column, falsy values drop it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "JsonValue")]
pub struct Select {
    fields: Vec<String>,
}

impl Select {
    pub fn fields<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    pub fn names(&self) -> &[String] {
        &self.fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl TryFrom<JsonValue> for Select {
    type Error = String;

    fn try_from(value: JsonValue) -> Result<Self, Self::Error> {
        match value {
            JsonValue::Object(map) => Ok(Self {
                fields: map
                    .into_iter()
                    .filter(|(_, flag)| is_truthy(flag))
                    .map(|(k, _)| k)
                    .collect(),
            }),
            other => Err(format!("select must be an object, got {other}")),
        }
    }
}

/// Resolve the column list: selected columns or `*`, plus embedded relations.
pub fn column_list(select: Option<&Select>, include: Option<&Select>) -> String {
    let mut columns: Vec<String> = match select {
        Some(select) if !select.is_empty() => select.names().to_vec(),
        _ => vec!["*".to_string()],
    };
    if let Some(include) = include {
        columns.extend(include.names().iter().map(|rel| format!("{rel}(*)")));
    }
    columns.join(",")
}

/// Ordering: a single `{field: dir}` mapping or a list of them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "JsonValue")]
pub struct OrderBy {
    terms: Vec<OrderTerm>,
}

impl OrderBy {
    pub fn asc(column: impl Into<String>) -> Self {
        Self::default().then(column, Direction::Asc)
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self::default().then(column, Direction::Desc)
    }

    /// Append a secondary sort key.
    pub fn then(mut self, column: impl Into<String>, direction: Direction) -> Self {
        self.terms.push(OrderTerm {
            column: column.into(),
            direction,
        });
        self
    }

    pub fn terms(&self) -> &[OrderTerm] {
        &self.terms
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    fn push_mapping(&mut self, map: Map<String, JsonValue>) -> Result<(), String> {
        for (column, dir) in map {
            let direction = dir
                .as_str()
                .and_then(Direction::parse)
                .ok_or_else(|| format!("invalid sort direction for {column}: {dir}"))?;
            self.terms.push(OrderTerm { column, direction });
        }
        Ok(())
    }
}

impl TryFrom<JsonValue> for OrderBy {
    type Error = String;

    fn try_from(value: JsonValue) -> Result<Self, Self::Error> {
        let mut order = OrderBy::default();
        match value {
            JsonValue::Null => {}
            JsonValue::Object(map) => order.push_mapping(map)?,
            JsonValue::Array(items) => {
                for item in items {
                    match item {
                        JsonValue::Object(map) => order.push_mapping(map)?,
                        other => return Err(format!("orderBy entries must be objects, got {other}")),
                    }
                }
            }
            other => return Err(format!("orderBy must be an object or list, got {other}")),
        }
        Ok(order)
    }
}

/// Pagination fields as they appear on a descriptor. `take/skip` win over
/// `limit/offset`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default)]
    pub offset: Option<u64>,
    #[serde(default)]
    pub take: Option<u64>,
    #[serde(default)]
    pub skip: Option<u64>,
}

impl Pagination {
    pub fn take(mut self, take: u64) -> Self {
        self.take = Some(take);
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn resolve(&self) -> PageWindow {
        PageWindow {
            limit: self.take.or(self.limit).unwrap_or(DEFAULT_PAGE_SIZE),
            offset: self.skip.or(self.offset).unwrap_or(0),
        }
    }
}

/// A resolved `(offset, limit)` window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub offset: u64,
    pub limit: u64,
}

impl PageWindow {
    /// Inclusive row range, or `None` for a zero limit. The upper bound
    /// saturates at `u64::MAX`.
    pub fn range(&self) -> Option<(u64, u64)> {
        (self.limit > 0).then(|| (self.offset, self.offset.saturating_add(self.limit - 1)))
    }
}

/// Apply ordering and the page window to a read.
pub fn assemble(mut query: BackendQuery, order_by: &OrderBy, page: &Pagination) -> BackendQuery {
    for term in order_by.terms() {
        query = query.order(term.column.clone(), term.direction);
    }
    if let Some((from, to)) = page.resolve().range() {
        query = query.range(from, to);
    }
    query
}
