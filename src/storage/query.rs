//! Parameterized document queries
//!
//! A [`QuerySpec`] is a filter over JSON documents expressed as SQL text plus
//! a list of named bound parameters. User-supplied values only ever travel as
//! parameters; the only identifiers that reach the SQL text are document
//! paths, and every path is validated before use.
//!
//! ```ignore
//! let mut q = QueryBuilder::new();
//! q.eq("tenantId", "tenant_id", "acme")?;
//! q.any_of(|g| {
//!     g.array_contains_field("participants", "userId", "user_id_0", "u1")?;
//!     g.array_contains_field("participants", "userId", "user_id_1", "u2")?;
//!     Ok(())
//! })?;
//! q.order_by("timeline.lastMessageAt", SortOrder::Desc)?;
//! let spec = q.build();
//! ```

use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::types::{ToSql, ToSqlOutput};
use serde::Serialize;
use std::collections::HashSet;

use crate::error::{HistoryError, Result};
use crate::types::SortOrder;

/// Column holding the JSON body, as aliased by the container's SELECT
pub const BODY: &str = "d.body";

/// Dotted member names with optional array subscripts: `a.b[0].c`
static PATH_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\[[0-9]+\])?(\.[A-Za-z_][A-Za-z0-9_]*(\[[0-9]+\])?)*$")
        .unwrap()
});

static PARAM_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]*$").unwrap());

/// Validate a document path before it is spliced into SQL text
pub fn validate_path(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(HistoryError::InvalidInput(
            "Document path cannot be empty".to_string(),
        ));
    }

    if path.contains("..") {
        return Err(HistoryError::InvalidInput(format!(
            "Document path '{}' cannot contain '..'",
            path
        )));
    }

    if path.starts_with('.') || path.ends_with('.') {
        return Err(HistoryError::InvalidInput(format!(
            "Document path '{}' cannot start or end with '.'",
            path
        )));
    }

    if !PATH_PATTERN.is_match(path) {
        return Err(HistoryError::InvalidInput(format!(
            "Invalid document path '{}'. Only alphanumeric, underscore, dot and [n] are allowed.",
            path
        )));
    }

    Ok(())
}

/// `json_extract` expression for a validated path rooted at `root`
pub(crate) fn json_path_expr(root: &str, path: &str) -> Result<String> {
    validate_path(path)?;
    Ok(format!("json_extract({}, '$.{}')", root, path))
}

/// `json_each` table source over the array at a validated path
pub(crate) fn json_each_expr(root: &str, path: &str) -> Result<String> {
    validate_path(path)?;
    Ok(format!("json_each({}, '$.{}')", root, path))
}

/// A typed bound parameter value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QueryValue {
    Text(String),
    Integer(i64),
    Real(f64),
    Bool(bool),
}

impl ToSql for QueryValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            QueryValue::Text(s) => s.to_sql(),
            QueryValue::Integer(i) => i.to_sql(),
            QueryValue::Real(f) => f.to_sql(),
            QueryValue::Bool(b) => b.to_sql(),
        }
    }
}

impl From<&str> for QueryValue {
    fn from(s: &str) -> Self {
        QueryValue::Text(s.to_string())
    }
}

impl From<String> for QueryValue {
    fn from(s: String) -> Self {
        QueryValue::Text(s)
    }
}

impl From<i64> for QueryValue {
    fn from(i: i64) -> Self {
        QueryValue::Integer(i)
    }
}

impl From<u64> for QueryValue {
    fn from(i: u64) -> Self {
        QueryValue::Integer(i64::try_from(i).unwrap_or(i64::MAX))
    }
}

impl From<f64> for QueryValue {
    fn from(f: f64) -> Self {
        QueryValue::Real(f)
    }
}

impl From<bool> for QueryValue {
    fn from(b: bool) -> Self {
        QueryValue::Bool(b)
    }
}

/// Comparison operators for range predicates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Gt,
    Gte,
    Lt,
    Lte,
}

impl Comparison {
    fn as_sql(&self) -> &'static str {
        match self {
            Comparison::Gt => ">",
            Comparison::Gte => ">=",
            Comparison::Lt => "<",
            Comparison::Lte => "<=",
        }
    }
}

/// What a query returns
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Projection {
    /// Whole documents
    #[default]
    Documents,
    /// Number of matching documents
    Count,
    /// Largest value found at a path
    Max(String),
    /// Distinct elements of the array at `array`.
    ///
    /// With `fields`, each row is an object made of those element fields;
    /// without, the element itself.
    DistinctElements {
        array: String,
        fields: Vec<String>,
    },
}

impl Projection {
    /// Whether the projection collapses all rows into one value
    pub fn is_aggregate(&self) -> bool {
        matches!(self, Projection::Count | Projection::Max(_))
    }
}

/// One ORDER BY term
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderTerm {
    pub path: String,
    pub order: SortOrder,
}

/// A compiled query: filter text, ordering, projection and bound parameters
#[derive(Debug, Clone, Default)]
pub struct QuerySpec {
    pub filter: String,
    pub order_by: Vec<OrderTerm>,
    pub params: Vec<(String, QueryValue)>,
    pub projection: Projection,
}

impl QuerySpec {
    /// A query matching every document
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_projection(mut self, projection: Projection) -> Self {
        self.projection = projection;
        self
    }

    /// ORDER BY clause body, empty if unordered
    pub fn order_clause(&self) -> Result<String> {
        let terms = self
            .order_by
            .iter()
            .map(|t| Ok(format!("{} {}", json_path_expr(BODY, &t.path)?, t.order.as_sql())))
            .collect::<Result<Vec<_>>>()?;
        Ok(terms.join(", "))
    }

    /// Human-readable rendering used in logs and query info
    pub fn query_text(&self) -> String {
        let mut text = String::from("SELECT * FROM c");
        if !self.filter.is_empty() {
            text.push_str(" WHERE ");
            text.push_str(&self.filter);
        }
        if let Ok(order) = self.order_clause() {
            if !order.is_empty() {
                text.push_str(" ORDER BY ");
                text.push_str(&order);
            }
        }
        text
    }

    /// Names of the bound parameters, in binding order
    pub fn param_names(&self) -> Vec<String> {
        self.params.iter().map(|(name, _)| name.clone()).collect()
    }
}

/// Builds a [`QuerySpec`] one predicate at a time.
///
/// Top-level predicates are AND-ed; [`QueryBuilder::any_of`] opens an
/// OR-group. Every value gets its own uniquely named parameter.
#[derive(Debug, Default)]
pub struct QueryBuilder {
    predicates: Vec<String>,
    params: Vec<(String, QueryValue)>,
    used_names: HashSet<String>,
    order_by: Vec<OrderTerm>,
}

impl QueryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a value under a fresh parameter name derived from `base`
    fn bind(&mut self, base: &str, value: QueryValue) -> Result<String> {
        if !PARAM_PATTERN.is_match(base) {
            return Err(HistoryError::InvalidInput(format!(
                "Invalid parameter name '{}'",
                base
            )));
        }

        let mut name = format!(":{}", base);
        let mut n = 1;
        while self.used_names.contains(&name) {
            name = format!(":{}_{}", base, n);
            n += 1;
        }

        self.used_names.insert(name.clone());
        self.params.push((name.clone(), value));
        Ok(name)
    }

    fn push(&mut self, predicate: String) -> &mut Self {
        self.predicates.push(predicate);
        self
    }

    /// `path = value`
    pub fn eq(&mut self, path: &str, param: &str, value: impl Into<QueryValue>) -> Result<&mut Self> {
        let expr = json_path_expr(BODY, path)?;
        let name = self.bind(param, value.into())?;
        Ok(self.push(format!("{} = {}", expr, name)))
    }

    /// Range comparison against a path
    pub fn compare(
        &mut self,
        path: &str,
        op: Comparison,
        param: &str,
        value: impl Into<QueryValue>,
    ) -> Result<&mut Self> {
        let expr = json_path_expr(BODY, path)?;
        let name = self.bind(param, value.into())?;
        Ok(self.push(format!("{} {} {}", expr, op.as_sql(), name)))
    }

    /// Case-sensitive substring match
    pub fn contains(&mut self, path: &str, param: &str, needle: &str) -> Result<&mut Self> {
        let expr = json_path_expr(BODY, path)?;
        let name = self.bind(param, needle.into())?;
        Ok(self.push(format!("instr({}, {}) > 0", expr, name)))
    }

    /// Case-insensitive substring match; the needle is lower-cased here
    pub fn contains_ci(&mut self, path: &str, param: &str, needle: &str) -> Result<&mut Self> {
        let expr = json_path_expr(BODY, path)?;
        let name = self.bind(param, needle.to_lowercase().into())?;
        Ok(self.push(format!("instr(unicode_lower({}), {}) > 0", expr, name)))
    }

    /// Array at `array` holds a scalar equal to `value`
    pub fn array_contains(
        &mut self,
        array: &str,
        param: &str,
        value: impl Into<QueryValue>,
    ) -> Result<&mut Self> {
        let source = json_each_expr(BODY, array)?;
        let name = self.bind(param, value.into())?;
        Ok(self.push(format!(
            "EXISTS (SELECT 1 FROM {} WHERE value = {})",
            source, name
        )))
    }

    /// Array at `array` holds an object whose `field` equals `value`
    pub fn array_contains_field(
        &mut self,
        array: &str,
        field: &str,
        param: &str,
        value: impl Into<QueryValue>,
    ) -> Result<&mut Self> {
        self.array_field_predicate(array, field, "=", param, value.into())
    }

    /// Array at `array` holds an object whose `field` is at least `value`
    pub fn array_any_field_gte(
        &mut self,
        array: &str,
        field: &str,
        param: &str,
        value: impl Into<QueryValue>,
    ) -> Result<&mut Self> {
        self.array_field_predicate(array, field, ">=", param, value.into())
    }

    fn array_field_predicate(
        &mut self,
        array: &str,
        field: &str,
        op: &str,
        param: &str,
        value: QueryValue,
    ) -> Result<&mut Self> {
        let source = json_each_expr(BODY, array)?;
        let element = json_path_expr("value", field)?;
        let name = self.bind(param, value)?;
        Ok(self.push(format!(
            "EXISTS (SELECT 1 FROM {} WHERE {} {} {})",
            source, element, op, name
        )))
    }

    /// Boolean at `path` is false or absent
    pub fn false_or_undefined(&mut self, path: &str) -> Result<&mut Self> {
        let expr = json_path_expr(BODY, path)?;
        Ok(self.push(format!("COALESCE({}, 0) = 0", expr)))
    }

    /// OR-join the predicates added by `f`; an empty group adds nothing
    pub fn any_of<F>(&mut self, f: F) -> Result<&mut Self>
    where
        F: FnOnce(&mut QueryBuilder) -> Result<()>,
    {
        let mut group = QueryBuilder {
            predicates: Vec::new(),
            params: std::mem::take(&mut self.params),
            used_names: std::mem::take(&mut self.used_names),
            order_by: Vec::new(),
        };
        let outcome = f(&mut group);

        self.params = group.params;
        self.used_names = group.used_names;
        outcome?;

        match group.predicates.len() {
            0 => Ok(self),
            1 => Ok(self.push(group.predicates.remove(0))),
            _ => Ok(self.push(format!("({})", group.predicates.join(" OR ")))),
        }
    }

    /// Append a sort term
    pub fn order_by(&mut self, path: &str, order: SortOrder) -> Result<&mut Self> {
        validate_path(path)?;
        self.order_by.push(OrderTerm {
            path: path.to_string(),
            order,
        });
        Ok(self)
    }

    /// Number of top-level predicates so far
    pub fn predicate_count(&self) -> usize {
        self.predicates.len()
    }

    pub fn build(self) -> QuerySpec {
        QuerySpec {
            filter: self.predicates.join(" AND "),
            order_by: self.order_by,
            params: self.params,
            projection: Projection::Documents,
        }
    }
}
