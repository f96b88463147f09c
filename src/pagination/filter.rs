use sqlx::{QueryBuilder, Sqlite};

use crate::Timestamp;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    Int(i64),
    Bool(bool),
    Time(Timestamp),
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_owned())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u8> for Value {
    fn from(v: u8) -> Self {
        Value::Int(v.into())
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<Timestamp> for Value {
    fn from(v: Timestamp) -> Self {
        Value::Time(v)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cmp {
    Eq,
    Lt,
    Gt,
    Lte,
    Gte,
}

impl Cmp {
    fn sql(self) -> &'static str {
        match self {
            Cmp::Eq => " = ",
            Cmp::Lt => " < ",
            Cmp::Gt => " > ",
            Cmp::Lte => " <= ",
            Cmp::Gte => " >= ",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Predicate {
    Compare(&'static str, Cmp, Value),
    /// Case-insensitive substring match on any of the columns.
    Contains(&'static [&'static str], String),
    /// JSON array column shares at least one element with the values.
    Overlaps(&'static str, Vec<String>),
}

/// Typed row predicates, ANDed together.
///
/// Column names are always compile-time constants; only values are bound.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filters(Vec<Predicate>);

impl Filters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(self, column: &'static str, value: impl Into<Value>) -> Self {
        self.compare(column, Cmp::Eq, value.into())
    }

    pub fn eq_opt<V: Into<Value>>(self, column: &'static str, value: Option<V>) -> Self {
        match value {
            Some(value) => self.eq(column, value),
            None => self,
        }
    }

    pub fn at_least<V: Into<Value>>(self, column: &'static str, value: Option<V>) -> Self {
        match value {
            Some(value) => self.compare(column, Cmp::Gte, value.into()),
            None => self,
        }
    }

    pub fn at_most<V: Into<Value>>(self, column: &'static str, value: Option<V>) -> Self {
        match value {
            Some(value) => self.compare(column, Cmp::Lte, value.into()),
            None => self,
        }
    }

    pub fn before(self, column: &'static str, value: impl Into<Value>) -> Self {
        self.compare(column, Cmp::Lt, value.into())
    }

    pub fn after(self, column: &'static str, value: impl Into<Value>) -> Self {
        self.compare(column, Cmp::Gt, value.into())
    }

    pub fn contains(mut self, columns: &'static [&'static str], term: Option<&str>) -> Self {
        if let Some(term) = term.map(str::trim).filter(|term| !term.is_empty()) {
            self.0.push(Predicate::Contains(columns, term.to_owned()));
        }
        self
    }

    pub fn overlaps(mut self, column: &'static str, values: &[String]) -> Self {
        if !values.is_empty() {
            self.0.push(Predicate::Overlaps(column, values.to_vec()));
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn compare(mut self, column: &'static str, cmp: Cmp, value: Value) -> Self {
        self.0.push(Predicate::Compare(column, cmp, value));
        self
    }

    /// Appends ` WHERE ...` (or nothing) to the query.
    pub fn push_where(&self, query: &mut QueryBuilder<'_, Sqlite>) {
        for (i, predicate) in self.0.iter().enumerate() {
            query.push(if i == 0 { " WHERE " } else { " AND " });
            match predicate {
                Predicate::Compare(column, cmp, value) => {
                    query.push(column).push(cmp.sql());
                    push_value(query, value);
                }
                Predicate::Contains(columns, term) => {
                    let pattern = format!("%{}%", escape_like(term));
                    query.push("(");
                    for (j, column) in columns.iter().enumerate() {
                        if j > 0 {
                            query.push(" OR ");
                        }
                        query
                            .push(column)
                            .push(" LIKE ")
                            .push_bind(pattern.clone())
                            .push(" ESCAPE '\\'");
                    }
                    query.push(")");
                }
                Predicate::Overlaps(column, values) => {
                    query
                        .push("EXISTS (SELECT 1 FROM json_each(")
                        .push(column)
                        .push(") WHERE json_each.value IN (");
                    let mut list = query.separated(", ");
                    for value in values {
                        list.push_bind(value.clone());
                    }
                    query.push("))");
                }
            }
        }
    }
}

fn push_value(query: &mut QueryBuilder<'_, Sqlite>, value: &Value) {
    match value {
        Value::Text(v) => query.push_bind(v.clone()),
        Value::Int(v) => query.push_bind(*v),
        Value::Bool(v) => query.push_bind(*v),
        Value::Time(v) => query.push_bind(*v),
    };
}

fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
