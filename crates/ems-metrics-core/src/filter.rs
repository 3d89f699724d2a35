//! A small document query language.
//!
//! [`Filter`] predicates address fields by dotted path (`content.callSign`)
//! and follow document-database semantics closely enough for the category
//! queries: equality against an array field matches any element,
//! [`Filter::ElemMatch`] requires a single array element to satisfy the
//! whole inner predicate, and range comparisons understand timestamps
//! stored as strings or `{"$date": ..}` wrappers.
//!
//! Store backends evaluate a [`Query`] through [`Query::apply`], so every
//! backend agrees on matching, ordering, and truncation.

use std::cmp::Ordering;

use regex::{Regex, RegexBuilder};
use serde_json::Value;

use crate::models::{id_string, Document};
use crate::temporal::{parse_timestamp, value_to_timestamp};

/// A predicate over one document.
#[derive(Debug, Clone)]
pub enum Filter {
    /// Matches every document.
    All,
    Eq(String, Value),
    In(String, Vec<Value>),
    /// Inclusive bounds; a missing bound is unbounded.
    Range {
        path: String,
        gte: Option<Value>,
        lte: Option<Value>,
    },
    /// Field is present and not `null`.
    Exists(String),
    Regex { path: String, regex: Regex },
    /// Some element of the array at `path` satisfies the inner filter.
    ElemMatch(String, Box<Filter>),
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl Filter {
    pub fn eq(path: &str, value: impl Into<Value>) -> Self {
        Filter::Eq(path.to_string(), value.into())
    }

    pub fn is_in(path: &str, values: impl IntoIterator<Item = impl Into<Value>>) -> Self {
        Filter::In(path.to_string(), values.into_iter().map(Into::into).collect())
    }

    pub fn range(path: &str, gte: Option<Value>, lte: Option<Value>) -> Self {
        Filter::Range {
            path: path.to_string(),
            gte,
            lte,
        }
    }

    pub fn exists(path: &str) -> Self {
        Filter::Exists(path.to_string())
    }

    pub fn elem_match(path: &str, inner: Filter) -> Self {
        Filter::ElemMatch(path.to_string(), Box::new(inner))
    }

    /// Case-insensitive substring match. `needle` is matched literally.
    pub fn contains_ci(path: &str, needle: &str) -> Result<Self, regex::Error> {
        let regex = RegexBuilder::new(&regex::escape(needle))
            .case_insensitive(true)
            .build()?;
        Ok(Filter::Regex {
            path: path.to_string(),
            regex,
        })
    }

    /// Conjunction of `self` and `other`, flattening nested `And`s.
    pub fn and(self, other: Filter) -> Self {
        match (self, other) {
            (Filter::All, f) | (f, Filter::All) => f,
            (Filter::And(mut a), Filter::And(b)) => {
                a.extend(b);
                Filter::And(a)
            }
            (Filter::And(mut a), f) => {
                a.push(f);
                Filter::And(a)
            }
            (f, Filter::And(mut b)) => {
                b.insert(0, f);
                Filter::And(b)
            }
            (a, b) => Filter::And(vec![a, b]),
        }
    }

    pub fn matches(&self, doc: &Value) -> bool {
        match self {
            Filter::All => true,
            Filter::Eq(path, expected) => {
                lookup(doc, path).is_some_and(|v| matches_any(v, |x| values_equal(x, expected)))
            }
            Filter::In(path, candidates) => lookup(doc, path).is_some_and(|v| {
                matches_any(v, |x| candidates.iter().any(|c| values_equal(x, c)))
            }),
            Filter::Range { path, gte, lte } => lookup(doc, path).is_some_and(|v| {
                let lower = gte.as_ref().map_or(true, |b| {
                    matches!(compare_values(v, b), Some(Ordering::Greater | Ordering::Equal))
                });
                let upper = lte.as_ref().map_or(true, |b| {
                    matches!(compare_values(v, b), Some(Ordering::Less | Ordering::Equal))
                });
                lower && upper
            }),
            Filter::Exists(path) => lookup(doc, path).is_some_and(|v| !v.is_null()),
            Filter::Regex { path, regex } => lookup(doc, path).is_some_and(|v| {
                matches_any(v, |x| x.as_str().is_some_and(|s| regex.is_match(s)))
            }),
            Filter::ElemMatch(path, inner) => match lookup(doc, path) {
                Some(Value::Array(items)) => items.iter().any(|item| inner.matches(item)),
                _ => false,
            },
            Filter::And(filters) => filters.iter().all(|f| f.matches(doc)),
            Filter::Or(filters) => filters.iter().any(|f| f.matches(doc)),
        }
    }
}

fn matches_any(value: &Value, mut pred: impl FnMut(&Value) -> bool) -> bool {
    match value {
        Value::Array(items) => pred(value) || items.iter().any(pred),
        other => pred(other),
    }
}

/// Resolve a dotted path inside a document.
pub fn lookup<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(doc, |current, key| match current {
        Value::Object(map) => map.get(key),
        _ => None,
    })
}

fn values_equal(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        // Identifiers compare by their string form: `7`, `"7"` and
        // `{"$oid": "7"}` name the same record.
        (Value::String(_) | Value::Number(_) | Value::Object(_), _)
        | (_, Value::String(_) | Value::Number(_) | Value::Object(_)) => {
            match (id_string(a), id_string(b)) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            }
        }
        _ => false,
    }
}

fn as_timestamp(value: &Value) -> Option<chrono::NaiveDateTime> {
    match value {
        Value::String(s) => parse_timestamp(s),
        Value::Object(_) => value_to_timestamp(value),
        _ => None,
    }
}

/// Order two values the way range predicates and sorts do.
///
/// Numbers compare numerically. Values that both parse as timestamps
/// compare chronologically. Other strings compare lexicographically.
/// Incomparable pairs yield `None`.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    if let (Value::Number(x), Value::Number(y)) = (a, b) {
        return x.as_f64()?.partial_cmp(&y.as_f64()?);
    }
    if let (Some(x), Some(y)) = (as_timestamp(a), as_timestamp(b)) {
        return Some(x.cmp(&y));
    }
    match (a, b) {
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sort {
    pub path: String,
    pub direction: Direction,
}

/// A filter plus optional ordering and row limit.
#[derive(Debug, Clone)]
pub struct Query {
    pub filter: Filter,
    pub sort: Option<Sort>,
    pub limit: Option<usize>,
}

impl Default for Query {
    fn default() -> Self {
        Self::new(Filter::All)
    }
}

impl Query {
    pub fn new(filter: Filter) -> Self {
        Self {
            filter,
            sort: None,
            limit: None,
        }
    }

    pub fn sort_desc(mut self, path: &str) -> Self {
        self.sort = Some(Sort {
            path: path.to_string(),
            direction: Direction::Descending,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Filter, then sort (missing values last in either direction), then
    /// truncate to the limit.
    pub fn apply(&self, docs: impl IntoIterator<Item = Document>) -> Vec<Document> {
        let mut out: Vec<Document> = docs
            .into_iter()
            .filter(|d| self.filter.matches(d))
            .collect();

        if let Some(sort) = &self.sort {
            out.sort_by(|a, b| {
                let va = lookup(a, &sort.path).filter(|v| !v.is_null());
                let vb = lookup(b, &sort.path).filter(|v| !v.is_null());
                match (va, vb) {
                    (None, None) => Ordering::Equal,
                    (None, Some(_)) => Ordering::Greater,
                    (Some(_), None) => Ordering::Less,
                    (Some(x), Some(y)) => {
                        let ord = compare_values(x, y).unwrap_or(Ordering::Equal);
                        match sort.direction {
                            Direction::Ascending => ord,
                            Direction::Descending => ord.reverse(),
                        }
                    }
                }
            });
        }

        if let Some(limit) = self.limit {
            out.truncate(limit);
        }
        out
    }
}
