//! Query options for fetching records.

use crate::{error::Result, factory::RecordFactory, Error, Fields, Kind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Comparison operator of a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// Field value is one of the values in an array
    In,
    /// Field value is none of the values in an array
    NotIn,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "!=",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::In => "IN",
            Operator::NotIn => "NOT_IN",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "=" | "==" => Ok(Operator::Eq),
            "!=" => Ok(Operator::Ne),
            "<" => Ok(Operator::Lt),
            "<=" => Ok(Operator::Le),
            ">" => Ok(Operator::Gt),
            ">=" => Ok(Operator::Ge),
            op if op.eq_ignore_ascii_case("in") => Ok(Operator::In),
            op if op.eq_ignore_ascii_case("not_in") || op.eq_ignore_ascii_case("not in") => {
                Ok(Operator::NotIn)
            }
            other => Err(Error::Validation(format!("unknown operator '{}'", other))),
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Ascending,
    Descending,
}

/// A single `field op value` condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    pub op: Operator,
    pub value: Value,
}

/// A single sort key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub field: String,
    pub direction: Direction,
}

/// The query shape handed to the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteQuery {
    pub kind: Kind,
    pub filters: Vec<Filter>,
    pub orders: Vec<Order>,
}

impl RemoteQuery {
    /// An unfiltered, unordered query over a kind.
    pub fn new(kind: impl Into<Kind>) -> Self {
        Self {
            kind: kind.into(),
            filters: Vec::new(),
            orders: Vec::new(),
        }
    }
}

/// Options accepted by [`RecordStore::fetch`](crate::RecordStore::fetch).
///
/// Filters are conjunctive. A factory given here overrides the one
/// registered on the store for this query only.
#[derive(Clone, Default)]
pub struct QueryOptions {
    pub(crate) filters: Vec<Filter>,
    pub(crate) orders: Vec<Order>,
    pub(crate) factory: Option<Arc<dyn RecordFactory>>,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a `field op value` condition.
    pub fn filter(
        mut self,
        field: impl Into<String>,
        op: Operator,
        value: impl Into<Value>,
    ) -> Self {
        self.filters.push(Filter {
            field: field.into(),
            op,
            value: value.into(),
        });
        self
    }

    /// Add one equality condition per entry of `conditions`.
    pub fn where_eq(mut self, conditions: Fields) -> Self {
        for (field, value) in conditions {
            self.filters.push(Filter {
                field,
                op: Operator::Eq,
                value,
            });
        }
        self
    }

    /// Add `[field, operator, value]` triples, parsing each operator.
    pub fn where_triples<I, F, O>(mut self, triples: I) -> Result<Self>
    where
        I: IntoIterator<Item = (F, O, Value)>,
        F: Into<String>,
        O: AsRef<str>,
    {
        for (field, op, value) in triples {
            let op = op.as_ref().parse()?;
            self = self.filter(field, op, value);
        }
        Ok(self)
    }

    /// Add a sort key.
    pub fn order(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.orders.push(Order {
            field: field.into(),
            direction,
        });
        self
    }

    /// Build records with `factory` instead of the store's default.
    pub fn factory(mut self, factory: Arc<dyn RecordFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    pub fn orders(&self) -> &[Order] {
        &self.orders
    }

    pub(crate) fn to_remote(&self, kind: &str) -> RemoteQuery {
        RemoteQuery {
            kind: kind.to_string(),
            filters: self.filters.clone(),
            orders: self.orders.clone(),
        }
    }
}

impl fmt::Debug for QueryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryOptions")
            .field("filters", &self.filters)
            .field("orders", &self.orders)
            .field("factory", &self.factory.as_ref().map(|_| "custom"))
            .finish()
    }
}
