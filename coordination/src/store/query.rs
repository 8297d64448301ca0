//! `query()` filter parsing and matching: `field=value` (eq) and suffixed
//! operators `field__gt|gte|lt|lte|in`. `file_key` is a pseudo-field that
//! compares against the map key rather than a value inside the entry.

use serde_json::{Map, Value};

use crate::error::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
}

#[derive(Debug, Clone)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

const NUMERIC_OPS: [FilterOp; 4] = [FilterOp::Gt, FilterOp::Gte, FilterOp::Lt, FilterOp::Lte];

/// Parse a single `key=value` query pair into a `Filter`.
pub fn parse_filter(raw_key: &str, value: Value) -> Result<Filter, StoreError> {
    if let Some((field, suffix)) = raw_key.rsplit_once("__") {
        let op = match suffix {
            "gt" => FilterOp::Gt,
            "gte" => FilterOp::Gte,
            "lt" => FilterOp::Lt,
            "lte" => FilterOp::Lte,
            "in" => FilterOp::In,
            other => {
                return Err(StoreError::InvalidFilter {
                    field: field.to_string(),
                    operator: other.to_string(),
                })
            }
        };
        Ok(Filter {
            field: field.to_string(),
            op,
            value,
        })
    } else {
        Ok(Filter {
            field: raw_key.to_string(),
            op: FilterOp::Eq,
            value,
        })
    }
}

fn compare_numeric(lhs: f64, op: FilterOp, rhs: f64) -> bool {
    match op {
        FilterOp::Gt => lhs > rhs,
        FilterOp::Gte => lhs >= rhs,
        FilterOp::Lt => lhs < rhs,
        FilterOp::Lte => lhs <= rhs,
        _ => unreachable!("compare_numeric called with non-numeric op"),
    }
}

/// Whether `entry` (keyed by `file_key`) matches every filter (AND).
pub fn matches_filters(
    file_key: &str,
    entry: &Map<String, Value>,
    filters: &[Filter],
) -> Result<bool, StoreError> {
    for filter in filters {
        let field_value = if filter.field == "file_key" {
            Some(Value::String(file_key.to_string()))
        } else {
            entry.get(&filter.field).cloned()
        };

        let matched = match filter.op {
            FilterOp::Eq => field_value.as_ref() == Some(&filter.value),
            FilterOp::In => {
                let candidates = filter.value.as_array().cloned().unwrap_or_default();
                field_value
                    .as_ref()
                    .map(|v| candidates.contains(v))
                    .unwrap_or(false)
            }
            op if NUMERIC_OPS.contains(&op) => {
                match (field_value.as_ref().and_then(Value::as_f64), filter.value.as_f64()) {
                    (Some(lhs), Some(rhs)) => compare_numeric(lhs, op, rhs),
                    // Non-numeric or absent field fails closed (spec §4.3.4):
                    // the entry is excluded, the query itself doesn't error.
                    _ => false,
                }
            }
            _ => unreachable!(),
        };

        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}
