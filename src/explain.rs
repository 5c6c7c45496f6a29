//! Feature attributions returned by the explain operation.
//!
//! The service answers with `response.data[<cutoff date>][<step>][<feature>]`;
//! the last feature of every step is the target itself.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{ClientError, ClientResult};
use crate::table::{value_as_f64, IndexKey};

pub const DEFAULT_MAX_DRIVERS: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Driver {
    pub feature: String,
    /// Absolute contribution.
    pub impact: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Explanation {
    pub cutoff_date: String,
    pub step: String,
    /// Largest first; an aggregate row for the remainder comes last.
    pub drivers: Vec<Driver>,
}

fn explanation_data(response: &Value) -> ClientResult<&Map<String, Value>> {
    response
        .get("response")
        .and_then(|inner| inner.get("data"))
        .and_then(Value::as_object)
        .ok_or_else(|| ClientError::malformed("explanation response has no response.data object"))
}

/// Finds the entry for `cutoff_date`, matching either the exact key or any key
/// that denotes the same timestamp (`2024-01-10` vs `2024-01-10T00:00:00`).
pub fn cutoff_entry<'a>(
    response: &'a Value,
    cutoff_date: &str,
) -> ClientResult<(&'a str, &'a Value)> {
    let data = explanation_data(response)?;
    if let Some((key, value)) = data.get_key_value(cutoff_date) {
        return Ok((key.as_str(), value));
    }
    let wanted = IndexKey::from_value(&Value::String(cutoff_date.to_string()));
    data.iter()
        .find(|(key, _)| IndexKey::from_value(&Value::String((*key).clone())) == wanted)
        .map(|(key, value)| (key.as_str(), value))
        .ok_or_else(|| {
            let available: Vec<&str> = data.keys().map(String::as_str).collect();
            ClientError::validation(format!(
                "no explanation for cutoff date {cutoff_date}; available: {}",
                available.join(", ")
            ))
        })
}

/// Picks the `forecasted_step`-th step (0-based) in sorted key order.
pub fn select_step(
    cutoff: &Value,
    forecasted_step: usize,
) -> ClientResult<(&str, &Map<String, Value>)> {
    let steps = cutoff
        .as_object()
        .ok_or_else(|| ClientError::malformed("explanation entry is not an object"))?;
    let mut keys: Vec<&String> = steps.keys().collect();
    keys.sort();
    let key = keys.get(forecasted_step).copied().ok_or_else(|| {
        ClientError::validation(format!(
            "forecasted step {forecasted_step} out of range; {} steps available",
            keys.len()
        ))
    })?;
    let contributions = steps
        .get(key.as_str())
        .and_then(Value::as_object)
        .ok_or_else(|| ClientError::malformed(format!("step {key} is not a feature map")))?;
    Ok((key.as_str(), contributions))
}

/// Ranks features by absolute contribution, excluding the final entry (the
/// target). Beyond `max_displayed`, the rest collapse into one summed row.
pub fn rank_drivers(contributions: &Map<String, Value>, max_displayed: usize) -> Vec<Driver> {
    let feature_count = contributions.len().saturating_sub(1);
    let mut drivers: Vec<Driver> = contributions
        .iter()
        .take(feature_count)
        .map(|(feature, value)| Driver {
            feature: feature.clone(),
            impact: value_as_f64(value).map(f64::abs).unwrap_or(0.0),
        })
        .collect();
    drivers.sort_by(|a, b| b.impact.total_cmp(&a.impact));

    if drivers.len() > max_displayed {
        let rest = drivers.split_off(max_displayed);
        drivers.push(Driver {
            feature: format!("Sum of the {} remaining features", rest.len()),
            impact: rest.iter().map(|driver| driver.impact).sum(),
        });
    }
    drivers
}

pub fn explanation_from_response(
    response: &Value,
    cutoff_date: &str,
    forecasted_step: usize,
    max_displayed: usize,
) -> ClientResult<Explanation> {
    let (cutoff_key, cutoff) = cutoff_entry(response, cutoff_date)?;
    let (step, contributions) = select_step(cutoff, forecasted_step)?;
    Ok(Explanation {
        cutoff_date: cutoff_key.to_string(),
        step: step.to_string(),
        drivers: rank_drivers(contributions, max_displayed),
    })
}
