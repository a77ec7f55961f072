//! Instance count settings of deploy states.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use conveyor_engine::template::contains_expression;

/// Field name reported by field validation.
pub const INSTANCE_COUNT_FIELD: &str = "instanceCount";

/// How a deploy state's instance count is read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceUnitType {
    #[default]
    Count,
    Percentage,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InstanceCountError {
    #[error("Instance count needs to be populated")]
    Missing,

    #[error("Instance count '{0}' is not a valid number")]
    NotANumber(String),

    #[error("Instance count must be greater than 0")]
    Zero,

    #[error("Instance percentage {0} cannot exceed 100")]
    PercentageTooLarge(u32),
}

/// Parse a rendered instance count.
pub fn parse_instance_count(value: &str, unit: InstanceUnitType) -> Result<u32, InstanceCountError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(InstanceCountError::Missing);
    }
    let count: u32 = value
        .parse()
        .map_err(|_| InstanceCountError::NotANumber(value.to_string()))?;
    match (count, unit) {
        (0, _) => Err(InstanceCountError::Zero),
        (n, InstanceUnitType::Percentage) if n > 100 => Err(InstanceCountError::PercentageTooLarge(n)),
        (n, _) => Ok(n),
    }
}

/// Field problems of a configured instance count. Expressions are only
/// checked for presence; they are parsed after rendering.
pub fn validate_instance_count(configured: &str, unit: InstanceUnitType) -> BTreeMap<String, String> {
    let result = if contains_expression(configured) {
        Ok(())
    } else {
        parse_instance_count(configured, unit).map(|_| ())
    };
    match result {
        Ok(()) => BTreeMap::new(),
        Err(e) => BTreeMap::from([(INSTANCE_COUNT_FIELD.to_string(), e.to_string())]),
    }
}

/// Instances to run given the configured count and the capacity ceiling.
pub fn desired_instances(count: u32, unit: InstanceUnitType, max_instances: u32) -> u32 {
    let desired = match unit {
        InstanceUnitType::Count => count,
        InstanceUnitType::Percentage => {
            let rounded_up = (u64::from(max_instances) * u64::from(count)).div_ceil(100);
            u32::try_from(rounded_up).unwrap_or(u32::MAX)
        }
    };
    desired.min(max_instances)
}
