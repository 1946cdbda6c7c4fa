use serde::Serialize;

use crate::error::HarvestError;

pub fn to_pretty<T: Serialize>(value: &T) -> Result<String, HarvestError> {
    Ok(serde_json::to_string_pretty(value)?)
}
