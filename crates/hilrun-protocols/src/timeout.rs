//! Protocol timeout declarations

use serde_yaml::Value;
use std::time::Duration;

/// Parse a timeout written either as plain seconds or as a mapping of
/// `days`, `hours`, `minutes` and `seconds` that are summed.
pub fn parse_timeout(value: &Value) -> Option<Duration> {
    match value {
        Value::Number(n) => n.as_u64().map(Duration::from_secs),
        Value::Mapping(map) => {
            let mut total = 0u64;
            let mut any = false;
            for (key, amount) in map {
                let unit = match key.as_str()? {
                    "days" => 86_400,
                    "hours" => 3_600,
                    "minutes" => 60,
                    "seconds" => 1,
                    "yaml_line" => continue,
                    _ => return None,
                };
                total = total.checked_add(amount.as_u64()?.checked_mul(unit)?)?;
                any = true;
            }
            any.then(|| Duration::from_secs(total))
        }
        _ => None,
    }
}
