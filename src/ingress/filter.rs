use std::fmt;

use crate::utils::BridgeError;

/// Longest filter the MQTT wire format can carry.
const MAX_FILTER_LEN: usize = 65535;

/// A validated MQTT topic filter.
///
/// `+` matches exactly one level and must occupy the whole level; `#` matches
/// any number of trailing levels and must be the last level.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicFilter(String);

impl TopicFilter {
    pub fn new(filter: impl Into<String>) -> Result<Self, BridgeError> {
        let filter = filter.into();
        if let Err(reason) = check(&filter) {
            return Err(BridgeError::InvalidTopicFilter { filter, reason });
        }
        Ok(Self(filter))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn check(filter: &str) -> Result<(), &'static str> {
    if filter.is_empty() {
        return Err("filter is empty");
    }
    if filter.len() > MAX_FILTER_LEN {
        return Err("filter is longer than 65535 bytes");
    }
    if filter.contains('\0') {
        return Err("filter contains a null character");
    }

    let mut levels = filter.split('/').peekable();
    while let Some(level) = levels.next() {
        if level.contains('+') && level != "+" {
            return Err("`+` must occupy an entire level");
        }
        if level.contains('#') {
            if level != "#" {
                return Err("`#` must occupy an entire level");
            }
            if levels.peek().is_some() {
                return Err("`#` must be the last level");
            }
        }
    }
    Ok(())
}

impl fmt::Display for TopicFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
