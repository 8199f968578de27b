//! The `channel` module holds the pure functions that validate Bayeux
//! channel names and compare channel patterns.
//!
//! A pattern ending in `/**` matches its prefix and every descendant; a
//! pattern ending in `/*` matches exactly one more segment; anything else
//! matches only itself.

use crate::utils::error::CometError;

const SINGLE_WILDCARD: &str = "*";
const DEEP_WILDCARD: &str = "**";

/// Checks that `channel` starts with `/`, has no empty segments and only
/// uses a wildcard as its final segment.
pub fn validate(channel: &str) -> Result<(), CometError> {
    let Some(rest) = channel.strip_prefix('/') else {
        return Err(CometError::InvalidChannel(format!(
            "{channel:?} must start with '/'"
        )));
    };

    let segments: Vec<&str> = rest.split('/').collect();
    let last = segments.len() - 1;
    for (i, segment) in segments.iter().enumerate() {
        if segment.is_empty() {
            return Err(CometError::InvalidChannel(format!(
                "{channel:?} has an empty segment"
            )));
        }
        let is_wildcard = *segment == SINGLE_WILDCARD || *segment == DEEP_WILDCARD;
        if segment.contains('*') && (!is_wildcard || i != last) {
            return Err(CometError::InvalidChannel(format!(
                "{channel:?} may only use '*' or '**' as its last segment"
            )));
        }
    }
    Ok(())
}

pub fn is_wildcard(pattern: &str) -> bool {
    pattern.ends_with("/*") || pattern.ends_with("/**")
}

pub fn is_meta(channel: &str) -> bool {
    channel == "/meta" || channel.starts_with("/meta/")
}

/// Whether `channel` is delivered to a subscription on `pattern`.
pub fn matches(pattern: &str, channel: &str) -> bool {
    if let Some(prefix) = pattern.strip_suffix("/**") {
        return channel == prefix
            || channel
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('/') && rest.len() > 1);
    }

    if let Some(prefix) = pattern.strip_suffix("/*") {
        return channel
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix('/'))
            .is_some_and(|segment| !segment.is_empty() && !segment.contains('/'));
    }

    pattern == channel
}

/// Whether a subscription on `pattern` already covers everything a
/// subscription on `channel` (itself possibly a pattern) would receive.
pub fn is_parent(pattern: &str, channel: &str) -> bool {
    if pattern == channel || !is_wildcard(pattern) {
        return false;
    }
    if !pattern.ends_with("/**") && channel.ends_with("/**") {
        return false;
    }
    matches(pattern, channel)
}

#[cfg(test)]
mod tests;
