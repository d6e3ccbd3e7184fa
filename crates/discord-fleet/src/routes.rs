//! Route canonicalisation for the `http` counter.
//!
//! Raw request URLs carry snowflakes, emoji and query strings, which would
//! explode the label space. A route keeps only the static shape of the path:
//!
//! ```text
//! https://discord.com/api/v10/channels/81384788765712384/messages?limit=50
//!   -> /channels/_id/messages
//! ```

use std::fmt;

/// Placeholder that replaces identifier segments.
pub const ID_PLACEHOLDER: &str = "_id";

/// A normalised, low-cardinality route label.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteLabel(String);

impl RouteLabel {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RouteLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<RouteLabel> for String {
    fn from(label: RouteLabel) -> Self {
        label.0
    }
}

/// Normalise a raw request URL into a [`RouteLabel`].
///
/// Returns `None` when what is left after stripping the `scheme://host/api/vN`
/// prefix is not an absolute path, which is the case for every URL outside a
/// versioned API.
pub fn normalize_route(raw_url: &str) -> Option<RouteLabel> {
    let without_query = raw_url.split('?').next().unwrap_or_default();
    let path = strip_api_prefix(without_query);

    if !path.starts_with('/') {
        return None;
    }

    let route = path
        .split('/')
        .map(|segment| {
            if is_identifier(segment) {
                ID_PLACEHOLDER
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/");

    Some(RouteLabel(route))
}

/// Strip `scheme://host/api/v<N>`; anything else is returned unchanged.
fn strip_api_prefix(url: &str) -> &str {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url;
    };
    if scheme.is_empty() {
        return url;
    }

    let Some(slash) = rest.find('/') else {
        return url;
    };
    let (host, path) = rest.split_at(slash);
    if host.is_empty() {
        return url;
    }

    let Some(after_version) = path.strip_prefix("/api/v") else {
        return url;
    };
    let digits = after_version
        .bytes()
        .take_while(|b| b.is_ascii_digit())
        .count();
    if digits == 0 {
        return url;
    }

    &after_version[digits..]
}

/// Numeric ids, uppercase tokens and percent-encoded emoji.
fn is_identifier(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .bytes()
            .all(|b| b.is_ascii_digit() || b.is_ascii_uppercase() || b == b'%')
}
