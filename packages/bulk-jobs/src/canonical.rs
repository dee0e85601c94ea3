//! Canonical page identity.
//!
//! Two requests that describe the same logical page resolve to the same key,
//! regardless of case or incidental whitespace. Keys are unique within a job,
//! so collisions are how duplicate submissions collapse into one item.

use std::collections::HashSet;

use crate::error::{EngineError, Result};
use crate::types::page::{PageMode, PageRequest};

/// A submitted request with its resolved key and submission position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRequest {
    /// Index in the submitted batch
    pub idx: usize,
    pub canonical_key: String,
    pub request: PageRequest,
}

/// Resolve the canonical key for one page request.
///
/// Returns the validation message if the request lacks a field its mode
/// requires.
pub fn canonical_key(request: &PageRequest) -> std::result::Result<String, String> {
    request.validate()?;

    let key = match request.mode {
        PageMode::ServiceHub => format!("service_hub:{}", normalize(field(&request.hub_key))),
        PageMode::CityHub => {
            let slug = match request.city_slug.as_deref().filter(|s| !s.trim().is_empty()) {
                Some(slug) => slugify(slug),
                None => slugify(&format!(
                    "{}-{}",
                    field(&request.city),
                    field(&request.state)
                )),
            };
            format!("city_hub:{}", slug)
        }
        PageMode::ServiceCity => format!(
            "service_city:{}|{}|{}",
            escape_part(&normalize(field(&request.service))),
            escape_part(&normalize(field(&request.city))),
            escape_part(&normalize(field(&request.state)))
        ),
    };

    Ok(key)
}

/// Resolve keys for a whole batch and drop later duplicates.
///
/// The first request with a given key wins; its submission index is kept.
/// Any invalid request rejects the batch.
pub fn dedupe(requests: Vec<PageRequest>) -> Result<Vec<ResolvedRequest>> {
    let mut seen = HashSet::with_capacity(requests.len());
    let mut resolved = Vec::with_capacity(requests.len());

    for (idx, request) in requests.into_iter().enumerate() {
        let key = canonical_key(&request)
            .map_err(|reason| EngineError::InvalidRequest { index: idx, reason })?;

        if seen.insert(key.clone()) {
            resolved.push(ResolvedRequest {
                idx,
                canonical_key: key,
                request,
            });
        }
    }

    Ok(resolved)
}

/// Trim, lowercase and collapse internal whitespace runs to one space.
pub fn normalize(value: &str) -> String {
    value
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Lowercase alphanumerics; every other run becomes a single `-`.
pub fn slugify(value: &str) -> String {
    let mut slug = String::with_capacity(value.len());
    let mut pending_dash = false;

    for c in value.chars() {
        if c.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.extend(c.to_lowercase());
        } else {
            pending_dash = true;
        }
    }

    slug
}

/// Escape the `|` separator (and the escape itself) inside one key part.
fn escape_part(part: &str) -> String {
    let mut escaped = String::with_capacity(part.len());
    for c in part.chars() {
        if c == '|' || c == '\\' {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn field(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or_default()
}
