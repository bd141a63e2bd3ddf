//! Provider routing
//!
//! Stateless selection of the provider that may run a task at a given
//! privacy level. Sensitive and encrypted content is never routed to a
//! remote provider, even when no local provider is available.

use crate::neo4j::models::PrivacyLevel;

use super::error::RoutingError;
use super::profiles::{ProviderProfile, TaskKind};

/// Select a provider for `task` at privacy `level`.
///
/// 1. Keep profiles whose capabilities include `task`.
/// 2. For levels requiring local processing keep only local profiles.
/// 3. Prefer the configured default; otherwise the cheapest, ties by name.
pub fn select_provider<'a>(
    task: TaskKind,
    level: PrivacyLevel,
    candidates: &'a [ProviderProfile],
    default: Option<&str>,
) -> Result<&'a ProviderProfile, RoutingError> {
    let eligible: Vec<&ProviderProfile> = candidates
        .iter()
        .filter(|p| p.supports(task))
        .filter(|p| !level.requires_local() || p.is_local)
        .collect();

    if let Some(default) = default {
        if let Some(profile) = eligible.iter().copied().find(|p| p.name == default) {
            return Ok(profile);
        }
    }

    eligible
        .into_iter()
        .min_by(|a, b| {
            a.cost_per_1k_tokens
                .total_cmp(&b.cost_per_1k_tokens)
                .then_with(|| a.name.cmp(&b.name))
        })
        .ok_or(RoutingError::NoEligibleProvider { task, level })
}
