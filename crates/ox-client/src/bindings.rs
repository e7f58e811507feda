//! Suggested-binding storage and the resolver that turns an action-state
//! query into concrete `(user path, component path)` driver queries.
//!
//! A binding's subaction path is inferred as the longest of the action's
//! declared subaction paths that prefixes the binding path, so trackers,
//! feet, and other top-level user paths resolve the same way hands do.

use std::collections::HashMap;

use crate::handle::{ActionHandle, PathHandle};
use crate::paths::PathInterner;

#[derive(Debug, Clone)]
pub struct BindingData {
    pub action: ActionHandle,
    pub subaction_path: Option<PathHandle>,
    pub profiles: Vec<PathHandle>,
}

/// One concrete driver query derived from a surviving binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingCandidate {
    pub user_path: String,
    pub component_path: String,
}

/// Split a full binding path into user and component halves:
/// `/user/hand/left/input/trigger/value` -> (`/user/hand/left`,
/// `/input/trigger/value`).
pub fn split_binding_path(full_path: &str) -> (&str, &str) {
    for marker in ["/input/", "/output/"] {
        if let Some(position) = full_path.find(marker) {
            return (&full_path[..position], &full_path[position..]);
        }
    }
    (full_path, "")
}

#[derive(Default)]
pub struct BindingTable {
    entries: HashMap<PathHandle, BindingData>,
}

impl BindingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one suggested binding under a profile. Repeated suggestions
    /// for the same binding path accumulate profiles and keep the latest
    /// action.
    pub fn suggest(
        &mut self,
        binding_path: PathHandle,
        binding_string: &str,
        action: ActionHandle,
        declared_subactions: &[(PathHandle, String)],
        profile: PathHandle,
    ) {
        let subaction_path = declared_subactions
            .iter()
            .filter(|(_, prefix)| binding_string.starts_with(prefix.as_str()))
            .max_by_key(|(_, prefix)| prefix.len())
            .map(|(token, _)| *token);

        let entry = self.entries.entry(binding_path).or_insert(BindingData {
            action,
            subaction_path,
            profiles: Vec::new(),
        });
        entry.action = action;
        entry.subaction_path = subaction_path;
        if !entry.profiles.contains(&profile) {
            entry.profiles.push(profile);
        }
    }

    /// Bindings that survive the three filters of an action-state query:
    /// same action, compatible subaction path, current profile present.
    pub fn candidates(
        &self,
        action: ActionHandle,
        subaction_query: Option<PathHandle>,
        current_profile: Option<PathHandle>,
        paths: &PathInterner,
    ) -> Vec<BindingCandidate> {
        let mut candidates = Vec::new();
        for (&binding_path, data) in &self.entries {
            if data.action != action {
                continue;
            }
            if let (Some(query), Some(bound)) = (subaction_query, data.subaction_path) {
                if query != bound {
                    continue;
                }
            }
            if let Some(profile) = current_profile {
                if !data.profiles.contains(&profile) {
                    continue;
                }
            }
            let Some(full_path) = paths.string_of(binding_path) else {
                continue;
            };
            let (user_path, component_path) = split_binding_path(full_path);
            if component_path.is_empty() {
                continue;
            }
            candidates.push(BindingCandidate {
                user_path: user_path.to_owned(),
                component_path: component_path.to_owned(),
            });
        }
        // deterministic order regardless of map iteration
        candidates.sort();
        candidates
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl PartialOrd for BindingCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BindingCandidate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (&self.user_path, &self.component_path).cmp(&(&other.user_path, &other.component_path))
    }
}
