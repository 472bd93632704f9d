//! Sort presets for the connection tree.

use std::cmp::Ordering;

use super::groups::{GroupId, GroupManager};
use crate::error::GroupError;

pub const DEFAULT_SORT_PRESET: &str = "name-asc";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortPreset {
    #[default]
    NameAsc,
    NameDesc,
}

impl SortPreset {
    /// Parse a preset id as stored in settings; unknown ids yield `None`
    pub fn from_id(id: &str) -> Option<Self> {
        match id {
            "name-asc" => Some(SortPreset::NameAsc),
            "name-desc" => Some(SortPreset::NameDesc),
            _ => None,
        }
    }

    pub fn id(&self) -> &'static str {
        match self {
            SortPreset::NameAsc => "name-asc",
            SortPreset::NameDesc => "name-desc",
        }
    }

    fn compare(&self, a: &str, b: &str) -> Ordering {
        let ordering = a.to_lowercase().cmp(&b.to_lowercase()).then_with(|| a.cmp(b));
        match self {
            SortPreset::NameAsc => ordering,
            SortPreset::NameDesc => ordering.reverse(),
        }
    }
}

/// Sort every connection list and every set of sibling groups by name.
/// Returns whether anything moved; the store is saved only in that case.
pub fn apply_connection_sort(groups: &mut GroupManager, preset: SortPreset) -> Result<bool, GroupError> {
    let before = groups.store().clone();

    {
        let store = groups.store_mut();
        store
            .root_connections
            .sort_by(|a, b| preset.compare(a, b));
        for group in store.groups.values_mut() {
            group.connections.sort_by(|a, b| preset.compare(a, b));
        }
    }

    let mut parents: Vec<Option<GroupId>> = vec![None];
    parents.extend(groups.store().groups.keys().copied().map(Some));
    for parent in parents {
        let mut siblings: Vec<(GroupId, String)> = groups
            .store()
            .groups
            .values()
            .filter(|g| g.parent_id == parent)
            .map(|g| (g.id, g.name.clone()))
            .collect();
        if siblings.is_empty() {
            continue;
        }
        siblings.sort_by(|a, b| preset.compare(&a.1, &b.1));
        let ids: Vec<GroupId> = siblings.into_iter().map(|(id, _)| id).collect();
        groups.apply_sibling_order(parent, &ids)?;
    }

    let changed = *groups.store() != before;
    if changed {
        tracing::info!("Applied sort preset {}", preset.id());
        groups.save()?;
    }
    Ok(changed)
}
