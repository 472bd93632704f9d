//! Hierarchical connection groups.
//!
//! Groups form a forest: every group has at most one parent and no group is
//! its own ancestor. Each tracked connection nickname lives in exactly one
//! place, either one group's `connections` list or `root_connections`. The
//! nickname → group map and those lists always agree; [`GroupStore::normalize`]
//! restores that after loading data written by older or buggy versions.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ConfigError, GroupError};

pub type GroupId = Uuid;

fn default_true() -> bool {
    true
}

/// Folder-like container for connections
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<GroupId>,
    #[serde(default)]
    pub children: Vec<GroupId>,
    #[serde(default)]
    pub connections: Vec<String>,
    #[serde(default = "default_true")]
    pub expanded: bool,
    /// Display order among groups sharing `parent_id`
    #[serde(default)]
    pub order: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

/// Where to drop an item relative to a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Position {
    Above,
    Below,
}

/// Persisted form of the group tree (`groups.json`)
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GroupStore {
    #[serde(default)]
    pub groups: BTreeMap<GroupId, Group>,
    /// Nickname → owning group, `None` for ungrouped
    #[serde(default)]
    pub connections: BTreeMap<String, Option<GroupId>>,
    /// Ungrouped connections in display order
    #[serde(default)]
    pub root_connections: Vec<String>,
}

impl GroupStore {
    /// Load from `path`; a missing file yields an empty store
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!("Group store {:?} does not exist yet", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;

        serde_json::from_str(&content).map_err(|e| ConfigError::ParseGroups {
            path: path.to_path_buf(),
            source: e,
        })
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self).map_err(ConfigError::SerializeGroups)?;
        super::write_atomic(path, &content).map_err(|e| ConfigError::WriteFile {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Repair dangling references, parent cycles and duplicated or missing
    /// memberships. Returns whether anything changed.
    pub fn normalize(&mut self) -> bool {
        let before = self.clone();
        let ids: BTreeSet<GroupId> = self.groups.keys().copied().collect();

        for group in self.groups.values_mut() {
            if group
                .parent_id
                .is_some_and(|p| p == group.id || !ids.contains(&p))
            {
                group.parent_id = None;
            }
        }

        for id in &ids {
            if self.in_cycle(*id) {
                tracing::warn!("Breaking parent cycle at group {}", id);
                if let Some(group) = self.groups.get_mut(id) {
                    group.parent_id = None;
                }
            }
        }

        let parents: BTreeMap<GroupId, Option<GroupId>> =
            self.groups.values().map(|g| (g.id, g.parent_id)).collect();
        for group in self.groups.values_mut() {
            let id = group.id;
            let mut seen = HashSet::new();
            group
                .children
                .retain(|c| parents.get(c) == Some(&Some(id)) && seen.insert(*c));
        }
        for (child, parent) in &parents {
            if let Some(group) = parent.and_then(|p| self.groups.get_mut(&p)) {
                if !group.children.contains(child) {
                    group.children.push(*child);
                }
            }
        }

        self.normalize_memberships();

        *self != before
    }

    fn in_cycle(&self, start: GroupId) -> bool {
        let mut current = self.groups.get(&start).and_then(|g| g.parent_id);
        for _ in 0..self.groups.len() {
            match current {
                Some(id) if id == start => return true,
                Some(id) => current = self.groups.get(&id).and_then(|g| g.parent_id),
                None => return false,
            }
        }
        false
    }

    fn normalize_memberships(&mut self) {
        let mut owner: BTreeMap<String, Option<GroupId>> = BTreeMap::new();
        for (nickname, group_id) in &self.connections {
            let group_id = group_id.filter(|g| self.groups.contains_key(g));
            owner.insert(nickname.clone(), group_id);
        }
        for group in self.groups.values() {
            for nickname in &group.connections {
                owner.entry(nickname.clone()).or_insert(Some(group.id));
            }
        }
        for nickname in &self.root_connections {
            owner.entry(nickname.clone()).or_insert(None);
        }

        for group in self.groups.values_mut() {
            let id = group.id;
            let mut seen = HashSet::new();
            group
                .connections
                .retain(|n| owner.get(n) == Some(&Some(id)) && seen.insert(n.clone()));
        }
        let mut seen = HashSet::new();
        self.root_connections
            .retain(|n| owner.get(n) == Some(&None) && seen.insert(n.clone()));

        for (nickname, group_id) in &owner {
            let list = match group_id.and_then(|g| self.groups.get_mut(&g)) {
                Some(group) => &mut group.connections,
                None => &mut self.root_connections,
            };
            if !list.contains(nickname) {
                list.push(nickname.clone());
            }
        }

        self.connections = owner;
    }
}

/// A group with its sub-groups, as returned by
/// [`GroupManager::get_group_hierarchy`]
#[derive(Debug, Clone, PartialEq)]
pub struct GroupNode {
    pub group: Group,
    pub children: Vec<GroupNode>,
}

/// Owns the group tree and persists it after every mutation
#[derive(Debug, Clone)]
pub struct GroupManager {
    store: GroupStore,
    path: Option<PathBuf>,
}

impl GroupManager {
    /// Load the store at `path`, repairing it if needed
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, GroupError> {
        let path = path.into();
        let mut store = GroupStore::load_from(&path)?;
        let repaired = store.normalize();

        let manager = Self {
            store,
            path: Some(path),
        };
        if repaired {
            tracing::info!("Repaired group store, saving");
            manager.save()?;
        }
        tracing::info!(
            "Loaded {} groups tracking {} connections",
            manager.store.groups.len(),
            manager.store.connections.len()
        );
        Ok(manager)
    }

    /// Load from the default `groups.json` location
    pub fn load_default() -> Result<Self, GroupError> {
        super::paths::ensure_config_dir().map_err(ConfigError::CreateDir)?;
        let path = super::paths::groups_file().ok_or_else(|| {
            ConfigError::ReadFile {
                path: PathBuf::from("groups.json"),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "Could not determine groups file path",
                ),
            }
        })?;
        Self::load(path)
    }

    /// A manager that never touches disk
    pub fn in_memory() -> Self {
        Self {
            store: GroupStore::default(),
            path: None,
        }
    }

    pub fn store(&self) -> &GroupStore {
        &self.store
    }

    pub(crate) fn store_mut(&mut self) -> &mut GroupStore {
        &mut self.store
    }

    pub fn group(&self, id: GroupId) -> Option<&Group> {
        self.store.groups.get(&id)
    }

    pub fn root_connections(&self) -> &[String] {
        &self.store.root_connections
    }

    /// Write the store; in-memory state stays authoritative on failure
    pub fn save(&self) -> Result<(), GroupError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        self.store
            .save_to(path)
            .inspect_err(|e| tracing::error!("Failed to save groups: {}", e))?;
        Ok(())
    }

    fn group_mut(&mut self, id: GroupId) -> Result<&mut Group, GroupError> {
        self.store.groups.get_mut(&id).ok_or(GroupError::NotFound(id))
    }

    fn ensure_exists(&self, id: Option<GroupId>) -> Result<(), GroupError> {
        match id {
            Some(id) if !self.store.groups.contains_key(&id) => Err(GroupError::NotFound(id)),
            _ => Ok(()),
        }
    }

    fn check_name(&self, name: &str, except: Option<GroupId>) -> Result<String, GroupError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(GroupError::EmptyName);
        }
        let lowered = name.to_lowercase();
        let taken = self
            .store
            .groups
            .values()
            .any(|g| Some(g.id) != except && g.name.to_lowercase() == lowered);
        if taken {
            return Err(GroupError::DuplicateName(name.to_string()));
        }
        Ok(name.to_string())
    }

    fn next_order(&self, parent_id: Option<GroupId>) -> i64 {
        self.store
            .groups
            .values()
            .filter(|g| g.parent_id == parent_id)
            .map(|g| g.order + 1)
            .max()
            .unwrap_or(0)
    }

    /// Create a group. Names are unique across the whole tree, ignoring case.
    pub fn create_group(
        &mut self,
        name: &str,
        parent_id: Option<GroupId>,
        color: Option<String>,
    ) -> Result<GroupId, GroupError> {
        let name = self.check_name(name, None)?;
        self.ensure_exists(parent_id)?;

        let group = Group {
            id: Uuid::new_v4(),
            name,
            parent_id,
            children: Vec::new(),
            connections: Vec::new(),
            expanded: true,
            order: self.next_order(parent_id),
            color,
            created_at: Utc::now(),
        };
        let id = group.id;

        if let Some(parent) = parent_id {
            self.group_mut(parent)?.children.push(id);
        }
        tracing::info!("Created group '{}' ({})", group.name, id);
        self.store.groups.insert(id, group);

        self.save()?;
        Ok(id)
    }

    /// Delete a group, handing its sub-groups and connections to its parent
    /// (or to the root)
    pub fn delete_group(&mut self, id: GroupId) -> Result<(), GroupError> {
        let group = self.store.groups.remove(&id).ok_or(GroupError::NotFound(id))?;
        let parent_id = group.parent_id;

        let mut root_order = self.next_order(None);
        for child_id in &group.children {
            if let Some(child) = self.store.groups.get_mut(child_id) {
                child.parent_id = parent_id;
                if parent_id.is_none() {
                    child.order = root_order;
                    root_order += 1;
                }
            }
        }

        for nickname in &group.connections {
            self.store.connections.insert(nickname.clone(), parent_id);
        }

        match parent_id.and_then(|p| self.store.groups.get_mut(&p)) {
            Some(parent) => {
                let at = parent
                    .children
                    .iter()
                    .position(|c| *c == id)
                    .unwrap_or(parent.children.len());
                parent.children.retain(|c| *c != id);
                let tail = parent.children.split_off(at.min(parent.children.len()));
                parent.children.extend(group.children.iter().copied());
                parent.children.extend(tail);
                parent.connections.extend(group.connections.iter().cloned());
            }
            None => self
                .store
                .root_connections
                .extend(group.connections.iter().cloned()),
        }

        if let Some(siblings) = parent_id
            .and_then(|p| self.store.groups.get(&p))
            .map(|p| p.children.clone())
        {
            self.apply_sibling_order(parent_id, &siblings)?;
        }

        tracing::info!("Deleted group '{}' ({})", group.name, id);
        self.save()
    }

    pub fn rename_group(&mut self, id: GroupId, new_name: &str) -> Result<(), GroupError> {
        let name = self.check_name(new_name, Some(id))?;
        self.group_mut(id)?.name = name;
        self.save()
    }

    pub fn set_group_expanded(&mut self, id: GroupId, expanded: bool) -> Result<(), GroupError> {
        self.group_mut(id)?.expanded = expanded;
        self.save()
    }

    pub fn set_group_color(&mut self, id: GroupId, color: Option<String>) -> Result<(), GroupError> {
        self.group_mut(id)?.color = color;
        self.save()
    }

    /// True when `candidate` is `ancestor` or sits somewhere below it
    pub fn is_descendant(&self, candidate: GroupId, ancestor: GroupId) -> bool {
        let mut current = Some(candidate);
        for _ in 0..=self.store.groups.len() {
            match current {
                Some(id) if id == ancestor => return true,
                Some(id) => current = self.store.groups.get(&id).and_then(|g| g.parent_id),
                None => return false,
            }
        }
        false
    }

    /// Reparent a group. Moving a group below itself or one of its
    /// descendants is rejected.
    pub fn move_group(&mut self, id: GroupId, new_parent: Option<GroupId>) -> Result<(), GroupError> {
        let old_parent = self
            .store
            .groups
            .get(&id)
            .ok_or(GroupError::NotFound(id))?
            .parent_id;
        self.ensure_exists(new_parent)?;

        if let Some(target) = new_parent {
            if self.is_descendant(target, id) {
                return Err(GroupError::Cycle { group: id, target });
            }
        }
        if old_parent == new_parent {
            return Ok(());
        }

        if let Some(parent) = old_parent.and_then(|p| self.store.groups.get_mut(&p)) {
            parent.children.retain(|c| *c != id);
        }
        let order = self.next_order(new_parent);
        if let Some(parent) = new_parent {
            self.group_mut(parent)?.children.push(id);
        }
        let group = self.group_mut(id)?;
        group.parent_id = new_parent;
        group.order = order;

        self.save()
    }

    fn detach_connection(&mut self, nickname: &str) -> bool {
        let mut found = false;
        for group in self.store.groups.values_mut() {
            let before = group.connections.len();
            group.connections.retain(|n| n != nickname);
            found |= group.connections.len() != before;
        }
        let before = self.store.root_connections.len();
        self.store.root_connections.retain(|n| n != nickname);
        found |= self.store.root_connections.len() != before;
        found
    }

    /// Move a connection into `target` (`None` for the root). Works for
    /// nicknames that were not tracked before.
    pub fn move_connection(&mut self, nickname: &str, target: Option<GroupId>) -> Result<(), GroupError> {
        self.ensure_exists(target)?;
        self.detach_connection(nickname);

        match target {
            Some(id) => self.group_mut(id)?.connections.push(nickname.to_string()),
            None => self.store.root_connections.push(nickname.to_string()),
        }
        self.store.connections.insert(nickname.to_string(), target);

        self.save()
    }

    /// Stop tracking a connection. Returns whether it was tracked.
    pub fn remove_connection(&mut self, nickname: &str) -> Result<bool, GroupError> {
        let detached = self.detach_connection(nickname);
        let tracked = self.store.connections.remove(nickname).is_some();
        if detached || tracked {
            self.save()?;
        }
        Ok(detached || tracked)
    }

    /// Re-key a connection, keeping its group and position
    pub fn rename_connection(&mut self, old_nickname: &str, new_nickname: &str) -> Result<(), GroupError> {
        if old_nickname == new_nickname {
            return Ok(());
        }
        let owner = self
            .store
            .connections
            .remove(old_nickname)
            .ok_or_else(|| GroupError::UnknownConnection(old_nickname.to_string()))?;

        // The new name may already be tracked elsewhere; it takes the old slot
        self.detach_connection(new_nickname);

        let list = match owner.and_then(|g| self.store.groups.get_mut(&g)) {
            Some(group) => &mut group.connections,
            None => &mut self.store.root_connections,
        };
        match list.iter().position(|n| n == old_nickname) {
            Some(at) => list[at] = new_nickname.to_string(),
            None => list.push(new_nickname.to_string()),
        }
        let mut seen = HashSet::new();
        list.retain(|n| n != old_nickname && seen.insert(n.clone()));

        self.store.connections.insert(new_nickname.to_string(), owner);
        self.save()
    }

    fn connection_list_mut(&mut self, owner: Option<GroupId>) -> Result<&mut Vec<String>, GroupError> {
        match owner {
            Some(id) => Ok(&mut self.group_mut(id)?.connections),
            None => Ok(&mut self.store.root_connections),
        }
    }

    /// Place `nickname` directly above or below `target_nickname`. Both must
    /// already share a group (or both be ungrouped).
    pub fn reorder_connection_in_group(
        &mut self,
        nickname: &str,
        target_nickname: &str,
        position: Position,
    ) -> Result<(), GroupError> {
        let owner_of = |n: &str| {
            self.store
                .connections
                .get(n)
                .copied()
                .ok_or_else(|| GroupError::UnknownConnection(n.to_string()))
        };
        let source = owner_of(nickname)?;
        let target = owner_of(target_nickname)?;
        if source != target {
            return Err(GroupError::DifferentGroups(
                nickname.to_string(),
                target_nickname.to_string(),
            ));
        }
        if nickname == target_nickname {
            return Ok(());
        }

        let list = self.connection_list_mut(source)?;
        list.retain(|n| n != nickname);
        let at = match list.iter().position(|n| n == target_nickname) {
            Some(idx) if position == Position::Above => idx,
            Some(idx) => idx + 1,
            None => list.len(),
        };
        list.insert(at, nickname.to_string());

        self.save()
    }

    /// Place group `source_id` directly above or below `target_id`. Both must
    /// share a parent.
    pub fn reorder_group(
        &mut self,
        source_id: GroupId,
        target_id: GroupId,
        position: Position,
    ) -> Result<(), GroupError> {
        let source_parent = self.group(source_id).ok_or(GroupError::NotFound(source_id))?.parent_id;
        let target_parent = self.group(target_id).ok_or(GroupError::NotFound(target_id))?.parent_id;
        if source_parent != target_parent {
            return Err(GroupError::DifferentParents { source_id, target_id });
        }
        if source_id == target_id {
            return Ok(());
        }

        let mut siblings = match source_parent {
            Some(parent) => self.group_mut(parent)?.children.clone(),
            None => self.sorted_ids(None),
        };
        siblings.retain(|id| *id != source_id);
        let at = match siblings.iter().position(|id| *id == target_id) {
            Some(idx) if position == Position::Above => idx,
            Some(idx) => idx + 1,
            None => siblings.len(),
        };
        siblings.insert(at, source_id);

        self.apply_sibling_order(source_parent, &siblings)?;
        self.save()
    }

    /// Rewrite `order` for the given siblings and, below a parent, its
    /// `children` list
    pub(crate) fn apply_sibling_order(
        &mut self,
        parent: Option<GroupId>,
        siblings: &[GroupId],
    ) -> Result<(), GroupError> {
        for (idx, id) in siblings.iter().enumerate() {
            self.group_mut(*id)?.order = idx as i64;
        }
        if let Some(parent) = parent {
            self.group_mut(parent)?.children = siblings.to_vec();
        }
        Ok(())
    }

    /// Ids of the groups under `parent`, in display order
    pub fn sorted_ids(&self, parent: Option<GroupId>) -> Vec<GroupId> {
        let mut groups: Vec<&Group> = self
            .store
            .groups
            .values()
            .filter(|g| g.parent_id == parent)
            .collect();
        groups.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.name.cmp(&b.name)));
        groups.into_iter().map(|g| g.id).collect()
    }

    /// The whole tree, each level sorted by `order`
    pub fn get_group_hierarchy(&self) -> Vec<GroupNode> {
        self.build_level(None)
    }

    fn build_level(&self, parent: Option<GroupId>) -> Vec<GroupNode> {
        self.sorted_ids(parent)
            .into_iter()
            .filter_map(|id| self.store.groups.get(&id))
            .map(|group| GroupNode {
                group: group.clone(),
                children: self.build_level(Some(group.id)),
            })
            .collect()
    }

    /// Owning group of a connection; `None` when ungrouped or untracked
    pub fn get_connection_group(&self, nickname: &str) -> Option<GroupId> {
        self.store.connections.get(nickname).copied().flatten()
    }

    /// Connections directly in `group` (`None` for the root)
    pub fn group_connections(&self, group: Option<GroupId>) -> Option<&[String]> {
        match group {
            Some(id) => self.store.groups.get(&id).map(|g| g.connections.as_slice()),
            None => Some(&self.store.root_connections),
        }
    }

    /// Align tracked nicknames with the connections that actually exist:
    /// unknown ones are added to the root, vanished ones dropped. Returns
    /// whether anything changed.
    pub fn sync_connections<S: AsRef<str>>(&mut self, nicknames: &[S]) -> Result<bool, GroupError> {
        let before = self.store.clone();
        let live: HashSet<&str> = nicknames.iter().map(|n| n.as_ref()).collect();

        self.store.connections.retain(|n, _| live.contains(n.as_str()));
        for group in self.store.groups.values_mut() {
            group.connections.retain(|n| live.contains(n.as_str()));
        }
        self.store
            .root_connections
            .retain(|n| live.contains(n.as_str()));

        for nickname in nicknames {
            let nickname = nickname.as_ref();
            let listed = self.store.root_connections.iter().any(|n| n == nickname)
                || self
                    .store
                    .groups
                    .values()
                    .any(|g| g.connections.iter().any(|n| n == nickname));
            if !self.store.connections.contains_key(nickname) && !listed {
                self.store.root_connections.push(nickname.to_string());
                self.store.connections.insert(nickname.to_string(), None);
            }
        }
        self.store.normalize();

        let changed = self.store != before;
        if changed {
            tracing::debug!("Group memberships synchronised with connection list");
            self.save()?;
        }
        Ok(changed)
    }
}
