//! In-memory vault model.
//!
//! Groups and entries live in flat maps keyed by their stable ids. Parent
//! links are ids, never references, and every re-parenting operation checks
//! for cycles before it touches anything.
//!
//! Group names and entry titles are stored trimmed: `" Mail "` becomes
//! `"Mail"`, and a name that is empty after trimming is `InvalidInput`.
//! Other entry fields are stored exactly as given.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use zeroize::Zeroizing;

use prasword_common::{EntryId, Error, GroupId, Result, SecretString};

/// Envelope marker written into every serialized model.
pub const MODEL_FORMAT: &str = "prasword-model";

/// Current model envelope version.
pub const MODEL_VERSION: u32 = 1;

/// A folder of entries and subgroups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    /// Stable identifier.
    pub id: GroupId,
    /// Display name.
    pub name: String,
    /// Parent group; `None` only for the root.
    pub parent: Option<GroupId>,
    /// Child groups in display order.
    pub children: Vec<GroupId>,
    /// Entries in display order.
    pub entries: Vec<EntryId>,
}

impl Group {
    fn new(name: String, parent: Option<GroupId>) -> Self {
        Self {
            id: GroupId::generate(),
            name,
            parent,
            children: Vec::new(),
            entries: Vec::new(),
        }
    }

    /// Whether the group holds neither subgroups nor entries.
    pub fn is_empty(&self) -> bool {
        self.children.is_empty() && self.entries.is_empty()
    }
}

/// A stored credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Stable identifier.
    pub id: EntryId,
    /// Owning group.
    pub group: GroupId,
    pub title: String,
    pub username: String,
    /// The protected value. Never indexed or logged.
    pub secret: SecretString,
    pub url: String,
    pub notes: String,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

/// Fields for a new entry.
#[derive(Debug, Clone, Default)]
pub struct NewEntry {
    pub title: String,
    pub username: String,
    pub secret: SecretString,
    pub url: String,
    pub notes: String,
}

impl NewEntry {
    /// Start a new entry with only a title.
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }
}

/// Partial update of an entry. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct EntryPatch {
    pub title: Option<String>,
    pub username: Option<String>,
    pub secret: Option<SecretString>,
    pub url: Option<String>,
    pub notes: Option<String>,
}

impl EntryPatch {
    /// Whether the patch changes nothing.
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.username.is_none()
            && self.secret.is_none()
            && self.url.is_none()
            && self.notes.is_none()
    }
}

/// What happens to the contents of a removed group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovePolicy {
    /// Refuse with `NotEmpty` unless the group has no subgroups or entries.
    FailIfNotEmpty,
    /// Delete every descendant group and entry.
    Cascade,
    /// Move subgroups and entries to another group first.
    ReassignTo(GroupId),
}

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    format: &'a str,
    version: u32,
    root: GroupId,
    groups: Vec<&'a Group>,
    entries: Vec<&'a Entry>,
}

#[derive(Deserialize)]
struct EnvelopeHeader {
    format: String,
    version: u32,
}

#[derive(Deserialize)]
struct Envelope {
    root: GroupId,
    groups: Vec<Group>,
    entries: Vec<Entry>,
}

/// The decrypted vault contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultModel {
    root: GroupId,
    groups: BTreeMap<GroupId, Group>,
    entries: BTreeMap<EntryId, Entry>,
}

impl VaultModel {
    /// Create a model holding only a root group.
    ///
    /// # Errors
    /// - `InvalidInput` if the name is blank
    pub fn new(root_name: &str) -> Result<Self> {
        let root = Group::new(clean_name(root_name)?, None);
        let id = root.id;
        let mut groups = BTreeMap::new();
        groups.insert(id, root);
        Ok(Self {
            root: id,
            groups,
            entries: BTreeMap::new(),
        })
    }

    // -- reads ---------------------------------------------------------------

    /// Id of the root group.
    pub fn root_id(&self) -> GroupId {
        self.root
    }

    /// The root group.
    pub fn root(&self) -> &Group {
        // The root is inserted at construction and can never be removed.
        &self.groups[&self.root]
    }

    /// Look up a group.
    pub fn group(&self, id: GroupId) -> Result<&Group> {
        self.groups
            .get(&id)
            .ok_or_else(|| Error::NotFound(format!("Group {} not found", id)))
    }

    /// Direct subgroups of a group, in order.
    pub fn children(&self, id: GroupId) -> Result<Vec<&Group>> {
        let group = self.group(id)?;
        Ok(group
            .children
            .iter()
            .filter_map(|child| self.groups.get(child))
            .collect())
    }

    /// Look up an entry.
    pub fn entry(&self, id: EntryId) -> Result<&Entry> {
        self.entries
            .get(&id)
            .ok_or_else(|| Error::NotFound(format!("Entry {} not found", id)))
    }

    /// Entries directly inside a group, in order.
    pub fn entries_in(&self, id: GroupId) -> Result<Vec<&Entry>> {
        let group = self.group(id)?;
        Ok(group
            .entries
            .iter()
            .filter_map(|entry| self.entries.get(entry))
            .collect())
    }

    /// All entries in id order.
    pub fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.entries.values()
    }

    /// All groups in id order.
    pub fn groups(&self) -> impl Iterator<Item = &Group> {
        self.groups.values()
    }

    /// Number of entries directly inside each group.
    pub fn entry_counts(&self) -> BTreeMap<GroupId, usize> {
        self.groups
            .values()
            .map(|group| (group.id, group.entries.len()))
            .collect()
    }

    /// Number of entries in the vault.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of groups, root included.
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Whether `node` is `ancestor` or lies anywhere below it.
    pub fn is_within(&self, node: GroupId, ancestor: GroupId) -> bool {
        let mut current = Some(node);
        // Bounded walk; a well-formed tree is never deeper than its size.
        for _ in 0..=self.groups.len() {
            match current {
                Some(id) if id == ancestor => return true,
                Some(id) => current = self.groups.get(&id).and_then(|g| g.parent),
                None => return false,
            }
        }
        false
    }

    /// A group and all its descendants, parents before children.
    pub fn subtree(&self, id: GroupId) -> Result<Vec<GroupId>> {
        self.group(id)?;
        let mut order = Vec::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            order.push(next);
            if let Some(group) = self.groups.get(&next) {
                stack.extend(group.children.iter().rev().copied());
            }
        }
        Ok(order)
    }

    // -- group mutations -----------------------------------------------------

    /// Create a subgroup.
    ///
    /// # Errors
    /// - `NotFound` if the parent does not exist
    /// - `InvalidInput` if the name is blank
    pub fn add_group(&mut self, parent: GroupId, name: &str) -> Result<GroupId> {
        let name = clean_name(name)?;
        self.group(parent)?;

        let group = Group::new(name, Some(parent));
        let id = group.id;
        self.groups.insert(id, group);
        self.group_mut(parent)?.children.push(id);
        Ok(id)
    }

    /// Rename a group.
    pub fn rename_group(&mut self, id: GroupId, name: &str) -> Result<()> {
        let name = clean_name(name)?;
        self.group_mut(id)?.name = name;
        Ok(())
    }

    /// Remove a group according to `policy`.
    ///
    /// Returns the ids of entries deleted along with it (only non-empty for
    /// `Cascade`).
    ///
    /// # Errors
    /// - `InvalidInput` for the root group
    /// - `NotEmpty` under `FailIfNotEmpty` when the group has contents
    /// - `Cycle` if the reassignment target lies inside the removed group
    /// - `NotFound` for unknown ids
    pub fn remove_group(&mut self, id: GroupId, policy: RemovePolicy) -> Result<Vec<EntryId>> {
        if id == self.root {
            return Err(Error::InvalidInput(
                "The root group cannot be removed".to_string(),
            ));
        }
        let group = self.group(id)?.clone();

        let removed_entries = match policy {
            RemovePolicy::FailIfNotEmpty => {
                if !group.is_empty() {
                    return Err(Error::NotEmpty(format!(
                        "Group '{}' still holds {} subgroup(s) and {} entry(ies)",
                        group.name,
                        group.children.len(),
                        group.entries.len()
                    )));
                }
                Vec::new()
            }
            RemovePolicy::Cascade => {
                let doomed = self.subtree(id)?;
                let mut removed = Vec::new();
                for gid in &doomed {
                    if let Some(g) = self.groups.remove(gid) {
                        for eid in &g.entries {
                            self.entries.remove(eid);
                            removed.push(*eid);
                        }
                    }
                }
                removed
            }
            RemovePolicy::ReassignTo(target) => {
                self.group(target)?;
                if self.is_within(target, id) {
                    return Err(Error::Cycle(format!(
                        "Cannot reassign contents of group '{}' into itself or a descendant",
                        group.name
                    )));
                }
                for child in &group.children {
                    self.group_mut(*child)?.parent = Some(target);
                }
                for eid in &group.entries {
                    if let Some(entry) = self.entries.get_mut(eid) {
                        entry.group = target;
                    }
                }
                let dest = self.group_mut(target)?;
                dest.children.extend(group.children.iter().copied());
                dest.entries.extend(group.entries.iter().copied());
                Vec::new()
            }
        };

        self.groups.remove(&id);
        if let Some(parent) = group.parent {
            self.group_mut(parent)?.children.retain(|c| *c != id);
        }
        Ok(removed_entries)
    }

    /// Move a group under a new parent.
    ///
    /// # Errors
    /// - `InvalidInput` for the root group
    /// - `Cycle` if `new_parent` is the group itself or one of its descendants
    /// - `NotFound` for unknown ids
    pub fn move_group(&mut self, id: GroupId, new_parent: GroupId) -> Result<()> {
        if id == self.root {
            return Err(Error::InvalidInput(
                "The root group cannot be moved".to_string(),
            ));
        }
        let old_parent = self.group(id)?.parent;
        self.group(new_parent)?;

        if self.is_within(new_parent, id) {
            return Err(Error::Cycle(format!(
                "Cannot move group {} under itself or a descendant",
                id
            )));
        }
        if old_parent == Some(new_parent) {
            return Ok(());
        }

        if let Some(parent) = old_parent {
            self.group_mut(parent)?.children.retain(|c| *c != id);
        }
        self.group_mut(new_parent)?.children.push(id);
        self.group_mut(id)?.parent = Some(new_parent);
        Ok(())
    }

    // -- entry mutations -----------------------------------------------------

    /// Add an entry to a group.
    ///
    /// # Errors
    /// - `NotFound` if the group does not exist
    /// - `InvalidInput` if the title is blank
    pub fn add_entry(&mut self, group: GroupId, new: NewEntry) -> Result<EntryId> {
        let now = Utc::now();
        self.insert_entry(group, new, now, now)
    }

    pub(crate) fn insert_entry(
        &mut self,
        group: GroupId,
        new: NewEntry,
        created_at: DateTime<Utc>,
        modified_at: DateTime<Utc>,
    ) -> Result<EntryId> {
        let title = clean_name(&new.title)?;
        self.group(group)?;

        let id = EntryId::generate();
        let entry = Entry {
            id,
            group,
            title,
            username: new.username,
            secret: new.secret,
            url: new.url,
            notes: new.notes,
            created_at,
            modified_at,
        };
        self.entries.insert(id, entry);
        self.group_mut(group)?.entries.push(id);
        Ok(id)
    }

    /// Apply a partial update and bump the modification time.
    ///
    /// # Errors
    /// - `NotFound` if the entry does not exist
    /// - `InvalidInput` if the patch sets a blank title
    pub fn update_entry(&mut self, id: EntryId, patch: EntryPatch) -> Result<()> {
        let title = patch.title.as_deref().map(clean_name).transpose()?;
        let entry = self
            .entries
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("Entry {} not found", id)))?;

        if let Some(title) = title {
            entry.title = title;
        }
        if let Some(username) = patch.username {
            entry.username = username;
        }
        if let Some(secret) = patch.secret {
            entry.secret = secret;
        }
        if let Some(url) = patch.url {
            entry.url = url;
        }
        if let Some(notes) = patch.notes {
            entry.notes = notes;
        }
        entry.modified_at = Utc::now().max(entry.modified_at);
        Ok(())
    }

    /// Delete an entry.
    pub fn remove_entry(&mut self, id: EntryId) -> Result<()> {
        let entry = self
            .entries
            .remove(&id)
            .ok_or_else(|| Error::NotFound(format!("Entry {} not found", id)))?;
        if let Some(group) = self.groups.get_mut(&entry.group) {
            group.entries.retain(|e| *e != id);
        }
        Ok(())
    }

    /// Move an entry to another group.
    pub fn move_entry(&mut self, id: EntryId, group: GroupId) -> Result<()> {
        self.group(group)?;
        let old = self.entry(id)?.group;
        if old == group {
            return Ok(());
        }

        self.group_mut(old)?.entries.retain(|e| *e != id);
        self.group_mut(group)?.entries.push(id);
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.group = group;
            entry.modified_at = Utc::now().max(entry.modified_at);
        }
        Ok(())
    }

    fn group_mut(&mut self, id: GroupId) -> Result<&mut Group> {
        self.groups
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("Group {} not found", id)))
    }

    // -- serialization -------------------------------------------------------

    /// Serialize into the versioned JSON envelope.
    ///
    /// The buffer holds every secret in clear and is wiped on drop.
    pub fn to_bytes(&self) -> Result<Zeroizing<Vec<u8>>> {
        let envelope = EnvelopeRef {
            format: MODEL_FORMAT,
            version: MODEL_VERSION,
            root: self.root,
            groups: self.groups.values().collect(),
            entries: self.entries.values().collect(),
        };
        serde_json::to_vec(&envelope)
            .map(Zeroizing::new)
            .map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize and re-validate a model.
    ///
    /// # Errors
    /// - `UnsupportedFormat` for a foreign envelope or unknown version
    /// - `Corruption` for malformed JSON or a broken tree
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let header: EnvelopeHeader = serde_json::from_slice(bytes)
            .map_err(|e| Error::Corruption(format!("Unreadable model envelope: {}", e)))?;
        if header.format != MODEL_FORMAT {
            return Err(Error::UnsupportedFormat(format!(
                "Unknown model format '{}'",
                header.format
            )));
        }
        if header.version != MODEL_VERSION {
            return Err(Error::UnsupportedFormat(format!(
                "Model version {} is not supported (expected {})",
                header.version, MODEL_VERSION
            )));
        }

        let envelope: Envelope = serde_json::from_slice(bytes)
            .map_err(|e| Error::Corruption(format!("Malformed model: {}", e)))?;

        let mut groups = BTreeMap::new();
        for group in envelope.groups {
            if let Some(dup) = groups.insert(group.id, group) {
                return Err(Error::Corruption(format!("Duplicate group {}", dup.id)));
            }
        }
        let mut entries = BTreeMap::new();
        for entry in envelope.entries {
            if let Some(dup) = entries.insert(entry.id, entry) {
                return Err(Error::Corruption(format!("Duplicate entry {}", dup.id)));
            }
        }

        let model = Self {
            root: envelope.root,
            groups,
            entries,
        };
        model.validate()?;
        Ok(model)
    }

    /// Check every structural invariant of the tree.
    pub fn validate(&self) -> Result<()> {
        let corrupt = |msg: String| Err(Error::Corruption(msg));

        match self.groups.get(&self.root) {
            Some(root) if root.parent.is_none() => {}
            Some(_) => return corrupt("Root group has a parent".to_string()),
            None => return corrupt("Root group is missing".to_string()),
        }

        for group in self.groups.values() {
            if group.name.trim().is_empty() {
                return corrupt(format!("Group {} has a blank name", group.id));
            }
            if group.id != self.root {
                let Some(parent_id) = group.parent else {
                    return corrupt(format!("Group {} has no parent", group.id));
                };
                let Some(parent) = self.groups.get(&parent_id) else {
                    return corrupt(format!("Group {} has a missing parent", group.id));
                };
                let listed = parent.children.iter().filter(|c| **c == group.id).count();
                if listed != 1 {
                    return corrupt(format!(
                        "Group {} is listed {} times by its parent",
                        group.id, listed
                    ));
                }
            }
            for child in &group.children {
                match self.groups.get(child) {
                    Some(c) if c.parent == Some(group.id) => {}
                    _ => return corrupt(format!("Group {} lists a foreign child", group.id)),
                }
            }
            let mut seen = BTreeSet::new();
            for eid in &group.entries {
                if !seen.insert(*eid) {
                    return corrupt(format!("Entry {} listed twice", eid));
                }
                match self.entries.get(eid) {
                    Some(e) if e.group == group.id => {}
                    _ => return corrupt(format!("Group {} lists a foreign entry", group.id)),
                }
            }
        }

        for entry in self.entries.values() {
            let owned = self
                .groups
                .get(&entry.group)
                .map(|g| g.entries.contains(&entry.id))
                .unwrap_or(false);
            if !owned {
                return corrupt(format!("Entry {} is not owned by its group", entry.id));
            }
        }

        // Every group reachable exactly once from the root rules out cycles
        // and detached islands.
        let mut visited = BTreeSet::new();
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                return corrupt(format!("Group {} is reachable twice", id));
            }
            if let Some(group) = self.groups.get(&id) {
                stack.extend(group.children.iter().copied());
            }
        }
        if visited.len() != self.groups.len() {
            return corrupt("Groups unreachable from the root".to_string());
        }
        Ok(())
    }
}

/// Trim surrounding whitespace; refuse what is left if empty.
fn clean_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidInput("Name cannot be empty".to_string()));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mail_entry() -> NewEntry {
        NewEntry {
            title: "Mail".to_string(),
            username: "a@b.com".to_string(),
            secret: SecretString::from("x1"),
            url: "https://mail.example.com".to_string(),
            notes: String::new(),
        }
    }

    #[test]
    fn test_new_model_has_root() {
        let model = VaultModel::new("General").unwrap();
        assert_eq!(model.root().name, "General");
        assert_eq!(model.group_count(), 1);
        assert!(model.is_empty());
        assert!(VaultModel::new("  ").is_err());
    }

    #[test]
    fn test_add_and_read_entries() {
        let mut model = VaultModel::new("General").unwrap();
        let root = model.root_id();
        let id = model.add_entry(root, mail_entry()).unwrap();

        let entry = model.entry(id).unwrap();
        assert_eq!(entry.title, "Mail");
        assert_eq!(entry.secret.expose(), "x1");
        assert_eq!(entry.group, root);
        assert_eq!(model.entries_in(root).unwrap().len(), 1);
        assert_eq!(model.entry_counts()[&root], 1);
    }

    #[test]
    fn test_update_entry_patches_and_bumps() {
        let mut model = VaultModel::new("General").unwrap();
        let id = model.add_entry(model.root_id(), mail_entry()).unwrap();
        let before = model.entry(id).unwrap().clone();

        model
            .update_entry(
                id,
                EntryPatch {
                    username: Some("c@d.com".to_string()),
                    ..EntryPatch::default()
                },
            )
            .unwrap();

        let after = model.entry(id).unwrap();
        assert_eq!(after.username, "c@d.com");
        assert_eq!(after.title, before.title);
        assert_eq!(after.secret, before.secret);
        assert!(after.modified_at >= before.modified_at);
        assert_eq!(after.created_at, before.created_at);
    }

    #[test]
    fn test_blank_title_rejected() {
        let mut model = VaultModel::new("General").unwrap();
        let root = model.root_id();
        assert!(matches!(
            model.add_entry(root, NewEntry::titled(" ")),
            Err(Error::InvalidInput(_))
        ));

        let id = model.add_entry(root, mail_entry()).unwrap();
        let patch = EntryPatch {
            title: Some(String::new()),
            ..EntryPatch::default()
        };
        assert!(model.update_entry(id, patch).is_err());
        assert_eq!(model.entry(id).unwrap().title, "Mail");
    }

    #[test]
    fn test_names_and_titles_are_trimmed() {
        let mut model = VaultModel::new("  General ").unwrap();
        let root = model.root_id();
        assert_eq!(model.root().name, "General");

        let work = model.add_group(root, "\twork ").unwrap();
        assert_eq!(model.group(work).unwrap().name, "work");

        let id = model
            .add_entry(
                root,
                NewEntry {
                    title: " Mail ".to_string(),
                    username: " a@b.com ".to_string(),
                    ..NewEntry::default()
                },
            )
            .unwrap();
        let entry = model.entry(id).unwrap();
        assert_eq!(entry.title, "Mail");
        assert_eq!(entry.username, " a@b.com ");
    }

    #[test]
    fn test_move_under_descendant_is_cycle() {
        let mut model = VaultModel::new("General").unwrap();
        let a = model.add_group(model.root_id(), "a").unwrap();
        let b = model.add_group(a, "b").unwrap();
        let c = model.add_group(b, "c").unwrap();
        let snapshot = model.clone();

        assert!(matches!(model.move_group(a, c), Err(Error::Cycle(_))));
        assert!(matches!(model.move_group(a, a), Err(Error::Cycle(_))));
        assert_eq!(model, snapshot);
    }

    #[test]
    fn test_move_group() {
        let mut model = VaultModel::new("General").unwrap();
        let root = model.root_id();
        let a = model.add_group(root, "a").unwrap();
        let b = model.add_group(root, "b").unwrap();

        model.move_group(b, a).unwrap();

        assert_eq!(model.group(b).unwrap().parent, Some(a));
        assert_eq!(model.children(a).unwrap()[0].id, b);
        assert_eq!(model.children(root).unwrap().len(), 1);
        model.validate().unwrap();
    }

    #[test]
    fn test_root_cannot_be_removed_or_moved() {
        let mut model = VaultModel::new("General").unwrap();
        let root = model.root_id();
        let a = model.add_group(root, "a").unwrap();

        assert!(matches!(
            model.remove_group(root, RemovePolicy::Cascade),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(model.move_group(root, a), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_remove_group_policies() {
        let mut model = VaultModel::new("General").unwrap();
        let root = model.root_id();
        let work = model.add_group(root, "work").unwrap();
        let sub = model.add_group(work, "servers").unwrap();
        let e1 = model.add_entry(work, mail_entry()).unwrap();
        let e2 = model.add_entry(sub, NewEntry::titled("db")).unwrap();

        assert!(matches!(
            model.remove_group(work, RemovePolicy::FailIfNotEmpty),
            Err(Error::NotEmpty(_))
        ));

        let mut reassigned = model.clone();
        let removed = reassigned
            .remove_group(work, RemovePolicy::ReassignTo(root))
            .unwrap();
        assert!(removed.is_empty());
        assert_eq!(reassigned.entry(e1).unwrap().group, root);
        assert_eq!(reassigned.group(sub).unwrap().parent, Some(root));
        reassigned.validate().unwrap();

        let mut cascaded = model.clone();
        let mut removed = cascaded.remove_group(work, RemovePolicy::Cascade).unwrap();
        removed.sort();
        let mut expected = vec![e1, e2];
        expected.sort();
        assert_eq!(removed, expected);
        assert!(cascaded.group(sub).is_err());
        assert!(cascaded.is_empty());
        cascaded.validate().unwrap();
    }

    #[test]
    fn test_reassign_into_descendant_rejected() {
        let mut model = VaultModel::new("General").unwrap();
        let work = model.add_group(model.root_id(), "work").unwrap();
        let sub = model.add_group(work, "servers").unwrap();
        let snapshot = model.clone();

        assert!(matches!(
            model.remove_group(work, RemovePolicy::ReassignTo(sub)),
            Err(Error::Cycle(_))
        ));
        assert_eq!(model, snapshot);
    }

    #[test]
    fn test_move_and_remove_entry() {
        let mut model = VaultModel::new("General").unwrap();
        let root = model.root_id();
        let other = model.add_group(root, "other").unwrap();
        let id = model.add_entry(root, mail_entry()).unwrap();

        model.move_entry(id, other).unwrap();
        assert!(model.entries_in(root).unwrap().is_empty());
        assert_eq!(model.entry(id).unwrap().group, other);

        model.remove_entry(id).unwrap();
        assert!(matches!(model.entry(id), Err(Error::NotFound(_))));
        assert!(model.group(other).unwrap().entries.is_empty());
    }

    #[test]
    fn test_bytes_preserve_every_field() {
        let mut model = VaultModel::new("General").unwrap();
        let g = model.add_group(model.root_id(), "work").unwrap();
        model.add_entry(g, mail_entry()).unwrap();

        let bytes = model.to_bytes().unwrap();
        let restored = VaultModel::from_bytes(&bytes).unwrap();
        assert_eq!(restored, model);
    }

    #[test]
    fn test_unknown_version_unsupported() {
        let model = VaultModel::new("General").unwrap();
        let mut value: serde_json::Value = serde_json::from_slice(&model.to_bytes().unwrap()).unwrap();
        value["version"] = serde_json::json!(2);
        let bytes = serde_json::to_vec(&value).unwrap();

        assert!(matches!(
            VaultModel::from_bytes(&bytes),
            Err(Error::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_broken_tree_is_corruption() {
        let mut model = VaultModel::new("General").unwrap();
        let a = model.add_group(model.root_id(), "a").unwrap();
        let b = model.add_group(a, "b").unwrap();

        // Point a's parent at its own child: a two-node cycle cut off from root.
        let mut value: serde_json::Value = serde_json::from_slice(&model.to_bytes().unwrap()).unwrap();
        for group in value["groups"].as_array_mut().unwrap() {
            if group["id"] == serde_json::json!(a.to_string()) {
                group["parent"] = serde_json::json!(b.to_string());
            }
        }
        let bytes = serde_json::to_vec(&value).unwrap();

        assert!(matches!(
            VaultModel::from_bytes(&bytes),
            Err(Error::Corruption(_))
        ));
        assert!(matches!(
            VaultModel::from_bytes(b"not json"),
            Err(Error::Corruption(_))
        ));
    }
}
