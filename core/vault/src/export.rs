//! Plaintext export and import of group subtrees.
//!
//! An export is a deliberate escape hatch: every secret in the subtree is
//! written out in clear. The document type makes that explicit and wipes
//! its buffer on drop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::Zeroizing;

use crate::model::{NewEntry, VaultModel};
use prasword_common::{Error, GroupId, Result, SecretString};

/// Marker written into every export document.
pub const EXPORT_FORMAT: &str = "prasword-export";

/// Current export document version.
pub const EXPORT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct ExportDocument {
    format: String,
    version: u32,
    exported_at: DateTime<Utc>,
    group: ExportedGroup,
}

#[derive(Serialize, Deserialize)]
struct ExportedGroup {
    name: String,
    #[serde(default)]
    entries: Vec<ExportedEntry>,
    #[serde(default)]
    groups: Vec<ExportedGroup>,
}

#[derive(Serialize, Deserialize)]
struct ExportedEntry {
    title: String,
    #[serde(default)]
    username: String,
    #[serde(default)]
    secret: SecretString,
    #[serde(default)]
    url: String,
    #[serde(default)]
    notes: String,
    created_at: DateTime<Utc>,
    modified_at: DateTime<Utc>,
}

/// Decrypted JSON document describing one group subtree, secrets included.
pub struct PlaintextExport {
    json: Zeroizing<String>,
}

impl PlaintextExport {
    /// Wrap an existing document, checking that it is a readable export.
    ///
    /// # Errors
    /// - `UnsupportedFormat` for a foreign document or unknown version
    /// - `Serialization` for malformed JSON
    pub fn from_json(json: String) -> Result<Self> {
        let export = Self {
            json: Zeroizing::new(json),
        };
        export.document()?;
        Ok(export)
    }

    /// The document text. Contains every secret in clear.
    pub fn as_str(&self) -> &str {
        &self.json
    }

    fn document(&self) -> Result<ExportDocument> {
        let doc: ExportDocument = serde_json::from_str(&self.json)
            .map_err(|e| Error::Serialization(format!("Malformed export: {}", e)))?;
        if doc.format != EXPORT_FORMAT || doc.version != EXPORT_VERSION {
            return Err(Error::UnsupportedFormat(format!(
                "Unsupported export document '{}' version {}",
                doc.format, doc.version
            )));
        }
        Ok(doc)
    }
}

impl fmt::Debug for PlaintextExport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaintextExport")
            .field("len", &self.json.len())
            .finish_non_exhaustive()
    }
}

/// Export a group and everything below it.
pub fn export_group(model: &VaultModel, id: GroupId) -> Result<PlaintextExport> {
    let doc = ExportDocument {
        format: EXPORT_FORMAT.to_string(),
        version: EXPORT_VERSION,
        exported_at: Utc::now(),
        group: collect(model, id)?,
    };
    let json = serde_json::to_string_pretty(&doc).map_err(|e| Error::Serialization(e.to_string()))?;
    Ok(PlaintextExport {
        json: Zeroizing::new(json),
    })
}

fn collect(model: &VaultModel, id: GroupId) -> Result<ExportedGroup> {
    let group = model.group(id)?;
    let entries = model
        .entries_in(id)?
        .into_iter()
        .map(|entry| ExportedEntry {
            title: entry.title.clone(),
            username: entry.username.clone(),
            secret: entry.secret.clone(),
            url: entry.url.clone(),
            notes: entry.notes.clone(),
            created_at: entry.created_at,
            modified_at: entry.modified_at,
        })
        .collect();
    let groups = group
        .children
        .iter()
        .map(|child| collect(model, *child))
        .collect::<Result<Vec<_>>>()?;

    Ok(ExportedGroup {
        name: group.name.clone(),
        entries,
        groups,
    })
}

/// Recreate an exported subtree under `parent` with fresh ids.
///
/// All-or-nothing: on error the model is left unchanged. Returns the id of
/// the new top group.
pub fn import_group(
    model: &mut VaultModel,
    parent: GroupId,
    export: &PlaintextExport,
) -> Result<GroupId> {
    let doc = export.document()?;
    let mut draft = model.clone();
    let top = graft(&mut draft, parent, doc.group)?;
    *model = draft;
    Ok(top)
}

fn graft(model: &mut VaultModel, parent: GroupId, group: ExportedGroup) -> Result<GroupId> {
    let id = model.add_group(parent, &group.name)?;
    for entry in group.entries {
        let new = NewEntry {
            title: entry.title,
            username: entry.username,
            secret: entry.secret,
            url: entry.url,
            notes: entry.notes,
        };
        model.insert_entry(id, new, entry.created_at, entry.modified_at)?;
    }
    for child in group.groups {
        graft(model, id, child)?;
    }
    Ok(id)
}
