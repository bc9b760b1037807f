//! Prasword CLI - Command line interface for password vaults.
//!
//! Each invocation unlocks the vault, performs one operation and exits.
//! Every change is encrypted and persisted before the command reports
//! success.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;
use zeroize::Zeroizing;

use prasword_common::{EntryId, GroupId, SecretString};
use prasword_crypto::{generate_secret, KdfParams, DEFAULT_SECRET_LENGTH};
use prasword_storage::StorageTarget;
use prasword_vault::{
    EntryPatch, Group, NewEntry, RemovePolicy, SessionConfig, VaultSession,
};

/// Shown for every unlock failure so a wrong passphrase and a damaged vault
/// look the same.
const OPEN_FAILED: &str = "cannot open vault";

#[derive(Parser)]
#[command(name = "prasword")]
#[command(about = "Prasword - Encrypted password vault")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Session configuration file (JSON).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    target: TargetArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct TargetArgs {
    /// Vault file (default: platform data directory).
    #[arg(short, long, global = true, conflicts_with = "sqlite")]
    file: Option<PathBuf>,

    /// SQLite database holding one or more vaults.
    #[arg(long, global = true)]
    sqlite: Option<PathBuf>,

    /// Vault name inside the SQLite database.
    #[arg(long = "name", global = true, default_value = "default")]
    vault: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new vault.
    Init {
        /// Name of the top-level group.
        #[arg(long, default_value = "General")]
        root_name: String,

        /// KDF strength: "interactive", "moderate", or "sensitive".
        #[arg(short, long)]
        strength: Option<String>,
    },

    /// Add an entry.
    Add {
        /// Entry title.
        title: String,

        /// Group to add to (default: root).
        #[arg(short, long)]
        group: Option<String>,

        #[arg(short, long, default_value = "")]
        username: String,

        #[arg(long, default_value = "")]
        url: String,

        #[arg(long, default_value = "")]
        notes: String,

        /// Generate a random secret instead of prompting, optionally of
        /// the given length.
        #[arg(long, value_name = "LENGTH")]
        generate: Option<Option<usize>>,
    },

    /// Change fields of an entry.
    Edit {
        /// Entry id.
        id: String,

        #[arg(long)]
        title: Option<String>,

        #[arg(short, long)]
        username: Option<String>,

        #[arg(long)]
        url: Option<String>,

        #[arg(long)]
        notes: Option<String>,

        /// Prompt for a new secret.
        #[arg(long)]
        secret: bool,
    },

    /// List groups and entries.
    List {
        /// Group to list (default: root).
        #[arg(short, long)]
        group: Option<String>,
    },

    /// Show one entry.
    Show {
        /// Entry id.
        id: String,

        /// Print the secret in clear.
        #[arg(long)]
        reveal: bool,
    },

    /// Search titles, usernames, URLs and notes.
    Search {
        /// Case-insensitive text to look for.
        #[arg(default_value = "")]
        query: String,
    },

    /// Create a group.
    Mkdir {
        /// Group name.
        name: String,

        /// Parent group (default: root).
        #[arg(short, long)]
        parent: Option<String>,
    },

    /// Rename a group.
    Rename {
        /// Group id.
        id: String,

        /// New name.
        name: String,
    },

    /// Remove an entry.
    Rm {
        /// Entry id.
        id: String,
    },

    /// Remove a group.
    Rmdir {
        /// Group id.
        id: String,

        /// Delete everything inside the group.
        #[arg(long, conflicts_with = "move_to")]
        cascade: bool,

        /// Move the group's contents here first.
        #[arg(long)]
        move_to: Option<String>,
    },

    /// Move an entry or group into another group.
    Mv {
        /// Entry or group id.
        id: String,

        /// Destination group id.
        to: String,
    },

    /// Write a group and its secrets to a plaintext JSON file.
    Export {
        /// Group to export (default: root).
        #[arg(short, long)]
        group: Option<String>,

        /// Output file.
        #[arg(short, long)]
        out: PathBuf,
    },

    /// Import a plaintext JSON export under a group.
    Import {
        /// Export file.
        input: PathBuf,

        /// Parent group (default: root).
        #[arg(short, long)]
        parent: Option<String>,
    },

    /// Change the vault passphrase.
    Passwd {
        /// New KDF strength; keeps the current parameters when omitted.
        #[arg(short, long)]
        strength: Option<String>,
    },

    /// Show vault information.
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = load_config(cli.config.as_deref())?;
    let target = &cli.target;

    match cli.command {
        Commands::Init {
            root_name,
            strength,
        } => cmd_init(target, config, &root_name, strength.as_deref()).await,

        Commands::Add {
            title,
            group,
            username,
            url,
            notes,
            generate,
        } => {
            let entry = NewEntry {
                title,
                username,
                url,
                notes,
                secret: SecretString::default(),
            };
            let generate = generate.map(|length| length.unwrap_or(DEFAULT_SECRET_LENGTH));
            cmd_add(target, config, group.as_deref(), entry, generate).await
        }

        Commands::Edit {
            id,
            title,
            username,
            url,
            notes,
            secret,
        } => {
            let patch = EntryPatch {
                title,
                username,
                url,
                notes,
                secret: None,
            };
            cmd_edit(target, config, &id, patch, secret).await
        }

        Commands::List { group } => cmd_list(target, config, group.as_deref()).await,

        Commands::Show { id, reveal } => cmd_show(target, config, &id, reveal).await,

        Commands::Search { query } => cmd_search(target, config, &query).await,

        Commands::Mkdir { name, parent } => {
            cmd_mkdir(target, config, &name, parent.as_deref()).await
        }

        Commands::Rename { id, name } => cmd_rename(target, config, &id, &name).await,

        Commands::Rm { id } => cmd_rm(target, config, &id).await,

        Commands::Rmdir {
            id,
            cascade,
            move_to,
        } => cmd_rmdir(target, config, &id, cascade, move_to.as_deref()).await,

        Commands::Mv { id, to } => cmd_mv(target, config, &id, &to).await,

        Commands::Export { group, out } => {
            cmd_export(target, config, group.as_deref(), &out).await
        }

        Commands::Import { input, parent } => {
            cmd_import(target, config, &input, parent.as_deref()).await
        }

        Commands::Passwd { strength } => cmd_passwd(target, config, strength.as_deref()).await,

        Commands::Info => cmd_info(target, config).await,
    }
}

fn load_config(path: Option<&Path>) -> Result<SessionConfig> {
    match path {
        Some(path) => SessionConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => Ok(SessionConfig::default()),
    }
}

impl TargetArgs {
    /// Resolve the command-line flags into a storage target.
    fn resolve(&self) -> Result<StorageTarget> {
        if let Some(db) = &self.sqlite {
            let conn = rusqlite::Connection::open(db)
                .with_context(|| format!("Failed to open database {}", db.display()))?;
            return Ok(StorageTarget::Relational {
                handle: Arc::new(Mutex::new(conn)),
                vault_name: self.vault.clone(),
            });
        }
        let path = match &self.file {
            Some(path) => path.clone(),
            None => default_vault_path()?,
        };
        Ok(StorageTarget::File(path))
    }
}

fn default_vault_path() -> Result<PathBuf> {
    let dir = dirs::data_dir()
        .context("No data directory on this platform; pass --file")?
        .join("prasword");
    Ok(dir.join("vault.prsv"))
}

/// Prompt for a passphrase without echo.
fn prompt_passphrase(prompt: &str) -> Result<Zeroizing<String>> {
    let passphrase = rpassword::prompt_password(prompt).context("Failed to read passphrase")?;
    Ok(Zeroizing::new(passphrase))
}

/// Prompt twice and require both answers to match.
fn prompt_new_passphrase(prompt: &str) -> Result<Zeroizing<String>> {
    let passphrase = prompt_passphrase(prompt)?;
    let confirm = prompt_passphrase("Confirm passphrase: ")?;

    if *passphrase != *confirm {
        anyhow::bail!("Passphrases do not match");
    }
    if passphrase.is_empty() {
        anyhow::bail!("Passphrase cannot be empty");
    }
    Ok(passphrase)
}

fn strength(name: &str) -> Result<KdfParams> {
    Ok(KdfParams::preset(name)?)
}

/// Prompt for the passphrase and unlock the vault.
async fn unlock(target: &TargetArgs, config: SessionConfig) -> Result<VaultSession> {
    let storage = target.resolve()?;
    info!(target = %storage.describe(), "Opening vault");
    let passphrase = prompt_passphrase("Enter passphrase: ")?;

    let session = VaultSession::new(config);
    if let Err(e) = session.open(passphrase.as_bytes(), storage).await {
        debug!(error = %e, "Unlock failed");
        anyhow::bail!(OPEN_FAILED);
    }
    Ok(session)
}

/// Group id from the command line, or the root group.
fn group_or_root(session: &VaultSession, id: Option<&str>) -> Result<GroupId> {
    match id {
        Some(id) => Ok(GroupId::parse(id)?),
        None => Ok(session.root_group()?.id),
    }
}

/// Create a new vault.
async fn cmd_init(
    target: &TargetArgs,
    config: SessionConfig,
    root_name: &str,
    strength_name: Option<&str>,
) -> Result<()> {
    let config = match strength_name {
        Some(name) => config.with_kdf_params(strength(name)?),
        None => config,
    };
    let storage = target.resolve()?;
    if let StorageTarget::File(path) = &storage {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    let location = storage.describe();

    let passphrase = prompt_new_passphrase("Enter new passphrase: ")?;
    let session = VaultSession::new(config);
    session
        .create(passphrase.as_bytes(), storage, root_name)
        .await
        .context("Failed to create vault")?;

    println!("Vault created successfully!");
    println!("  Location: {}", location);
    println!("  Root group: {}", root_name);

    Ok(())
}

/// Add an entry.
async fn cmd_add(
    target: &TargetArgs,
    config: SessionConfig,
    group: Option<&str>,
    mut entry: NewEntry,
    generate: Option<usize>,
) -> Result<()> {
    let session = unlock(target, config).await?;
    let group = group_or_root(&session, group)?;

    entry.secret = match generate {
        Some(length) => generate_secret(length)?,
        None => SecretString::new(prompt_passphrase("Secret: ")?.as_str()),
    };
    let title = entry.title.clone();
    let id = session
        .add_entry(group, entry)
        .await
        .context("Failed to add entry")?;

    println!("Entry added: {} ({})", title, id);
    if generate.is_some() {
        println!("  A random secret was generated; use `show --reveal` to read it.");
    }

    Ok(())
}

/// Change fields of an entry.
async fn cmd_edit(
    target: &TargetArgs,
    config: SessionConfig,
    id: &str,
    mut patch: EntryPatch,
    new_secret: bool,
) -> Result<()> {
    let id = EntryId::parse(id)?;
    let session = unlock(target, config).await?;

    if new_secret {
        patch.secret = Some(SecretString::new(prompt_passphrase("New secret: ")?.as_str()));
    }
    if patch.is_empty() {
        anyhow::bail!("Nothing to change");
    }
    session
        .update_entry(id, patch)
        .await
        .context("Failed to update entry")?;

    println!("Entry updated: {}", id);

    Ok(())
}

fn print_group(session: &VaultSession, group: &Group, depth: usize) -> Result<()> {
    let indent = "  ".repeat(depth);
    println!("{}[{}] {} ({})", indent, group.entries.len(), group.name, group.id);
    for entry in session.entries_in(group.id)? {
        println!("{}  - {} <{}> ({})", indent, entry.title, entry.username, entry.id);
    }
    for child in session.children(group.id)? {
        print_group(session, &child, depth + 1)?;
    }
    Ok(())
}

/// List groups and entries.
async fn cmd_list(target: &TargetArgs, config: SessionConfig, group: Option<&str>) -> Result<()> {
    let session = unlock(target, config).await?;
    let group = session.group(group_or_root(&session, group)?)?;

    print_group(&session, &group, 0)
}

/// Show one entry.
async fn cmd_show(target: &TargetArgs, config: SessionConfig, id: &str, reveal: bool) -> Result<()> {
    let id = EntryId::parse(id)?;
    let session = unlock(target, config).await?;
    let entry = session.entry(id)?;
    let group = session.group(entry.group)?;

    println!("{}", entry.title);
    println!("  Group: {}", group.name);
    println!("  Username: {}", entry.username);
    if reveal {
        println!("  Secret: {}", entry.secret.expose());
    } else {
        println!("  Secret: ******** ({} chars)", entry.secret.len());
    }
    println!("  URL: {}", entry.url);
    println!("  Notes: {}", entry.notes);
    println!("  Created: {}", entry.created_at);
    println!("  Modified: {}", entry.modified_at);

    Ok(())
}

/// Search entries.
async fn cmd_search(target: &TargetArgs, config: SessionConfig, query: &str) -> Result<()> {
    let session = unlock(target, config).await?;
    let hits = session.search(query)?;

    if hits.is_empty() {
        println!("No matches.");
    }
    for id in hits {
        let entry = session.entry(id)?;
        println!("{}  {} <{}> {}", entry.id, entry.title, entry.username, entry.url);
    }

    Ok(())
}

/// Create a group.
async fn cmd_mkdir(
    target: &TargetArgs,
    config: SessionConfig,
    name: &str,
    parent: Option<&str>,
) -> Result<()> {
    let session = unlock(target, config).await?;
    let parent = group_or_root(&session, parent)?;
    let id = session
        .add_group(parent, name)
        .await
        .context("Failed to create group")?;

    println!("Group created: {} ({})", name, id);

    Ok(())
}

/// Rename a group.
async fn cmd_rename(target: &TargetArgs, config: SessionConfig, id: &str, name: &str) -> Result<()> {
    let id = GroupId::parse(id)?;
    let session = unlock(target, config).await?;
    session
        .rename_group(id, name)
        .await
        .context("Failed to rename group")?;

    println!("Group renamed: {}", name);

    Ok(())
}

/// Remove an entry.
async fn cmd_rm(target: &TargetArgs, config: SessionConfig, id: &str) -> Result<()> {
    let id = EntryId::parse(id)?;
    let session = unlock(target, config).await?;
    session
        .remove_entry(id)
        .await
        .context("Failed to remove entry")?;

    println!("Entry removed: {}", id);

    Ok(())
}

/// Remove a group.
async fn cmd_rmdir(
    target: &TargetArgs,
    config: SessionConfig,
    id: &str,
    cascade: bool,
    move_to: Option<&str>,
) -> Result<()> {
    let id = GroupId::parse(id)?;
    let policy = match (cascade, move_to) {
        (true, _) => RemovePolicy::Cascade,
        (false, Some(dest)) => RemovePolicy::ReassignTo(GroupId::parse(dest)?),
        (false, None) => RemovePolicy::FailIfNotEmpty,
    };
    let session = unlock(target, config).await?;
    session
        .remove_group(id, policy)
        .await
        .context("Failed to remove group")?;

    println!("Group removed: {}", id);

    Ok(())
}

/// Move an entry or a group.
async fn cmd_mv(target: &TargetArgs, config: SessionConfig, id: &str, to: &str) -> Result<()> {
    let dest = GroupId::parse(to)?;
    let session = unlock(target, config).await?;

    let group_id = GroupId::parse(id)?;
    if session.group(group_id).is_ok() {
        session
            .move_group(group_id, dest)
            .await
            .context("Failed to move group")?;
        println!("Group moved: {}", group_id);
    } else {
        let entry_id = EntryId::parse(id)?;
        session
            .move_entry(entry_id, dest)
            .await
            .context("Failed to move entry")?;
        println!("Entry moved: {}", entry_id);
    }

    Ok(())
}

/// Export a group to a plaintext file.
async fn cmd_export(
    target: &TargetArgs,
    config: SessionConfig,
    group: Option<&str>,
    out: &Path,
) -> Result<()> {
    let session = unlock(target, config).await?;
    let group = group_or_root(&session, group)?;
    let export = session.export_group(group)?;

    write_private(out, export.as_str().as_bytes())
        .await
        .with_context(|| format!("Failed to write {}", out.display()))?;

    println!("Exported to {}", out.display());
    println!("  WARNING: this file contains every secret in the group in clear text.");

    Ok(())
}

/// Write a file readable only by the owner.
async fn write_private(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    use tokio::io::AsyncWriteExt;

    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        options.mode(0o600);
    }
    let mut file = options.open(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await
}

/// Import a plaintext export.
async fn cmd_import(
    target: &TargetArgs,
    config: SessionConfig,
    input: &Path,
    parent: Option<&str>,
) -> Result<()> {
    let json = tokio::fs::read_to_string(input)
        .await
        .with_context(|| format!("Failed to read {}", input.display()))?;
    let export = prasword_vault::PlaintextExport::from_json(json).context("Invalid export file")?;

    let session = unlock(target, config).await?;
    let parent = group_or_root(&session, parent)?;
    let id = session
        .import_group(parent, &export)
        .await
        .context("Failed to import")?;

    println!("Imported as group {}", id);

    Ok(())
}

/// Change the vault passphrase.
async fn cmd_passwd(
    target: &TargetArgs,
    config: SessionConfig,
    strength_name: Option<&str>,
) -> Result<()> {
    let params = strength_name.map(strength).transpose()?;
    let storage = target.resolve()?;

    let current = prompt_passphrase("Enter current passphrase: ")?;
    let new = prompt_new_passphrase("Enter new passphrase: ")?;

    let session = VaultSession::new(config);
    if let Err(e) = session.open(current.as_bytes(), storage).await {
        debug!(error = %e, "Unlock failed");
        anyhow::bail!(OPEN_FAILED);
    }
    session
        .change_passphrase(current.as_bytes(), new.as_bytes(), params)
        .await
        .context("Failed to change passphrase")?;

    println!("Passphrase changed successfully!");

    Ok(())
}

/// Show vault information.
async fn cmd_info(target: &TargetArgs, config: SessionConfig) -> Result<()> {
    let session = unlock(target, config).await?;
    let info = session.info()?;
    let counts = session.entry_counts()?;
    let root = session.root_group()?;

    println!("Vault Information:");
    println!("  Storage: {}", info.backend);
    println!("  Format version: {}", info.format_version);
    println!("  Groups: {}", info.groups);
    println!("  Entries: {}", info.entries);
    println!("  Root: {} ({} entries)", root.name, counts.get(&root.id).copied().unwrap_or(0));
    println!("  KDF Parameters:");
    println!("    Memory: {} KiB", info.kdf_params.memory_cost);
    println!("    Time: {} iterations", info.kdf_params.time_cost);
    println!("    Parallelism: {}", info.kdf_params.parallelism);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_sqlite_target_resolves() {
        let cli = Cli::parse_from([
            "prasword", "--sqlite", ":memory:", "--name", "team", "info",
        ]);
        let target = cli.target.resolve().unwrap();
        assert_eq!(target.describe(), "relational:team");
    }

    #[test]
    fn test_file_and_sqlite_conflict() {
        let result = Cli::try_parse_from([
            "prasword", "--file", "a.prsv", "--sqlite", "b.db", "info",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_generate_flag_defaults_length() {
        let cli = Cli::parse_from(["prasword", "add", "Mail", "--generate"]);
        match cli.command {
            Commands::Add { generate, .. } => assert_eq!(generate, Some(None)),
            _ => panic!("expected add"),
        }

        let cli = Cli::parse_from(["prasword", "add", "Mail", "--generate", "24"]);
        match cli.command {
            Commands::Add { generate, .. } => assert_eq!(generate, Some(Some(24))),
            _ => panic!("expected add"),
        }

        let cli = Cli::parse_from(["prasword", "add", "Mail"]);
        match cli.command {
            Commands::Add { generate, .. } => assert_eq!(generate, None),
            _ => panic!("expected add"),
        }
    }
}
