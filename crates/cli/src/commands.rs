//! Operator commands
//!
//! Every destructive command asks for confirmation through a [`Prompt`]
//! unless `--yes` was given.

use clap::Subcommand;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;
use zenodo_common::{
    auditor,
    communities::mapping::{self, CommunityMapping},
    db::schema,
    errors::AppError,
    records::{
        self,
        files::{self as record_files, FileEdit},
    },
    tasks::{self, Task, TaskExecutor, TaskHandler},
    Services,
};

/// Records scanned per page by the bulk commands
const PAGE_SIZE: u64 = 100;

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
#[command(rename_all = "snake_case")]
pub enum Command {
    /// Register or update the DOIs of a record with DataCite
    DataciteRegister {
        recid: String,
    },
    /// Add (or replace) a file of a published record
    AddFile {
        recid: String,
        /// Local file to upload
        path: PathBuf,
        /// Object key; defaults to the file name
        #[arg(long)]
        key: Option<String>,
    },
    /// Remove a file from a published record
    RemoveFile {
        recid: String,
        key: String,
    },
    /// Rename a file of a published record
    RenameFile {
        recid: String,
        key: String,
        new_key: String,
    },
    /// List the files of a published record
    ListFiles {
        recid: String,
    },
    /// Recompute the OAI sets of one record, or of every record
    SyncOai {
        #[arg(long)]
        uuid: Option<Uuid>,
    },
    /// Restore `_files` pointers from the newest sound revision
    RepairCorruptedMetadata {
        #[arg(long)]
        uuid: Option<Uuid>,
    },
    /// Verify file checksums and mail a report of bad files
    AuditFiles,
    /// Merge a new aggregator community mapping into the current one
    UpdateCommunitiesMapping {
        /// Current mapping (JSON); a missing file is an empty mapping
        current: PathBuf,
        /// Incoming mapping (JSON)
        new: PathBuf,
        /// Where to write the merged mapping; defaults to `current`
        #[arg(long)]
        output: Option<PathBuf>,
        /// Only print the changes
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
    /// Create missing tables and indexes
    CreateSchema,
}

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Aborted.")]
    Aborted,

    #[error(transparent)]
    App(#[from] AppError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid mapping: {0}")]
    Mapping(#[from] serde_json::Error),
}

impl CliError {
    /// 2 for requests refused by validation or state checks, 1 otherwise
    pub fn exit_code(&self) -> u8 {
        match self {
            CliError::App(e) if e.is_client_error() => 2,
            _ => 1,
        }
    }
}

pub type CliResult<T> = std::result::Result<T, CliError>;

/// Yes/no questions for destructive commands
pub trait Prompt {
    fn confirm(&mut self, question: &str) -> CliResult<bool>;
}

/// `--yes`: every question is answered yes
pub struct AssumeYes;

impl Prompt for AssumeYes {
    fn confirm(&mut self, _question: &str) -> CliResult<bool> {
        Ok(true)
    }
}

/// Ask on a terminal (or any line-based reader)
pub struct Interactive<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> Interactive<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }
}

impl<R: BufRead, W: Write> Prompt for Interactive<R, W> {
    fn confirm(&mut self, question: &str) -> CliResult<bool> {
        write!(self.output, "{} [y/N]: ", question)?;
        self.output.flush()?;

        let mut answer = String::new();
        self.input.read_line(&mut answer)?;
        let answer = answer.trim().to_lowercase();
        Ok(answer == "y" || answer == "yes")
    }
}

fn require(prompt: &mut dyn Prompt, question: &str) -> CliResult<()> {
    if prompt.confirm(question)? {
        Ok(())
    } else {
        Err(CliError::Aborted)
    }
}

fn read_mapping(path: &Path, missing_ok: bool) -> CliResult<CommunityMapping> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if missing_ok && e.kind() == std::io::ErrorKind::NotFound => Ok(CommunityMapping::new()),
        Err(e) => Err(e.into()),
    }
}

/// Every record id, page by page
async fn all_record_ids(services: &Services) -> CliResult<Vec<Uuid>> {
    let mut ids = Vec::new();
    loop {
        let page = records::ids(services.db.read(), ids.len() as u64, PAGE_SIZE).await?;
        if page.is_empty() {
            return Ok(ids);
        }
        ids.extend(page);
    }
}

pub async fn run(services: &Services, command: Command, prompt: &mut dyn Prompt, out: &mut dyn Write) -> CliResult<()> {
    match command {
        Command::DataciteRegister { recid } => {
            tasks::register_record_doi(services, &recid).await?;
            writeln!(out, "DOIs of record {} pushed to DataCite.", recid)?;
        }

        Command::AddFile { recid, path, key } => {
            let key = match key {
                Some(key) => key,
                None => path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(String::from)
                    .ok_or_else(|| AppError::field("key", "Cannot derive a key from the path."))?,
            };
            let data = tokio::fs::read(&path).await?;
            require(prompt, &format!("Add '{}' ({} bytes) to record {}?", key, data.len(), recid))?;
            record_files::edit_files(services, &recid, FileEdit::Add { key: key.clone(), data }).await?;
            writeln!(out, "Added '{}' to record {}.", key, recid)?;
        }

        Command::RemoveFile { recid, key } => {
            require(prompt, &format!("Remove '{}' from record {}?", key, recid))?;
            record_files::edit_files(services, &recid, FileEdit::Remove { key: key.clone() }).await?;
            writeln!(out, "Removed '{}' from record {}.", key, recid)?;
        }

        Command::RenameFile { recid, key, new_key } => {
            require(prompt, &format!("Rename '{}' to '{}' in record {}?", key, new_key, recid))?;
            record_files::edit_files(
                services,
                &recid,
                FileEdit::Rename {
                    key: key.clone(),
                    new_key: new_key.clone(),
                },
            )
            .await?;
            writeln!(out, "Renamed '{}' to '{}' in record {}.", key, new_key, recid)?;
        }

        Command::ListFiles { recid } => {
            for file in record_files::list_files(services, &recid).await? {
                writeln!(out, "{}\t{}\t{}\t{}", file.key, file.size, file.checksum, file.version_id)?;
            }
        }

        Command::SyncOai { uuid } => {
            let ids = match uuid {
                Some(id) => vec![id],
                None => all_record_ids(services).await?,
            };
            let executor = TaskExecutor::new(services.clone());
            for record_id in &ids {
                executor.handle(&Task::SyncRecordOai { record_id: *record_id }).await?;
            }
            writeln!(out, "Synchronised OAI sets of {} record(s).", ids.len())?;
        }

        Command::RepairCorruptedMetadata { uuid } => {
            let ids = match uuid {
                Some(id) => vec![id],
                None => all_record_ids(services).await?,
            };
            let db = services.db.read();
            let mut corrupted = Vec::new();
            for id in ids {
                if records::has_corrupted_files_meta(&records::get(db, id).await?.json) {
                    corrupted.push(id);
                }
            }
            if corrupted.is_empty() {
                writeln!(out, "No corrupted records found.")?;
                return Ok(());
            }

            require(prompt, &format!("Repair {} record(s)?", corrupted.len()))?;
            let mut repaired = 0;
            for id in corrupted {
                if records::repair_record_metadata(services.db.write(), id).await?.is_some() {
                    services.queue.push(Task::IndexRecord { record_id: id }).await?;
                    writeln!(out, "Repaired {}", id)?;
                    repaired += 1;
                } else {
                    writeln!(out, "Could not repair {}", id)?;
                }
            }
            info!(repaired, "Record metadata repair finished");
        }

        Command::AuditFiles => {
            let report = auditor::files::audit_files(
                services.db.write(),
                &services.storage,
                services.mailer.as_ref(),
                &services.config.site.admin_email,
            )
            .await?;
            if report.bad_files.is_empty() {
                writeln!(out, "All files passed the integrity check.")?;
            } else {
                write!(out, "{}", report.render())?;
            }
        }

        Command::UpdateCommunitiesMapping {
            current,
            new,
            output,
            dry_run,
        } => {
            let current_mapping = read_mapping(&current, true)?;
            let new_mapping = read_mapping(&new, false)?;
            let result = mapping::reconcile(services.db.read(), &current_mapping, &new_mapping).await?;

            writeln!(out, "{}", serde_json::to_string_pretty(&result.diff)?)?;
            for missing in &result.unresolved {
                writeln!(
                    out,
                    "Unknown community '{}' referenced by '{}'",
                    missing.zenodo_community, missing.openaire_community
                )?;
            }
            for community in &result.new_communities {
                writeln!(out, "New community '{}' owned by user {}", community.id, community.owner)?;
            }
            if dry_run {
                return Ok(());
            }

            require(prompt, "Apply these changes?")?;
            mapping::create_communities(services.db.write(), &result.new_communities).await?;
            let target = output.unwrap_or(current);
            tokio::fs::write(&target, serde_json::to_vec_pretty(&result.mapping)?).await?;
            writeln!(out, "Mapping written to {}.", target.display())?;
        }

        Command::CreateSchema => {
            schema::create_schema(services.db.write()).await?;
            writeln!(out, "Schema created.")?;
        }
    }

    Ok(())
}
