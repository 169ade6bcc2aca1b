//! Command-line interface.
//!
//! Without a subcommand the binary serves MCP over stdio. The analysis
//! subcommands run the coverage analyzer offline on JSON files, and the
//! record subcommands read exported sessions back from the database.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::concept_map::{coverage_report, longitudinal, ConceptMap, ExpertConceptMap, Snapshot};
use crate::error::{AppError, AppResult};
use crate::storage::Storage;

#[derive(Parser, Debug)]
#[command(name = "mcp-concept-scaffolding")]
#[command(author, version, long_about = None)]
#[command(about = "Scaffolding orchestration engine for concept-map learners")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

impl Cli {
    /// Subcommand to run; `serve` when none was given.
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Serve)
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Run the MCP server over stdio
    Serve,

    /// Coverage of a concept map against a reference map
    Coverage {
        /// Learner map (JSON)
        map: PathBuf,

        /// Reference map (JSON)
        reference: PathBuf,

        /// Earlier snapshot to diff against
        #[arg(long)]
        previous: Option<PathBuf>,
    },

    /// Growth across snapshots, in the order given
    Progress {
        /// Snapshot maps (JSON); each is labelled by its file name
        #[arg(required = true)]
        snapshots: Vec<PathBuf>,

        /// Reference map for per-snapshot coverage
        #[arg(long)]
        reference: Option<PathBuf>,
    },

    /// List exported sessions, newest first
    Sessions {
        /// Maximum number of sessions to show
        #[arg(long, default_value = "20")]
        limit: u32,
    },

    /// Print the flattened round rows of an exported session
    Rows {
        /// Session ID
        session_id: String,
    },
}

impl Command {
    /// Whether the command reads the session database.
    pub fn needs_storage(&self) -> bool {
        matches!(self, Command::Serve | Command::Sessions { .. } | Command::Rows { .. })
    }
}

/// Result of CLI command execution.
#[derive(Debug)]
pub struct CliResult {
    /// Exit code (0 = success)
    pub exit_code: i32,
    pub message: String,
}

impl CliResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            exit_code: 1,
            message: message.into(),
        }
    }

    fn from_json<T: Serialize>(result: AppResult<T>) -> Self {
        let text = result.and_then(|value| {
            serde_json::to_string_pretty(&value).map_err(|e| AppError::Internal {
                message: format!("Failed to serialize output: {}", e),
            })
        });
        match text {
            Ok(text) => Self::success(text),
            Err(e) => Self::error(format!("Error: {}", e)),
        }
    }
}

/// Run an offline analysis command.
pub fn execute_analysis(command: &Command) -> CliResult {
    match command {
        Command::Coverage {
            map,
            reference,
            previous,
        } => CliResult::from_json(run_coverage(map, reference, previous.as_deref())),
        Command::Progress {
            snapshots,
            reference,
        } => CliResult::from_json(run_progress(snapshots, reference.as_deref())),
        other => CliResult::error(format!("{:?} is not an analysis command", other)),
    }
}

/// Run a command that reads exported records.
pub async fn execute_records(command: &Command, storage: &dyn Storage) -> CliResult {
    match command {
        Command::Sessions { limit } => {
            CliResult::from_json(storage.list_session_records(*limit).await.map_err(Into::into))
        }
        Command::Rows { session_id } => {
            let rows = match storage.get_session_record(session_id).await {
                Ok(Some(_)) => storage.get_round_rows(session_id).await.map_err(Into::into),
                Ok(None) => {
                    return CliResult::error(format!("Error: no exported session {}", session_id))
                }
                Err(e) => Err(e.into()),
            };
            CliResult::from_json(rows)
        }
        other => CliResult::error(format!("{:?} does not read records", other)),
    }
}

fn run_coverage(
    map: &Path,
    reference: &Path,
    previous: Option<&Path>,
) -> AppResult<crate::concept_map::CoverageReport> {
    let map: ConceptMap = load_json(map)?;
    let reference = load_expert_map(reference)?;
    let previous = match previous {
        Some(path) => load_json(path)?,
        None => ConceptMap::default(),
    };
    Ok(coverage_report(&map, &previous, reference.map())?)
}

fn run_progress(
    paths: &[PathBuf],
    reference: Option<&Path>,
) -> AppResult<crate::concept_map::ProgressReport> {
    let reference = reference.map(load_expert_map).transpose()?;
    let snapshots = paths
        .iter()
        .map(|path| {
            Ok(Snapshot {
                label: snapshot_label(path),
                map: load_json(path)?,
            })
        })
        .collect::<AppResult<Vec<_>>>()?;
    Ok(longitudinal(&snapshots, reference.as_ref().map(ExpertConceptMap::map))?)
}

fn snapshot_label(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Read and validate a reference map file.
pub fn load_expert_map(path: &Path) -> AppResult<ExpertConceptMap> {
    load_json(path)
}

fn load_json<T: DeserializeOwned>(path: &Path) -> AppResult<T> {
    let raw = std::fs::read_to_string(path).map_err(|e| AppError::Config {
        message: format!("Cannot read {}: {}", path.display(), e),
    })?;
    serde_json::from_str(&raw).map_err(|e| AppError::Config {
        message: format!("Invalid JSON in {}: {}", path.display(), e),
    })
}
