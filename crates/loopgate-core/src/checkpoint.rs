//! Resumable progress for long multi-phase commands.
//!
//! One JSON file per command (optionally per feature) under the state
//! directory. The public API reports success as `bool`/`Option` and logs the
//! reason on failure; callers treat checkpoints as best effort.

use crate::error::{LoopgateError, Result};
use crate::io;
use crate::paths;
use crate::tokens;
use crate::vcs::Vcs;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Pending,
    InProgress,
    Complete,
    Failed,
}

impl fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PhaseStatus::Pending => "pending",
            PhaseStatus::InProgress => "in_progress",
            PhaseStatus::Complete => "complete",
            PhaseStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for PhaseStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, String> {
        match s {
            "pending" => Ok(PhaseStatus::Pending),
            "in_progress" | "in-progress" => Ok(PhaseStatus::InProgress),
            "complete" => Ok(PhaseStatus::Complete),
            "failed" => Ok(PhaseStatus::Failed),
            other => Err(format!(
                "unknown phase status '{other}' (expected pending, in_progress, complete or failed)"
            )),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseProgress {
    pub current_phase: Option<String>,
    #[serde(default)]
    pub completed_phases: Vec<String>,
    #[serde(default)]
    pub pending_phases: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<PhaseStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Caller-defined fields (files touched, notes, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Fields to merge into a phase. Unset fields keep their previous value.
#[derive(Debug, Clone, Default)]
pub struct PhaseUpdate {
    pub status: Option<PhaseStatus>,
    pub context_summary: Option<String>,
    pub extra: Map<String, Value>,
}

impl PhaseUpdate {
    pub fn status(status: PhaseStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.context_summary = Some(summary.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature: Option<String>,
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub state: PhaseProgress,
    #[serde(default)]
    pub phases: BTreeMap<String, Phase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head_commit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

fn default_version() -> u32 {
    1
}

impl Checkpoint {
    pub fn new(command: &str, feature: Option<&str>) -> Self {
        Self {
            command: command.to_string(),
            feature: feature.map(str::to_string),
            version: default_version(),
            state: PhaseProgress::default(),
            phases: BTreeMap::new(),
            head_commit: None,
            started_at: None,
            updated_at: None,
            completed_at: None,
        }
    }

    /// Every phase summary must fit the token limit.
    pub fn validate(&self) -> Result<()> {
        for (name, phase) in &self.phases {
            if let Some(summary) = &phase.context_summary {
                let check = tokens::validate_context_summary(summary);
                if !check.is_valid() {
                    return Err(LoopgateError::SummaryTooLong {
                        phase: name.clone(),
                        actual: check.token_count,
                        limit: check.limit,
                    });
                }
            }
        }
        Ok(())
    }

    /// Shallow-merge `update` into `phase` and mirror the status into
    /// [`PhaseProgress`].
    pub fn apply(&mut self, phase: &str, update: PhaseUpdate, now: DateTime<Utc>) {
        let is_new = !self.phases.contains_key(phase);
        let entry = self.phases.entry(phase.to_string()).or_default();

        if is_new && update.status == Some(PhaseStatus::InProgress) {
            entry.started_at = Some(now);
        }
        entry.updated_at = Some(now);
        if let Some(status) = update.status {
            entry.status = Some(status);
        }
        if let Some(summary) = update.context_summary {
            entry.context_summary = Some(summary);
        }
        entry.extra.extend(update.extra);

        match update.status {
            Some(PhaseStatus::InProgress) => {
                self.state.current_phase = Some(phase.to_string());
            }
            Some(PhaseStatus::Complete) => {
                if !self.state.completed_phases.iter().any(|p| p == phase) {
                    self.state.completed_phases.push(phase.to_string());
                }
                self.state.pending_phases.retain(|p| p != phase);
            }
            Some(PhaseStatus::Failed) => {
                self.state.pending_phases.retain(|p| p != phase);
            }
            Some(PhaseStatus::Pending) | None => {}
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResumePoint {
    pub phase: Option<String>,
    pub summary: Option<String>,
}

fn short(commit: &str) -> &str {
    commit.get(..7).unwrap_or(commit)
}

// ---------------------------------------------------------------------------
// CheckpointManager
// ---------------------------------------------------------------------------

pub struct CheckpointManager<'a> {
    state_dir: PathBuf,
    vcs: &'a dyn Vcs,
}

impl<'a> CheckpointManager<'a> {
    pub fn new(root: &Path, vcs: &'a dyn Vcs) -> Self {
        Self {
            state_dir: paths::state_dir(root),
            vcs,
        }
    }

    fn path(&self, command: &str, feature: Option<&str>) -> Result<PathBuf> {
        paths::validate_name(command)?;
        if let Some(f) = feature {
            paths::validate_name(f)?;
        }
        Ok(self
            .state_dir
            .join(paths::checkpoint_filename(command, feature)))
    }

    /// Missing or corrupt checkpoints are `None`. A checkpoint written at a
    /// different HEAD is still returned, with a warning.
    pub fn load(&self, command: &str, feature: Option<&str>) -> Option<Checkpoint> {
        match self.try_load(command, feature) {
            Ok(cp) => cp,
            Err(e) => {
                tracing::warn!(command, error = %e, "failed to load checkpoint");
                None
            }
        }
    }

    /// Like [`load`](Self::load), but a missing or corrupt checkpoint is
    /// [`LoopgateError::CheckpointNotFound`] and an invalid name is reported.
    pub fn require(&self, command: &str, feature: Option<&str>) -> Result<Checkpoint> {
        self.try_load(command, feature)?.ok_or_else(|| {
            LoopgateError::CheckpointNotFound(paths::checkpoint_filename(command, feature))
        })
    }

    fn try_load(&self, command: &str, feature: Option<&str>) -> Result<Option<Checkpoint>> {
        let path = self.path(command, feature)?;
        let Some(data) = io::read_optional(&path)? else {
            return Ok(None);
        };
        let checkpoint: Checkpoint = match serde_json::from_str(&data) {
            Ok(cp) => cp,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "checkpoint file is corrupt");
                return Ok(None);
            }
        };
        if let (Some(saved), Some(live)) = (&checkpoint.head_commit, self.vcs.head_commit()) {
            if *saved != live {
                tracing::warn!(
                    "checkpoint is stale (saved at {}, current HEAD is {})",
                    short(saved),
                    short(&live)
                );
            }
        }
        Ok(Some(checkpoint))
    }

    /// Validate summaries, stamp HEAD and timestamps, and write atomically.
    pub fn save(&self, command: &str, checkpoint: &mut Checkpoint, feature: Option<&str>) -> bool {
        match self.try_save(command, checkpoint, feature, Utc::now()) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(command, error = %e, "failed to save checkpoint");
                false
            }
        }
    }

    fn try_save(
        &self,
        command: &str,
        checkpoint: &mut Checkpoint,
        feature: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let path = self.path(command, feature)?;
        checkpoint.validate()?;
        if let Some(head) = self.vcs.head_commit() {
            checkpoint.head_commit = Some(head);
        }
        checkpoint.updated_at = Some(now);
        checkpoint.started_at.get_or_insert(now);
        io::write_json(&path, checkpoint)
    }

    pub fn update_phase(
        &self,
        command: &str,
        phase: &str,
        update: PhaseUpdate,
        feature: Option<&str>,
    ) -> bool {
        let mut checkpoint = self
            .load(command, feature)
            .unwrap_or_else(|| Checkpoint::new(command, feature));
        checkpoint.apply(phase, update, Utc::now());
        self.save(command, &mut checkpoint, feature)
    }

    pub fn complete(&self, command: &str, feature: Option<&str>) -> bool {
        let Some(mut checkpoint) = self.load(command, feature) else {
            tracing::warn!(command, "cannot complete checkpoint: no checkpoint found");
            return false;
        };
        checkpoint.state.current_phase = None;
        checkpoint.state.pending_phases.clear();
        checkpoint.completed_at = Some(Utc::now());
        self.save(command, &mut checkpoint, feature)
    }

    /// Where to pick up: the current phase and the summary of the most
    /// recently completed one. Empty for missing or completed checkpoints.
    pub fn resume_point(&self, command: &str, feature: Option<&str>) -> ResumePoint {
        let Some(checkpoint) = self.load(command, feature) else {
            return ResumePoint::default();
        };
        if checkpoint.completed_at.is_some() {
            return ResumePoint::default();
        }
        let summary = checkpoint
            .state
            .completed_phases
            .last()
            .and_then(|p| checkpoint.phases.get(p))
            .and_then(|p| p.context_summary.clone());
        ResumePoint {
            phase: checkpoint.state.current_phase,
            summary,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
