use crate::parser::types::{Command, CommandId};
use serde::Serialize;
use std::path::PathBuf;

/// Result of a command handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandOutcome {
    /// Device state may have changed
    Mutated,
    Unmutated,
    /// An optional precondition was absent, or a loop ran zero times
    Skipped,
}

impl CommandOutcome {
    pub fn from_mutation(mutated: bool) -> Self {
        if mutated {
            CommandOutcome::Mutated
        } else {
            CommandOutcome::Unmutated
        }
    }

    pub fn is_mutating(&self) -> bool {
        matches!(self, CommandOutcome::Mutated)
    }
}

/// Decision taken after a command failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ErrorResolution {
    Continue,
    Fail,
}

/// Runtime annotation attached to a command
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandMetadata {
    /// Completed iterations, for loops
    pub number_of_runs: Option<u32>,
    /// The command as last executed, after script interpolation
    pub evaluated_command: Option<Command>,
}

/// Metadata of every command executed so far, addressed by `CommandId`
///
/// Entries are created lazily and never removed during a run; a reset
/// reinitialises an entry in place.
#[derive(Debug, Default)]
pub struct MetadataTable {
    entries: Vec<Option<CommandMetadata>>,
}

impl MetadataTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: CommandId) -> Option<&CommandMetadata> {
        self.entries.get(id.0).and_then(|e| e.as_ref())
    }

    /// Current metadata, created empty on first access
    pub fn get_or_default(&mut self, id: CommandId) -> CommandMetadata {
        self.slot(id).get_or_insert_with(CommandMetadata::default).clone()
    }

    pub fn update(&mut self, id: CommandId, metadata: CommandMetadata) {
        *self.slot(id) = Some(metadata);
    }

    pub fn reset(&mut self, id: CommandId) {
        *self.slot(id) = Some(CommandMetadata::default());
    }

    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&mut self, id: CommandId) -> &mut Option<CommandMetadata> {
        if id.0 >= self.entries.len() {
            self.entries.resize(id.0 + 1, None);
        }
        &mut self.entries[id.0]
    }
}

/// App state produced by an init flow, used to seed a later run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestraAppState {
    pub app_id: String,
    pub file: PathBuf,
}

/// Totals collected from the event stream
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub total_commands: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub total_duration_ms: Option<u64>,
}
