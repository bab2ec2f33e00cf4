//! Session data model (`spec.md` §3 "Session", "Score snapshot").

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for SessionId {
    type Err = uuid::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallMeta {
    pub name: String,
    pub arguments: Value,
    #[serde(default)]
    pub request_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub tool_call: Option<ToolCallMeta>,
    pub at: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_call: None,
            at: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_call: None,
            at: Utc::now(),
        }
    }

    pub fn tool_result(content: impl Into<String>, meta: ToolCallMeta) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_call: Some(meta),
            at: Utc::now(),
        }
    }
}

/// Opaque parser-produced document, with the two fields the orchestrator
/// reads by name (`spec.md` §3, REDESIGN FLAGS #3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreSnapshot {
    pub document: Value,
    pub version: u32,
    pub selected_verse_number: u32,
    #[serde(default)]
    pub preprocessed_for_verse_number: Option<u32>,
    #[serde(default)]
    pub derived_available_for_target: bool,
}

impl ScoreSnapshot {
    pub fn new(document: Value, selected_verse_number: u32) -> Self {
        Self {
            document,
            version: 1,
            selected_verse_number,
            preprocessed_for_verse_number: None,
            derived_available_for_target: false,
        }
    }

    /// Bump the version counter on a successful mutation (`spec.md` §3
    /// "Score snapshot ... Carries a version counter incremented on every
    /// successful mutation").
    pub fn bump(&mut self) {
        self.version += 1;
    }

    /// A short, human/planner-readable summary, never re-parsing the
    /// opaque document (`SPEC_FULL.md` §9 "Score summary projection").
    pub fn summary(&self) -> ScoreSummary {
        let title = self
            .document
            .get("title")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let part_count = self
            .document
            .get("parts")
            .and_then(|v| v.as_array())
            .map(|a| a.len());
        ScoreSummary {
            title,
            part_count,
            selected_verse_number: self.selected_verse_number,
            preprocessed: self.preprocessed_for_verse_number.is_some(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreSummary {
    pub title: Option<String>,
    pub part_count: Option<usize>,
    pub selected_verse_number: u32,
    pub preprocessed: bool,
}

/// The session's single uploaded-score slot (`spec.md` §3 "file slot").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSlot {
    /// Object-store key of the immutable uploaded bytes.
    pub original_ref: String,
    pub score: ScoreSnapshot,
    #[serde(default)]
    pub transformed: Option<ScoreSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EstimateRecord {
    pub estimated_seconds: u32,
    pub estimated_credits: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    pub history: Vec<HistoryEntry>,
    pub file_slot: Option<FileSlot>,
    pub latest_audio_ref: Option<String>,
    pub pending_estimate: Option<EstimateRecord>,
    pub current_job_id: Option<String>,
}

impl Session {
    pub fn new(id: SessionId, user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            user_id: user_id.into(),
            created_at: now,
            last_active: now,
            history: Vec::new(),
            file_slot: None,
            latest_audio_ref: None,
            pending_estimate: None,
            current_job_id: None,
        }
    }

    /// Advance `last_active`, refreshing the session's TTL expiry
    /// (`spec.md` §4.4 "refreshed on access").
    pub fn touch(&mut self) {
        self.last_active = Utc::now();
    }

    /// History is append-only (`spec.md` §3 invariant).
    pub fn push_history(&mut self, entry: HistoryEntry) {
        self.history.push(entry);
    }

    /// Replace the file slot atomically (`spec.md` §3 "file slot replaces
    /// atomically on upload").
    pub fn set_file_slot(&mut self, slot: FileSlot) {
        self.file_slot = Some(slot);
        self.pending_estimate = None;
    }

    pub fn history_tail(&self, max_entries: usize) -> &[HistoryEntry] {
        let len = self.history.len();
        let start = len.saturating_sub(max_entries);
        &self.history[start..]
    }
}
