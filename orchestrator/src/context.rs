//! The bounded working context the orchestrator assembles once per chat
//! turn and refreshes each loop iteration so newly appended tool results
//! are visible to the next planner call (`spec.md` §4.7 step 3, GLOSSARY
//! "Turn context").

use aria_protocol::public_tool_names;
use aria_sessions::{HistoryEntry, Session};
use serde::Serialize;

/// Default number of trailing history entries fed to the planner
/// (`spec.md` §4.7 step 3 "history tail bounded by a token/size budget").
pub const DEFAULT_HISTORY_TAIL: usize = 20;

#[derive(Debug, Clone, Serialize)]
pub struct CreditFacts {
    pub balance: i64,
    pub available: i64,
    pub overdrafted: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionFacts {
    pub score_summary: Option<aria_sessions::ScoreSummary>,
    pub selected_verse_number: Option<u32>,
    pub preprocessed: bool,
    pub credit: Option<CreditFacts>,
    pub current_job_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TurnContext {
    pub system_prompt: String,
    pub tool_catalog: Vec<&'static str>,
    pub history_tail: Vec<HistoryEntry>,
    pub session_facts: SessionFacts,
}

pub const SYSTEM_PROMPT: &str = "You are the singing-voice synthesis assistant. \
Use the available tools to parse scores, preprocess voice parts, and synthesize audio. \
Always confirm estimated credit cost with the user before starting synthesis.";

impl TurnContext {
    pub fn build(session: &Session, credit: Option<CreditFacts>, history_tail_len: usize) -> Self {
        let score_summary = session.file_slot.as_ref().map(|slot| slot.score.summary());
        let selected_verse_number = session
            .file_slot
            .as_ref()
            .map(|slot| slot.score.selected_verse_number);
        let preprocessed = session
            .file_slot
            .as_ref()
            .map(|slot| slot.score.preprocessed_for_verse_number.is_some())
            .unwrap_or(false);

        Self {
            system_prompt: SYSTEM_PROMPT.to_string(),
            tool_catalog: public_tool_names(),
            history_tail: session.history_tail(history_tail_len).to_vec(),
            session_facts: SessionFacts {
                score_summary,
                selected_verse_number,
                preprocessed,
                credit,
                current_job_id: session.current_job_id.clone(),
            },
        }
    }
}
