//! The orchestrator's reply to a chat turn, handed to the HTTP edge for
//! JSON serialization (`spec.md` §4.7 "returns one of").

use aria_sessions::ScoreSummary;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEnvelope {
    ChatText {
        message: String,
        current_score: Option<ScoreSummary>,
    },
    ChatAudio {
        message: String,
        audio_url: String,
        current_score: Option<ScoreSummary>,
    },
    ChatProgress {
        message: String,
        progress_url: String,
        job_id: String,
        current_score: Option<ScoreSummary>,
    },
    ChatError {
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_text_serializes_with_snake_case_tag() {
        let env = ChatEnvelope::ChatText {
            message: "hi".into(),
            current_score: None,
        };
        let v = serde_json::to_value(&env).unwrap();
        assert_eq!(v["type"], "chat_text");
        assert_eq!(v["message"], "hi");
    }

    #[test]
    fn chat_progress_carries_job_id() {
        let env = ChatEnvelope::ChatProgress {
            message: "working".into(),
            progress_url: "/sessions/s/progress".into(),
            job_id: "j1".into(),
            current_score: None,
        };
        let v = serde_json::to_value(&env).unwrap();
        assert_eq!(v["type"], "chat_progress");
        assert_eq!(v["job_id"], "j1");
    }
}
