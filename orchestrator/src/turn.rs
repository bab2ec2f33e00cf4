//! The orchestrator's per-turn loop: plan, validate, dispatch, apply
//! workflow guards, repeat (`spec.md` §4.7, component C7).

use std::time::Instant;

use aria_protocol::{is_public, GatewayError, ESTIMATE_TOOL, SYNTHESIZE_TOOL};
use aria_sessions::{EstimateRecord, HistoryEntry, Session, ToolCallMeta};
use chrono::Utc;
use serde_json::Value;
use tracing::warn;

use crate::background::spawn_background_synthesis;
use crate::context::{CreditFacts, TurnContext};
use crate::envelope::ChatEnvelope;
use crate::guards::{verse_requires_reparse, SynthesizeRequest};
use crate::planner::PlannerOutput;
use crate::Orchestrator;

impl Orchestrator {
    /// Run one chat turn to completion: acquire the session, loop the
    /// planner against tools up to `max_iterations`, and return exactly
    /// one [`ChatEnvelope`] (`spec.md` §4.7 "a turn produces exactly one
    /// reply to the caller").
    pub async fn handle_chat_turn(
        &self,
        session_id: aria_sessions::SessionId,
        message: String,
    ) -> Result<ChatEnvelope, GatewayError> {
        let mut guard = self.sessions.lock(session_id).await?;
        guard.push_history(HistoryEntry::user(message));

        let turn_start = Instant::now();
        let mut iterations: u32 = 0;

        loop {
            if iterations >= self.config.max_iterations {
                let text = "I wasn't able to finish that within the allotted number of steps. \
                    Let me know if you'd like me to keep going."
                    .to_string();
                guard.push_history(HistoryEntry::assistant(text.clone()));
                warn!(session_id = %session_id, iterations, "turn hit the iteration cap");
                return Ok(self.text_envelope(&guard, text));
            }
            iterations += 1;

            let credit_facts = self
                .credits
                .account_snapshot(&guard.user_id)
                .await
                .ok()
                .map(|acct| CreditFacts {
                    balance: acct.balance,
                    available: acct.available(),
                    overdrafted: acct.overdrafted,
                });
            let ctx = TurnContext::build(&guard, credit_facts, self.config.history_tail_len);

            let output = self
                .planner
                .plan(&ctx)
                .await
                .map_err(|e| GatewayError::internal(e.to_string()))?;

            let (name, arguments) = match output {
                PlannerOutput::FinalText(text) => {
                    guard.push_history(HistoryEntry::assistant(text.clone()));
                    return Ok(self.text_envelope(&guard, text));
                }
                PlannerOutput::ToolCall { name, arguments } => (name, arguments),
            };

            if !is_public(&name) {
                self.record_error(&mut guard, &name, &arguments, GatewayError::tool_not_allowed(&name));
                continue;
            }
            if !arguments.is_object() {
                self.record_error(
                    &mut guard,
                    &name,
                    &arguments,
                    GatewayError::invalid_input("tool arguments must be a JSON object"),
                );
                continue;
            }

            if name == SYNTHESIZE_TOOL {
                if let Some(envelope) = self
                    .handle_synthesize(&mut guard, arguments, turn_start)
                    .await?
                {
                    return Ok(envelope);
                }
                continue;
            }

            let remaining = self
                .config
                .turn_deadline
                .saturating_sub(turn_start.elapsed());
            let result = self.router.call(&name, arguments.clone(), remaining).await;
            self.record_tool_outcome(&mut guard, &name, &arguments, result).await;
        }
    }

    fn text_envelope(&self, session: &Session, message: String) -> ChatEnvelope {
        ChatEnvelope::ChatText {
            message,
            current_score: session.file_slot.as_ref().map(|slot| slot.score.summary()),
        }
    }

    fn record_error(&self, session: &mut Session, name: &str, arguments: &Value, err: GatewayError) {
        let content = serde_json::json!({"error": {"kind": err.kind, "message": err.message}}).to_string();
        session.push_history(HistoryEntry::tool_result(
            content,
            ToolCallMeta {
                name: name.to_string(),
                arguments: arguments.clone(),
                request_id: None,
            },
        ));
    }

    fn record_success(&self, session: &mut Session, name: &str, arguments: &Value, value: &Value) {
        session.push_history(HistoryEntry::tool_result(
            value.to_string(),
            ToolCallMeta {
                name: name.to_string(),
                arguments: arguments.clone(),
                request_id: None,
            },
        ));
    }

    /// Apply a general (non-`synthesize`) tool result to history, with the
    /// `estimate_credits` special case: the ledger's numbers are merged in
    /// and the session remembers a fresh estimate exists (`spec.md` §4.7
    /// step e).
    async fn record_tool_outcome(
        &self,
        session: &mut Session,
        name: &str,
        arguments: &Value,
        result: Result<Value, GatewayError>,
    ) {
        let value = match result {
            Ok(value) => value,
            Err(e) => {
                self.record_error(session, name, arguments, e);
                return;
            }
        };

        if name != ESTIMATE_TOOL {
            self.record_success(session, name, arguments, &value);
            return;
        }

        let estimated_seconds = value
            .get("estimated_seconds")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32;

        match self.credits.estimate(&session.user_id, estimated_seconds).await {
            Ok(est) => {
                session.pending_estimate = Some(EstimateRecord {
                    estimated_seconds: est.estimated_seconds,
                    estimated_credits: est.estimated_credits,
                    created_at: Utc::now(),
                });
                let mut merged = value;
                if let Some(obj) = merged.as_object_mut() {
                    obj.insert("estimated_credits".to_string(), serde_json::json!(est.estimated_credits));
                    obj.insert("balance".to_string(), serde_json::json!(est.balance));
                    obj.insert("available".to_string(), serde_json::json!(est.available));
                    obj.insert("projected".to_string(), serde_json::json!(est.projected));
                }
                self.record_success(session, name, arguments, &merged);
            }
            Err(e) => self.record_error(session, name, arguments, e.into()),
        }
    }

    /// The `synthesize` workflow guards (`spec.md` §4.7 step f): returns
    /// `Some(envelope)` to end the turn when a job was actually started,
    /// `None` to let the loop continue after recording a synthetic result
    /// (guard rejection, or a silent reparse followed by another
    /// iteration).
    async fn handle_synthesize(
        &self,
        session: &mut Session,
        mut arguments: Value,
        turn_start: Instant,
    ) -> Result<Option<ChatEnvelope>, GatewayError> {
        let request = SynthesizeRequest::from_arguments(&arguments);

        let Some(slot) = session.file_slot.clone() else {
            self.record_error(
                session,
                SYNTHESIZE_TOOL,
                &arguments,
                GatewayError::action_required("no score has been uploaded yet"),
            );
            return Ok(None);
        };

        if request.requires_preprocessing && !slot.score.derived_available_for_target {
            self.record_error(
                session,
                SYNTHESIZE_TOOL,
                &arguments,
                GatewayError::action_required("preprocessing_required_for_complex_score"),
            );
            return Ok(None);
        }

        if let Some(verse) = request.requested_verse {
            if let Some(preprocessed_verse) = slot.score.preprocessed_for_verse_number {
                if preprocessed_verse != verse {
                    self.record_error(
                        session,
                        SYNTHESIZE_TOOL,
                        &arguments,
                        GatewayError::action_required("verse_change_requires_repreprocess"),
                    );
                    return Ok(None);
                }
            } else if verse_requires_reparse(verse, slot.score.selected_verse_number, slot.score.preprocessed_for_verse_number) {
                let remaining = self.config.turn_deadline.saturating_sub(turn_start.elapsed());
                let reparse_args = serde_json::json!({
                    "original_ref": slot.original_ref,
                    "verse_number": verse,
                });
                match self.router.call("parse_score", reparse_args.clone(), remaining).await {
                    Ok(value) => {
                        let mut new_score = aria_sessions::ScoreSnapshot::new(value, verse);
                        new_score.bump();
                        session.set_file_slot(aria_sessions::FileSlot {
                            original_ref: slot.original_ref.clone(),
                            score: new_score,
                            transformed: slot.transformed.clone(),
                        });
                        self.record_success(session, "parse_score", &reparse_args, &serde_json::json!({"reparsed_for_verse": verse}));
                    }
                    Err(e) => {
                        self.record_error(session, "parse_score", &reparse_args, e);
                        return Ok(None);
                    }
                }
                return Ok(None);
            }
        }

        let Some(estimate) = session.pending_estimate.clone() else {
            self.record_error(
                session,
                SYNTHESIZE_TOOL,
                &arguments,
                GatewayError::action_required(
                    "no_estimate: call estimate_credits and confirm with the user before synthesizing",
                ),
            );
            return Ok(None);
        };

        let job_id = self.jobs.create(session.id.to_string(), session.user_id.clone());
        match self
            .credits
            .reserve(&session.user_id, &job_id.to_string(), estimate.estimated_credits)
            .await
        {
            Ok(reservation_id) => {
                let _ = self.jobs.set_reservation(job_id, reservation_id);
                let _ = self.jobs.start(job_id);
                session.current_job_id = Some(job_id.to_string());

                if let Some(obj) = arguments.as_object_mut() {
                    obj.insert("job_id".to_string(), serde_json::json!(job_id.to_string()));
                }
                spawn_background_synthesis(
                    self.router.clone(),
                    self.jobs.clone(),
                    self.credits.clone(),
                    self.sessions.clone(),
                    job_id,
                    session.id,
                    session.user_id.clone(),
                    arguments,
                    self.config.job_deadline,
                );

                let message = format!(
                    "Starting synthesis (job {job_id}); I'll let you know as soon as it's ready."
                );
                session.push_history(HistoryEntry::assistant(message.clone()));
                let progress_url = format!("/sessions/{}/progress?job={job_id}", session.id);
                Ok(Some(ChatEnvelope::ChatProgress {
                    message,
                    progress_url,
                    job_id: job_id.to_string(),
                    current_score: session.file_slot.as_ref().map(|s| s.score.summary()),
                }))
            }
            Err(e) => {
                self.record_error(session, SYNTHESIZE_TOOL, &arguments, e.into());
                Ok(None)
            }
        }
    }
}
