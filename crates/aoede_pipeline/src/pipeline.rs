//! The per-turn orchestration pipeline.
//!
//! One `handle_turn` call walks the full chain: persist the message, brief
//! the dispatcher, update affect, pick a suggestion, retrieve, pack the
//! budget, draft the reply, run tools, refine, filter, persist. Every stage
//! has a scoped fallback; the caller always gets a complete [`TurnOutcome`]
//! and the user always gets either a real answer or a short apology.

use crate::budget::{self, BudgetPlan};
use crate::envbrief::EnvBrief;
use crate::guard::{FilterHits, OutputFilter};
use crate::llm::{GenParams, ModelClient};
use crate::prompts;
use crate::retrieval::{Retriever, Snippet, StoreRetriever};
use crate::schema;
use crate::tools::{ToolOutcome, ToolRegistry};
use anyhow::Result;
use aoede_affect::{AffectEngine, StylePreset};
use aoede_core::config::AoedeConfig;
use aoede_core::types::{
    DispatchDecision, MemoryKind, ReplyDraft, Role, StoredMessage, SuggestionCandidate,
    ToolCallRequest, Turn,
};
use aoede_memory::{BanditSelector, SqliteStore};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

const RETRIEVAL_LIMIT: usize = 8;
const DISPATCH_MAX_TOKENS: u32 = 512;
const DISPATCH_TEMPERATURE: f64 = 0.2;

/// What the user hears when the executor fails twice in a row.
const APOLOGY_TEXT: &str =
    "Sorry, I lost my train of thought for a moment. Could you say that again?";

/// Everything one turn produced, for the front-end and for logging. The
/// pipeline never returns an error; degraded stages show up here as empty
/// fields instead.
#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    /// Final filtered reply text.
    pub text: String,
    pub decision: DispatchDecision,
    pub suggestion: Option<SuggestionCandidate>,
    /// Snippets that made it into the executor prompt.
    pub retrieved: Vec<Snippet>,
    pub tool_outcomes: Vec<ToolOutcome>,
    pub preset: StylePreset,
    pub filter_hits: FilterHits,
    pub user_msg_id: Option<i64>,
    pub assistant_msg_id: Option<i64>,
}

/// A user's verdict on one assistant message.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedbackSignal {
    Up,
    Down,
    Text(String),
}

pub struct Pipeline {
    store: Arc<SqliteStore>,
    affect: AffectEngine,
    dispatcher: Arc<dyn ModelClient>,
    executor: Arc<dyn ModelClient>,
    retriever: Arc<dyn Retriever>,
    tools: ToolRegistry,
    bandit: BanditSelector,
    filter: OutputFilter,
    config: AoedeConfig,
}

impl Pipeline {
    pub fn new(
        store: Arc<SqliteStore>,
        config: AoedeConfig,
        dispatcher: Arc<dyn ModelClient>,
        executor: Arc<dyn ModelClient>,
    ) -> Self {
        Self {
            bandit: BanditSelector::new(store.as_ref().clone(), config.bandit.clone()),
            filter: OutputFilter::new(&config.filter.extra_profanity),
            retriever: Arc::new(StoreRetriever::new(store.clone())),
            affect: AffectEngine::new(),
            tools: ToolRegistry::new(),
            store,
            dispatcher,
            executor,
            config,
        }
    }

    /// Swap in a different retrieval backend.
    pub fn with_retriever(mut self, retriever: Arc<dyn Retriever>) -> Self {
        self.retriever = retriever;
        self
    }

    /// Hand over the tool registry, usually populated by the front-end.
    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    /// Share an existing affect engine, e.g. with the consolidation task
    /// that resets it after sleep.
    pub fn with_affect(mut self, affect: AffectEngine) -> Self {
        self.affect = affect;
        self
    }

    pub fn affect(&self) -> AffectEngine {
        self.affect.clone()
    }

    pub fn store(&self) -> Arc<SqliteStore> {
        self.store.clone()
    }

    pub fn bandit(&self) -> &BanditSelector {
        &self.bandit
    }

    /// Run one full turn. Infallible by construction: every stage degrades
    /// locally and the envelope records what actually happened.
    pub async fn handle_turn(&self, turn: &Turn) -> TurnOutcome {
        let started = std::time::Instant::now();

        // Intake: the inbound message is persisted before anything can fail.
        let user_msg_id = match self
            .store
            .insert_message(&turn.user_id, Role::User, &turn.text, turn.ts)
            .await
        {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::error!(error = %e, "failed to persist user message");
                None
            }
        };

        let brief = match EnvBrief::build(&self.store, turn).await {
            Ok(brief) => Some(brief),
            Err(e) => {
                tracing::warn!(error = %e, "environment brief unavailable");
                None
            }
        };

        let history = self.fetch_history(&turn.user_id, user_msg_id).await;

        let decision = self.dispatch(turn, &history, brief.as_ref()).await;
        tracing::debug!(intent = %decision.intent, tools = ?decision.tools_hint, "dispatch decided");

        let preset = self.affect.apply_update(&decision.affect_update).await;

        let suggestion = match self
            .bandit
            .select(&decision.intent, &decision.suggestions)
            .await
        {
            Ok(choice) => choice,
            Err(e) => {
                tracing::warn!(error = %e, "suggestion selection failed");
                None
            }
        };

        let retrieved = self.retrieve(turn, &decision).await;

        let metadata = brief.as_ref().map(|b| b.to_metadata());
        let plan = budget::pack(
            &history,
            &retrieved,
            metadata.as_ref(),
            preset.max_output_tokens,
            &self.config.budget,
        );

        let gen = GenParams {
            temperature: preset.temperature,
            max_tokens: preset.max_output_tokens,
        };
        let draft = self
            .execute_draft(turn, &plan, &preset, &decision, suggestion.as_ref(), gen)
            .await;

        let tool_outcomes = self.run_tools(&decision, &draft).await;

        let mut final_text = draft.text.clone();
        if !tool_outcomes.is_empty() {
            if let Some(refined) = self.refine(turn, &draft.text, &tool_outcomes, gen).await {
                final_text = refined;
            }
        }

        let (filtered, filter_hits) = self.filter.apply(&final_text);

        let assistant_msg_id = self
            .persist_reply(turn, &filtered, &decision, suggestion.as_ref())
            .await;
        self.apply_memory_items(brief.as_ref(), &draft).await;
        self.log_affect(&turn.user_id, &preset).await;

        tracing::info!(
            user = %turn.user_id,
            intent = %decision.intent,
            tools = tool_outcomes.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "turn complete"
        );

        TurnOutcome {
            text: filtered,
            decision,
            suggestion,
            retrieved: plan.retrieved,
            tool_outcomes,
            preset,
            filter_hits,
            user_msg_id,
            assistant_msg_id,
        }
    }

    /// Record the user's verdict on an assistant message and teach the
    /// bandit. Runs outside the turn, so errors are allowed to surface.
    pub async fn ingest_feedback(&self, msg_id: i64, signal: FeedbackSignal) -> Result<()> {
        let (kind, text, reward) = match &signal {
            FeedbackSignal::Up => ("up", None, Some(1)),
            FeedbackSignal::Down => ("down", None, Some(-1)),
            FeedbackSignal::Text(body) => ("text", Some(body.as_str()), None),
        };
        self.store.add_feedback(msg_id, kind, text).await?;

        if matches!(signal, FeedbackSignal::Up) {
            self.store.mark_approved(msg_id).await?;
        }

        if let Some(reward) = reward {
            match self.store.message_meta(msg_id).await? {
                Some((intent, suggestion_kind)) if suggestion_kind != "none" => {
                    self.bandit
                        .record_outcome(&intent, &suggestion_kind, reward)
                        .await?;
                }
                Some(_) => {
                    tracing::debug!(msg_id, "feedback on a turn without a suggestion, bandit untouched");
                }
                None => {
                    tracing::debug!(msg_id, "no meta recorded for message, bandit untouched");
                }
            }
        }
        Ok(())
    }

    /// Recent history excluding the message currently being answered,
    /// oldest first.
    async fn fetch_history(&self, user_id: &str, current_id: Option<i64>) -> Vec<StoredMessage> {
        let limit = self.config.budget.max_history_messages + 1;
        let mut history = match self.store.recent_messages(user_id, limit).await {
            Ok(messages) => messages,
            Err(e) => {
                tracing::warn!(error = %e, "history unavailable");
                Vec::new()
            }
        };
        if let Some(id) = current_id {
            history.retain(|m| m.id != id);
        }
        history
    }

    async fn dispatch(
        &self,
        turn: &Turn,
        history: &[StoredMessage],
        brief: Option<&EnvBrief>,
    ) -> DispatchDecision {
        let window_start = history
            .len()
            .saturating_sub(self.config.budget.dispatch_window_messages);
        let window = &history[window_start..];
        let levels = self.affect.levels().await;
        let brief_text = brief.map(|b| b.render()).unwrap_or_default();
        let catalog = self.tools.catalog();
        let prompt =
            prompts::build_dispatch_prompt(window, &turn.text, &levels, &brief_text, &catalog);
        let params = GenParams {
            temperature: DISPATCH_TEMPERATURE,
            max_tokens: DISPATCH_MAX_TOKENS,
        };
        let timeout = Duration::from_secs(self.config.models.dispatcher_timeout_secs);

        let raw = match self
            .call_model(&self.dispatcher, prompts::DISPATCHER_SYSTEM, &prompt, params, timeout)
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(error = %e, "dispatcher unreachable, using default decision");
                return DispatchDecision::conservative_default();
            }
        };

        match schema::parse_decision(&raw) {
            Ok(decision) => decision,
            Err(err) => {
                tracing::debug!(error = %err, "dispatcher output invalid, repairing");
                let repair =
                    prompts::repair_prompt(&prompt, err.raw(), &err.to_string());
                match self
                    .call_model(&self.dispatcher, prompts::DISPATCHER_SYSTEM, &repair, params, timeout)
                    .await
                    .and_then(|raw| schema::parse_decision(&raw).map_err(Into::into))
                {
                    Ok(decision) => decision,
                    Err(e) => {
                        tracing::warn!(error = %e, "dispatcher repair failed, using default decision");
                        DispatchDecision::conservative_default()
                    }
                }
            }
        }
    }

    async fn retrieve(&self, turn: &Turn, decision: &DispatchDecision) -> Vec<Snippet> {
        let query = decision.rag_query.as_deref().unwrap_or(&turn.text);
        let timeout = Duration::from_secs(self.config.models.retrieval_timeout_secs);
        match tokio::time::timeout(
            timeout,
            self.retriever.retrieve(query, &decision.intent, RETRIEVAL_LIMIT),
        )
        .await
        {
            Ok(Ok(snippets)) => snippets,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "retrieval failed, continuing without context");
                Vec::new()
            }
            Err(_) => {
                tracing::warn!("retrieval timed out, continuing without context");
                Vec::new()
            }
        }
    }

    async fn execute_draft(
        &self,
        turn: &Turn,
        plan: &BudgetPlan,
        preset: &StylePreset,
        decision: &DispatchDecision,
        suggestion: Option<&SuggestionCandidate>,
        gen: GenParams,
    ) -> ReplyDraft {
        let style = prompts::render_style(preset, decision.style_directive.as_deref());
        let instructions = self.tools.instructions_for(&decision.tools_hint);
        let prompt =
            prompts::build_executor_prompt(plan, &turn.text, &style, suggestion, &instructions);
        let timeout = Duration::from_secs(self.config.models.executor_timeout_secs);

        let raw = match self
            .call_model(&self.executor, prompts::EXECUTOR_SYSTEM, &prompt, gen, timeout)
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(error = %e, "executor unreachable, falling back to apology");
                return apology();
            }
        };

        match schema::parse_draft(&raw) {
            Ok(draft) => draft,
            Err(err) => {
                tracing::debug!(error = %err, "executor output invalid, repairing");
                let repair = prompts::repair_prompt(&prompt, err.raw(), &err.to_string());
                match self
                    .call_model(&self.executor, prompts::EXECUTOR_SYSTEM, &repair, gen, timeout)
                    .await
                    .and_then(|raw| schema::parse_draft(&raw).map_err(Into::into))
                {
                    Ok(draft) => draft,
                    Err(e) => {
                        tracing::warn!(error = %e, "executor repair failed, falling back to apology");
                        apology()
                    }
                }
            }
        }
    }

    async fn run_tools(&self, decision: &DispatchDecision, draft: &ReplyDraft) -> Vec<ToolOutcome> {
        let mut calls: Vec<ToolCallRequest> = decision.tools_request.clone();
        calls.extend(draft.tool_calls.iter().cloned());
        if calls.is_empty() {
            return Vec::new();
        }
        let timeout = Duration::from_secs(self.config.models.tool_timeout_secs);
        self.tools.run_all(&calls, timeout).await
    }

    /// Fold tool outcomes back into the reply. Any failure keeps the
    /// unrefined draft, so this never costs the turn.
    async fn refine(
        &self,
        turn: &Turn,
        draft_text: &str,
        outcomes: &[ToolOutcome],
        gen: GenParams,
    ) -> Option<String> {
        let outcomes_json = serde_json::to_string(outcomes).unwrap_or_else(|_| "[]".to_string());
        let prompt = prompts::build_refine_prompt(draft_text, &outcomes_json, &turn.text);
        let timeout = Duration::from_secs(self.config.models.executor_timeout_secs);
        match self
            .call_model(&self.executor, prompts::REFINE_SYSTEM, &prompt, gen, timeout)
            .await
        {
            Ok(raw) => match schema::parse_draft(&raw) {
                Ok(draft) => Some(draft.text),
                Err(e) => {
                    tracing::debug!(error = %e, "refinement output invalid, keeping draft");
                    None
                }
            },
            Err(e) => {
                tracing::debug!(error = %e, "refinement failed, keeping draft");
                None
            }
        }
    }

    async fn persist_reply(
        &self,
        turn: &Turn,
        text: &str,
        decision: &DispatchDecision,
        suggestion: Option<&SuggestionCandidate>,
    ) -> Option<i64> {
        let msg_id = match self
            .store
            .insert_message(&turn.user_id, Role::Assistant, text, Utc::now().timestamp())
            .await
        {
            Ok(id) => id,
            Err(e) => {
                tracing::error!(error = %e, "failed to persist assistant message");
                return None;
            }
        };
        let suggestion_kind = suggestion.map(|s| s.kind.as_str()).unwrap_or("none");
        if let Err(e) = self
            .store
            .insert_message_meta(msg_id, &decision.intent, suggestion_kind)
            .await
        {
            tracing::warn!(error = %e, "failed to record message meta");
        }
        Some(msg_id)
    }

    /// Apply the executor's memory items. Facts with a stable key upsert
    /// into the environment; everything else lands as a note.
    async fn apply_memory_items(&self, brief: Option<&EnvBrief>, draft: &ReplyDraft) {
        for item in &draft.memory {
            if item.text.trim().is_empty() {
                continue;
            }
            let fact_key = match (&item.kind, &item.key, brief) {
                (MemoryKind::Fact, Some(key), Some(brief)) if !key.trim().is_empty() => {
                    Some((brief.env_id, key.clone()))
                }
                _ => None,
            };
            let result = match fact_key {
                Some((env_id, key)) => {
                    self.store
                        .set_env_fact(env_id, &key, &item.text, item.importance.unwrap_or(0.5))
                        .await
                }
                None => self.store.insert_note(&item.text, &[]).await.map(|_| ()),
            };
            if let Err(e) = result {
                tracing::warn!(error = %e, "failed to apply memory item");
            }
        }
    }

    async fn log_affect(&self, user_id: &str, preset: &StylePreset) {
        let levels = self.affect.levels().await;
        let levels_json = match serde_json::to_string(&levels) {
            Ok(json) => json,
            Err(_) => return,
        };
        let preset_json = match serde_json::to_string(preset) {
            Ok(json) => json,
            Err(_) => return,
        };
        if let Err(e) = self
            .store
            .insert_affect_log(user_id, &levels_json, &preset_json)
            .await
        {
            tracing::warn!(error = %e, "failed to append affect log");
        }
    }

    async fn call_model(
        &self,
        client: &Arc<dyn ModelClient>,
        system: &str,
        prompt: &str,
        params: GenParams,
        timeout: Duration,
    ) -> Result<String> {
        match tokio::time::timeout(timeout, client.complete(system, prompt, params)).await {
            Ok(result) => result,
            Err(_) => anyhow::bail!("model call timed out after {:?}", timeout),
        }
    }
}

fn apology() -> ReplyDraft {
    ReplyDraft {
        text: APOLOGY_TEXT.to_string(),
        ..Default::default()
    }
}
