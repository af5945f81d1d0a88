//! The Init → Thinking ⇄ Acting → Done state machine.

use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use stepwise_config::AgentConfig;
use stepwise_core::error::{AgentError, Error, InferenceError, Result, ToolError};
use stepwise_core::{Action, InferenceProvider, ToolRegistry};
use stepwise_memory::{KnowledgeStore, Memory, StepKind};
use stepwise_parser::{ParsedResponse, ResponseParser};
use stepwise_prompt::{PromptBuilder, TemplateSet, TEMPLATE_INIT, TEMPLATE_THINKING};
use tracing::{debug, info, warn};

const INIT_CORRECTIVE: &str = "Your previous reply could not be used. Reply with a single \
JSON object that includes a \"Plan\" field.";
const THINKING_CORRECTIVE: &str = "Your previous reply could not be parsed. Reply with a \
single JSON object using only the documented fields.";

/// How a run ended.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// The final answer, or a progress digest when the budget ran out.
    pub answer: String,
    /// Loop steps consumed (thinking turns, including no-op turns).
    pub steps_taken: u32,
    /// True when the answer was assembled from summaries instead of a
    /// model-provided `Final_Answer`.
    pub degraded: bool,
}

/// The agent control loop.
///
/// Owns the run's memory; the inference provider and tool registry are
/// shared. One `AgentLoop` drives one run at a time, but memory and the
/// knowledge base survive across runs so a second objective can build
/// on what the first one learned.
pub struct AgentLoop {
    provider: Arc<dyn InferenceProvider>,
    registry: Arc<ToolRegistry>,
    builder: PromptBuilder,
    parser: ResponseParser,
    store: KnowledgeStore,
    config: AgentConfig,
}

impl AgentLoop {
    pub fn new(
        provider: Arc<dyn InferenceProvider>,
        registry: Arc<ToolRegistry>,
        config: AgentConfig,
    ) -> Self {
        let memory = Memory::new()
            .with_history_length(config.history_length)
            .with_timeline_length(config.timeline_length);
        let mut store = KnowledgeStore::new(memory)
            .with_capacity(config.max_kb_items)
            .with_max_age_days(config.kb_max_age_days);
        if let Some(path) = &config.storage_path {
            store = store.with_storage(path);
        }

        let mut builder =
            PromptBuilder::new(TemplateSet::builtin()).with_max_chars(config.max_prompt_chars);
        for (section, limit) in &config.section_limits {
            builder = builder.with_section_limit(section, *limit);
        }

        Self {
            provider,
            registry,
            builder,
            parser: ResponseParser::new(),
            store,
            config,
        }
    }

    /// Replace the built-in templates.
    pub fn with_templates(mut self, templates: TemplateSet) -> Self {
        let mut builder =
            PromptBuilder::new(templates).with_max_chars(self.config.max_prompt_chars);
        for (section, limit) in &self.config.section_limits {
            builder = builder.with_section_limit(section, *limit);
        }
        self.builder = builder;
        self
    }

    pub fn store(&self) -> &KnowledgeStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut KnowledgeStore {
        &mut self.store
    }

    /// Drive one objective to completion.
    ///
    /// Returns an error only for inference transport failures and a
    /// failed initialization; everything else — unknown tools, tool
    /// failures, unparseable turns, step exhaustion — degrades and the
    /// loop keeps going.
    pub async fn run(&mut self, objective: &str) -> Result<RunOutcome> {
        info!(objective, "run starting");
        let plan = self.initialize(objective).await?;
        self.store
            .record(StepKind::Plan, plan.clone(), Some(0), BTreeMap::new());

        // Results from the previous acting turn, rendered for the next
        // thinking prompt.
        let mut results_text = String::new();

        for step in 1..=self.config.max_steps {
            debug!(step, "thinking turn");
            let Some(response) = self.think(objective, &plan, &results_text, step).await? else {
                // Retries exhausted without a usable response: a no-op
                // turn that still consumes a step.
                warn!(step, "no usable response, skipping turn");
                results_text.clear();
                continue;
            };

            let mut lines = Vec::new();
            // Memory directives apply even on a terminating turn.
            self.apply_memory_directives(&response, step, &mut lines);

            if let Some(answer) = response.final_answer {
                self.store
                    .record(StepKind::FinalAnswer, answer.clone(), Some(step), BTreeMap::new());
                info!(step, "final answer produced");
                return Ok(RunOutcome {
                    answer,
                    steps_taken: step,
                    degraded: false,
                });
            }

            if !response.actions.is_empty() {
                debug!(step, actions = response.actions.len(), "acting turn");
                self.act(&response.actions, step, &mut lines).await;
            }
            results_text = lines.join("\n");
            if !results_text.is_empty() {
                self.store.record(
                    StepKind::Results,
                    results_text.clone(),
                    Some(step),
                    BTreeMap::new(),
                );
            }
        }

        Ok(self.degraded_outcome(objective))
    }

    /// Init phase: obtain a plan, retrying with a corrective instruction.
    async fn initialize(&mut self, objective: &str) -> Result<String> {
        let attempts = self.config.init_retries + 1;
        for attempt in 1..=attempts {
            let mut prompt =
                self.builder
                    .render(TEMPLATE_INIT, &self.init_sections(objective), &BTreeMap::new())?;
            if attempt > 1 {
                prompt.push_str("\n\n");
                prompt.push_str(INIT_CORRECTIVE);
            }
            let raw = self.infer(&prompt).await?;
            match self.parser.parse(&raw) {
                Ok(response) => {
                    if let Some(plan) = response.plan.clone() {
                        self.store.remember_step(
                            0,
                            &[(StepKind::Thought, response.thought.unwrap_or_default())],
                        );
                        if let Some(state) = &response.state {
                            self.store.set_state(state, Some(0));
                        }
                        info!(attempt, "plan established");
                        return Ok(plan);
                    }
                    warn!(attempt, "response parsed but carried no plan");
                }
                Err(e) => warn!(attempt, error = %e, "initialization response unusable"),
            }
        }
        Err(Error::Agent(AgentError::InitializationFailed { attempts }))
    }

    /// One thinking turn, with bounded parse retries. `Ok(None)` means
    /// the retries ran out and the turn becomes a no-op.
    async fn think(
        &mut self,
        objective: &str,
        plan: &str,
        results_text: &str,
        step: u32,
    ) -> Result<Option<ParsedResponse>> {
        let sections = self.thinking_sections(objective, plan, results_text);
        let attempts = self.config.parse_retries + 1;
        for attempt in 1..=attempts {
            let mut prompt = self
                .builder
                .render(TEMPLATE_THINKING, &sections, &BTreeMap::new())?;
            if attempt > 1 {
                prompt.push_str("\n\n");
                prompt.push_str(THINKING_CORRECTIVE);
            }
            let raw = self.infer(&prompt).await?;
            match self.parser.parse(&raw) {
                Ok(response) => return Ok(Some(response)),
                Err(e) => warn!(step, attempt, error = %e, "unparseable thinking response"),
            }
        }
        Ok(None)
    }

    /// Apply the turn's memory directives and record it on the timeline.
    fn apply_memory_directives(
        &mut self,
        response: &ParsedResponse,
        step: u32,
        lines: &mut Vec<String>,
    ) {
        if let Some(state) = &response.state {
            self.store.set_state(state, Some(step));
        }
        if let Some(summary) = &response.summary {
            self.store.add_summary(summary, Some(step));
        }
        self.store.remember_step(
            step,
            &[
                (StepKind::Thought, response.thought.clone().unwrap_or_default()),
                (StepKind::Actions, render_actions(&response.actions)),
            ],
        );

        for (key, value) in &response.store_results {
            if let Err(e) = self.store.store_result(key, value.clone()) {
                warn!(key = %key, error = %e, "store directive rejected");
                continue;
            }
            // Mirror into the knowledge base so stored facts survive
            // the run when persistence is configured.
            if let Err(e) =
                self.store
                    .store_knowledge(key, value, &["stored".to_string()], Some(step))
            {
                warn!(key = %key, error = %e, "knowledge mirror failed");
            }
        }
        for key in &response.delete_results {
            if self.store.clear_stored_result(key).is_none() {
                debug!(key = %key, "delete directive for unknown key");
            }
        }
        for key in &response.retrieve_results {
            match self.store.get_stored_result(key) {
                Some(value) => lines.push(format!("- {key}: {}", render_value(value))),
                None => lines.push(format!("- {key}: (no stored result)")),
            }
        }
    }

    /// Acting phase: execute a batch of actions, one result entry per
    /// call. Nothing in here is fatal to the run.
    async fn act(&mut self, actions: &[Action], step: u32, lines: &mut Vec<String>) {
        let registry = Arc::clone(&self.registry);
        let timeout = Duration::from_secs(self.config.tool_timeout_secs);
        let mut seen: HashMap<String, usize> = HashMap::new();

        for action in actions {
            let n = seen.entry(action.tool.clone()).or_insert(0);
            let key = if *n == 0 {
                action.tool.clone()
            } else {
                format!("{}_{}", action.tool, n)
            };
            *n += 1;

            let outcome = match tokio::time::timeout(timeout, registry.execute(action)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(ToolError::Timeout {
                    tool_name: action.tool.clone(),
                    timeout_secs: self.config.tool_timeout_secs,
                }),
            };

            match outcome {
                Ok(output) => {
                    debug!(tool = %action.tool, success = output.success, "tool call finished");
                    self.store
                        .record_tool_event(&action.tool, output.success, output.cache_hit, None);
                    lines.push(format!("- {key}: {}", render_value(&output.payload)));
                }
                Err(e) => {
                    warn!(tool = %action.tool, error = %e, "tool call failed");
                    self.store
                        .record_tool_event(&action.tool, false, None, Some(&e.to_string()));
                    lines.push(format!("- {key}_error: {e}"));
                }
            }
        }
    }

    async fn infer(&self, prompt: &str) -> Result<String> {
        let timeout = Duration::from_secs(self.config.inference_timeout_secs);
        match tokio::time::timeout(timeout, self.provider.infer(prompt)).await {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(InferenceError::Timeout {
                timeout_secs: self.config.inference_timeout_secs,
            }
            .into()),
        }
    }

    fn init_sections(&self, objective: &str) -> BTreeMap<String, Value> {
        let mut sections = BTreeMap::new();
        sections.insert("objective".to_string(), Value::String(objective.to_string()));
        sections.insert("tools".to_string(), Value::String(self.registry.catalog()));
        sections
    }

    fn thinking_sections(
        &self,
        objective: &str,
        plan: &str,
        results_text: &str,
    ) -> BTreeMap<String, Value> {
        let mut sections: BTreeMap<String, Value> = self
            .store
            .snapshot_for_prompt()
            .into_iter()
            .map(|(k, v)| (k, Value::String(v)))
            .collect();
        sections.insert("objective".to_string(), Value::String(objective.to_string()));
        sections.insert("plan".to_string(), Value::String(plan.to_string()));
        sections.insert("results".to_string(), Value::String(results_text.to_string()));
        sections.insert("tools".to_string(), Value::String(self.registry.catalog()));
        sections
    }

    /// The budget ran out: answer with what was accomplished. This is a
    /// degraded outcome, never an error.
    fn degraded_outcome(&mut self, objective: &str) -> RunOutcome {
        let summaries: Vec<String> = self.store.summaries().map(str::to_string).collect();
        let answer = if summaries.is_empty() {
            format!(
                "Step budget exhausted before reaching a final answer for: {objective}. \
No progress summaries were recorded."
            )
        } else {
            let bullets = summaries
                .iter()
                .map(|s| format!("- {s}"))
                .collect::<Vec<_>>()
                .join("\n");
            format!(
                "Step budget exhausted before reaching a final answer. Progress so far:\n{bullets}"
            )
        };
        warn!(
            max_steps = self.config.max_steps,
            "step budget exhausted, returning degraded answer"
        );
        self.store
            .record(StepKind::FinalAnswer, answer.clone(), None, BTreeMap::new());
        RunOutcome {
            answer,
            steps_taken: self.config.max_steps,
            degraded: true,
        }
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn render_actions(actions: &[Action]) -> String {
    actions
        .iter()
        .map(|a| format!("{}({})", a.tool, Value::Object(a.args.clone())))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use stepwise_tools::default_registry;

    /// Replays a fixed list of responses and records every prompt it
    /// was sent.
    struct ScriptedProvider {
        replies: Mutex<VecDeque<String>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedProvider {
        fn new(replies: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn prompt(&self, i: usize) -> String {
            self.prompts.lock().unwrap()[i].clone()
        }
    }

    #[async_trait]
    impl InferenceProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn infer(&self, prompt: &str) -> std::result::Result<String, InferenceError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| InferenceError::Transport("script exhausted".into()))
        }
    }

    const INIT_REPLY: &str =
        r#"{"Plan": "1. echo the text\n2. answer", "Thought": "simple", "State": "planning"}"#;

    fn agent(provider: Arc<ScriptedProvider>, config: AgentConfig) -> AgentLoop {
        AgentLoop::new(provider, Arc::new(default_registry()), config)
    }

    #[tokio::test]
    async fn echo_objective_completes_in_two_steps() {
        let provider = ScriptedProvider::new(&[
            INIT_REPLY,
            r#"{"Thought": "run echo", "Actions": [{"tool": "echo", "args": {"text": "hi"}}],
                "Summary": "echoed the text", "State": "acting"}"#,
            r#"{"Final_Answer": "hi", "Summary": "done"}"#,
        ]);
        let mut agent = agent(Arc::clone(&provider), AgentConfig::default());

        let outcome = agent.run("echo hi back").await.unwrap();
        assert_eq!(outcome.answer, "hi");
        assert_eq!(outcome.steps_taken, 2);
        assert!(!outcome.degraded);

        // The echo result was fed into the following thinking prompt.
        assert!(provider.prompt(2).contains("- echo: hi"));

        let telemetry = agent.store().tool_telemetry("echo").unwrap();
        assert_eq!(telemetry.calls, 1);
        assert_eq!(telemetry.success, 1);
    }

    #[tokio::test]
    async fn unknown_tool_is_not_fatal() {
        let provider = ScriptedProvider::new(&[
            INIT_REPLY,
            r#"{"Actions": [
                {"tool": "ghost", "args": {}},
                {"tool": "echo", "args": {"text": "still here"}}
            ]}"#,
            r#"{"Final_Answer": "survived"}"#,
        ]);
        let mut agent = agent(Arc::clone(&provider), AgentConfig::default());

        let outcome = agent.run("poke a missing tool").await.unwrap();
        assert_eq!(outcome.answer, "survived");

        // The failure became a result entry instead of ending the run.
        let next_prompt = provider.prompt(2);
        assert!(next_prompt.contains("ghost_error"));
        assert!(next_prompt.contains("- echo: still here"));

        let telemetry = agent.store().tool_telemetry("ghost").unwrap();
        assert_eq!(telemetry.errors, 1);
        assert_eq!(telemetry.failure, 1);
    }

    #[tokio::test]
    async fn duplicate_tools_in_a_batch_get_suffixed_keys() {
        let provider = ScriptedProvider::new(&[
            INIT_REPLY,
            r#"{"Actions": [
                {"tool": "echo", "args": {"text": "first"}},
                {"tool": "echo", "args": {"text": "second"}}
            ]}"#,
            r#"{"Final_Answer": "ok"}"#,
        ]);
        let mut agent = agent(Arc::clone(&provider), AgentConfig::default());

        agent.run("echo twice").await.unwrap();
        let next_prompt = provider.prompt(2);
        assert!(next_prompt.contains("- echo: first"));
        assert!(next_prompt.contains("- echo_1: second"));
    }

    #[tokio::test]
    async fn step_exhaustion_degrades_instead_of_failing() {
        let provider = ScriptedProvider::new(&[
            INIT_REPLY,
            r#"{"Thought": "still thinking", "Summary": "checked two sources"}"#,
        ]);
        let config = AgentConfig {
            max_steps: 1,
            ..AgentConfig::default()
        };
        let mut agent = agent(provider, config);

        let outcome = agent.run("an endless task").await.unwrap();
        assert!(outcome.degraded);
        assert_eq!(outcome.steps_taken, 1);
        assert!(outcome.answer.contains("checked two sources"));
    }

    #[tokio::test]
    async fn init_retries_with_corrective_instruction() {
        let provider = ScriptedProvider::new(&[
            "complete gibberish",
            INIT_REPLY,
            r#"{"Final_Answer": "done"}"#,
        ]);
        let mut agent = agent(Arc::clone(&provider), AgentConfig::default());

        let outcome = agent.run("anything").await.unwrap();
        assert_eq!(outcome.answer, "done");
        assert!(provider.prompt(1).contains("\"Plan\" field"));
    }

    #[tokio::test]
    async fn init_failure_after_retries_is_an_error() {
        let provider = ScriptedProvider::new(&["nope", "still nope", "nada"]);
        let config = AgentConfig {
            init_retries: 2,
            ..AgentConfig::default()
        };
        let mut agent = agent(provider, config);

        let err = agent.run("anything").await.unwrap_err();
        assert!(matches!(
            err,
            Error::Agent(AgentError::InitializationFailed { attempts: 3 })
        ));
    }

    #[tokio::test]
    async fn thinking_retry_appends_corrective_instruction() {
        let provider = ScriptedProvider::new(&[
            INIT_REPLY,
            "???",
            r#"{"Final_Answer": "recovered"}"#,
        ]);
        let mut agent = agent(Arc::clone(&provider), AgentConfig::default());

        let outcome = agent.run("anything").await.unwrap();
        assert_eq!(outcome.answer, "recovered");
        assert_eq!(outcome.steps_taken, 1);
        assert!(provider.prompt(2).contains("could not be parsed"));
    }

    #[tokio::test]
    async fn exhausted_parse_retries_become_a_noop_turn() {
        let provider = ScriptedProvider::new(&[
            INIT_REPLY,
            "???",
            r#"{"Final_Answer": "eventually"}"#,
        ]);
        let config = AgentConfig {
            parse_retries: 0,
            ..AgentConfig::default()
        };
        let mut agent = agent(provider, config);

        let outcome = agent.run("anything").await.unwrap();
        assert_eq!(outcome.answer, "eventually");
        // The wasted turn still consumed a step.
        assert_eq!(outcome.steps_taken, 2);
    }

    #[tokio::test]
    async fn memory_directives_update_the_store() {
        let provider = ScriptedProvider::new(&[
            INIT_REPLY,
            r#"{"StoreResults": {"capital": "Tokyo", "scratch": 1},
                "State": "collecting"}"#,
            r#"{"DeleteResults": ["scratch"], "RetrieveResults": ["capital"]}"#,
            r#"{"Final_Answer": "Tokyo"}"#,
        ]);
        let mut agent = agent(Arc::clone(&provider), AgentConfig::default());

        agent.run("find the capital").await.unwrap();
        let store = agent.store();
        assert_eq!(store.get_stored_result("capital"), Some(&json!("Tokyo")));
        assert!(store.get_stored_result("scratch").is_none());
        assert_eq!(store.state(), Some("collecting"));
        // Stored facts are mirrored into the knowledge base.
        assert!(store.retrieve_by_key("capital").is_some());
        // The retrieval was rendered into the final thinking prompt.
        assert!(provider.prompt(3).contains("- capital: Tokyo"));
    }

    #[tokio::test]
    async fn transport_errors_propagate() {
        let provider = ScriptedProvider::new(&[INIT_REPLY]);
        let mut agent = agent(provider, AgentConfig::default());

        let err = agent.run("anything").await.unwrap_err();
        assert!(matches!(err, Error::Inference(_)));
    }

    #[tokio::test]
    async fn knowledge_survives_across_runs_via_storage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kb.json");

        let provider = ScriptedProvider::new(&[
            INIT_REPLY,
            r#"{"StoreResults": {"fact": "water boils at 100C"}}"#,
            r#"{"Final_Answer": "noted"}"#,
        ]);
        let config = AgentConfig {
            storage_path: Some(path.clone()),
            ..AgentConfig::default()
        };
        let mut agent = agent(provider, config.clone());
        agent.run("remember a fact").await.unwrap();

        // A fresh loop over the same storage sees the fact.
        let provider = ScriptedProvider::new(&[]);
        let agent = AgentLoop::new(provider, Arc::new(default_registry()), config);
        assert!(agent.store().retrieve_by_key("fact").is_some());
    }
}
