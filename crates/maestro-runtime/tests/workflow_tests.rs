//! End-to-end workflow tests over a scripted chat provider.

mod common;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use common::{last_user_text, mock_runtime, system_text, MockBehavior};
use maestro_core::{
    CancellationSignal, ChatMessage, RetryPolicy, ToolCall, TransientErrorKind, WorkerConfig,
    WorkerError, WorkerEventType,
};
use maestro_providers::ChatResponse;
use maestro_rag::{metadata_keys, VectorDocument, VectorStore};
use maestro_runtime::{ExecutionEvent, WorkflowEngine};
use serde_json::json;
use tokio::sync::mpsc;

fn echo_behavior(reply: &'static str) -> MockBehavior {
    Arc::new(move |_deployment, _request, _index| Ok(ChatResponse::text(reply)))
}

async fn run_collecting(
    engine: &mut WorkflowEngine,
    input: &str,
) -> (Result<serde_json::Value, WorkerError>, Vec<ExecutionEvent>) {
    let (tx, mut rx) = mpsc::channel(256);
    let collector = tokio::spawn(async move {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    });
    let result = engine.run_stream(input, tx).await;
    let events = collector.await.unwrap();
    (result, events)
}

fn event_order(events: &[ExecutionEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            ExecutionEvent::ExecutorInvoked { executor_id } => Some(format!("inv:{}", executor_id)),
            ExecutionEvent::ExecutorCompleted { executor_id, .. } => {
                Some(format!("done:{}", executor_id))
            }
            ExecutionEvent::WorkflowOutput { .. } => Some("output".to_string()),
            _ => None,
        })
        .collect()
}

const SEQUENTIAL_TWO_STEP: &str = r#"
name: two-step
resources:
  models:
    m:
      type: openai
      deployment: M
agents:
  - id: a1
    role: First
    model: m
    instructions: You are the first agent.
  - id: a2
    role: Second
    model: m
    instructions: You are the second agent.
workflow:
  type: sequential
  steps:
    - id: s1
      agent: a1
    - id: s2
      agent: a2
"#;

#[tokio::test]
async fn test_sequential_two_step_event_order() {
    let (runtime, _requests) = mock_runtime(echo_behavior("hello back"));
    let config = WorkerConfig::from_yaml_str(SEQUENTIAL_TWO_STEP).unwrap();
    let mut engine = WorkflowEngine::new(config, runtime).unwrap();

    let (result, events) = run_collecting(&mut engine, "hello").await;
    let output = result.unwrap();

    assert_eq!(
        event_order(&events),
        vec!["inv:s1", "done:s1", "inv:s2", "done:s2", "output"]
    );
    // The final output is the last assistant text, unwrapped from the
    // conversation the terminal step emitted.
    assert_eq!(output, json!("hello back"));
}

#[tokio::test]
async fn test_sequential_event_completeness() {
    let (runtime, _requests) = mock_runtime(echo_behavior("ok"));
    let config = WorkerConfig::from_yaml_str(SEQUENTIAL_TWO_STEP).unwrap();
    let mut engine = WorkflowEngine::new(config, runtime).unwrap();

    let (result, events) = run_collecting(&mut engine, "go").await;
    result.unwrap();

    for executor in ["s1", "s2"] {
        let invoked = events
            .iter()
            .filter(|e| matches!(e, ExecutionEvent::ExecutorInvoked { executor_id } if executor_id == executor))
            .count();
        let completed = events
            .iter()
            .filter(|e| matches!(e, ExecutionEvent::ExecutorCompleted { executor_id, .. } if executor_id == executor))
            .count();
        assert_eq!(invoked, 1, "one invocation for {}", executor);
        assert_eq!(completed, 1, "one completion for {}", executor);
    }
}

#[tokio::test]
async fn test_parallel_aggregation_declaration_order() {
    // Responses are keyed off each agent's instructions; the first-declared
    // agent answers more slowly via its own behavior path.
    let behavior: MockBehavior = Arc::new(|_deployment, request, _index| {
        let system = system_text(request);
        if system.contains("alpha") {
            Ok(ChatResponse::text("alpha-answer"))
        } else {
            Ok(ChatResponse::text("beta-answer"))
        }
    });
    let (runtime, _requests) = mock_runtime(behavior);

    let config = WorkerConfig::from_yaml_str(
        r#"
name: fanout
resources:
  models:
    m:
      type: openai
      deployment: M
agents:
  - id: a1
    role: Alpha
    model: m
    instructions: You are alpha.
  - id: a2
    role: Beta
    model: m
    instructions: You are beta.
workflow:
  type: parallel
  steps:
    - id: s1
      agent: a1
    - id: s2
      agent: a2
"#,
    )
    .unwrap();

    let mut engine = WorkflowEngine::new(config, runtime).unwrap();
    let (result, events) = run_collecting(&mut engine, "classify").await;
    let output = result.unwrap();

    assert_eq!(output, json!(["alpha-answer", "beta-answer"]));

    // Both branches ran.
    for executor in ["s1", "s2"] {
        assert!(events.iter().any(|e| {
            matches!(e, ExecutionEvent::ExecutorInvoked { executor_id } if executor_id == executor)
        }));
    }
}

#[tokio::test]
async fn test_single_step_parallel_still_aggregates() {
    let (runtime, _requests) = mock_runtime(echo_behavior("only"));
    let config = WorkerConfig::from_yaml_str(
        r#"
resources:
  models:
    m:
      type: openai
      deployment: M
agents:
  - id: solo
    role: Solo
    model: m
    instructions: Answer.
workflow:
  type: parallel
  steps:
    - id: s1
      agent: solo
"#,
    )
    .unwrap();

    let mut engine = WorkflowEngine::new(config, runtime).unwrap();
    let output = engine.run("go").await.unwrap();
    assert_eq!(output, json!(["only"]));
}

fn router_config() -> WorkerConfig {
    WorkerConfig::from_yaml_str(
        r#"
name: triage
resources:
  models:
    m:
      type: openai
      deployment: M
agents:
  - id: classifier
    role: Classifier
    model: m
    instructions: Classify the request.
  - id: tech
    role: Tech
    model: m
    instructions: Handle tech.
  - id: sales
    role: Sales
    model: m
    instructions: Handle sales.
  - id: support
    role: Support
    model: m
    instructions: Handle support.
workflow:
  type: router
  start_step: route
  steps:
    - id: route
      agent: classifier
    - id: tech
      agent: tech
    - id: sales
      agent: sales
    - id: support
      agent: support
"#,
    )
    .unwrap()
}

fn router_behavior(classification: &'static str) -> MockBehavior {
    Arc::new(move |_deployment, request, _index| {
        if system_text(request).contains("Classify") {
            Ok(ChatResponse::text(classification))
        } else {
            Ok(ChatResponse::text("handled"))
        }
    })
}

#[tokio::test]
async fn test_router_default_fallback() {
    let (runtime, _requests) = mock_runtime(router_behavior("unknown"));
    let mut engine = WorkflowEngine::new(router_config(), runtime).unwrap();

    let (result, events) = run_collecting(&mut engine, "help me").await;
    result.unwrap();

    // "unknown" matches no target; the last-declared target is the default.
    assert!(events.iter().any(|e| {
        matches!(e, ExecutionEvent::ExecutorInvoked { executor_id } if executor_id == "support")
    }));
    for skipped in ["tech", "sales"] {
        assert!(!events.iter().any(|e| {
            matches!(e, ExecutionEvent::ExecutorInvoked { executor_id } if executor_id == skipped)
        }));
    }
}

#[tokio::test]
async fn test_router_exact_match_normalizes_case_and_whitespace() {
    let (runtime, _requests) = mock_runtime(router_behavior("  TECH  "));
    let mut engine = WorkflowEngine::new(router_config(), runtime).unwrap();

    let (result, events) = run_collecting(&mut engine, "my laptop broke").await;
    result.unwrap();

    assert!(events.iter().any(|e| {
        matches!(e, ExecutionEvent::ExecutorInvoked { executor_id } if executor_id == "tech")
    }));
}

#[tokio::test]
async fn test_tool_retry_emits_start_per_attempt() {
    // First model turn requests the flaky tool; second closes with text.
    let behavior: MockBehavior = Arc::new(|_deployment, request, _index| {
        let has_tool_result = request
            .messages
            .iter()
            .any(|m| m.role == maestro_core::Role::Tool);
        if has_tool_result {
            Ok(ChatResponse::text("tool finished"))
        } else {
            let mut message = ChatMessage::assistant("");
            message.tool_calls.push(ToolCall {
                id: "call_1".into(),
                name: "flaky".into(),
                arguments: json!({}),
            });
            Ok(ChatResponse {
                message,
                usage: Default::default(),
                stop_reason: maestro_providers::StopReason::ToolUse,
            })
        }
    });
    let (runtime, _requests) = mock_runtime(behavior);

    // Fails twice with a retryable kind, succeeds on the third attempt.
    let failures = Arc::new(std::sync::atomic::AtomicU32::new(0));
    {
        let failures = Arc::clone(&failures);
        runtime
            .tools
            .local_adapter()
            .register_async("tools.flaky", move |_args| {
                let failures = Arc::clone(&failures);
                async move {
                    if failures.fetch_add(1, std::sync::atomic::Ordering::SeqCst) < 2 {
                        Err(WorkerError::tool_transient(
                            "transient outage",
                            TransientErrorKind::Connection,
                        ))
                    } else {
                        Ok(json!("recovered"))
                    }
                }
            });
    }

    let starts = Arc::new(Mutex::new(0u32));
    let completes = Arc::new(Mutex::new(0u32));
    {
        let starts = Arc::clone(&starts);
        runtime.bus.subscribe(
            [WorkerEventType::ToolCallStart],
            Arc::new(move |_: &maestro_core::WorkerEvent| *starts.lock().unwrap() += 1),
        );
    }
    {
        let completes = Arc::clone(&completes);
        runtime.bus.subscribe(
            [WorkerEventType::ToolCallComplete],
            Arc::new(move |_: &maestro_core::WorkerEvent| *completes.lock().unwrap() += 1),
        );
    }

    let mut config = WorkerConfig::from_yaml_str(
        r#"
resources:
  models:
    m:
      type: openai
      deployment: M
  tools:
    - name: flaky
      description: Sometimes fails
      transport: local
      source: tools.flaky
agents:
  - id: worker
    role: Worker
    model: m
    instructions: Use the tool.
    tools: [flaky]
workflow:
  type: sequential
  steps:
    - id: s1
      agent: worker
"#,
    )
    .unwrap();
    config.resources.tools[0].retry_policy = Some(RetryPolicy {
        max_attempts: 3,
        initial_delay: 0.001,
        max_delay: 0.002,
        exponential_base: 2.0,
        retryable_errors: vec![TransientErrorKind::Connection],
    });

    let mut engine = WorkflowEngine::new(config, runtime).unwrap();
    let output = engine.run("run the tool").await.unwrap();

    assert_eq!(output, json!("tool finished"));
    assert_eq!(*starts.lock().unwrap(), 3);
    assert_eq!(*completes.lock().unwrap(), 1);
}

#[tokio::test]
async fn test_rag_injection_reaches_agent_prompt() {
    let (runtime, requests) = mock_runtime(echo_behavior("answered with context"));

    // Pre-load the shared store with one chunk in collection c1.
    let mut metadata = HashMap::new();
    metadata.insert(metadata_keys::COLLECTION_ID.to_string(), json!("c1"));
    metadata.insert(metadata_keys::SOURCE.to_string(), json!("guide.md"));
    runtime
        .vector_store
        .add_documents(vec![VectorDocument {
            id: "doc-1".to_string(),
            text: "rust ownership rules".to_string(),
            embedding: Some(vec![1.0, 0.0]),
            metadata,
            namespace: "default".to_string(),
        }])
        .await
        .unwrap();

    let config = WorkerConfig::from_yaml_str(
        r#"
resources:
  models:
    m:
      type: openai
      deployment: M
    embed:
      type: openai
      deployment: embedder
agents:
  - id: helper
    role: Helper
    model: m
    instructions: Answer using the provided context.
    knowledge:
      collections: [c1]
      top_k: 1
      min_score: 0
workflow:
  type: sequential
  steps:
    - id: s1
      agent: helper
rag:
  enabled: true
  provider: memory
  embedding:
    model: embed
    dimensions: 2
  top_k: 4
  context_prompt: "Relevant context retrieved from the knowledge base:"
  namespace: default
"#,
    )
    .unwrap();

    let mut engine = WorkflowEngine::new(config, runtime).unwrap();
    engine.run("tell me about rust ownership").await.unwrap();

    let requests = requests.lock().unwrap();
    let (_deployment, request) = requests.last().unwrap();

    let prompt_index = request
        .messages
        .iter()
        .position(|m| m.text.starts_with("Relevant context retrieved"))
        .expect("context instruction injected");
    let injected = &request.messages[prompt_index + 1];
    assert!(
        injected.text.starts_with("[1] guide.md (score="),
        "unexpected context line: {}",
        injected.text
    );
    assert!(injected.text.contains("rust ownership rules"));
}

#[tokio::test]
async fn test_cancellation_mid_sequential() {
    // The second agent fires the cancellation signal while "executing", so
    // the runner observes it before dispatching the third step.
    let cancel_cell: Arc<Mutex<Option<CancellationSignal>>> = Arc::new(Mutex::new(None));
    let behavior: MockBehavior = {
        let cancel_cell = Arc::clone(&cancel_cell);
        Arc::new(move |_deployment, _request, index| {
            if index == 1 {
                if let Some(cancel) = cancel_cell.lock().unwrap().as_ref() {
                    cancel.cancel();
                }
            }
            Ok(ChatResponse::text(format!("step {}", index)))
        })
    };
    let (runtime, _requests) = mock_runtime(behavior);

    let config = WorkerConfig::from_yaml_str(
        r#"
resources:
  models:
    m:
      type: openai
      deployment: M
agents:
  - id: a1
    role: R
    model: m
    instructions: One.
  - id: a2
    role: R
    model: m
    instructions: Two.
  - id: a3
    role: R
    model: m
    instructions: Three.
  - id: a4
    role: R
    model: m
    instructions: Four.
  - id: a5
    role: R
    model: m
    instructions: Five.
workflow:
  type: sequential
  steps:
    - id: s1
      agent: a1
    - id: s2
      agent: a2
    - id: s3
      agent: a3
    - id: s4
      agent: a4
    - id: s5
      agent: a5
"#,
    )
    .unwrap();

    let errors = Arc::new(Mutex::new(Vec::new()));
    {
        let errors = Arc::clone(&errors);
        runtime.bus.subscribe(
            [WorkerEventType::WorkflowError],
            Arc::new(move |event: &maestro_core::WorkerEvent| {
                errors.lock().unwrap().push(event.data.clone());
            }),
        );
    }

    let mut engine = WorkflowEngine::new(config, runtime).unwrap();
    engine.build().unwrap();
    *cancel_cell.lock().unwrap() = Some(engine.cancellation());

    let (result, events) = run_collecting(&mut engine, "start").await;
    assert!(matches!(result.unwrap_err(), WorkerError::Cancelled));

    // s1 and s2 completed; s3 was never dispatched.
    assert!(events.iter().any(|e| {
        matches!(e, ExecutionEvent::ExecutorCompleted { executor_id, .. } if executor_id == "s2")
    }));
    assert!(!events.iter().any(|e| {
        matches!(e, ExecutionEvent::ExecutorInvoked { executor_id } if executor_id == "s3")
    }));

    // The stream terminates with a cancellation error event.
    assert!(matches!(
        events.last().unwrap(),
        ExecutionEvent::WorkflowError { cancelled: true, .. }
    ));

    // Exactly one WORKFLOW_ERROR on the bus, flagged cancelled.
    let errors = errors.lock().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].get("cancelled"), Some(&json!(true)));
}

#[tokio::test]
async fn test_group_chat_manager_selects_by_exact_name() {
    let behavior: MockBehavior = Arc::new(|_deployment, request, _index| {
        let system = system_text(request);
        if system.contains("IMPORTANT: You must select") {
            // Manager turn: pick the security expert by exact name.
            Ok(ChatResponse::text("security"))
        } else if system.contains("security specialist") {
            Ok(ChatResponse::text("No issues found. TASK_COMPLETE"))
        } else {
            Ok(ChatResponse::text("unused"))
        }
    });
    let (runtime, _requests) = mock_runtime(behavior);

    let config = WorkerConfig::from_yaml_str(
        r#"
name: review-board
resources:
  models:
    m:
      type: openai
      deployment: M
agents:
  - id: security
    role: Security expert
    model: m
    instructions: You are a security specialist.
  - id: performance
    role: Performance expert
    model: m
    instructions: You are a performance specialist.
workflow:
  type: group_chat
  manager_model: m
  manager_instructions: Select the most suitable expert.
  max_rounds: 4
  termination_condition: TASK_COMPLETE
  steps:
    - id: security
      agent: security
    - id: performance
      agent: performance
"#,
    )
    .unwrap();

    let mut engine = WorkflowEngine::new(config, runtime).unwrap();
    let (result, events) = run_collecting(&mut engine, "review this change").await;
    let output = result.unwrap();

    // The selected participant ran; the other never did.
    assert!(events.iter().any(|e| {
        matches!(e, ExecutionEvent::ExecutorInvoked { executor_id } if executor_id == "security")
    }));
    assert!(!events.iter().any(|e| {
        matches!(e, ExecutionEvent::ExecutorInvoked { executor_id } if executor_id == "performance")
    }));

    // Conversation output ends with the terminating analysis.
    assert_eq!(output, json!("No issues found. TASK_COMPLETE"));
}

#[tokio::test]
async fn test_handoff_follows_chosen_target() {
    let behavior: MockBehavior = Arc::new(|_deployment, request, _index| {
        let system = system_text(request);
        if system.contains("coordinator") {
            let mut message = ChatMessage::assistant("");
            message.tool_calls.push(ToolCall {
                id: "call_1".into(),
                name: "handoff_to_billing".into(),
                arguments: json!({"reason": "invoice question"}),
            });
            Ok(ChatResponse {
                message,
                usage: Default::default(),
                stop_reason: maestro_providers::StopReason::ToolUse,
            })
        } else {
            Ok(ChatResponse::text("invoice resolved"))
        }
    });
    let (runtime, _requests) = mock_runtime(behavior);

    let config = WorkerConfig::from_yaml_str(
        r#"
resources:
  models:
    m:
      type: openai
      deployment: M
agents:
  - id: coordinator
    role: Coordinator
    model: m
    instructions: You are the coordinator.
  - id: billing
    role: Billing
    model: m
    instructions: You handle billing.
workflow:
  type: handoff
  start_step: front
  steps:
    - id: front
      agent: coordinator
      transitions: [billing]
    - id: billing
      agent: billing
"#,
    )
    .unwrap();

    let mut engine = WorkflowEngine::new(config, runtime).unwrap();
    let (result, events) = run_collecting(&mut engine, "why was I charged twice?").await;
    let output = result.unwrap();

    assert!(events.iter().any(|e| {
        matches!(e, ExecutionEvent::ExecutorInvoked { executor_id } if executor_id == "billing")
    }));
    assert_eq!(output, json!("invoice resolved"));
}

#[tokio::test]
async fn test_magentic_plan_review_and_termination() {
    use maestro_runtime::{PlanDecision, PlanReviewHandler};

    struct RecordingReviewer {
        reviewed: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait::async_trait]
    impl PlanReviewHandler for RecordingReviewer {
        async fn review(&self, plan: &str) -> maestro_core::WorkerResult<PlanDecision> {
            self.reviewed.lock().unwrap().push(plan.to_string());
            Ok(PlanDecision::Approve)
        }
    }

    let behavior: MockBehavior = Arc::new(|_deployment, request, _index| {
        let last_user = last_user_text(request);
        if last_user.contains("numbered plan") {
            Ok(ChatResponse::text("1. Draft the answer (writer)"))
        } else if last_user.contains("select the next participant") {
            Ok(ChatResponse::text("writer"))
        } else {
            Ok(ChatResponse::text("Draft done. TASK_COMPLETE"))
        }
    });
    let (runtime, _requests) = mock_runtime(behavior);

    let config = WorkerConfig::from_yaml_str(
        r#"
resources:
  models:
    m:
      type: openai
      deployment: M
agents:
  - id: writer
    role: Writer
    model: m
    instructions: You write.
  - id: reviewer
    role: Reviewer
    model: m
    instructions: You review.
workflow:
  type: magentic
  manager_model: m
  max_rounds: 5
  max_stall: 2
  enable_plan_review: true
  termination_condition: TASK_COMPLETE
  steps:
    - id: writer
      agent: writer
    - id: reviewer
      agent: reviewer
"#,
    )
    .unwrap();

    let reviewed = Arc::new(Mutex::new(Vec::new()));
    let mut engine = WorkflowEngine::new(config, runtime)
        .unwrap()
        .with_plan_review_handler(Arc::new(RecordingReviewer {
            reviewed: Arc::clone(&reviewed),
        }));

    let (result, events) = run_collecting(&mut engine, "write a summary").await;
    result.unwrap();

    // The reviewer saw the generated plan.
    assert_eq!(reviewed.lock().unwrap().len(), 1);
    assert!(reviewed.lock().unwrap()[0].contains("Draft the answer"));

    // The writer ran, and the run terminated on the condition.
    assert!(events.iter().any(|e| {
        matches!(e, ExecutionEvent::ExecutorInvoked { executor_id } if executor_id == "writer")
    }));
}

#[tokio::test]
async fn test_standalone_runner_round_trip() {
    use maestro_runtime::{AgentRunner, StandaloneAgentConfig};

    let (runtime, _requests) = mock_runtime(echo_behavior("standalone reply"));

    let starts = Arc::new(Mutex::new(0u32));
    let completes = Arc::new(Mutex::new(0u32));
    {
        let starts = Arc::clone(&starts);
        runtime.bus.subscribe(
            [WorkerEventType::AgentRunStart],
            Arc::new(move |_: &maestro_core::WorkerEvent| *starts.lock().unwrap() += 1),
        );
    }
    {
        let completes = Arc::clone(&completes);
        runtime.bus.subscribe(
            [WorkerEventType::AgentRunComplete],
            Arc::new(move |_: &maestro_core::WorkerEvent| *completes.lock().unwrap() += 1),
        );
    }

    let config = StandaloneAgentConfig::new("solo", "Solo agent", "gpt-test", "Answer briefly.")
        .with_model_reference(common::openai_reference("gpt-test"));
    let mut runner = AgentRunner::new(config, runtime);

    let result = runner.run("hello there").await.unwrap();
    assert_eq!(result, "standalone reply");

    // Symmetric run events: the one-node workflow path emits them too.
    assert_eq!(*starts.lock().unwrap(), 1);
    assert_eq!(*completes.lock().unwrap(), 1);
}

#[tokio::test]
async fn test_invalid_config_rejected_before_build() {
    let (runtime, _requests) = mock_runtime(echo_behavior("x"));
    let config = WorkerConfig::from_yaml_str(
        r#"
resources:
  models:
    m:
      type: openai
      deployment: M
agents:
  - id: a1
    role: R
    model: missing
    instructions: X.
workflow:
  type: sequential
  steps:
    - id: s1
      agent: a1
"#,
    )
    .unwrap();

    let err = WorkflowEngine::new(config, runtime).unwrap_err();
    assert!(matches!(err, WorkerError::ConfigInvalid(_)));
    assert!(err.to_string().contains("missing"));
}

#[tokio::test]
async fn test_step_template_rewrites_agent_input() {
    let (runtime, requests) = mock_runtime(echo_behavior("templated"));
    let config = WorkerConfig::from_yaml_str(
        r#"
resources:
  models:
    m:
      type: openai
      deployment: M
agents:
  - id: a1
    role: R
    model: m
    instructions: Answer.
workflow:
  type: sequential
  steps:
    - id: s1
      agent: a1
      input_template: "Summarize this: {{user_input}}"
"#,
    )
    .unwrap();

    let mut engine = WorkflowEngine::new(config, runtime).unwrap();
    engine.run("the quick brown fox").await.unwrap();

    let requests = requests.lock().unwrap();
    let (_deployment, request) = requests.last().unwrap();
    assert!(request
        .messages
        .iter()
        .any(|m| m.text == "Summarize this: the quick brown fox"));
}
