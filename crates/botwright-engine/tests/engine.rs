//! End-to-end runs through the public engine API.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use botwright_engine::{
    ListenerFn, RetryOverride, RunOptions, StepBuilder, WorkflowBuilder, WorkflowEngine,
    listener_fn,
};
use botwright_types::{
    StepResultStatus, StepStatus, WorkflowError, WorkflowEvent, WorkflowRunStatus,
};
use serde::Serialize;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Run-scoped listener that records every event it sees.
fn collecting_listener() -> (ListenerFn, Arc<Mutex<Vec<WorkflowEvent>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let listener = listener_fn(move |event| {
        let sink = sink.clone();
        async move {
            sink.lock().unwrap().push(event);
            Ok(())
        }
    });
    (listener, seen)
}

fn step_order(events: &[WorkflowEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            WorkflowEvent::StepStarted { step_id, .. } => Some(step_id.clone()),
            _ => None,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Happy path and pipeline threading
// ---------------------------------------------------------------------------

#[tokio::test]
async fn dependent_steps_run_in_order_and_complete() {
    let engine = WorkflowEngine::new();
    let def = WorkflowBuilder::<()>::new("two-steps")
        .step(StepBuilder::new("a", |_input, _ctx| async move {
            Ok(json!("from-a"))
        }))
        .step(
            StepBuilder::new("b", |input, _ctx| async move { Ok(json!({ "b_got": input })) })
                .depends_on(["a"]),
        )
        .build()
        .unwrap();

    let (listener, seen) = collecting_listener();
    let run = engine
        .run(
            &def,
            Value::Null,
            RunOptions {
                listeners: vec![listener],
                ..Default::default()
            },
        )
        .await;

    assert_eq!(run.status, WorkflowRunStatus::Completed);
    assert_eq!(run.step_results.len(), 2);
    assert_eq!(run.step_results["a"].status, StepResultStatus::Success);
    assert_eq!(run.step_results["b"].status, StepResultStatus::Success);
    // Pipeline semantics: a's output became b's input.
    assert_eq!(run.output, Some(json!({ "b_got": "from-a" })));

    let events = seen.lock().unwrap();
    assert_eq!(step_order(&events), vec!["a", "b"]);
    assert!(matches!(events.first(), Some(WorkflowEvent::WorkflowStarted { .. })));
    assert!(matches!(events.last(), Some(WorkflowEvent::WorkflowCompleted { .. })));
}

#[tokio::test]
async fn transform_input_reshapes_previous_output() {
    let engine = WorkflowEngine::new();
    let def = WorkflowBuilder::<()>::new("reshape")
        .step(StepBuilder::new("produce", |_input, _ctx| async move {
            Ok(json!({ "count": 3 }))
        }))
        .step(
            StepBuilder::new("consume", |input, _ctx| async move { Ok(input) })
                .depends_on(["produce"])
                .transform_input(|prev, _ctx| async move {
                    Ok(json!({ "doubled": prev["count"].as_u64().unwrap_or(0) * 2 }))
                }),
        )
        .build()
        .unwrap();

    let run = engine.run(&def, Value::Null, RunOptions::default()).await;
    assert_eq!(run.status, WorkflowRunStatus::Completed);
    assert_eq!(run.output, Some(json!({ "doubled": 6 })));
}

#[tokio::test]
async fn transform_output_overrides_last_step_output() {
    let engine = WorkflowEngine::new();
    let def = WorkflowBuilder::<()>::new("summarize")
        .step(StepBuilder::new("a", |_input, _ctx| async move { Ok(json!(1)) }))
        .step(StepBuilder::new("b", |_input, _ctx| async move { Ok(json!(2)) }))
        .transform_output(|results, _ctx| async move {
            Ok(json!({ "steps_succeeded": results.len() }))
        })
        .build()
        .unwrap();

    let run = engine.run(&def, Value::Null, RunOptions::default()).await;
    assert_eq!(run.status, WorkflowRunStatus::Completed);
    assert_eq!(run.output, Some(json!({ "steps_succeeded": 2 })));
}

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

#[tokio::test]
async fn retries_with_deterministic_backoff_then_succeeds() {
    let engine = WorkflowEngine::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let c = calls.clone();
    let def = WorkflowBuilder::<()>::new("flaky")
        .step(
            StepBuilder::new("unstable", move |_input, _ctx| {
                let c = c.clone();
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(WorkflowError::execution("transient outage"))
                    } else {
                        Ok(json!("recovered"))
                    }
                }
            })
            .with_retry(
                RetryOverride::new()
                    .with_max_attempts(3)
                    .with_initial_delay_ms(100)
                    .with_jitter(0.0),
            ),
        )
        .build()
        .unwrap();

    let (listener, seen) = collecting_listener();
    let run = engine
        .run(
            &def,
            Value::Null,
            RunOptions {
                listeners: vec![listener],
                ..Default::default()
            },
        )
        .await;

    assert_eq!(run.status, WorkflowRunStatus::Completed);
    assert_eq!(run.step_results["unstable"].status, StepResultStatus::Success);
    assert_eq!(run.step_results["unstable"].attempts, 3);

    let events = seen.lock().unwrap();
    let retry_delays: Vec<u64> = events
        .iter()
        .filter_map(|e| match e {
            WorkflowEvent::StepRetrying { delay_ms, .. } => Some(*delay_ms),
            _ => None,
        })
        .collect();
    assert_eq!(retry_delays, vec![100, 200]);
}

#[tokio::test]
async fn exhausted_retries_fail_the_run() {
    let engine = WorkflowEngine::new();
    let def = WorkflowBuilder::<()>::new("doomed")
        .step(
            StepBuilder::new("down", |_input, _ctx| async move {
                Err::<Value, _>(WorkflowError::execution("still down"))
            })
            .with_retry(
                RetryOverride::new()
                    .with_max_attempts(3)
                    .with_initial_delay_ms(1)
                    .with_jitter(0.0),
            ),
        )
        .step(StepBuilder::new("after", |_input, _ctx| async move {
            Ok(Value::Null)
        }))
        .build()
        .unwrap();

    let (listener, seen) = collecting_listener();
    let run = engine
        .run(
            &def,
            Value::Null,
            RunOptions {
                listeners: vec![listener],
                ..Default::default()
            },
        )
        .await;

    assert_eq!(run.status, WorkflowRunStatus::Failed);
    let result = &run.step_results["down"];
    assert_eq!(result.attempts, 3);
    assert!(result.retryable, "transient error with exhausted budget");
    assert!(run.error.as_deref().unwrap().contains("down"));
    assert!(!run.step_results.contains_key("after"), "run stopped at the failure");

    let events = seen.lock().unwrap();
    let retries = events
        .iter()
        .filter(|e| matches!(e, WorkflowEvent::StepRetrying { .. }))
        .count();
    assert_eq!(retries, 2, "max_attempts - 1 retry events");
    // N retries produce N+1 log rows.
    assert_eq!(run.step_logs.len(), 3);
    assert_eq!(run.step_logs[2].status, StepStatus::Failed);
}

// ---------------------------------------------------------------------------
// Failure policy
// ---------------------------------------------------------------------------

#[tokio::test]
async fn continue_on_failure_lets_dependents_run() {
    let engine = WorkflowEngine::new();
    let def = WorkflowBuilder::<()>::new("lenient")
        .step(
            StepBuilder::new("fragile", |_input, _ctx| async move {
                Err::<Value, _>(WorkflowError::execution("broke"))
            })
            .with_retry(RetryOverride::new().with_max_attempts(1))
            .continue_on_failure(true),
        )
        .step(
            StepBuilder::new("dependent", |_input, _ctx| async move { Ok(json!("ran anyway")) })
                .depends_on(["fragile"]),
        )
        .build()
        .unwrap();

    let run = engine.run(&def, Value::Null, RunOptions::default()).await;
    assert_eq!(run.status, WorkflowRunStatus::Completed);
    assert_eq!(run.step_results["fragile"].status, StepResultStatus::Error);
    assert_eq!(run.step_results["dependent"].status, StepResultStatus::Success);
}

#[tokio::test]
async fn abort_on_error_false_records_failures_and_keeps_going() {
    let engine = WorkflowEngine::new();
    let def = WorkflowBuilder::<()>::new("tolerant")
        .abort_on_error(false)
        .step(
            StepBuilder::new("bad", |_input, _ctx| async move {
                Err::<Value, _>(WorkflowError::execution("nope"))
            })
            .with_retry(RetryOverride::new().with_max_attempts(1)),
        )
        .step(StepBuilder::new("good", |_input, _ctx| async move { Ok(json!("fine")) }))
        .build()
        .unwrap();

    let run = engine.run(&def, Value::Null, RunOptions::default()).await;
    assert_eq!(run.status, WorkflowRunStatus::Completed);
    assert_eq!(run.step_results["bad"].status, StepResultStatus::Error);
    assert_eq!(run.step_results["good"].status, StepResultStatus::Success);
}

// ---------------------------------------------------------------------------
// Skip and dependency gates
// ---------------------------------------------------------------------------

#[tokio::test]
async fn skip_predicate_short_circuits_the_step() {
    let engine = WorkflowEngine::new();
    let executed = Arc::new(AtomicBool::new(false));
    let flag = executed.clone();
    let def = WorkflowBuilder::<()>::new("skippy")
        .step(
            StepBuilder::new("maybe", move |_input, _ctx| {
                let flag = flag.clone();
                async move {
                    flag.store(true, Ordering::SeqCst);
                    Ok(Value::Null)
                }
            })
            .should_skip(|_ctx| async move { true }),
        )
        .build()
        .unwrap();

    let run = engine.run(&def, Value::Null, RunOptions::default()).await;
    assert_eq!(run.status, WorkflowRunStatus::Completed);
    assert!(!executed.load(Ordering::SeqCst), "execute never invoked");

    let result = &run.step_results["maybe"];
    assert_eq!(result.status, StepResultStatus::Skipped);
    assert_eq!(result.attempts, 0);
    assert_eq!(run.step_logs.len(), 1);
    assert_eq!(run.step_logs[0].status, StepStatus::Skipped);
}

#[tokio::test]
async fn skipped_dependency_blocks_the_dependent() {
    let engine = WorkflowEngine::new();
    let def = WorkflowBuilder::<()>::new("blocked")
        .step(
            StepBuilder::new("gate", |_input, _ctx| async move { Ok(Value::Null) })
                .should_skip(|_ctx| async move { true }),
        )
        .step(
            StepBuilder::new("downstream", |_input, _ctx| async move { Ok(Value::Null) })
                .depends_on(["gate"]),
        )
        .build()
        .unwrap();

    let (listener, seen) = collecting_listener();
    let run = engine
        .run(
            &def,
            Value::Null,
            RunOptions {
                listeners: vec![listener],
                ..Default::default()
            },
        )
        .await;

    assert_eq!(run.status, WorkflowRunStatus::Completed);
    assert_eq!(run.step_results["downstream"].status, StepResultStatus::Skipped);

    let events = seen.lock().unwrap();
    let reasons: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            WorkflowEvent::StepSkipped { step_id, reason, .. } if step_id.as_str() == "downstream" => {
                Some(reason.as_str())
            }
            _ => None,
        })
        .collect();
    assert_eq!(reasons, vec!["unmet dependency 'gate'"]);
}

// ---------------------------------------------------------------------------
// Cycles
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cycle_falls_back_to_declared_order_and_still_executes() {
    let engine = WorkflowEngine::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_a = calls.clone();
    let calls_b = calls.clone();
    let def = WorkflowBuilder::<()>::new("tangled")
        .step(
            StepBuilder::new("a", move |_input, _ctx| {
                let calls = calls_a.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(json!("a-out"))
                }
            })
            .depends_on(["b"]),
        )
        .step(
            StepBuilder::new("b", move |_input, _ctx| {
                let calls = calls_b.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(json!("b-out"))
                }
            })
            .depends_on(["a"]),
        )
        .build()
        .unwrap();

    let (listener, seen) = collecting_listener();
    let run = engine
        .run(
            &def,
            Value::Null,
            RunOptions {
                listeners: vec![listener],
                ..Default::default()
            },
        )
        .await;

    // Degraded mode: the cycle is logged and declared order actually runs,
    // with the runtime dependency gate disabled for the run.
    assert_eq!(run.status, WorkflowRunStatus::Completed, "degraded, not a panic");
    assert_eq!(calls.load(Ordering::SeqCst), 2, "both cycle members executed");
    assert_eq!(run.step_results["a"].status, StepResultStatus::Success);
    assert_eq!(run.step_results["b"].status, StepResultStatus::Success);
    assert_eq!(run.output, Some(json!("b-out")));

    let events = seen.lock().unwrap();
    assert_eq!(step_order(&events), vec!["a", "b"], "declared order");
    assert!(
        !events.iter().any(|e| matches!(e, WorkflowEvent::StepSkipped { .. })),
        "nothing was gated out"
    );
}

// ---------------------------------------------------------------------------
// Abort and timeout
// ---------------------------------------------------------------------------

#[tokio::test]
async fn external_cancellation_aborts_and_leaves_unstarted_steps_unrecorded() {
    let engine = WorkflowEngine::new();
    let cancellation = CancellationToken::new();
    let trip = cancellation.clone();
    let def = WorkflowBuilder::<()>::new("cancelled")
        .step(StepBuilder::new("first", move |_input, _ctx| {
            let trip = trip.clone();
            async move {
                trip.cancel();
                Ok(json!("done before cancel lands"))
            }
        }))
        .step(StepBuilder::new("second", |_input, _ctx| async move { Ok(Value::Null) }))
        .step(StepBuilder::new("third", |_input, _ctx| async move { Ok(Value::Null) }))
        .build()
        .unwrap();

    let (listener, seen) = collecting_listener();
    let run = engine
        .run(
            &def,
            Value::Null,
            RunOptions {
                cancellation: Some(cancellation),
                listeners: vec![listener],
                ..Default::default()
            },
        )
        .await;

    assert_eq!(run.status, WorkflowRunStatus::Aborted);
    // Unstarted steps have no entries at all, not "skipped".
    assert!(!run.step_results.contains_key("second"));
    assert!(!run.step_results.contains_key("third"));
    assert!(run.step_logs.iter().all(|l| l.step_id == "first"));

    let events = seen.lock().unwrap();
    assert!(matches!(events.last(), Some(WorkflowEvent::WorkflowAborted { .. })));
}

#[tokio::test]
async fn workflow_timeout_aborts_a_stuck_run() {
    let engine = WorkflowEngine::new();
    let def = WorkflowBuilder::<()>::new("stuck")
        .timeout_ms(50)
        .step(StepBuilder::new("hang", |_input, _ctx| async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(Value::Null)
        }))
        .build()
        .unwrap();

    let run = engine.run(&def, Value::Null, RunOptions::default()).await;
    assert_eq!(run.status, WorkflowRunStatus::Aborted);
}

// ---------------------------------------------------------------------------
// Listeners
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failing_listener_never_affects_the_run() {
    let engine = WorkflowEngine::new();
    engine.subscribe(listener_fn(|_event| async move {
        Err(WorkflowError::execution("sink offline"))
    }));

    let def = WorkflowBuilder::<()>::new("observed")
        .step(StepBuilder::new("only", |_input, _ctx| async move { Ok(json!("ok")) }))
        .build()
        .unwrap();

    let (listener, seen) = collecting_listener();
    let run = engine
        .run(
            &def,
            Value::Null,
            RunOptions {
                listeners: vec![listener],
                ..Default::default()
            },
        )
        .await;

    assert_eq!(run.status, WorkflowRunStatus::Completed);
    // The run-scoped listener still saw the full stream.
    let events = seen.lock().unwrap();
    assert!(events.len() >= 3, "started, step events, completed");
}

#[tokio::test]
async fn run_scoped_listeners_only_see_their_own_run() {
    let engine = WorkflowEngine::new();
    let def = WorkflowBuilder::<()>::new("shared")
        .step(StepBuilder::new("pause", |_input, _ctx| async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(Value::Null)
        }))
        .step(
            StepBuilder::new("after", |_input, _ctx| async move { Ok(Value::Null) })
                .depends_on(["pause"]),
        )
        .build()
        .unwrap();

    let left_id = Uuid::now_v7();
    let right_id = Uuid::now_v7();
    let (left_listener, left_seen) = collecting_listener();
    let (right_listener, right_seen) = collecting_listener();

    let (left, right) = tokio::join!(
        engine.run(
            &def,
            Value::Null,
            RunOptions {
                run_id: Some(left_id),
                listeners: vec![left_listener],
                ..Default::default()
            },
        ),
        engine.run(
            &def,
            Value::Null,
            RunOptions {
                run_id: Some(right_id),
                listeners: vec![right_listener],
                ..Default::default()
            },
        ),
    );

    assert_eq!(left.status, WorkflowRunStatus::Completed);
    assert_eq!(right.status, WorkflowRunStatus::Completed);

    let left_events = left_seen.lock().unwrap();
    assert!(!left_events.is_empty());
    assert!(left_events.iter().all(|e| e.run_id() == left_id));

    let right_events = right_seen.lock().unwrap();
    assert!(!right_events.is_empty());
    assert!(right_events.iter().all(|e| e.run_id() == right_id));
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

#[derive(Default, Serialize)]
struct DigestContext {
    gathered: AtomicUsize,
    published: AtomicBool,
}

#[tokio::test]
async fn steps_share_context_outside_the_pipeline() {
    let engine = WorkflowEngine::new();
    let def = WorkflowBuilder::<DigestContext>::new("ctx")
        .init_context(|input| async move {
            let ctx = DigestContext::default();
            ctx.gathered
                .store(input["seed"].as_u64().unwrap_or(0) as usize, Ordering::SeqCst);
            Ok(ctx)
        })
        .step(StepBuilder::new("gather", |_input, ctx: Arc<DigestContext>| async move {
            ctx.gathered.fetch_add(2, Ordering::SeqCst);
            Ok(Value::Null)
        }))
        .step(
            StepBuilder::new("publish", |_input, ctx: Arc<DigestContext>| async move {
                ctx.published.store(true, Ordering::SeqCst);
                Ok(json!(ctx.gathered.load(Ordering::SeqCst)))
            })
            .depends_on(["gather"]),
        )
        .build()
        .unwrap();

    let run = engine
        .run(&def, json!({ "seed": 5 }), RunOptions::default())
        .await;

    assert_eq!(run.status, WorkflowRunStatus::Completed);
    assert_eq!(run.output, Some(json!(7)));
    // Terminal context snapshot is recorded on the run.
    assert_eq!(run.context["gathered"], 7);
    assert_eq!(run.context["published"], true);
}

/// A context that can only be built by an initializer. Deliberately not
/// `Default`: `run_with_init` must accept it.
#[derive(Serialize)]
struct SessionContext {
    token: String,
}

#[tokio::test]
async fn run_with_init_accepts_a_context_without_default() {
    let engine = WorkflowEngine::new();
    let def = WorkflowBuilder::<SessionContext>::new("session")
        .init_context(|input| async move {
            Ok(SessionContext {
                token: format!("token-for-{}", input["user"].as_str().unwrap_or("anon")),
            })
        })
        .step(StepBuilder::new("use", |_input, ctx: Arc<SessionContext>| async move {
            Ok(json!(ctx.token.clone()))
        }))
        .build()
        .unwrap();

    let run = engine
        .run_with_init(&def, json!({ "user": "ada" }), RunOptions::default())
        .await;

    assert_eq!(run.status, WorkflowRunStatus::Completed);
    assert_eq!(run.output, Some(json!("token-for-ada")));
    assert_eq!(run.context["token"], "token-for-ada");
}

#[tokio::test]
async fn run_with_init_requires_an_initializer() {
    let engine = WorkflowEngine::new();
    let def = WorkflowBuilder::<SessionContext>::new("no-init")
        .step(StepBuilder::new("never", |_input, _ctx| async move { Ok(Value::Null) }))
        .build()
        .unwrap();

    let run = engine.run_with_init(&def, Value::Null, RunOptions::default()).await;
    assert_eq!(run.status, WorkflowRunStatus::Failed);
    assert!(run.error.as_deref().unwrap().contains("has no context initializer"));
    assert!(run.step_results.is_empty());
}

#[tokio::test]
async fn context_initializer_failure_is_a_failed_run_not_a_panic() {
    let engine = WorkflowEngine::new();
    let def = WorkflowBuilder::<DigestContext>::new("bad-init")
        .init_context(|_input| async move {
            Err::<DigestContext, _>(WorkflowError::Engine("no credentials".into()))
        })
        .step(StepBuilder::new("never", |_input, _ctx| async move { Ok(Value::Null) }))
        .build()
        .unwrap();

    let run = engine.run(&def, Value::Null, RunOptions::default()).await;
    assert_eq!(run.status, WorkflowRunStatus::Failed);
    assert!(run.error.as_deref().unwrap().contains("no credentials"));
    assert!(run.step_results.is_empty());
}

// ---------------------------------------------------------------------------
// Run record plumbing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn structural_defect_is_a_failed_run_not_a_panic() {
    use botwright_engine::{StepDefinition, WorkflowDefinition, step_fn};

    // Hand-built definition bypassing the builder's validation.
    let def: WorkflowDefinition<()> = WorkflowDefinition::new(
        "dup",
        vec![
            StepDefinition::new("same", step_fn(|input, _ctx| async move { Ok(input) })),
            StepDefinition::new("same", step_fn(|input, _ctx| async move { Ok(input) })),
        ],
    );

    let engine = WorkflowEngine::new();
    let run = engine.run(&def, Value::Null, RunOptions::default()).await;

    assert_eq!(run.status, WorkflowRunStatus::Failed);
    assert!(run.error.as_deref().unwrap().contains("duplicate step id"));
    assert!(run.step_results.is_empty());
}

#[tokio::test]
async fn run_id_and_metadata_are_carried_on_the_record() {
    let engine = WorkflowEngine::new();
    let def = WorkflowBuilder::<()>::new("tagged")
        .step(StepBuilder::new("only", |_input, _ctx| async move { Ok(Value::Null) }))
        .build()
        .unwrap();

    let run_id = Uuid::now_v7();
    let mut metadata = HashMap::new();
    metadata.insert("trigger".to_string(), json!("webhook"));

    let run = engine
        .run(
            &def,
            Value::Null,
            RunOptions {
                run_id: Some(run_id),
                metadata,
                ..Default::default()
            },
        )
        .await;

    assert_eq!(run.run_id, run_id);
    assert_eq!(run.metadata["trigger"], "webhook");
    assert!(run.completed_at.is_some());
    assert!(run.completed_at.unwrap() >= run.started_at);
}
