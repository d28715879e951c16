use std::collections::BTreeMap;
use std::error::Error;

use serde_json::json;
use stax::definition::ActionNode;
use stax::engine::{
    ControlError, ControlOp, ControlReply, JobOptions, JobSettings, JobStatus, ThreadId,
    ThreadState,
};
use stax::events::EventKind;
use stax::registry::BlockState;
use stax::types::TcStatusResult;
use stax_test_utils::builders::{block, delay, parallel, ret, sequence, single_function_job};
use stax_test_utils::harness::CoreHarness;
use stax_test_utils::init_tracing;

type TestResult = Result<(), Box<dyn Error>>;

fn message(text: &str) -> ActionNode {
    ActionNode::new("message").attr("text", text)
}

fn hold(block: &str, timeout_ms: u64) -> ControlOp {
    ControlOp::HoldBlock {
        block: block.to_string(),
        timeout_ms,
    }
}

fn release(block: &str) -> ControlOp {
    ControlOp::ReleaseBlock {
        block: block.to_string(),
    }
}

fn started(body: ActionNode) -> CoreHarness {
    let mut harness = CoreHarness::new(single_function_job(body));
    harness.start();
    harness
}

#[test]
fn held_block_does_not_advance_until_released() -> TestResult {
    init_tracing();

    let mut harness = started(block("work", sequence([delay(5), message("'after'")])));

    harness.control(hold("main.work", 0))?;
    harness.complete_next_request();
    assert!(harness.messages().is_empty());
    assert!(harness.outcome().is_none());

    harness.control(release("main.work"))?;
    assert_eq!(harness.messages(), vec!["after"]);
    assert_eq!(harness.outcome().map(|o| o.status.clone()), Some(JobStatus::Normal));
    Ok(())
}

#[test]
fn hold_cascades_to_child_threads() -> TestResult {
    init_tracing();

    let body = block(
        "outer",
        parallel([
            sequence([delay(5), message("'first'")]),
            sequence([delay(5), message("'second'")]),
        ]),
    );
    let mut harness = started(body);

    harness.control(hold("main.outer", 0))?;
    harness.complete_next_request();
    harness.complete_next_request();
    assert!(harness.messages().is_empty());

    harness.control(release("main.outer"))?;
    let mut messages = harness.messages();
    messages.sort();
    assert_eq!(messages, vec!["first", "second"]);
    Ok(())
}

fn thread_states(harness: &CoreHarness) -> BTreeMap<ThreadId, ThreadState> {
    harness
        .job()
        .thread_infos()
        .iter()
        .filter_map(|info| {
            harness
                .job()
                .thread_state(info.id)
                .map(|state| (info.id, state))
        })
        .collect()
}

fn runnable(states: &BTreeMap<ThreadId, ThreadState>) -> Vec<ThreadId> {
    states
        .iter()
        .filter(|(_, state)| matches!(state, ThreadState::Runnable | ThreadState::Running))
        .map(|(id, _)| *id)
        .collect()
}

#[test]
fn nested_parallel_hold_and_release_restore_thread_states() -> TestResult {
    init_tracing();

    let body = block(
        "outer",
        parallel([
            sequence([delay(5), message("'left'")]),
            parallel([
                sequence([delay(5), message("'inner one'")]),
                sequence([delay(5), message("'inner two'")]),
            ]),
        ]),
    );
    let mut harness = started(body);

    // Root, two outer branches and two inner branches.
    let before = thread_states(&harness);
    assert_eq!(before.len(), 5);
    assert_eq!(harness.pending_requests().len(), 3);

    harness.control(hold("main.outer", 0))?;
    let held = thread_states(&harness);
    assert_eq!(held.keys().collect::<Vec<_>>(), before.keys().collect::<Vec<_>>());
    assert!(held.values().all(|state| *state == ThreadState::Blocked));

    harness.control(release("main.outer"))?;
    let after = thread_states(&harness);
    assert_eq!(after, before);
    assert_eq!(runnable(&after), runnable(&before));

    // A request finishing under a hold at depth two does not advance its thread.
    harness.control(hold("main.outer", 0))?;
    while harness.complete_next_request() {}
    assert!(harness.messages().is_empty());
    assert_eq!(harness.job().live_thread_count(), 5);

    harness.control(release("main.outer"))?;
    let mut messages = harness.messages();
    messages.sort();
    assert_eq!(messages, vec!["inner one", "inner two", "left"]);
    assert_eq!(harness.outcome().map(|o| o.status.clone()), Some(JobStatus::Normal));
    Ok(())
}

#[test]
fn hold_timeout_releases_the_block() -> TestResult {
    init_tracing();

    let mut harness = started(block("work", sequence([delay(5), message("'after'")])));

    harness.control(hold("main.work", 250))?;
    let (timer, after) = harness.pending_timers()[0];
    assert_eq!(after.as_millis(), 250);

    harness.complete_next_request();
    assert!(harness.messages().is_empty());

    harness.fire_timer(timer);
    assert_eq!(harness.messages(), vec!["after"]);
    Ok(())
}

#[test]
fn release_before_timeout_cancels_the_hold_timer() -> TestResult {
    init_tracing();

    let mut harness = started(block("work", delay(5)));

    harness.control(hold("main.work", 250))?;
    assert_eq!(harness.pending_timers().len(), 1);
    harness.control(release("main.work"))?;
    assert!(harness.pending_timers().is_empty());
    Ok(())
}

#[test]
fn hold_and_release_report_state_errors() -> TestResult {
    init_tracing();

    let mut harness = started(block("work", delay(5)));

    assert_eq!(
        harness.control(release("main.work")),
        Err(ControlError::BlockNotHeld("main.work".to_string()))
    );
    assert_eq!(
        harness.control(hold("main.nothing", 0)),
        Err(ControlError::BlockNotFound("main.nothing".to_string()))
    );
    harness.control(hold("main.work", 0))?;
    assert_eq!(
        harness.control(hold("main.work", 0)),
        Err(ControlError::BlockAlreadyHeld("main.work".to_string()))
    );
    Ok(())
}

#[test]
fn list_blocks_shows_nested_names_and_state() -> TestResult {
    init_tracing();

    let mut harness = started(block("outer", block("inner", delay(5))));
    harness.control(hold("main.outer.inner", 0))?;

    let ControlReply::Blocks(blocks) = harness.control(ControlOp::ListBlocks)? else {
        panic!("expected a block listing");
    };
    let names: Vec<&str> = blocks.iter().map(|b| b.name.as_str()).collect();
    assert_eq!(names, vec!["main", "main.outer", "main.outer.inner"]);
    let inner = blocks.iter().find(|b| b.name == "main.outer.inner");
    assert_eq!(inner.map(|b| b.state), Some(BlockState::Held));
    Ok(())
}

#[test]
fn terminated_block_unwinds_and_sets_block_rc() -> TestResult {
    init_tracing();

    let body = sequence([
        block("work", sequence([delay(60_000), message("'unreachable'")])),
        message("'after'"),
        ret("STAXBlockRC"),
    ]);
    let mut harness = started(body);

    harness.control(ControlOp::TerminateBlock {
        block: "main.work".to_string(),
    })?;

    assert_eq!(harness.cancelled_requests().len(), 1);
    assert_eq!(harness.messages(), vec!["after"]);
    assert_eq!(harness.result(), json!(2));
    assert_eq!(harness.outcome().map(|o| o.status.clone()), Some(JobStatus::Normal));
    Ok(())
}

#[test]
fn terminate_job_ends_with_terminated_status() -> TestResult {
    init_tracing();

    let mut harness = started(sequence([delay(60_000), message("'unreachable'")]));

    harness.control(ControlOp::TerminateJob)?;

    assert!(harness.messages().is_empty());
    assert!(matches!(
        harness.outcome().map(|o| &o.status),
        Some(JobStatus::Terminated { .. })
    ));
    assert_eq!(
        harness.control(ControlOp::ListBlocks),
        Err(ControlError::JobComplete(1))
    );
    Ok(())
}

#[test]
fn hold_element_holds_its_own_block() -> TestResult {
    init_tracing();

    let body = block(
        "work",
        sequence([ActionNode::new("hold"), message("'released'")]),
    );
    let mut harness = started(body);

    assert!(harness.messages().is_empty());
    harness.control(release("main.work"))?;
    assert_eq!(harness.messages(), vec!["released"]);
    Ok(())
}

#[test]
fn breakpoint_holds_until_resumed() -> TestResult {
    init_tracing();

    let settings = JobSettings {
        breakpoints: true,
        ..JobSettings::default()
    };
    let body = sequence([ActionNode::new("breakpoint"), message("'resumed'")]);
    let mut harness =
        CoreHarness::with_settings(single_function_job(body), settings, JobOptions::default());
    harness.start();

    let hits = harness.events_of(EventKind::Breakpoint);
    assert_eq!(hits.len(), 1);
    let id: u64 = hits[0].name.parse()?;
    assert!(harness.messages().is_empty());

    harness.control(ControlOp::ResumeBreakpoint { id })?;
    assert_eq!(harness.messages(), vec!["resumed"]);
    assert_eq!(
        harness.control(ControlOp::ResumeBreakpoint { id }),
        Err(ControlError::JobComplete(1))
    );
    Ok(())
}

#[test]
fn breakpoints_are_ignored_when_disabled() -> TestResult {
    init_tracing();

    let harness = started(sequence([ActionNode::new("breakpoint"), message("'through'")]));

    assert!(harness.events_of(EventKind::Breakpoint).is_empty());
    assert_eq!(harness.messages(), vec!["through"]);
    Ok(())
}

#[test]
fn testcases_accumulate_status_results() -> TestResult {
    init_tracing();

    let status = |result: &str| ActionNode::new("tcstatus").attr("result", result);
    let body = sequence([
        ActionNode::new("testcase")
            .attr("name", "'login'")
            .child(sequence([status("'pass'"), status("'fail'"), status("'pass'")])),
        status("'pass'"),
    ]);
    let harness = started(body);

    assert_eq!(harness.signals(), vec!["STAXTestcaseMissingError"]);
    let testcases = &harness.outcome().ok_or("job still running")?.testcases;
    assert_eq!(testcases.len(), 1);
    assert_eq!(testcases[0].name, "login");
    assert_eq!(testcases[0].passes, 2);
    assert_eq!(testcases[0].fails, 1);
    assert_eq!(testcases[0].last_status, Some(TcStatusResult::Pass));
    Ok(())
}

#[test]
fn nested_testcases_use_dotted_names() -> TestResult {
    init_tracing();

    let status = ActionNode::new("tcstatus").attr("result", "'pass'");
    let body = ActionNode::new("testcase").attr("name", "'suite'").child(
        ActionNode::new("testcase")
            .attr("name", "'case'")
            .child(status),
    );
    let harness = started(body);

    let testcases = &harness.outcome().ok_or("job still running")?.testcases;
    let names: Vec<&str> = testcases.iter().map(|t| t.name.as_str()).collect();
    assert!(names.contains(&"suite.case"));
    Ok(())
}
