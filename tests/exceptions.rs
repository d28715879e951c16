use std::error::Error;

use proptest::prelude::*;
use serde_json::json;
use stax::actions::catch_matches;
use stax::definition::ActionNode;
use stax::engine::JobStatus;
use stax_test_utils::builders::{
    JobDocumentBuilder, call, catch, ret, script, sequence, single_function_job, throw,
};
use stax_test_utils::harness::CoreHarness;
use stax_test_utils::init_tracing;

type TestResult = Result<(), Box<dyn Error>>;

fn message(text: &str) -> ActionNode {
    ActionNode::new("message").attr("text", text)
}

fn try_with(body: ActionNode, handlers: impl IntoIterator<Item = ActionNode>) -> ActionNode {
    ActionNode::new("try").child(body).children(handlers)
}

fn finally(body: ActionNode) -> ActionNode {
    ActionNode::new("finally").child(body)
}

fn run(body: ActionNode) -> CoreHarness {
    let mut harness = CoreHarness::new(single_function_job(body));
    harness.start();
    harness
}

#[test]
fn catch_receives_data_and_exception_name() -> TestResult {
    init_tracing();

    let handler = ActionNode::new("catch")
        .attr("exception", "'Err'")
        .attr("var", "data")
        .attr("typevar", "kind")
        .child(script("caught = [data, kind]"));
    let harness = run(sequence([
        try_with(throw("Err.Sub").attr("data", "42"), [handler]),
        ret("caught"),
    ]));

    assert_eq!(harness.result(), json!([42, "Err.Sub"]));
    Ok(())
}

#[test]
fn first_matching_catch_wins() -> TestResult {
    init_tracing();

    let harness = run(try_with(
        throw("Net.Timeout"),
        [
            catch("Disk", message("'disk'")),
            catch("Net", message("'net'")),
            catch("...", message("'any'")),
        ],
    ));

    assert_eq!(harness.messages(), vec!["net"]);
    Ok(())
}

#[test]
fn unmatched_exception_passes_through_to_outer_try() -> TestResult {
    init_tracing();

    let inner = try_with(throw("Outer.Problem"), [catch("Inner", message("'inner'"))]);
    let harness = run(try_with(inner, [catch("Outer", message("'outer'"))]));

    assert_eq!(harness.messages(), vec!["outer"]);
    Ok(())
}

#[test]
fn rethrow_hands_exception_to_the_next_try() -> TestResult {
    init_tracing();

    let inner = try_with(
        throw("X"),
        [catch(
            "X",
            sequence([message("'inner'"), ActionNode::new("rethrow")]),
        )],
    );
    let harness = run(try_with(inner, [catch("X", message("'outer'"))]));

    assert_eq!(harness.messages(), vec!["inner", "outer"]);
    Ok(())
}

#[test]
fn finally_runs_and_preserves_the_pending_exception() -> TestResult {
    init_tracing();

    let guarded = ActionNode::new("try")
        .child(throw("A"))
        .child(finally(message("'cleanup'")));
    let harness = run(sequence([
        try_with(guarded, [catch("A", message("'caught'"))]),
        message("'after'"),
    ]));

    assert_eq!(harness.messages(), vec!["cleanup", "caught", "after"]);
    assert_eq!(harness.outcome().map(|o| o.status.clone()), Some(JobStatus::Normal));
    Ok(())
}

#[test]
fn finally_shares_variables_with_the_try_thread() -> TestResult {
    init_tracing();

    let guarded = ActionNode::new("try")
        .child(script("step = 1"))
        .child(finally(script("step = step + 1")));
    let harness = run(sequence([guarded, ret("step")]));

    assert_eq!(harness.result(), json!(2));
    Ok(())
}

#[test]
fn catch_and_finally_together_run_in_order() -> TestResult {
    init_tracing();

    let guarded = ActionNode::new("try")
        .child(throw("Boom"))
        .child(catch("Boom", message("'caught'")))
        .child(finally(message("'finally'")));
    let harness = run(guarded);

    assert_eq!(harness.messages(), vec!["caught", "finally"]);
    Ok(())
}

#[test]
fn uncaught_exception_makes_the_job_abnormal() -> TestResult {
    init_tracing();

    let harness = run(sequence([throw("Unhandled"), message("'unreachable'")]));

    assert!(harness.messages().is_empty());
    match harness.outcome().map(|o| &o.status) {
        Some(JobStatus::Abnormal { reason }) => assert!(reason.contains("Unhandled")),
        other => panic!("expected abnormal status, got {other:?}"),
    }
    Ok(())
}

#[test]
fn return_outside_any_function_makes_the_job_abnormal() -> TestResult {
    init_tracing();

    // The job-level handler runs on the root thread before the start
    // function is called, so nothing is there to take the return.
    let definition = JobDocumentBuilder::new()
        .signal_handler("STAXEvaluationError", ret("'early'"))
        .script("x = (")
        .simple_function("main", message("'main ran'"))
        .definition();
    let mut harness = CoreHarness::new(definition);
    harness.start();

    assert!(harness.messages().is_empty());
    match harness.outcome().map(|o| &o.status) {
        Some(JobStatus::Abnormal { reason }) => {
            assert!(reason.contains("unhandled Return"), "reason: {reason}");
        }
        other => panic!("expected abnormal status, got {other:?}"),
    }
    Ok(())
}

#[test]
fn exception_crosses_function_boundaries() -> TestResult {
    init_tracing();

    let definition = JobDocumentBuilder::new()
        .simple_function(
            "main",
            try_with(
                call("fails"),
                [catch("Deep", message("'caught in main'"))],
            ),
        )
        .simple_function("fails", sequence([throw("Deep.Error"), message("'unreachable'")]))
        .definition();

    let mut harness = CoreHarness::new(definition);
    harness.start();

    assert_eq!(harness.messages(), vec!["caught in main"]);
    Ok(())
}

proptest! {
    #[test]
    fn catch_matches_names_and_their_dotted_descendants(
        base in "[A-Za-z]{1,6}(\\.[A-Za-z]{1,6}){0,2}",
        suffix in "[A-Za-z]{1,6}",
    ) {
        let child = format!("{base}.{suffix}");
        let sibling = format!("{base}{suffix}");

        prop_assert!(catch_matches(&base, &base));
        prop_assert!(catch_matches(&base, &child));
        prop_assert!(!catch_matches(&base, &sibling));
        prop_assert!(!catch_matches(&child, &base));
        prop_assert!(catch_matches("...", &child));
    }
}
