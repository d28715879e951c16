use std::error::Error;

use proptest::prelude::*;
use serde_json::json;
use stax::definition::ActionNode;
use stax::engine::{JobOptions, JobSettings, JobStatus, RequestOutcome};
use stax::events::EventKind;
use stax_test_utils::builders::{
    FunctionBuilder, JobDocumentBuilder, call_with, catch, delay, parallel, ret, script,
    sequence, single_function_job, throw,
};
use stax_test_utils::harness::CoreHarness;
use stax_test_utils::init_tracing;

type TestResult = Result<(), Box<dyn Error>>;

fn message(text: &str) -> ActionNode {
    ActionNode::new("message").attr("text", text)
}

fn parallel_iterate(list: &str, max_threads: Option<&str>, body: ActionNode) -> ActionNode {
    let node = ActionNode::new("paralleliterate")
        .attr("var", "item")
        .attr("in", list)
        .attr("indexvar", "index")
        .child(body);
    match max_threads {
        Some(max) => node.attr("maxthreads", max),
        None => node,
    }
}

fn limited(max_threads: u32) -> JobSettings {
    JobSettings {
        max_threads,
        ..JobSettings::default()
    }
}

#[test]
fn parallel_waits_for_every_branch() -> TestResult {
    init_tracing();

    let body = sequence([
        parallel([
            sequence([delay(10), message("'slow'")]),
            message("'fast'"),
        ]),
        message("'done'"),
    ]);
    let mut harness = CoreHarness::new(single_function_job(body));
    harness.start();

    assert_eq!(harness.messages(), vec!["fast"]);
    assert_eq!(harness.pending_requests().len(), 1);
    assert!(harness.outcome().is_none());

    harness.complete_next_request();

    assert_eq!(harness.messages(), vec!["fast", "slow", "done"]);
    assert_eq!(harness.outcome().map(|o| o.status.clone()), Some(JobStatus::Normal));
    Ok(())
}

#[test]
fn parallel_branches_get_their_own_scope() -> TestResult {
    init_tracing();

    let body = sequence([
        script("shared = 0"),
        parallel([script("shared = 1"), script("shared = 2")]),
        ret("shared"),
    ]);
    let mut harness = CoreHarness::new(single_function_job(body));
    harness.start();

    assert_eq!(harness.result(), json!(0));
    Ok(())
}

#[test]
fn concurrent_calls_of_one_function_keep_their_own_arguments() -> TestResult {
    init_tracing();

    let report = FunctionBuilder::new(
        "report",
        sequence([delay(5), message("'saw ' + who"), ret("who")]),
    )
    .arg("who")
    .build();
    let branch = |who: &str| {
        sequence([
            call_with("report", &format!("'{who}'")),
            message("'returned ' + STAXResult"),
        ])
    };
    let definition = JobDocumentBuilder::new()
        .simple_function("main", parallel([branch("left"), branch("right")]))
        .function(report)
        .definition();
    let mut harness = CoreHarness::new(definition);
    harness.start();

    // Both calls are parked on their delay at the same time.
    assert_eq!(harness.pending_requests().len(), 2);
    assert!(harness.messages().is_empty());

    // Finish the second call first.
    let (second, _) = harness.pending_requests()[1].clone();
    harness.complete_request(
        second,
        RequestOutcome::Completed {
            rc: 0,
            result: String::new(),
        },
    );
    assert_eq!(harness.messages(), vec!["saw right", "returned right"]);

    harness.complete_next_request();
    assert_eq!(
        harness.messages(),
        vec!["saw right", "returned right", "saw left", "returned left"]
    );
    assert_eq!(harness.outcome().map(|o| o.status.clone()), Some(JobStatus::Normal));
    Ok(())
}

#[test]
fn parallel_publishes_thread_start_and_end_for_each_branch() -> TestResult {
    init_tracing();

    let body = parallel([message("'a'"), message("'b'"), message("'c'")]);
    let mut harness = CoreHarness::new(single_function_job(body));
    harness.start();

    let threads = harness.events_of(EventKind::Thread);
    let starts = threads.iter().filter(|e| e.status == "start").count();
    let ends = threads.iter().filter(|e| e.status == "end").count();
    // Root thread plus three branches.
    assert_eq!(starts, 4);
    assert_eq!(ends, 4);
    Ok(())
}

#[test]
fn exception_in_one_branch_stops_the_others() -> TestResult {
    init_tracing();

    let body = ActionNode::new("try")
        .child(parallel([
            throw("Boom"),
            sequence([delay(1000), message("'unreachable'")]),
        ]))
        .child(catch("Boom", message("'caught'")));
    let mut harness = CoreHarness::new(single_function_job(body));
    harness.start();

    assert_eq!(harness.messages(), vec!["caught"]);
    assert_eq!(harness.cancelled_requests().len(), 1);
    assert!(harness.pending_requests().is_empty());
    assert_eq!(harness.outcome().map(|o| o.status.clone()), Some(JobStatus::Normal));
    Ok(())
}

#[test]
fn parallel_beyond_max_threads_is_rejected_without_starting_anything() -> TestResult {
    init_tracing();

    let body = parallel([message("'a'"), message("'b'"), message("'c'")]);
    let mut harness = CoreHarness::with_settings(
        single_function_job(body),
        limited(3),
        JobOptions::default(),
    );
    harness.start();

    assert_eq!(harness.signals(), vec!["STAXMaxThreadsExceeded"]);
    assert!(harness.messages().is_empty());
    assert!(matches!(
        harness.outcome().map(|o| &o.status),
        Some(JobStatus::Terminated { .. })
    ));
    Ok(())
}

#[test]
fn parallel_within_max_threads_runs() -> TestResult {
    init_tracing();

    let body = parallel([message("'a'"), message("'b'")]);
    let mut harness = CoreHarness::with_settings(
        single_function_job(body),
        limited(3),
        JobOptions::default(),
    );
    harness.start();

    let mut messages = harness.messages();
    messages.sort();
    assert_eq!(messages, vec!["a", "b"]);
    Ok(())
}

#[test]
fn paralleliterate_over_empty_list_raises_empty_list() -> TestResult {
    init_tracing();

    let body = sequence([
        parallel_iterate("[]", None, message("item")),
        message("'after'"),
    ]);
    let mut harness = CoreHarness::new(single_function_job(body));
    harness.start();

    assert_eq!(harness.signals(), vec!["STAXEmptyList"]);
    assert_eq!(harness.messages(), vec!["after"]);
    Ok(())
}

#[test]
fn paralleliterate_negative_maxthreads_is_invalid() -> TestResult {
    init_tracing();

    let body = parallel_iterate("[1, 2]", Some("-1"), message("item"));
    let mut harness = CoreHarness::new(single_function_job(body));
    harness.start();

    assert_eq!(harness.signals(), vec!["STAXInvalidMaxThreads"]);
    assert!(harness.messages().is_empty());
    Ok(())
}

#[test]
fn timer_expiry_stops_the_body_and_sets_rc() -> TestResult {
    init_tracing();

    let timed = ActionNode::new("timer")
        .attr("duration", "'50'")
        .child(sequence([delay(60_000), message("'unreachable'")]));
    let body = sequence([timed, ret("RC")]);
    let mut harness = CoreHarness::new(single_function_job(body));
    harness.start();

    assert_eq!(harness.pending_requests().len(), 1);
    let (timer, after) = harness.pending_timers()[0];
    assert_eq!(after.as_millis(), 50);

    harness.fire_timer(timer);

    assert_eq!(harness.cancelled_requests().len(), 1);
    assert!(harness.messages().is_empty());
    assert_eq!(harness.result(), json!(1));
    Ok(())
}

#[test]
fn timer_body_finishing_first_cancels_the_timer() -> TestResult {
    init_tracing();

    let timed = ActionNode::new("timer")
        .attr("duration", "'1m'")
        .child(delay(10));
    let body = sequence([timed, ret("RC")]);
    let mut harness = CoreHarness::new(single_function_job(body));
    harness.start();

    assert_eq!(harness.pending_timers().len(), 1);
    harness.complete_next_request();

    assert!(harness.pending_timers().is_empty());
    assert_eq!(harness.result(), json!(0));
    Ok(())
}

#[test]
fn invalid_timer_duration_terminates_the_job() -> TestResult {
    init_tracing();

    let timed = ActionNode::new("timer")
        .attr("duration", "'soon'")
        .child(message("'unreachable'"));
    let mut harness = CoreHarness::new(single_function_job(timed));
    harness.start();

    assert_eq!(harness.signals(), vec!["STAXInvalidTimerValue"]);
    assert!(harness.messages().is_empty());
    Ok(())
}

#[test]
fn unevaluable_timer_duration_sets_rc() -> TestResult {
    init_tracing();

    let keep_going = ActionNode::new("signalhandler")
        .attr("signal", "'STAXEvaluationError'")
        .child(message("'handled'"));
    let timed = ActionNode::new("timer")
        .attr("duration", "no_such_variable")
        .child(message("'unreachable'"));
    let body = sequence([keep_going, timed, ret("RC")]);
    let mut harness = CoreHarness::new(single_function_job(body));
    harness.start();

    assert_eq!(harness.signals(), vec!["STAXEvaluationError"]);
    assert_eq!(harness.messages(), vec!["handled"]);
    assert!(harness.pending_timers().is_empty());
    assert_eq!(harness.result(), json!(-1));
    Ok(())
}

#[test]
fn stafcmd_sets_rc_and_result_variables() -> TestResult {
    init_tracing();

    let command = ActionNode::new("stafcmd")
        .attr("location", "'local'")
        .attr("service", "'ECHO'")
        .attr("request", "'ECHO hi'")
        .attr("var", "reply");
    let body = sequence([command, ret("[RC, STAFResult, reply]")]);
    let mut harness = CoreHarness::new(single_function_job(body));
    harness.start();

    let (id, request) = harness.pending_requests()[0].clone();
    assert_eq!(request.service, "ECHO");
    harness.complete_request(
        id,
        RequestOutcome::Completed {
            rc: 3,
            result: "hi".to_string(),
        },
    );

    assert_eq!(harness.result(), json!([3, "hi", "hi"]));
    Ok(())
}

#[test]
fn stafcmd_start_failure_raises_command_start_error() -> TestResult {
    init_tracing();

    let body = sequence([delay(5), message("'unreachable'")]);
    let mut harness = CoreHarness::new(single_function_job(body));
    harness.start();

    let (id, _) = harness.pending_requests()[0].clone();
    harness.complete_request(id, RequestOutcome::StartFailed("no route".to_string()));

    assert_eq!(harness.signals(), vec!["STAXCommandStartError"]);
    assert!(harness.messages().is_empty());
    Ok(())
}

proptest! {
    #[test]
    fn paralleliterate_runs_each_item_once_within_the_thread_limit(
        count in 1usize..8,
        max in 0usize..5,
    ) {
        let items: Vec<String> = (0..count).map(|i| i.to_string()).collect();
        let list = format!("[{}]", items.join(", "));
        let max_expr = max.to_string();
        let body = parallel_iterate(
            &list,
            Some(&max_expr),
            sequence([message("item"), delay(5)]),
        );
        let mut harness = CoreHarness::new(single_function_job(body));
        harness.start();

        let limit = if max == 0 { count } else { max.min(count) };
        prop_assert_eq!(harness.pending_requests().len(), limit);

        while harness.outcome().is_none() {
            prop_assert!(harness.pending_requests().len() <= limit);
            prop_assert!(harness.job().live_thread_count() <= limit + 1);
            prop_assert!(harness.complete_next_request());
        }

        let mut seen = harness.messages();
        seen.sort();
        let mut expected = items.clone();
        expected.sort();
        prop_assert_eq!(seen, expected);
        prop_assert_eq!(harness.outcome().map(|o| o.status.clone()), Some(JobStatus::Normal));
    }
}
