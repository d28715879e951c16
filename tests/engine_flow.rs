use std::error::Error;

use serde_json::json;
use stax::definition::ActionNode;
use stax::engine::{JobOptions, JobSettings, JobStatus};
use stax::types::FunctionScope;
use stax_test_utils::builders::{
    FunctionBuilder, JobDocumentBuilder, call, call_with, ret, script, sequence,
    single_function_job,
};
use stax_test_utils::harness::CoreHarness;
use stax_test_utils::init_tracing;

type TestResult = Result<(), Box<dyn Error>>;

fn message(text: &str) -> ActionNode {
    ActionNode::new("message").attr("text", text)
}

fn when(expr: &str, then: ActionNode) -> ActionNode {
    ActionNode::new("if").attr("expr", expr).child(then)
}

fn counted_loop(var: &str, from: &str, to: &str, by: &str, body: ActionNode) -> ActionNode {
    ActionNode::new("loop")
        .attr("var", var)
        .attr("from", from)
        .attr("to", to)
        .attr("by", by)
        .child(body)
}

fn run(body: ActionNode) -> CoreHarness {
    let mut harness = CoreHarness::new(single_function_job(body));
    harness.start();
    harness
}

#[test]
fn sequence_runs_steps_in_order() -> TestResult {
    init_tracing();

    let harness = run(sequence([message("'one'"), message("'two'"), message("'three'")]));

    assert_eq!(harness.messages(), vec!["one", "two", "three"]);
    assert_eq!(harness.outcome().map(|o| o.status.clone()), Some(JobStatus::Normal));
    Ok(())
}

#[test]
fn loop_counts_up_by_step() -> TestResult {
    init_tracing();

    let harness = run(sequence([
        script("acc = 0"),
        counted_loop("i", "1", "5", "2", script("acc = acc * 10 + i")),
        ret("acc"),
    ]));

    assert_eq!(harness.result(), json!(135));
    Ok(())
}

#[test]
fn loop_with_negative_step_counts_down() -> TestResult {
    init_tracing();

    let harness = run(sequence([
        script("acc = 0"),
        counted_loop("i", "5", "1", "-1", script("acc = acc * 10 + i")),
        ret("acc"),
    ]));

    assert_eq!(harness.result(), json!(54321));
    Ok(())
}

#[test]
fn loop_ending_at_the_largest_index_completes() -> TestResult {
    init_tracing();

    let harness = run(sequence([
        script("runs = 0"),
        counted_loop(
            "i",
            "9223372036854775807",
            "9223372036854775807",
            "1",
            script("runs = runs + 1"),
        ),
        counted_loop(
            "k",
            "9223372036854775800",
            "9223372036854775807",
            "5",
            script("runs = runs + 1"),
        ),
        ret("runs"),
    ]));

    assert_eq!(harness.result(), json!(3));
    assert_eq!(harness.outcome().map(|o| o.status.clone()), Some(JobStatus::Normal));
    Ok(())
}

#[test]
fn loop_honours_break_and_continue() -> TestResult {
    init_tracing();

    let body = sequence([
        when("i == 3", ActionNode::new("continue")),
        when("i == 5", ActionNode::new("break")),
        script("acc = acc * 10 + i"),
    ]);
    let harness = run(sequence([
        script("acc = 0"),
        counted_loop("i", "1", "9", "1", body),
        ret("acc"),
    ]));

    assert_eq!(harness.result(), json!(124));
    Ok(())
}

#[test]
fn loop_until_is_tested_after_the_body() -> TestResult {
    init_tracing();

    let looped = ActionNode::new("loop")
        .attr("until", "true")
        .child(script("runs = runs + 1"));
    let harness = run(sequence([script("runs = 0"), looped, ret("runs")]));

    assert_eq!(harness.result(), json!(1));
    Ok(())
}

#[test]
fn iterate_binds_element_and_zero_based_index() -> TestResult {
    init_tracing();

    let iterate = ActionNode::new("iterate")
        .attr("var", "x")
        .attr("in", "[1, 2, 3]")
        .attr("indexvar", "i")
        .child(script("acc = acc * 100 + x * 10 + i"));
    let harness = run(sequence([script("acc = 0"), iterate, ret("acc")]));

    assert_eq!(harness.result(), json!(102132));
    Ok(())
}

#[test]
fn iterate_over_empty_list_raises_empty_list_and_continues() -> TestResult {
    init_tracing();

    let iterate = ActionNode::new("iterate")
        .attr("var", "x")
        .attr("in", "[]")
        .child(message("x"));
    let harness = run(sequence([iterate, message("'after'")]));

    assert_eq!(harness.signals(), vec!["STAXEmptyList"]);
    assert_eq!(harness.messages(), vec!["after"]);
    assert_eq!(harness.outcome().map(|o| o.status.clone()), Some(JobStatus::Normal));
    Ok(())
}

#[test]
fn if_takes_first_matching_branch() -> TestResult {
    init_tracing();

    let choice = ActionNode::new("if")
        .attr("expr", "n > 10")
        .child(ret("'big'"))
        .child(
            ActionNode::new("elseif")
                .attr("expr", "n > 5")
                .child(ret("'medium'")),
        )
        .child(ActionNode::new("else").child(ret("'small'")));
    let harness = run(sequence([script("n = 7"), choice]));

    assert_eq!(harness.result(), json!("medium"));
    Ok(())
}

#[test]
fn call_binds_list_positionally_and_map_by_name() -> TestResult {
    init_tracing();

    let add = FunctionBuilder::new("add", ret("a * 10 + b"))
        .arg("a")
        .arg("b")
        .build();
    let main = sequence([
        call_with("add", "[1, 2]"),
        script("positional = STAXResult"),
        call_with("add", "{'b': 4, 'a': 3}"),
        ret("[positional, STAXResult]"),
    ]);
    let definition = JobDocumentBuilder::new()
        .simple_function("main", main)
        .function(add)
        .definition();

    let mut harness = CoreHarness::new(definition);
    harness.start();

    assert_eq!(harness.result(), json!([12, 34]));
    Ok(())
}

#[test]
fn call_with_list_and_map_elements_pass_arguments() -> TestResult {
    init_tracing();

    let arg = |value: &str| ActionNode::new("arg").text(value);
    let concat = FunctionBuilder::new("concat", ret("first + second"))
        .arg("first")
        .arg("second")
        .build();
    let main = sequence([
        ActionNode::new("call-with-list")
            .attr("function", "'concat'")
            .child(arg("'a'"))
            .child(arg("'b'")),
        script("listed = STAXResult"),
        ActionNode::new("call-with-map")
            .attr("function", "'concat'")
            .child(arg("'d'").attr("name", "second"))
            .child(arg("'c'").attr("name", "first")),
        ret("listed + STAXResult"),
    ]);
    let definition = JobDocumentBuilder::new()
        .simple_function("main", main)
        .function(concat)
        .definition();

    let mut harness = CoreHarness::new(definition);
    harness.start();

    assert_eq!(harness.result(), json!("abcd"));
    Ok(())
}

#[test]
fn missing_argument_uses_its_default() -> TestResult {
    init_tracing();

    let greet = FunctionBuilder::new("greet", ret("'hello ' + who"))
        .arg_default("who", "'world'")
        .build();
    let definition = JobDocumentBuilder::new()
        .simple_function("main", sequence([call("greet"), ret("STAXResult")]))
        .function(greet)
        .definition();

    let mut harness = CoreHarness::new(definition);
    harness.start();

    assert_eq!(harness.result(), json!("hello world"));
    Ok(())
}

#[test]
fn missing_required_argument_terminates_the_job() -> TestResult {
    init_tracing();

    let needy = FunctionBuilder::new("needy", ret("value")).arg("value").build();
    let definition = JobDocumentBuilder::new()
        .simple_function("main", sequence([call("needy"), message("'unreachable'")]))
        .function(needy)
        .definition();

    let mut harness = CoreHarness::new(definition);
    harness.start();

    assert_eq!(harness.signals(), vec!["STAXFunctionArgValidate"]);
    assert!(harness.messages().is_empty());
    assert!(matches!(
        harness.outcome().map(|o| &o.status),
        Some(JobStatus::Terminated { .. })
    ));
    Ok(())
}

#[test]
fn unknown_function_raises_function_does_not_exist() -> TestResult {
    init_tracing();

    let harness = run(sequence([call("nowhere"), message("'unreachable'")]));

    assert_eq!(harness.signals(), vec!["STAXFunctionDoesNotExist"]);
    assert!(harness.messages().is_empty());
    Ok(())
}

#[test]
fn local_scope_hides_assignments_from_the_caller() -> TestResult {
    init_tracing();

    let local = FunctionBuilder::new("local_fn", script("x = 99"))
        .scope(FunctionScope::Local)
        .build();
    let global = FunctionBuilder::new("global_fn", script("y = 99")).build();
    let main = sequence([
        script("x = 1; y = 1"),
        call("local_fn"),
        call("global_fn"),
        ret("[x, y]"),
    ]);
    let definition = JobDocumentBuilder::new()
        .simple_function("main", main)
        .function(local)
        .function(global)
        .definition();

    let mut harness = CoreHarness::new(definition);
    harness.start();

    assert_eq!(harness.result(), json!([1, 99]));
    Ok(())
}

#[test]
fn repeated_calls_start_from_a_fresh_copy_of_the_template() -> TestResult {
    init_tracing();

    let count = FunctionBuilder::new(
        "count",
        sequence([
            script("c = 0"),
            counted_loop("j", "1", "n", "1", script("c = c + 1")),
            ret("c"),
        ]),
    )
    .arg("n")
    .build();
    let main = sequence([
        call_with("count", "2"),
        script("first = STAXResult"),
        call_with("count", "3"),
        ret("[first, STAXResult]"),
    ]);
    let definition = JobDocumentBuilder::new()
        .simple_function("main", main)
        .function(count)
        .definition();

    let mut harness = CoreHarness::new(definition);
    harness.start();

    assert_eq!(harness.result(), json!([2, 3]));
    Ok(())
}

#[test]
fn job_scripts_run_before_the_start_function() -> TestResult {
    init_tracing();

    let definition = JobDocumentBuilder::new()
        .script("base = 40")
        .simple_function("main", ret("base + STAXArg"))
        .args("2")
        .definition();

    let mut harness = CoreHarness::new(definition);
    harness.start();

    assert_eq!(harness.result(), json!(42));
    Ok(())
}

#[test]
fn options_override_start_function_and_arguments() -> TestResult {
    init_tracing();

    let definition = JobDocumentBuilder::new()
        .simple_function("main", ret("'main'"))
        .simple_function("other", ret("'other ' + STAXArg"))
        .definition();
    let options = JobOptions {
        function: Some("other".to_string()),
        args: Some("'run'".to_string()),
        ..JobOptions::default()
    };

    let mut harness = CoreHarness::with_settings(definition, JobSettings::default(), options);
    harness.start();

    assert_eq!(harness.result(), json!("other run"));
    Ok(())
}

#[test]
fn bad_expression_terminates_with_evaluation_error() -> TestResult {
    init_tracing();

    let harness = run(sequence([script("x = ("), message("'unreachable'")]));

    assert_eq!(harness.signals(), vec!["STAXEvaluationError"]);
    assert!(harness.messages().is_empty());
    assert!(matches!(
        harness.outcome().map(|o| &o.status),
        Some(JobStatus::Terminated { .. })
    ));
    Ok(())
}

#[test]
fn user_signal_handler_replaces_the_default() -> TestResult {
    init_tracing();

    let definition = JobDocumentBuilder::new()
        .signal_handler("STAXEmptyList", message("'handled'"))
        .simple_function(
            "main",
            sequence([
                ActionNode::new("iterate")
                    .attr("var", "x")
                    .attr("in", "[]")
                    .child(message("x")),
                message("'after'"),
            ]),
        )
        .definition();

    let mut harness = CoreHarness::new(definition);
    harness.start();

    assert_eq!(harness.messages(), vec!["handled", "after"]);
    Ok(())
}

#[test]
fn raise_without_handler_reports_no_such_signal_handler() -> TestResult {
    init_tracing();

    let harness = run(sequence([
        ActionNode::new("raise").attr("signal", "'CustomSignal'"),
        message("'after'"),
    ]));

    assert_eq!(harness.signals(), vec!["STAXNoSuchSignalHandler"]);
    assert_eq!(harness.messages(), vec!["after"]);
    Ok(())
}
