use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::json;
use stax::definition::{ActionNode, JobDefinition};
use stax::engine::{ControlOp, JobOptions, JobStatus, RequestOutcome};
use stax::events::{EventSink, MemoryEventSink};
use stax::service::{LocalBackendFactory, StaxService};
use stax_test_utils::builders::{
    FunctionBuilder, JobDocumentBuilder, ServiceConfigBuilder, TEST_FILE, call, ret, script,
    sequence, single_function_job,
};
use stax_test_utils::harness::CoreHarness;
use stax_test_utils::{init_tracing, with_timeout};
use tempfile::tempdir;

type TestResult = Result<(), Box<dyn Error>>;

fn message(text: &str) -> ActionNode {
    ActionNode::new("message").attr("text", text)
}

fn import(file: &str) -> ActionNode {
    ActionNode::new("import").attr("file", format!("'{file}'"))
}

/// `greet` requires `helper`; `other` and `shout` stand alone.
fn library() -> Arc<JobDefinition> {
    JobDocumentBuilder::new()
        .function(
            FunctionBuilder::new("greet", sequence([call("helper"), ret("'hello ' + STAXResult")]))
                .requires("helper")
                .build(),
        )
        .simple_function("helper", ret("'from helper'"))
        .simple_function("other", message("'other ran'"))
        .simple_function("shout", ret("'HEY'"))
        .definition()
}

/// Run `body` as `main` and answer its one import with `source`.
fn run_import(body: ActionNode, source: Result<Arc<JobDefinition>, String>) -> CoreHarness {
    let mut harness = CoreHarness::new(single_function_job(body));
    harness.start();
    let (id, _) = harness.pending_imports()[0].clone();
    harness.complete_import(id, source);
    harness
}

#[test]
fn import_brings_requested_functions_and_what_they_require() -> TestResult {
    init_tracing();

    let body = sequence([
        import("lib.toml").attr("include", "['greet']"),
        script("report = STAXResult"),
        call("greet"),
        ret("[report, STAXResult]"),
    ]);
    let mut harness = CoreHarness::new(single_function_job(body));
    harness.start();

    // Relative to the importing document, which has no directory here.
    assert_eq!(harness.pending_imports().len(), 1);
    let (id, file) = harness.pending_imports()[0].clone();
    assert_eq!(file, Path::new(TEST_FILE).with_file_name("lib.toml"));

    harness.complete_import(id, Ok(library()));

    assert!(harness.signals().is_empty());
    assert_eq!(
        harness.result(),
        json!([
            [null, ["greet"], ["helper"], [], [], ["other", "shout"], []],
            "hello from helper"
        ])
    );
    Ok(())
}

#[test]
fn include_and_exclude_match_the_start_of_names() -> TestResult {
    init_tracing();

    let body = sequence([
        import("lib.toml")
            .attr("include", "['gr', 'o.*', 'missing', 'sh']")
            .attr("exclude", "['oth']"),
        ret("STAXResult"),
    ]);
    let harness = run_import(body, Ok(library()));

    assert_eq!(
        harness.result(),
        json!([null, ["greet", "shout"], ["helper"], [], [], ["other"], ["missing"]])
    );
    Ok(())
}

#[test]
fn existing_functions_are_kept_unless_replace_is_set() -> TestResult {
    init_tracing();

    let local_main = |import_node: ActionNode| {
        JobDocumentBuilder::new()
            .simple_function(
                "main",
                sequence([
                    import_node,
                    script("report = STAXResult"),
                    call("shout"),
                    ret("[report, STAXResult]"),
                ]),
            )
            .simple_function("shout", ret("'local'"))
            .simple_function("helper", ret("'local helper'"))
            .definition()
    };

    let kept_import = import("lib.toml")
        .attr("include", "['greet', 'other', 'shout']")
        .attr("replace", "false");
    let mut kept = CoreHarness::new(local_main(kept_import));
    kept.start();
    let (id, _) = kept.pending_imports()[0].clone();
    kept.complete_import(id, Ok(library()));
    assert_eq!(
        kept.result(),
        json!([
            [null, ["greet", "other"], [], ["shout"], ["helper"], [], []],
            "local"
        ])
    );

    let mut replaced = CoreHarness::new(local_main(import("lib.toml").attr("replace", "true")));
    replaced.start();
    let (id, _) = replaced.pending_imports()[0].clone();
    replaced.complete_import(id, Ok(library()));
    assert_eq!(
        replaced.result(),
        json!([
            [null, ["greet", "helper", "other", "shout"], [], [], [], [], []],
            "HEY"
        ])
    );
    Ok(())
}

#[test]
fn failed_import_in_ignore_mode_only_reports_the_error() -> TestResult {
    init_tracing();

    let body = sequence([
        import("absent.toml").attr("mode", "'IGNORE'"),
        ret("STAXResult"),
    ]);
    let harness = run_import(body, Err("IO error: not found".to_string()));

    assert!(harness.signals().is_empty());
    let result = harness.result();
    assert_eq!(result[0][0], json!("STAXImportError"));
    assert!(result[0][1].as_str().is_some_and(|m| m.contains("IO error: not found")));
    assert_eq!(result[1], json!([]));
    assert_eq!(harness.outcome().map(|o| &o.status), Some(&JobStatus::Normal));
    Ok(())
}

#[test]
fn failed_import_in_error_mode_terminates_the_job() -> TestResult {
    init_tracing();

    let body = sequence([import("absent.toml"), message("'unreachable'")]);
    let harness = run_import(body, Err("IO error: not found".to_string()));

    assert_eq!(harness.signals(), vec!["STAXImportError"]);
    assert!(harness.messages().is_empty());
    assert!(matches!(
        harness.outcome().map(|o| &o.status),
        Some(JobStatus::Terminated { .. })
    ));
    Ok(())
}

#[test]
fn invalid_mode_raises_before_loading() -> TestResult {
    init_tracing();

    let body = sequence([import("lib.toml").attr("mode", "'sometimes'"), ret("1")]);
    let mut harness = CoreHarness::new(single_function_job(body));
    harness.start();

    assert!(harness.pending_imports().is_empty());
    assert_eq!(harness.signals(), vec!["STAXImportError"]);
    Ok(())
}

#[test]
fn terminating_the_job_drops_a_pending_import() -> TestResult {
    init_tracing();

    let definition = JobDocumentBuilder::new()
        .simple_function(
            "main",
            sequence([import("lib.toml"), message("'unreachable'")]),
        )
        .definition();
    let mut harness = CoreHarness::new(definition);
    harness.start();
    assert_eq!(harness.pending_imports().len(), 1);

    harness.control(ControlOp::TerminateJob)?;

    assert!(matches!(
        harness.outcome().map(|o| &o.status),
        Some(JobStatus::Terminated { .. })
    ));
    assert!(harness.messages().is_empty());
    Ok(())
}

#[test]
fn requires_must_name_a_function_of_the_document() -> TestResult {
    init_tracing();

    let document = JobDocumentBuilder::new()
        .function(
            FunctionBuilder::new("main", ret("1"))
                .requires("nowhere")
                .build(),
        )
        .build();

    let error = JobDefinition::from_document(&document, Path::new(TEST_FILE), "local")
        .err()
        .ok_or("document with an unknown requirement was accepted")?;
    assert!(
        error.to_string().contains("requires unknown function \"nowhere\""),
        "error: {error}"
    );
    Ok(())
}

#[test]
fn process_starts_a_command_through_the_process_service() -> TestResult {
    init_tracing();

    let body = sequence([
        ActionNode::new("process")
            .attr("command", "'echo'")
            .attr("parms", "'hi'"),
        ret("[RC, STAFResult]"),
    ]);
    let mut harness = CoreHarness::new(single_function_job(body));
    harness.start();

    let (id, request) = harness.pending_requests()[0].clone();
    assert_eq!(request.location, "local");
    assert_eq!(request.service, "PROCESS");
    assert_eq!(request.request, "START COMMAND echo hi");

    harness.complete_request(
        id,
        RequestOutcome::Completed {
            rc: 0,
            result: "hi".to_string(),
        },
    );
    assert_eq!(harness.result(), json!([0, "hi"]));
    Ok(())
}

fn write(dir: &Path, name: &str, contents: &str) -> Result<PathBuf, std::io::Error> {
    let path = dir.join(name);
    fs::write(&path, contents)?;
    Ok(path)
}

#[tokio::test]
async fn service_imports_a_document_next_to_the_job() -> TestResult {
    init_tracing();

    let dir = tempdir()?;
    write(
        dir.path(),
        "lib.toml",
        r#"
[[function]]
name = "greet"
requires = ["helper"]

[function.body]
element = "sequence"

[[function.body.children]]
element = "call"
function = "'helper'"

[[function.body.children]]
element = "return"
value = "'hello ' + STAXResult"

[[function]]
name = "helper"
body = { element = "return", value = "'from helper'" }
"#,
    )?;
    let parent = write(
        dir.path(),
        "parent.toml",
        r#"
[[function]]
name = "main"

[function.body]
element = "sequence"

[[function.body.children]]
element = "import"
file = "'lib.toml'"

[[function.body.children]]
element = "call"
function = "'greet'"

[[function.body.children]]
element = "return"
value = "STAXResult"
"#,
    )?;

    let sink: Arc<dyn EventSink> = Arc::new(MemoryEventSink::new());
    let service = StaxService::with_parts(
        ServiceConfigBuilder::new().build(),
        sink,
        Arc::new(LocalBackendFactory),
    );
    let outcome = with_timeout(service.run_file(&parent, JobOptions::default())).await?;

    assert_eq!(outcome.status, JobStatus::Normal);
    assert_eq!(outcome.result, json!("hello from helper"));
    Ok(())
}
