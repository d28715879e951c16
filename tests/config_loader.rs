use std::error::Error;
use std::fs;
use std::path::Path;

use stax::config::{load_and_validate, load_job, parse_document};
use stax::definition::{ActionNode, JobDefinition};
use stax::errors::StaxError;
use stax::types::FunctionScope;
use stax_test_utils::builders::JobDocumentBuilder;
use stax_test_utils::init_tracing;
use tempfile::tempdir;

type TestResult = Result<(), Box<dyn Error>>;

const JOB_TOML: &str = r#"
[job]
name = "nightly"
function = "main"
args = "{'count': 3}"
max_threads = 8

[[script]]
code = "retries = 2"

[[signalhandler]]
signal = "'STAXEmptyList'"
body = { element = "nop" }

[[function]]
name = "main"
scope = "local"
line = 4

[function.body]
element = "loop"
var = "i"
from = 1
to = 5

[[function.body.children]]
element = "script"
text = "total = total + i"

[[function]]
name = "helper"

[[function.arg]]
name = "level"
default = "'info'"

[[function.arg]]
name = "target"

[function.body]
element = "message"
text = "target"
"#;

fn build(doc_toml: &str) -> Result<JobDefinition, StaxError> {
    let path = Path::new("job.toml");
    let doc = parse_document(doc_toml, path)?;
    JobDefinition::from_document(&doc, path, "local")
}

fn assert_definition_error(result: Result<JobDefinition, StaxError>, element: &str, fragment: &str) {
    match result {
        Err(StaxError::DefinitionError {
            element: e,
            message,
            ..
        }) => {
            assert_eq!(e, element);
            assert!(
                message.contains(fragment),
                "message {message:?} does not mention {fragment:?}"
            );
        }
        other => panic!("expected a definition error for <{element}>, got {other:?}"),
    }
}

#[test]
fn missing_config_section_uses_defaults() -> TestResult {
    init_tracing();

    let dir = tempdir()?;
    let path = dir.path().join("Stax.toml");
    fs::write(&path, "")?;

    let config = load_and_validate(&path)?;
    assert_eq!(config.config.max_stax_threads, 0);
    assert_eq!(config.config.max_nonblocking_actions, 100);
    assert_eq!(config.config.document_cache_size, 20);
    assert!(!config.config.log_tc_start_stop);
    assert!(!config.config.breakpoints);
    Ok(())
}

#[test]
fn config_values_override_defaults() -> TestResult {
    init_tracing();

    let dir = tempdir()?;
    let path = dir.path().join("Stax.toml");
    fs::write(
        &path,
        "[config]\nmax_stax_threads = 16\nmax_nonblocking_actions = 5\nbreakpoints = true\n",
    )?;

    let config = load_and_validate(&path)?;
    assert_eq!(config.config.max_stax_threads, 16);
    assert_eq!(config.config.max_nonblocking_actions, 5);
    assert_eq!(config.config.document_cache_size, 20);
    assert!(config.config.breakpoints);
    Ok(())
}

#[test]
fn zero_step_budget_or_cache_size_is_rejected() -> TestResult {
    init_tracing();

    let dir = tempdir()?;
    for body in [
        "[config]\nmax_nonblocking_actions = 0\n",
        "[config]\ndocument_cache_size = 0\n",
    ] {
        let path = dir.path().join("Stax.toml");
        fs::write(&path, body)?;
        assert!(matches!(
            load_and_validate(&path),
            Err(StaxError::ConfigError(_))
        ));
    }
    Ok(())
}

#[test]
fn malformed_config_reports_toml_error() -> TestResult {
    init_tracing();

    let dir = tempdir()?;
    let path = dir.path().join("Stax.toml");
    fs::write(&path, "[config\nmax_stax_threads = 1")?;

    assert!(matches!(load_and_validate(&path), Err(StaxError::TomlError(_))));
    Ok(())
}

#[test]
fn toml_document_builds_full_definition() -> TestResult {
    init_tracing();

    let definition = build(JOB_TOML)?;

    assert_eq!(definition.name, "nightly");
    assert_eq!(definition.start_function, "main");
    assert_eq!(definition.start_args.as_deref(), Some("{'count': 3}"));
    assert_eq!(definition.max_threads, Some(8));
    // Signal handlers first, then scripts.
    assert_eq!(definition.defaults.len(), 2);

    let main = &definition.functions["main"];
    assert_eq!(main.scope, FunctionScope::Local);
    assert_eq!(main.location.line, 4);

    let helper = &definition.functions["helper"];
    assert_eq!(helper.scope, FunctionScope::Global);
    let args: Vec<(&str, bool)> = helper
        .args
        .iter()
        .map(|a| (a.name.as_str(), a.required))
        .collect();
    assert_eq!(args, vec![("level", false), ("target", true)]);
    Ok(())
}

#[test]
fn json_documents_are_detected_by_extension() -> TestResult {
    init_tracing();

    let dir = tempdir()?;
    let path = dir.path().join("hello.json");
    fs::write(
        &path,
        r#"{
            "function": [
                {"name": "greet", "body": {"element": "message", "text": "'hi'"}}
            ]
        }"#,
    )?;

    let definition = load_job(&path, "local")?;
    // Name falls back to the file stem, start function to the first one.
    assert_eq!(definition.name, "hello");
    assert_eq!(definition.start_function, "greet");
    assert_eq!(definition.machine, "local");
    Ok(())
}

#[test]
fn document_without_functions_is_rejected() -> TestResult {
    init_tracing();

    let result = build("[job]\nname = \"empty\"\n");
    assert!(matches!(result, Err(StaxError::ConfigError(m)) if m.contains("at least one")));
    Ok(())
}

#[test]
fn duplicate_function_names_are_rejected() -> TestResult {
    init_tracing();

    let doc = r#"
[[function]]
name = "main"
body = { element = "nop" }

[[function]]
name = "main"
body = { element = "nop" }
"#;
    assert_definition_error(build(doc), "function", "duplicate function name");
    Ok(())
}

#[test]
fn unknown_start_function_is_rejected() -> TestResult {
    init_tracing();

    let doc = r#"
[job]
function = "missing"

[[function]]
name = "main"
body = { element = "nop" }
"#;
    assert!(matches!(build(doc), Err(StaxError::ConfigError(m)) if m.contains("missing")));
    Ok(())
}

#[test]
fn duplicate_argument_names_are_rejected() -> TestResult {
    init_tracing();

    let doc = r#"
[[function]]
name = "main"
body = { element = "nop" }
arg = [{ name = "a" }, { name = "a" }]
"#;
    assert_definition_error(build(doc), "function", "twice");
    Ok(())
}

#[test]
fn structural_element_errors_are_reported_at_load_time() -> TestResult {
    init_tracing();

    let cases = [
        (ActionNode::new("frobnicate"), "frobnicate", "unknown element"),
        (
            ActionNode::new("iterate").attr("in", "[1]").child(ActionNode::new("nop")),
            "iterate",
            "missing required attribute \"var\"",
        ),
        (
            ActionNode::new("timer").attr("duration", "'1s'"),
            "timer",
            "found none",
        ),
        (
            ActionNode::new("block")
                .attr("name", "'b'")
                .child(ActionNode::new("nop"))
                .child(ActionNode::new("nop")),
            "block",
            "found 2",
        ),
        (ActionNode::new("message"), "message", "\"text\""),
    ];

    for (body, element, fragment) in cases {
        let document = JobDocumentBuilder::new().simple_function("main", body).build();
        let result = JobDefinition::from_document(&document, Path::new("bad.toml"), "local");
        assert_definition_error(result, element, fragment);
    }
    Ok(())
}

#[test]
fn missing_job_file_is_an_io_error() -> TestResult {
    init_tracing();

    let dir = tempdir()?;
    let result = load_job(dir.path().join("absent.toml"), "local");
    assert!(matches!(result, Err(StaxError::IoError(_))));
    Ok(())
}
