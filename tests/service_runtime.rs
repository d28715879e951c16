use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use stax::definition::ActionNode;
use stax::engine::{
    ControlError, JobEvent, JobId, JobOptions, JobStatus, RequestOutcome, SubJobLauncher,
    SubJobOutcome, SubJobRequest,
};
use stax::events::{EventKind, EventSink, MemoryEventSink};
use stax::service::{LocalBackendFactory, StaxService};
use stax_test_utils::builders::{
    ServiceConfigBuilder, block, delay, ret, sequence, single_function_job,
};
use stax_test_utils::scripted_backend::ScriptedBackendFactory;
use stax_test_utils::{init_tracing, with_timeout};
use tempfile::tempdir;
use tokio::sync::mpsc;

type TestResult = Result<(), Box<dyn Error>>;

fn local_service(sink: &Arc<MemoryEventSink>) -> StaxService {
    let sink: Arc<dyn EventSink> = sink.clone();
    StaxService::with_parts(
        ServiceConfigBuilder::new().build(),
        sink,
        Arc::new(LocalBackendFactory),
    )
}

fn echo_command(text: &str) -> ActionNode {
    ActionNode::new("stafcmd")
        .attr("location", "'local'")
        .attr("service", "'ECHO'")
        .attr("request", format!("'ECHO {text}'"))
}

async fn wait_for_block(service: &StaxService, job: JobId, name: &str) -> Result<(), ControlError> {
    loop {
        let blocks = service.list_blocks(job).await?;
        if blocks.iter().any(|b| b.name == name) {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn local_echo_service_sets_staf_result() -> TestResult {
    init_tracing();

    let sink = Arc::new(MemoryEventSink::new());
    let service = local_service(&sink);
    let definition = single_function_job(sequence([echo_command("hello"), ret("[RC, STAFResult]")]));

    let outcome = with_timeout(service.submit(definition, JobOptions::default()).wait()).await?;

    assert_eq!(outcome.status, JobStatus::Normal);
    assert_eq!(outcome.result, json!([0, "hello"]));
    let jobs = sink.of_kind(EventKind::Job);
    assert!(jobs.iter().any(|e| e.status == "begin"));
    assert!(jobs.iter().any(|e| e.status == "end"));
    Ok(())
}

#[tokio::test]
async fn scripted_backend_sees_every_request() -> TestResult {
    init_tracing();

    let backends = ScriptedBackendFactory::new(|request| RequestOutcome::Completed {
        rc: 5,
        result: format!("{}:{}", request.service, request.request),
    });
    let service = StaxService::with_parts(
        ServiceConfigBuilder::new().build(),
        Arc::new(MemoryEventSink::new()),
        Arc::new(backends.clone()),
    );
    let definition =
        single_function_job(sequence([echo_command("one"), ret("[RC, STAFResult]")]));

    let outcome = with_timeout(service.submit(definition, JobOptions::default()).wait()).await?;

    assert_eq!(outcome.result, json!([5, "ECHO:ECHO one"]));
    let log = backends.log();
    assert_eq!(log.submitted.len(), 1);
    assert_eq!(log.submitted[0].location, "local");
    assert!(log.cancelled.is_empty());
    Ok(())
}

#[tokio::test]
async fn run_file_loads_and_caches_the_definition() -> TestResult {
    init_tracing();

    let dir = tempdir()?;
    let path = dir.path().join("hello.toml");
    fs::write(
        &path,
        "[[function]]\nname = \"main\"\nbody = { element = \"return\", value = \"'v1'\" }\n",
    )?;

    let sink = Arc::new(MemoryEventSink::new());
    let service = local_service(&sink);

    let first = with_timeout(service.run_file(&path, JobOptions::default())).await?;
    assert_eq!(first.name, "hello");
    assert_eq!(first.result, json!("v1"));

    // Cached until invalidated.
    fs::write(
        &path,
        "[[function]]\nname = \"main\"\nbody = { element = \"return\", value = \"'v2'\" }\n",
    )?;
    let cached = with_timeout(service.run_file(&path, JobOptions::default())).await?;
    assert_eq!(cached.result, json!("v1"));

    service.invalidate_definition(&path);
    let reloaded = with_timeout(service.run_file(&path, JobOptions::default())).await?;
    assert_eq!(reloaded.result, json!("v2"));
    Ok(())
}

fn write_parent(dir: &Path, child: &Path, returns: &str) -> Result<PathBuf, std::io::Error> {
    let parent = dir.join("parent.toml");
    let contents = format!(
        r#"
[[function]]
name = "main"

[function.body]
element = "sequence"

[[function.body.children]]
element = "job"
file = "'{}'"
args = "'x'"

[[function.body.children]]
element = "return"
value = "{}"
"#,
        child.display(),
        returns
    );
    fs::write(&parent, contents)?;
    Ok(parent)
}

#[tokio::test]
async fn sub_job_result_flows_back_to_the_parent() -> TestResult {
    init_tracing();

    let dir = tempdir()?;
    let child = dir.path().join("child.toml");
    fs::write(
        &child,
        "[[function]]\nname = \"main\"\nbody = { element = \"return\", value = \"'child got ' + STAXArg\" }\n",
    )?;
    let parent = write_parent(dir.path(), &child, "[RC, STAXSubJobStatus, STAXSubJobResult]")?;

    let sink = Arc::new(MemoryEventSink::new());
    let service = local_service(&sink);
    let outcome = with_timeout(service.run_file(&parent, JobOptions::default())).await?;

    assert_eq!(outcome.status, JobStatus::Normal);
    assert_eq!(outcome.result, json!([0, "Normal", "child got x"]));
    let sub_jobs = sink.of_kind(EventKind::SubJob);
    assert!(sub_jobs.iter().any(|e| e.status == "start"));
    assert!(sub_jobs.iter().any(|e| e.status == "end"));
    Ok(())
}

#[tokio::test]
async fn missing_sub_job_file_raises_start_error() -> TestResult {
    init_tracing();

    let dir = tempdir()?;
    let parent = write_parent(dir.path(), &dir.path().join("absent.toml"), "RC")?;

    let sink = Arc::new(MemoryEventSink::new());
    let service = local_service(&sink);
    let outcome = with_timeout(service.run_file(&parent, JobOptions::default())).await?;

    // The start error continues by default.
    let signals: Vec<String> = sink
        .of_kind(EventKind::Signal)
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert_eq!(signals, vec!["STAXSubJobStartError"]);
    assert_eq!(outcome.status, JobStatus::Normal);
    assert_eq!(outcome.result, json!(-1));
    Ok(())
}

fn absent_sub_job(dir: &Path) -> SubJobRequest {
    SubJobRequest {
        file: dir.join("absent.toml"),
        name: None,
        function: None,
        args: None,
    }
}

#[tokio::test]
async fn launcher_reports_a_sub_job_that_cannot_load() -> TestResult {
    init_tracing();

    let dir = tempdir()?;
    let sink = Arc::new(MemoryEventSink::new());
    let service = local_service(&sink);
    let (tx, mut rx) = mpsc::channel(4);

    service.launch(7, 42, absent_sub_job(dir.path()), tx);

    match with_timeout(rx.recv()).await {
        Some(JobEvent::SubJobCompleted {
            id,
            outcome: SubJobOutcome::StartFailed(reason),
        }) => {
            assert_eq!(id, 42);
            assert!(reason.starts_with("IO error"), "reason: {reason}");
        }
        other => panic!("expected a start failure, got {other:?}"),
    }
    assert!(sink.of_kind(EventKind::SubJob).is_empty());
    Ok(())
}

#[tokio::test]
async fn launcher_tolerates_a_parent_that_already_ended() -> TestResult {
    init_tracing();

    let dir = tempdir()?;
    let sink = Arc::new(MemoryEventSink::new());
    let service = local_service(&sink);
    let (tx, rx) = mpsc::channel(4);
    drop(rx);

    service.launch(7, 42, absent_sub_job(dir.path()), tx);
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The service keeps working after the dropped reply.
    assert!(sink.of_kind(EventKind::SubJob).is_empty());
    let outcome = with_timeout(
        service
            .submit(single_function_job(ret("'still here'")), JobOptions::default())
            .wait(),
    )
    .await?;
    assert_eq!(outcome.result, json!("still here"));
    Ok(())
}

#[tokio::test]
async fn blocks_can_be_controlled_through_the_service() -> TestResult {
    init_tracing();

    let sink = Arc::new(MemoryEventSink::new());
    let service = local_service(&sink);
    let definition = single_function_job(sequence([
        block("work", delay(60_000)),
        ret("STAXBlockRC"),
    ]));

    let submitted = service.submit(definition, JobOptions::default());
    let job = submitted.id();
    with_timeout(wait_for_block(&service, job, "main.work")).await?;

    service.hold_block(job, "main.work", 0).await?;
    assert_eq!(
        service.hold_block(job, "main.work", 0).await,
        Err(ControlError::BlockAlreadyHeld("main.work".to_string()))
    );
    service.release_block(job, "main.work").await?;
    service.terminate_block(job, "main.work").await?;

    let outcome = with_timeout(submitted.wait()).await?;
    assert_eq!(outcome.status, JobStatus::Normal);
    assert_eq!(outcome.result, json!(2));

    // The job is forgotten once it ends.
    assert_eq!(
        service.list_blocks(job).await,
        Err(ControlError::JobNotFound(job))
    );
    Ok(())
}

#[tokio::test]
async fn terminate_job_through_the_service() -> TestResult {
    init_tracing();

    let sink = Arc::new(MemoryEventSink::new());
    let service = local_service(&sink);
    let definition = single_function_job(block("work", delay(60_000)));

    let submitted = service.submit(definition, JobOptions::default());
    let job = submitted.id();
    with_timeout(wait_for_block(&service, job, "main.work")).await?;

    service.terminate_job(job).await?;
    let outcome = with_timeout(submitted.wait()).await?;

    assert!(matches!(outcome.status, JobStatus::Terminated { .. }));
    Ok(())
}

#[tokio::test]
async fn unknown_job_is_reported() -> TestResult {
    init_tracing();

    let sink = Arc::new(MemoryEventSink::new());
    let service = local_service(&sink);

    assert_eq!(
        service.terminate_job(999).await,
        Err(ControlError::JobNotFound(999))
    );
    Ok(())
}
