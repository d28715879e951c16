// src/exec/executor_loop.rs

//! Executor loop that tracks in-flight remote requests.

use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::engine::{JobEvent, RemoteRequest, RequestId};
use crate::exec::task_runner::run_request;

/// Messages accepted by the executor loop.
#[derive(Debug)]
pub enum ServiceCall {
    Submit { id: RequestId, request: RemoteRequest },
    Cancel { id: RequestId },
}

/// Internal handle for a request currently being served.
///
/// - `cancel` stops the request; no completion is sent for it.
/// - `handle` is the Tokio task serving it.
struct ActiveRequest {
    cancel: Option<oneshot::Sender<()>>,
    handle: tokio::task::JoinHandle<()>,
}

/// Spawn the background executor loop.
///
/// The returned sender is what [`super::LocalServiceBackend`] forwards calls
/// to. Each request is served in its own Tokio task; the loop ends when the
/// sender is dropped, aborting whatever is still running.
pub fn spawn_executor(job_tx: mpsc::Sender<JobEvent>) -> mpsc::Sender<ServiceCall> {
    let (tx, mut rx) = mpsc::channel::<ServiceCall>(32);

    tokio::spawn(async move {
        info!("remote-call executor started");

        let mut active: HashMap<RequestId, ActiveRequest> = HashMap::new();

        while let Some(call) = rx.recv().await {
            active.retain(|_, a| !a.handle.is_finished());

            match call {
                ServiceCall::Submit { id, request } => {
                    let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
                    let reply = job_tx.clone();
                    let handle = tokio::spawn(async move {
                        run_request(id, request, reply, cancel_rx).await;
                        debug!(request = id, "request runner finished");
                    });
                    active.insert(
                        id,
                        ActiveRequest {
                            cancel: Some(cancel_tx),
                            handle,
                        },
                    );
                }
                ServiceCall::Cancel { id } => cancel_request(id, &mut active),
            }
        }

        for (_, request) in active.drain() {
            request.handle.abort();
        }
        info!("remote-call executor finished (channel closed)");
    });

    tx
}

fn cancel_request(id: RequestId, active: &mut HashMap<RequestId, ActiveRequest>) {
    let Some(mut request) = active.remove(&id) else {
        debug!(request = id, "cancel for a request that is not running");
        return;
    };
    if let Some(cancel) = request.cancel.take() {
        if cancel.send(()).is_err() {
            debug!(request = id, "request finished before it could be cancelled");
        }
    }
}
