use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use stax::engine::{JobEvent, RemoteRequest, RequestId, RequestOutcome};
use stax::errors::Result;
use stax::exec::RemoteCallBackend;
use stax::service::BackendFactory;
use tokio::sync::mpsc;

type Responder = Arc<dyn Fn(&RemoteRequest) -> RequestOutcome + Send + Sync>;

/// A backend that:
/// - records every submitted request and every cancellation
/// - immediately replies with whatever the responder returns.
pub struct ScriptedBackend {
    job_tx: mpsc::Sender<JobEvent>,
    log: Arc<Mutex<RequestLog>>,
    responder: Responder,
}

#[derive(Debug, Default, Clone)]
pub struct RequestLog {
    pub submitted: Vec<RemoteRequest>,
    pub cancelled: Vec<RequestId>,
}

impl ScriptedBackend {
    pub fn new(
        job_tx: mpsc::Sender<JobEvent>,
        log: Arc<Mutex<RequestLog>>,
        responder: Responder,
    ) -> Self {
        Self {
            job_tx,
            log,
            responder,
        }
    }
}

impl RemoteCallBackend for ScriptedBackend {
    fn submit(
        &mut self,
        id: RequestId,
        request: RemoteRequest,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let tx = self.job_tx.clone();
        let outcome = (self.responder)(&request);
        self.log.lock().unwrap().submitted.push(request);

        Box::pin(async move {
            // The job may already be gone; that is not an error here.
            let _ = tx.send(JobEvent::RequestCompleted { id, outcome }).await;
            Ok(())
        })
    }

    fn cancel(&mut self, id: RequestId) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        self.log.lock().unwrap().cancelled.push(id);
        Box::pin(async { Ok(()) })
    }
}

/// Factory handing out [`ScriptedBackend`]s that share one request log.
#[derive(Clone)]
pub struct ScriptedBackendFactory {
    log: Arc<Mutex<RequestLog>>,
    responder: Responder,
}

impl ScriptedBackendFactory {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&RemoteRequest) -> RequestOutcome + Send + Sync + 'static,
    {
        Self {
            log: Arc::new(Mutex::new(RequestLog::default())),
            responder: Arc::new(responder),
        }
    }

    /// Reply `rc = 0` with the request text as result.
    pub fn echo() -> Self {
        Self::new(|request| RequestOutcome::Completed {
            rc: 0,
            result: request.request.clone(),
        })
    }

    pub fn log(&self) -> RequestLog {
        self.log.lock().unwrap().clone()
    }
}

impl BackendFactory for ScriptedBackendFactory {
    fn create(&self, job_tx: mpsc::Sender<JobEvent>) -> Box<dyn RemoteCallBackend> {
        Box::new(ScriptedBackend::new(
            job_tx,
            Arc::clone(&self.log),
            Arc::clone(&self.responder),
        ))
    }
}
