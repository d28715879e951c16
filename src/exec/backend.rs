// src/exec/backend.rs

//! Pluggable remote-call backend abstraction.
//!
//! The job runner talks to a `RemoteCallBackend` instead of a raw mpsc
//! sender, so tests can swap in a scripted backend while production uses
//! [`LocalServiceBackend`].

use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;

use crate::engine::{JobEvent, RemoteRequest, RequestId};
use crate::errors::{Result, StaxError};

use super::executor_loop::{ServiceCall, spawn_executor};

/// Trait abstracting how remote requests are carried out.
///
/// Implementations deliver the completion of every submitted request that
/// was not cancelled as `JobEvent::RequestCompleted` on the job's event
/// channel they were created with.
pub trait RemoteCallBackend: Send {
    fn submit(
        &mut self,
        id: RequestId,
        request: RemoteRequest,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Stop a pending request. No completion is delivered for it afterwards.
    fn cancel(&mut self, id: RequestId) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

impl RemoteCallBackend for Box<dyn RemoteCallBackend> {
    fn submit(
        &mut self,
        id: RequestId,
        request: RemoteRequest,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        (**self).submit(id, request)
    }

    fn cancel(&mut self, id: RequestId) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        (**self).cancel(id)
    }
}

/// Backend serving the built-in `local` services.
///
/// Wraps the loop started by [`spawn_executor`] and forwards calls to it
/// over an mpsc channel.
pub struct LocalServiceBackend {
    tx: mpsc::Sender<ServiceCall>,
}

impl LocalServiceBackend {
    /// Create a backend reporting to `job_tx`. This spawns the executor
    /// loop immediately.
    pub fn new(job_tx: mpsc::Sender<JobEvent>) -> Self {
        let tx = spawn_executor(job_tx);
        Self { tx }
    }
}

impl RemoteCallBackend for LocalServiceBackend {
    fn submit(
        &mut self,
        id: RequestId,
        request: RemoteRequest,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        // Clone the sender so the future doesn't borrow `self` across `await`.
        let tx = self.tx.clone();

        Box::pin(async move {
            tx.send(ServiceCall::Submit { id, request })
                .await
                .map_err(|_| StaxError::ChannelClosed("remote-call executor".to_string()))
        })
    }

    fn cancel(&mut self, id: RequestId) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let tx = self.tx.clone();

        Box::pin(async move {
            tx.send(ServiceCall::Cancel { id })
                .await
                .map_err(|_| StaxError::ChannelClosed("remote-call executor".to_string()))
        })
    }
}
