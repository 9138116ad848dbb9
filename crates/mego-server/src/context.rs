//! Per-request dispatch context.

use std::collections::HashMap;
use std::sync::Arc;

use mego_core::{Status, Value};
use mego_protocol::{Chunk, ProtocolError, Request, RequestId, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::warn;

use crate::config::Limits;
use crate::engine::Engine;
use crate::error::ServerResult;
use crate::method::{Handler, HandlerFuture, handler};
use crate::session::Session;
use crate::upload::{ChunkProcessor, File, UploadStep};

/// Failure to read one positional parameter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParamError {
    #[error("missing parameter at index {index}")]
    Missing { index: usize },

    #[error("invalid parameter at index {index}: {message}")]
    Decode { index: usize, message: String },
}

/// State handed to every handler of a chain.
///
/// Holds the request, the calling session, request-scoped values and the
/// chain cursor. Handlers move the cursor forward with [`Context::next`].
pub struct Context {
    engine: Engine,
    session: Arc<Session>,
    method: String,
    id: RequestId,
    params: Vec<Value>,
    chunk: Option<Chunk>,
    processor: Option<Arc<dyn ChunkProcessor>>,
    limits: Limits,
    file: Option<File>,
    values: HashMap<String, Value>,
    handlers: Arc<[Handler]>,
    index: usize,
}

impl Context {
    pub(crate) fn new(
        engine: Engine,
        session: Arc<Session>,
        request: Request,
        handlers: Arc<[Handler]>,
        processor: Option<Arc<dyn ChunkProcessor>>,
        limits: Limits,
    ) -> Self {
        Self {
            engine,
            session,
            method: request.method,
            id: request.id,
            params: request.params,
            chunk: request.chunk,
            processor,
            limits,
            file: None,
            values: HashMap::new(),
            handlers,
            index: 0,
        }
    }

    /// Runs the chain from its first handler.
    pub(crate) fn run(&mut self) -> HandlerFuture<'_> {
        self.index = 0;
        self.invoke()
    }

    /// Runs the next handler of the chain. A no-op once the chain is exhausted.
    pub fn next(&mut self) -> HandlerFuture<'_> {
        self.index += 1;
        self.invoke()
    }

    fn invoke(&mut self) -> HandlerFuture<'_> {
        match self.handlers.get(self.index).cloned() {
            Some(handler) => Box::pin(async move { handler(self).await }),
            None => Box::pin(std::future::ready(())),
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn method_name(&self) -> &str {
        &self.method
    }

    pub fn id(&self) -> &RequestId {
        &self.id
    }

    /// The assembled upload, once the final chunk was accepted.
    pub fn file(&self) -> Option<&File> {
        self.file.as_ref()
    }

    pub fn take_file(&mut self) -> Option<File> {
        self.file.take()
    }

    pub fn param_count(&self) -> usize {
        self.params.len()
    }

    /// Decodes the parameter at `index`.
    pub fn param<T: DeserializeOwned>(&self, index: usize) -> Result<T, ParamError> {
        let value = self
            .params
            .get(index)
            .ok_or(ParamError::Missing { index })?;
        T::deserialize(value).map_err(|e| ParamError::Decode {
            index,
            message: e.to_string(),
        })
    }

    pub fn param_i64(&self, index: usize) -> Result<i64, ParamError> {
        self.param(index)
    }

    pub fn param_f64(&self, index: usize) -> Result<f64, ParamError> {
        self.param(index)
    }

    pub fn param_str(&self, index: usize) -> Result<String, ParamError> {
        self.param(index)
    }

    pub fn param_bool(&self, index: usize) -> Result<bool, ParamError> {
        self.param(index)
    }

    /// Reads a request-scoped value set by an earlier handler.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Stores a request-scoped value for later handlers.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    /// Sends a reply with the request's correlation ID.
    ///
    /// Delivery failures are logged; use [`Context::try_respond`] to handle them.
    pub fn respond<T: Serialize>(&self, status: Status, result: T) {
        if let Err(e) = self.try_respond(status, result) {
            warn!(
                session_id = %self.session.id(),
                method = %self.method,
                error = %e,
                "Failed to send response"
            );
        }
    }

    pub fn try_respond<T: Serialize>(&self, status: Status, result: T) -> ServerResult<()> {
        let result = serde_json::to_value(result).map_err(ProtocolError::from)?;
        let response = Response::reply(self.id.clone(), status, result);
        self.engine.send_response(&self.session, &response)
    }

    /// Sends an error reply carrying a message.
    pub fn respond_error(&self, status: Status, message: impl Into<String>) {
        let response = Response::error(Some(self.id.clone()), status, message);
        if let Err(e) = self.engine.send_response(&self.session, &response) {
            warn!(
                session_id = %self.session.id(),
                method = %self.method,
                error = %e,
                "Failed to send response"
            );
        }
    }

    async fn receive_chunk(&mut self) {
        let Some(processor) = self.processor.clone() else {
            return self.next().await;
        };
        let Some(chunk) = self.chunk.take() else {
            return self.respond_error(Status::FileEmpty, "request carries no chunk");
        };

        let step = self
            .session
            .uploads()
            .accept(&self.method, processor.as_ref(), chunk, &self.limits);
        match step {
            UploadStep::Next { received } => self.respond(Status::FileNext, received),
            UploadStep::Retry(message) => self.respond_error(Status::FileRetry, message),
            UploadStep::Aborted(Some(message)) => self.respond_error(Status::FileAbort, message),
            UploadStep::Aborted(None) => self.respond(Status::FileAbort, Value::Null),
            UploadStep::Empty => self.respond_error(Status::FileEmpty, "empty chunk"),
            UploadStep::TooLarge => {
                self.respond_error(Status::FileTooLarge, "chunk exceeds the size limit")
            }
            UploadStep::Completed(file) => {
                self.file = Some(file);
                self.next().await;
            }
        }
    }
}

/// Built-in chain link of upload methods: feeds the chunk and only advances
/// once the file is complete.
pub(crate) fn upload_stage() -> Handler {
    handler(|c| Box::pin(c.receive_chunk()))
}
