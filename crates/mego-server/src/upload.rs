//! Chunked file uploads.
//!
//! An upload method carries a [`ChunkProcessor`]. The first chunk of an upload
//! opens a [`ChunkWriter`] for the (session, method) pair; later chunks are fed
//! to it until the client sends the final chunk or aborts.

use std::collections::HashMap;

use mego_protocol::Chunk;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

use crate::config::Limits;

/// Failure reported by a chunk processor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChunkError {
    /// The chunk was not stored; the client should resend it.
    #[error("chunk rejected: {0}")]
    Retry(String),
    /// The upload cannot continue.
    #[error("upload aborted: {0}")]
    Abort(String),
}

/// Receives the chunks of one upload.
pub trait ChunkWriter: Send {
    /// Stores one chunk.
    fn write(&mut self, data: &[u8]) -> Result<(), ChunkError>;

    /// Finalizes the upload.
    fn finish(self: Box<Self>) -> Result<File, ChunkError>;

    /// Discards whatever was stored so far.
    fn abort(self: Box<Self>) {}
}

/// Opens a [`ChunkWriter`] for every new upload of a method.
pub trait ChunkProcessor: Send + Sync {
    fn open(&self, method: &str) -> Result<Box<dyn ChunkWriter>, ChunkError>;
}

/// A completed upload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct File {
    data: Vec<u8>,
}

impl File {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self { data: data.into() }
    }

    /// Size in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

/// Default processor: keeps every chunk in memory.
#[derive(Debug, Clone, Copy, Default)]
pub struct BufferedProcessor;

impl ChunkProcessor for BufferedProcessor {
    fn open(&self, _method: &str) -> Result<Box<dyn ChunkWriter>, ChunkError> {
        Ok(Box::new(BufferedWriter::default()))
    }
}

#[derive(Debug, Default)]
struct BufferedWriter {
    buffer: Vec<u8>,
}

impl ChunkWriter for BufferedWriter {
    fn write(&mut self, data: &[u8]) -> Result<(), ChunkError> {
        self.buffer.extend_from_slice(data);
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<File, ChunkError> {
        Ok(File::new(self.buffer))
    }
}

/// Outcome of feeding one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadStep {
    /// Chunk stored; send the next one.
    Next { received: usize },
    /// Chunk not stored; resend it.
    Retry(String),
    /// Upload discarded.
    Aborted(Option<String>),
    /// Zero-length chunk.
    Empty,
    /// Chunk or running total over the limit.
    TooLarge,
    /// Final chunk accepted and the file assembled.
    Completed(File),
}

struct Upload {
    received: usize,
    writer: Box<dyn ChunkWriter>,
}

/// In-flight uploads of one session, keyed by method name.
#[derive(Default)]
pub struct Uploads {
    inner: Mutex<HashMap<String, Upload>>,
}

impl Uploads {
    /// Applies the chunk rules to one incoming chunk.
    ///
    /// The processor and writer run without the upload map locked, so they
    /// may call back into this session's uploads.
    pub fn accept(
        &self,
        method: &str,
        processor: &dyn ChunkProcessor,
        chunk: Chunk,
        limits: &Limits,
    ) -> UploadStep {
        if chunk.abort {
            if let Some(upload) = self.take(method) {
                upload.writer.abort();
            }
            debug!(method, "Upload aborted by client");
            return UploadStep::Aborted(None);
        }
        if chunk.is_empty() {
            return UploadStep::Empty;
        }

        let received = self.received(method).unwrap_or(0);
        if chunk.len() > limits.max_chunk_size || received + chunk.len() > limits.max_file_size {
            debug!(
                method,
                chunk = chunk.len(),
                received,
                "Chunk over the size limit"
            );
            return UploadStep::TooLarge;
        }

        let mut upload = match self.take(method) {
            Some(upload) => upload,
            None => match processor.open(method) {
                Ok(writer) => Upload {
                    received: 0,
                    writer,
                },
                Err(ChunkError::Retry(message)) => return UploadStep::Retry(message),
                Err(ChunkError::Abort(message)) => return UploadStep::Aborted(Some(message)),
            },
        };

        match upload.writer.write(&chunk.data) {
            Ok(()) => upload.received += chunk.len(),
            Err(ChunkError::Retry(message)) => {
                self.restore(method, upload);
                return UploadStep::Retry(message);
            }
            Err(ChunkError::Abort(message)) => {
                upload.writer.abort();
                return UploadStep::Aborted(Some(message));
            }
        }

        if !chunk.last {
            let received = upload.received;
            self.restore(method, upload);
            return UploadStep::Next { received };
        }

        match upload.writer.finish() {
            Ok(file) => {
                debug!(method, size = file.len(), "Upload completed");
                UploadStep::Completed(file)
            }
            Err(e) => UploadStep::Aborted(Some(e.to_string())),
        }
    }

    fn take(&self, method: &str) -> Option<Upload> {
        self.inner.lock().remove(method)
    }

    fn restore(&self, method: &str, upload: Upload) {
        self.inner.lock().insert(method.to_string(), upload);
    }

    /// Bytes accepted so far for a method's upload.
    pub fn received(&self, method: &str) -> Option<usize> {
        self.inner.lock().get(method).map(|u| u.received)
    }

    /// Discards one upload.
    pub fn discard(&self, method: &str) -> bool {
        match self.inner.lock().remove(method) {
            Some(upload) => {
                upload.writer.abort();
                true
            }
            None => false,
        }
    }

    /// Discards every upload.
    pub fn clear(&self) {
        let drained: Vec<_> = self.inner.lock().drain().collect();
        for (_, upload) in drained {
            upload.writer.abort();
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}
