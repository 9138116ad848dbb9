//! Methods and handler chains.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use mego_protocol::is_reserved;
use tracing::warn;

use crate::context::{Context, upload_stage};
use crate::upload::ChunkProcessor;

/// Future returned by a handler.
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// One link of a handler chain.
///
/// A handler either responds and/or calls [`Context::next`], or stops the
/// chain by returning without advancing.
pub type Handler = Arc<dyn for<'a> Fn(&'a mut Context) -> HandlerFuture<'a> + Send + Sync>;

/// Wraps a closure as a [`Handler`].
///
/// ```rust
/// use mego_core::Status;
/// use mego_server::handler;
///
/// let sum = handler(|c| {
///     Box::pin(async move {
///         match (c.param_i64(0), c.param_i64(1)) {
///             (Ok(a), Ok(b)) => c.respond(Status::Ok, a + b),
///             _ => c.respond_error(Status::Invalid, "expected two integers"),
///         }
///     })
/// });
/// # drop(sum);
/// ```
pub fn handler<F>(f: F) -> Handler
where
    F: for<'a> Fn(&'a mut Context) -> HandlerFuture<'a> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Per-method overrides of the engine limits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MethodOptions {
    pub max_size: Option<usize>,
    pub max_chunk_size: Option<usize>,
    pub max_file_size: Option<usize>,
}

impl MethodOptions {
    pub fn max_size(mut self, max: usize) -> Self {
        self.max_size = Some(max);
        self
    }

    pub fn max_chunk_size(mut self, max: usize) -> Self {
        self.max_chunk_size = Some(max);
        self
    }

    pub fn max_file_size(mut self, max: usize) -> Self {
        self.max_file_size = Some(max);
        self
    }
}

/// A named method: its handlers, limits and, for uploads, a chunk processor.
pub struct Method {
    name: String,
    handlers: Vec<Handler>,
    processor: Option<Arc<dyn ChunkProcessor>>,
    options: MethodOptions,
    chain: Arc<[Handler]>,
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Method")
            .field("name", &self.name)
            .field("handlers", &self.handlers.len())
            .field("uploads", &self.processor.is_some())
            .field("options", &self.options)
            .finish()
    }
}

impl Method {
    pub fn new(name: impl Into<String>, handlers: impl IntoIterator<Item = Handler>) -> Self {
        Self {
            name: name.into(),
            handlers: handlers.into_iter().collect(),
            processor: None,
            options: MethodOptions::default(),
            chain: Arc::from(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &MethodOptions {
        &self.options
    }

    /// Replaces the limit overrides.
    pub fn with_options(&mut self, options: MethodOptions) -> &mut Self {
        self.options = options;
        self
    }

    /// Turns the method into an upload method.
    pub fn with_processor(&mut self, processor: Arc<dyn ChunkProcessor>) -> &mut Self {
        self.processor = Some(processor);
        self
    }

    /// True if the method accepts chunked uploads.
    pub fn accepts_uploads(&self) -> bool {
        self.processor.is_some()
    }

    pub(crate) fn processor(&self) -> Option<Arc<dyn ChunkProcessor>> {
        self.processor.clone()
    }

    /// The full chain run for this method, middleware included.
    pub(crate) fn chain(&self) -> Arc<[Handler]> {
        Arc::clone(&self.chain)
    }

    fn link(&mut self, middleware: &[Handler]) {
        let mut chain = middleware.to_vec();
        if self.processor.is_some() {
            chain.push(upload_stage());
        }
        chain.extend(self.handlers.iter().cloned());
        self.chain = chain.into();
    }
}

/// Methods keyed by name.
#[derive(Debug, Default)]
pub struct MethodRegistry {
    methods: HashMap<String, Method>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a method, replacing any method with the same name.
    pub fn insert(&mut self, method: Method) -> &mut Method {
        match self.methods.entry(method.name.clone()) {
            Entry::Occupied(mut entry) => {
                warn!(method = %method.name, "Method registered twice, replacing");
                entry.insert(method);
                entry.into_mut()
            }
            Entry::Vacant(entry) => entry.insert(method),
        }
    }

    pub fn resolve(&self, name: &str) -> Option<&Method> {
        self.methods.get(name)
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Sorted method names.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.methods.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Largest request any method accepts when `default` applies to
    /// methods without their own limit.
    pub fn max_request_size(&self, default: usize) -> usize {
        self.methods
            .values()
            .filter_map(|m| m.options.max_size)
            .fold(default, usize::max)
    }

    /// Precomputes every chain with the global middleware in front.
    ///
    /// Methods named after a reserved method are dropped: the engine answers
    /// those names itself.
    pub(crate) fn link(&mut self, middleware: &[Handler]) {
        self.methods.retain(|name, _| {
            if is_reserved(name) {
                warn!(method = %name, "Reserved method name, registration ignored");
                return false;
            }
            true
        });
        for method in self.methods.values_mut() {
            method.link(middleware);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::BufferedProcessor;

    fn noop() -> Handler {
        handler(|_| Box::pin(async {}))
    }

    #[test]
    fn options_builder() {
        let options = MethodOptions::default().max_size(10).max_file_size(100);
        assert_eq!(options.max_size, Some(10));
        assert_eq!(options.max_chunk_size, None);
        assert_eq!(options.max_file_size, Some(100));
    }

    #[test]
    fn reregistration_replaces() {
        let mut registry = MethodRegistry::new();
        registry.insert(Method::new("Sum", [noop()]));
        registry.insert(Method::new("Sum", [noop(), noop()]));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.resolve("Sum").unwrap().handlers.len(), 2);
    }

    #[test]
    fn chain_puts_middleware_first() {
        let mut registry = MethodRegistry::new();
        registry.insert(Method::new("Sum", [noop()]));
        registry
            .insert(Method::new("Upload", [noop()]))
            .with_processor(Arc::new(BufferedProcessor));
        registry.link(&[noop(), noop()]);

        assert_eq!(registry.resolve("Sum").unwrap().chain().len(), 3);
        let upload = registry.resolve("Upload").unwrap();
        assert!(upload.accepts_uploads());
        assert_eq!(upload.chain().len(), 4);
    }

    #[test]
    fn reserved_names_are_dropped_when_linked() {
        let mut registry = MethodRegistry::new();
        registry.insert(Method::new("MegoSubscribe", [noop()]));
        registry.insert(Method::new("MegoInitialize", [noop()]));
        registry.insert(Method::new("Sum", [noop()]));
        registry.link(&[]);

        assert_eq!(registry.names(), ["Sum"]);
    }

    #[test]
    fn max_request_size_covers_overrides() {
        let mut registry = MethodRegistry::new();
        registry.insert(Method::new("Sum", [noop()]));
        assert_eq!(registry.max_request_size(64), 64);

        registry
            .insert(Method::new("Big", [noop()]))
            .with_options(MethodOptions::default().max_size(4096));
        registry
            .insert(Method::new("Small", [noop()]))
            .with_options(MethodOptions::default().max_size(16));
        assert_eq!(registry.max_request_size(64), 4096);
    }

    #[test]
    fn names_are_sorted() {
        let mut registry = MethodRegistry::new();
        registry.insert(Method::new("Echo", []));
        registry.insert(Method::new("Add", []));
        assert_eq!(registry.names(), ["Add", "Echo"]);
        assert!(registry.resolve("Ghost").is_none());
    }
}
