//! The dispatch engine.
//!
//! An [`Engine`] owns the session, event and method registries. Transports
//! report connects, frames and disconnects to it; handlers reach it through
//! their [`Context`] to emit events.

use std::fmt;
use std::sync::Arc;

use mego_core::{Status, Value, into_keys};
use mego_protocol::{
    Codec, INITIALIZE_METHOD, ProtocolError, Request, Response, SUBSCRIBE_METHOD,
    UNSUBSCRIBE_METHOD, check_size,
};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::context::Context;
use crate::error::{ServerError, ServerResult};
use crate::event::EventRegistry;
use crate::method::{Handler, Method, MethodOptions, MethodRegistry, handler};
use crate::session::{Session, SessionRegistry};
use crate::transport::Transport;
use crate::upload::{BufferedProcessor, ChunkProcessor};

/// Decides whether a session may join `(event, channel)`.
pub type SubscribeHook = Arc<dyn Fn(&str, &str, &Context) -> bool + Send + Sync>;

/// Collects methods, middleware and hooks before the engine starts.
pub struct EngineBuilder {
    config: EngineConfig,
    methods: MethodRegistry,
    middleware: Vec<Handler>,
    no_method: Vec<Handler>,
    subscribe_hook: Option<SubscribeHook>,
    events: Vec<String>,
}

impl EngineBuilder {
    fn new(config: EngineConfig) -> Self {
        Self {
            config,
            methods: MethodRegistry::new(),
            middleware: Vec::new(),
            no_method: Vec::new(),
            subscribe_hook: None,
            events: Vec::new(),
        }
    }

    /// Registers a method. A method with the same name is replaced.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        handlers: impl IntoIterator<Item = Handler>,
    ) -> &mut Method {
        self.methods.insert(Method::new(name, handlers))
    }

    /// Registers an upload method buffering chunks in memory.
    pub fn receive(
        &mut self,
        name: impl Into<String>,
        handlers: impl IntoIterator<Item = Handler>,
    ) -> &mut Method {
        self.receive_with(name, Arc::new(BufferedProcessor), handlers)
    }

    /// Registers an upload method with a custom chunk processor.
    pub fn receive_with(
        &mut self,
        name: impl Into<String>,
        processor: Arc<dyn ChunkProcessor>,
        handlers: impl IntoIterator<Item = Handler>,
    ) -> &mut Method {
        self.register(name, handlers).with_processor(processor)
    }

    /// Appends global middleware, run before every method's handlers.
    pub fn middleware(&mut self, handlers: impl IntoIterator<Item = Handler>) -> &mut Self {
        self.middleware.extend(handlers);
        self
    }

    /// Sets the chain run for unknown methods.
    pub fn no_method(&mut self, handlers: impl IntoIterator<Item = Handler>) -> &mut Self {
        self.no_method = handlers.into_iter().collect();
        self
    }

    /// Sets the subscription acceptance hook.
    pub fn on_subscribe<F>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(&str, &str, &Context) -> bool + Send + Sync + 'static,
    {
        self.subscribe_hook = Some(Arc::new(hook));
        self
    }

    /// Declares an event.
    pub fn event(&mut self, name: impl Into<String>) -> &mut Self {
        self.events.push(name.into());
        self
    }

    /// Freezes the registries and creates the engine.
    pub fn build(self) -> Engine {
        let Self {
            config,
            mut methods,
            middleware,
            no_method,
            subscribe_hook,
            events,
        } = self;

        methods.link(&middleware);
        let frame_limit = methods.max_request_size(config.max_size);

        let mut not_found = middleware;
        if no_method.is_empty() {
            not_found.push(method_not_found());
        } else {
            not_found.extend(no_method);
        }

        let (shutdown, _) = watch::channel(false);
        Engine {
            inner: Arc::new(EngineInner {
                sessions: SessionRegistry::new(config.max_sessions),
                events: EventRegistry::with_events(events),
                methods,
                not_found: not_found.into(),
                subscribe_hook,
                shutdown,
                frame_limit,
                config,
            }),
        }
    }
}

fn method_not_found() -> Handler {
    handler(|c| Box::pin(async move { c.respond_error(Status::NotFound, "method not found") }))
}

struct EngineInner {
    config: EngineConfig,
    sessions: SessionRegistry,
    events: EventRegistry,
    methods: MethodRegistry,
    not_found: Arc<[Handler]>,
    subscribe_hook: Option<SubscribeHook>,
    shutdown: watch::Sender<bool>,
    frame_limit: usize,
}

/// Shared handle to a running engine.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.inner.config)
            .field("methods", &self.inner.methods.names())
            .finish_non_exhaustive()
    }
}

impl Engine {
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn codec(&self) -> Codec {
        self.inner.config.codec
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.inner.sessions
    }

    pub fn events(&self) -> &EventRegistry {
        &self.inner.events
    }

    pub fn methods(&self) -> &MethodRegistry {
        &self.inner.methods
    }

    /// Largest frame any method accepts. Bigger frames are refused before
    /// decoding.
    pub fn frame_limit(&self) -> usize {
        self.inner.frame_limit
    }

    /// Allocates a session for a new connection.
    pub async fn connect(&self, transport: Arc<dyn Transport>) -> ServerResult<Arc<Session>> {
        let session = self.inner.sessions.register(transport).await?;
        info!(session_id = %session.id(), "Client connected");
        Ok(session)
    }

    /// Forgets a session: registry entry, subscriptions and uploads.
    ///
    /// Safe to call more than once; subscriptions are purged every time.
    pub async fn disconnect(&self, session_id: &str) {
        let session = self.inner.sessions.remove(session_id).await;
        if let Some(session) = &session {
            session.mark_disconnected();
        }
        self.inner.events.remove_session(session_id).await;

        let Some(session) = session else {
            return;
        };
        session.uploads().clear();
        session.close();
        info!(session_id, "Client disconnected");
    }

    /// Looks up a live session.
    pub async fn session(&self, session_id: &str) -> ServerResult<Arc<Session>> {
        self.inner
            .sessions
            .lookup(session_id)
            .await
            .ok_or_else(|| ServerError::session_not_found(session_id))
    }

    /// Number of live sessions.
    pub async fn len(&self) -> usize {
        self.inner.sessions.len().await
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.sessions.is_empty().await
    }

    /// Decodes one inbound frame and dispatches it.
    #[tracing::instrument(skip_all, fields(session_id = %session_id, size = frame.len()))]
    pub async fn handle_frame(&self, transport: &dyn Transport, session_id: &str, frame: &[u8]) {
        if let Err(e) = check_size(frame.len(), self.frame_limit()) {
            debug!(error = %e, "Frame rejected before decoding");
            return self.reject_frame(transport, "request too large");
        }

        let request: Request = match self.codec().decode(frame) {
            Ok(request) => request,
            Err(e) => {
                debug!(error = %e, "Undecodable frame");
                return self.reject_frame(transport, e.to_string());
            }
        };

        let Some(session) = self.inner.sessions.lookup(session_id).await else {
            debug!(method = %request.method, "Frame for unknown session dropped");
            return;
        };

        if request.method == INITIALIZE_METHOD {
            return self.initialize(&session, request);
        }
        if request.method == SUBSCRIBE_METHOD {
            return self.subscribe_request(session, request).await;
        }
        if request.method == UNSUBSCRIBE_METHOD {
            return self.unsubscribe_request(session, request).await;
        }

        let (handlers, processor, options) = match self.inner.methods.resolve(&request.method) {
            Some(method) => (method.chain(), method.processor(), *method.options()),
            None => {
                debug!(method = %request.method, "Method not found");
                (Arc::clone(&self.inner.not_found), None, MethodOptions::default())
            }
        };

        let limits = self.inner.config.limits_for(&options);
        if let Err(e) = check_size(frame.len(), limits.max_size) {
            debug!(method = %request.method, error = %e, "Request rejected");
            let response = Response::error(Some(request.id), Status::Invalid, "request too large");
            self.reply(&session, &response);
            return;
        }

        debug!(method = %request.method, id = %request.id, "Dispatching request");
        let mut ctx = Context::new(self.clone(), session, request, handlers, processor, limits);
        ctx.run().await;
    }

    fn reject_frame(&self, transport: &dyn Transport, message: impl Into<String>) {
        let response = Response::error(None, Status::Invalid, message);
        if let Err(e) = self.write(transport, &response) {
            warn!(error = %e, "Failed to report invalid frame");
        }
    }

    fn initialize(&self, session: &Session, request: Request) {
        match request.params.into_iter().next().and_then(into_keys) {
            Some(keys) => {
                debug!(session_id = %session.id(), keys = keys.len(), "Session initialized");
                session.merge(keys);
            }
            None => debug!(session_id = %session.id(), "Initialization without a key map ignored"),
        }
    }

    async fn subscribe_request(&self, session: Arc<Session>, request: Request) {
        let ctx = self.reserved_context(session, request);
        let (event, channel) = match Self::event_params(&ctx) {
            Some(pair) => pair,
            None => return ctx.respond_error(Status::Invalid, "expected [event, channel]"),
        };

        if let Some(hook) = &self.inner.subscribe_hook
            && !hook(&event, &channel, &ctx)
        {
            debug!(
                event = %event,
                channel = %channel,
                session_id = %ctx.session().id(),
                "Subscription rejected"
            );
            return;
        }

        self.inner.events.subscribe(&event, &channel, ctx.session()).await;
        ctx.respond(Status::Ok, Value::Null);
    }

    async fn unsubscribe_request(&self, session: Arc<Session>, request: Request) {
        let ctx = self.reserved_context(session, request);
        let (event, channel) = match Self::event_params(&ctx) {
            Some(pair) => pair,
            None => return ctx.respond_error(Status::Invalid, "expected [event, channel]"),
        };

        self.inner
            .events
            .unsubscribe(&event, &channel, ctx.session().id().as_str())
            .await;
        ctx.respond(Status::Ok, Value::Null);
    }

    fn reserved_context(&self, session: Arc<Session>, request: Request) -> Context {
        let limits = self.inner.config.limits_for(&MethodOptions::default());
        let handlers = Arc::<[Handler]>::from(Vec::new());
        Context::new(self.clone(), session, request, handlers, None, limits)
    }

    fn event_params(ctx: &Context) -> Option<(String, String)> {
        let event = ctx.param_str(0).ok()?;
        let channel = match ctx.param_count() {
            0 | 1 => String::new(),
            _ => ctx.param_str(1).ok()?,
        };
        Some((event, channel))
    }

    /// Declares an event. Returns false if it already existed.
    pub async fn declare_event(&self, name: &str) -> bool {
        self.inner.events.declare(name).await
    }

    /// Subscribes a session to a channel, bypassing the acceptance hook.
    pub async fn subscribe(&self, event: &str, channel: &str, session: &Arc<Session>) -> bool {
        self.inner.events.subscribe(event, channel, session).await
    }

    pub async fn unsubscribe(&self, event: &str, channel: &str, session_id: &str) -> bool {
        self.inner.events.unsubscribe(event, channel, session_id).await
    }

    /// Sends an event to one channel, or to every channel when `channel` is
    /// empty.
    ///
    /// Returns how many sessions received it. Failed deliveries are logged
    /// and left out of the count.
    pub async fn emit<T: Serialize>(
        &self,
        event: &str,
        channel: &str,
        payload: T,
    ) -> ServerResult<usize> {
        let recipients = self.inner.events.recipients(event, channel).await?;
        let frame = self.event_frame(event, payload)?;
        Ok(self.deliver(event, &frame, recipients))
    }

    /// Sends an event to the given sessions.
    pub fn emit_multiple<T: Serialize>(
        &self,
        event: &str,
        payload: T,
        sessions: &[Arc<Session>],
    ) -> ServerResult<usize> {
        let frame = self.event_frame(event, payload)?;
        Ok(self.deliver(event, &frame, sessions.iter().cloned()))
    }

    /// Sends an event to every live session accepted by `filter`.
    pub async fn emit_filter<T, F>(&self, event: &str, payload: T, filter: F) -> ServerResult<usize>
    where
        T: Serialize,
        F: Fn(&Session) -> bool,
    {
        let frame = self.event_frame(event, payload)?;
        let recipients = self
            .inner
            .sessions
            .snapshot()
            .await
            .into_iter()
            .filter(|s| filter(s.as_ref()));
        Ok(self.deliver(event, &frame, recipients))
    }

    fn event_frame<T: Serialize>(&self, event: &str, payload: T) -> ServerResult<Vec<u8>> {
        let result = serde_json::to_value(payload).map_err(ProtocolError::from)?;
        Ok(self.codec().encode(&Response::event(event, result))?)
    }

    fn deliver(
        &self,
        event: &str,
        frame: &[u8],
        sessions: impl IntoIterator<Item = Arc<Session>>,
    ) -> usize {
        let mut delivered = 0;
        for session in sessions {
            match session.send(frame.to_vec()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(event, session_id = %session.id(), error = %e, "Event delivery failed");
                }
            }
        }
        debug!(event, delivered, "Event emitted");
        delivered
    }

    /// Encodes a response and queues it on the session's connection.
    pub fn send_response(&self, session: &Session, response: &Response) -> ServerResult<()> {
        let frame = self.codec().encode(response)?;
        session.send(frame)
    }

    fn reply(&self, session: &Session, response: &Response) {
        if let Err(e) = self.send_response(session, response) {
            warn!(session_id = %session.id(), error = %e, "Failed to send response");
        }
    }

    fn write(&self, transport: &dyn Transport, response: &Response) -> ServerResult<()> {
        let frame = self.codec().encode(response)?;
        transport.send(frame)
    }

    /// Disconnects every session whose transport has closed.
    ///
    /// Returns the number of sessions removed.
    pub async fn sweep(&self) -> usize {
        let mut removed = 0;
        for session in self.inner.sessions.snapshot().await {
            if session.is_closed() {
                self.disconnect(session.id().as_str()).await;
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, "Liveness sweep removed closed sessions");
        }
        removed
    }

    /// Receiver flipped to `true` when the engine closes.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.inner.shutdown.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        *self.inner.shutdown.borrow()
    }

    /// Stops the server loops and terminates every connection.
    pub async fn close(&self) {
        self.inner.shutdown.send_replace(true);
        self.inner.sessions.close_all().await;
        self.inner.events.clear().await;
        info!("Engine closed");
    }
}
