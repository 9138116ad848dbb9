//! RPC and publish/subscribe dispatch engine over WebSocket.
//!
//! Clients call named methods with positional parameters and receive replies
//! carrying their correlation ID. Servers push events to channels that
//! clients subscribed to. Upload methods accept files in chunks.
//!
//! # Example
//!
//! ```rust,no_run
//! use mego_core::Status;
//! use mego_server::{Engine, EngineConfig, WsServer, handler, shutdown_signal};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut builder = Engine::builder(EngineConfig::default());
//!     builder.register(
//!         "Sum",
//!         [handler(|c| {
//!             Box::pin(async move {
//!                 match (c.param_i64(0), c.param_i64(1)) {
//!                     (Ok(a), Ok(b)) => c.respond(Status::Ok, a + b),
//!                     _ => c.respond_error(Status::Invalid, "expected two integers"),
//!                 }
//!             })
//!         })],
//!     );
//!
//!     let server = WsServer::bind(builder.build()).await?;
//!     server.run_until_shutdown(shutdown_signal()).await?;
//!     Ok(())
//! }
//! ```

mod config;
mod context;
mod engine;
mod error;
mod event;
mod heartbeat;
mod method;
mod session;
mod signals;
mod socket;
mod transport;
mod upload;

pub use config::{EngineConfig, Limits};
pub use context::{Context, ParamError};
pub use engine::{Engine, EngineBuilder, SubscribeHook};
pub use error::{ServerError, ServerResult};
pub use event::EventRegistry;
pub use heartbeat::spawn_liveness_sweep;
pub use method::{Handler, HandlerFuture, Method, MethodOptions, MethodRegistry, handler};
pub use session::{Session, SessionId, SessionRegistry};
pub use signals::shutdown_signal;
pub use socket::{WsServer, serve_connection};
pub use transport::{ChannelTransport, Outbound, Transport};
pub use upload::{BufferedProcessor, ChunkError, ChunkProcessor, ChunkWriter, File, UploadStep, Uploads};
