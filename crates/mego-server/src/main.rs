//! mego demo server.
//!
//! Serves a few sample methods:
//! - `Sum [a, b]` adds two integers
//! - `Echo [value]` replies with its parameter
//! - `Send [channel, text]` emits a `chat` event to a channel
//! - `Upload` receives a file in chunks and replies with its size

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;
use tracing::{Level, debug, info};

use mego_core::{Status, TracingConfig, TracingOutputFormat, Value, init_tracing};
use mego_protocol::Codec;
use mego_server::{
    Engine, EngineConfig, Handler, ServerResult, WsServer, handler, shutdown_signal,
};

#[derive(Debug, Parser)]
#[command(name = "mego", version, about = "RPC and pub/sub server over WebSocket")]
struct Cli {
    /// Path to a TOML config file.
    #[arg(short, long, env = "MEGO_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, overriding the config file.
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// Use MessagePack instead of JSON.
    #[arg(long)]
    msgpack: bool,

    /// Enable debug logging.
    #[arg(short, long)]
    debug: bool,

    /// Log as JSON lines.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut tracing_config = if cli.debug {
        TracingConfig::debug()
    } else {
        TracingConfig::server().with_level(Level::INFO)
    };
    if cli.json {
        tracing_config = tracing_config.with_format(TracingOutputFormat::Json);
    }
    if let Err(e) = init_tracing(tracing_config) {
        eprintln!("error: {e}");
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> ServerResult<()> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::load_from(path)?,
        None => EngineConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.bind_addr = bind;
    }
    if cli.msgpack {
        config.codec = Codec::Msgpack;
    }

    let server = WsServer::bind(build_engine(config)).await?;
    server.run_until_shutdown(shutdown_signal()).await
}

fn build_engine(config: EngineConfig) -> Engine {
    let mut builder = Engine::builder(config);
    builder
        .middleware([timing()])
        .event("chat")
        .on_subscribe(|event, _channel, _ctx| event == "chat");

    builder.register("Sum", [sum()]);
    builder.register(
        "Echo",
        [handler(|c| {
            Box::pin(async move {
                let value = c.param::<Value>(0).unwrap_or_default();
                c.respond(Status::Ok, value);
            })
        })],
    );
    builder.register("Send", [send()]);
    builder.receive(
        "Upload",
        [handler(|c| {
            Box::pin(async move {
                if let Some(file) = c.take_file() {
                    info!(size = file.len(), "File received");
                    c.respond(Status::Ok, file.len());
                }
            })
        })],
    );

    builder.build()
}

fn timing() -> Handler {
    handler(|c| {
        Box::pin(async move {
            let started = Instant::now();
            c.next().await;
            debug!(
                method = %c.method_name(),
                elapsed_us = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX),
                "Request handled"
            );
        })
    })
}

fn sum() -> Handler {
    handler(|c| {
        Box::pin(async move {
            match (c.param_i64(0), c.param_i64(1)) {
                (Ok(a), Ok(b)) => c.respond(Status::Ok, a + b),
                (Err(e), _) | (_, Err(e)) => c.respond_error(Status::Invalid, e.to_string()),
            }
        })
    })
}

fn send() -> Handler {
    handler(|c| {
        Box::pin(async move {
            let (channel, text) = match (c.param_str(0), c.param_str(1)) {
                (Ok(channel), Ok(text)) => (channel, text),
                (Err(e), _) | (_, Err(e)) => {
                    return c.respond_error(Status::Invalid, e.to_string());
                }
            };
            let from = c.session().get_str("name").unwrap_or_else(|| "anonymous".into());
            let payload = serde_json::json!({ "from": from, "text": text });

            match c.engine().emit("chat", &channel, payload).await {
                Ok(delivered) => c.respond(Status::Ok, delivered),
                Err(e) => c.respond_error(Status::NotFound, e.to_string()),
            }
        })
    })
}
