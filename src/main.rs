//! upserve server binary.
//!
//! Serves one directory over HTTP: browsable listings, file downloads and
//! multipart uploads into the served tree. The main entry point parses the
//! configuration, builds the Axum router and runs the HTTP listener until a
//! shutdown signal arrives.

mod atomic;
mod background;
mod config;
mod error;
mod files;
mod frontend;
mod http;
mod logging;
mod memstats;
mod naming;
mod observer;
mod routes;
mod storage;
mod upload;

#[cfg(test)]
mod test_support;

use axum::extract::connect_info::ConnectInfo;
use axum::http::Request;
use axum_server::Handle;
use clap::Parser;
use shadow_rs::shadow;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, debug, info, info_span, trace};

use crate::background::spawn_background_tasks;
use crate::config::{Args, ServerConfig};
use crate::http::{build_cors_layer, resolve_client_ip};
use crate::observer::{Observer, TracingObserver};
use crate::storage::Storage;

shadow!(build);

/// Starts the server and blocks until shutdown.
#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    let args = Args::parse();
    logging::init_logging(args.dev);
    trace!(argv = ?std::env::args().collect::<Vec<_>>(), "starting");

    let config = ServerConfig::from_args(args)?;
    if config.dev_mode {
        debug!(?config, "effective configuration");
    }

    let storage = Arc::new(Storage::new(config.serving_root.clone()));
    let upload_config = Arc::new(config.upload_config());
    let observer: Arc<dyn Observer> = Arc::new(TracingObserver);

    let mut app = routes::build_router(storage.clone(), upload_config.clone(), observer.clone())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    let connect_ip = request
                        .extensions()
                        .get::<ConnectInfo<SocketAddr>>()
                        .map(|ConnectInfo(addr)| addr.ip());
                    let client_ip = resolve_client_ip(request.headers(), connect_ip)
                        .map(|ip| ip.to_string())
                        .unwrap_or_else(|| "unknown".to_string());

                    info_span!(
                        env!("CARGO_CRATE_NAME"),
                        client_ip,
                        method = ?request.method(),
                        path = ?request.uri().path(),
                    )
                })
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
        );

    if let Some(cors_layer) = build_cors_layer(config.cors_origins.as_deref()) {
        app = app.layer(cors_layer);
    }

    let host = config
        .host
        .parse::<IpAddr>()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err.to_string()))?;
    let addr = SocketAddr::new(host, config.port);
    let handle = Handle::new();

    info!(
        root = %config.serving_root.display(),
        keep_upload_filename = config.keep_original_name,
        "serving directory at http://{}",
        addr
    );

    let server = axum_server::bind(addr)
        .handle(handle.clone())
        .serve(app.into_make_service_with_connect_info::<SocketAddr>());

    spawn_background_tasks(storage, upload_config, observer, config.watch_mem);
    tokio::spawn(shutdown_signal(handle));
    server.await
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received termination signal shutting down");
    handle.graceful_shutdown(Some(Duration::from_secs(10)));
}
