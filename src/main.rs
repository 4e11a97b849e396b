mod error;
mod handlers;
mod models;
mod sink;

use std::{env, net::SocketAddr, sync::Arc};

use axum::{
    http::{header, HeaderValue},
    routing::post,
    Extension, Router,
};
use dotenv::dotenv;
use tokio::fs;
use tower_http::{set_header::SetResponseHeaderLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::sink::FileSink;

const DEFAULT_PORT: u16 = 8030;
const DEFAULT_UPLOAD_DIR: &str = "./uploads";

pub fn app(sink: Arc<FileSink>) -> Router {
    Router::new()
        .route(
            "/upload",
            post(handlers::post_upload).options(handlers::preflight),
        )
        // the demo uploader runs cross-origin, so every response carries this
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        ))
        .layer(TraceLayer::new_for_http())
        .layer(Extension(sink))
}

async fn run(app: Router, addr: SocketAddr) {
    // runs the webserver
    let server = axum::Server::bind(&addr)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c()
                .await
                .expect("Failed to await for SIGINT")
        });

    info!(addr = %addr, "server initialized");
    server.await.expect("Failed to start server");
}

#[tokio::main]
async fn main() {
    drop(dotenv());

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let upload_dir =
        env::var("UPLOAD_DIR").unwrap_or_else(|_| DEFAULT_UPLOAD_DIR.to_string());
    fs::create_dir_all(&upload_dir)
        .await
        .expect("Failed to create the upload directory");

    let port = env::var("PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(DEFAULT_PORT);

    info!(upload_dir = %upload_dir, "storing uploads");

    let sink = Arc::new(FileSink::new(upload_dir));
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    run(app(sink), addr).await;
}
