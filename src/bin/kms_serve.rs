// Copyright (c) 2026 Amunchain
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Thin HTTP exposure of the orchestrator (systemd-friendly entrypoint).
//!
//! This binary is glue, not core: it decodes one JSON RPC envelope per
//! `POST /rpc`, hands it to [`kms_core::core::orchestrator::Orchestrator`],
//! and re-encodes the envelope it returns. The cross-origin transport this
//! would sit behind in production (parent PWA <-> embedded context) is out
//! of scope per spec.md §1 and is not modeled here.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use prometheus::{Encoder, TextEncoder};
use tracing::{info, warn};

use kms_core::config::KmsConfig;
use kms_core::core::orchestrator::{Orchestrator, RpcEnvelopeRequest, RpcEnvelopeResponse};
use kms_core::core::persistence::sled_store::SledStore;
use kms_core::core::persistence::Store;
use kms_core::monitoring::metrics::Metrics;

fn env(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis() as u64
}

#[derive(Clone)]
struct AppState {
    orchestrator: Arc<Orchestrator>,
    metrics: Metrics,
}

async fn rpc_handler(State(state): State<AppState>, Json(request): Json<RpcEnvelopeRequest>) -> Json<RpcEnvelopeResponse> {
    let response = state.orchestrator.handle(request, now_ms()).await;
    Json(response)
}

async fn health_handler() -> impl IntoResponse {
    StatusCode::OK
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    let families = state.metrics.registry.gather();
    let mut buf = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(e) = encoder.encode(&families, &mut buf) {
        warn!(?e, "failed to encode metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, String::new());
    }
    (StatusCode::OK, String::from_utf8_lossy(&buf).into_owned())
}

fn data_dir_from_env() -> String {
    env("KMS_DATA_DIR", "./data")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt().with_target(false).with_level(true).compact().try_init();

    let data_dir = data_dir_from_env();
    let config_path = env("KMS_CONFIG_PATH", "./kms.toml");
    let config = if Path::new(&config_path).exists() {
        match KmsConfig::load(&config_path) {
            Ok(c) => c,
            Err(e) => {
                warn!(?e, path = %config_path, "failed to load config file, using defaults");
                KmsConfig::default()
            }
        }
    } else {
        KmsConfig::default()
    };

    let store: Arc<dyn Store> = Arc::new(SledStore::open(&data_dir).with_context(|| format!("opening KMS store at {data_dir}"))?);

    let metrics = Metrics::new().map_err(|_| anyhow::anyhow!("metrics registration failed"))?;
    let orchestrator = Arc::new(Orchestrator::new(store, config, metrics.clone()));
    let state = AppState { orchestrator, metrics };

    let port: u16 = env("KMS_PORT", "8787").parse().unwrap_or(8787);
    let app = Router::new()
        .route("/rpc", post(rpc_handler))
        .route("/healthz", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state);

    let listen_addr = format!("0.0.0.0:{port}");
    info!(%listen_addr, data_dir = %data_dir, "kms core starting");

    let listener = tokio::net::TcpListener::bind(&listen_addr)
        .await
        .with_context(|| format!("binding {listen_addr}"))?;
    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
