//! Gateway service binary.

use std::sync::Arc;

use maktaba::config::env_vars::{GEMINI_API_KEY, MILVUS_COLLECTION, MILVUS_TOKEN, MILVUS_URI};
use maktaba::config::{env_parse, env_required, env_string};
use maktaba::Result;
use maktaba_embeddings::embedder_from_env;
use maktaba_gateway::ask::AskClient;
use maktaba_gateway::gemini::GeminiClient;
use maktaba_gateway::rewriter::QueryRewriter;
use maktaba_gateway::{build_router, AppState};
use maktaba_milvus::{MilvusConfig, MilvusStore};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    info!("Starting gateway service");

    let gemini_api_key = env_required(GEMINI_API_KEY)?;
    let rewrite_model =
        env_string("GEMINI_OPTIMIZE_MODEL").unwrap_or_else(|| "gemini-2.5-flash-lite".into());
    let ask_model = env_string("GEMINI_ASK_MODEL").unwrap_or_else(|| "gemini-2.5-flash".into());

    let vectors = MilvusStore::connect(MilvusConfig {
        uri: env_required(MILVUS_URI)?,
        token: env_string(MILVUS_TOKEN),
        collection: env_string(MILVUS_COLLECTION).unwrap_or_else(|| "islamic_library".into()),
        schema_path: None,
        index_params_path: None,
    })?;

    // The valid partition set comes from the store itself; a cold store
    // leaves only the default partition until /ready goes green.
    let partitions = match vectors.list_partitions().await {
        Ok(partitions) if !partitions.is_empty() => partitions,
        Ok(_) => vec!["_default".to_string()],
        Err(err) => {
            warn!(error = %err, "Could not list partitions at startup, defaulting");
            vec!["_default".to_string()]
        }
    };
    info!(?partitions, "Partition set loaded");

    let state = Arc::new(AppState {
        rewriter: QueryRewriter::new(GeminiClient::new(gemini_api_key.as_str(), rewrite_model)),
        ask: AskClient::new(GeminiClient::new(gemini_api_key.as_str(), ask_model)),
        embedder: embedder_from_env()?,
        vectors,
        partitions,
    });

    let port: u16 = env_parse("PORT", 8000)?;
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .map_err(|e| maktaba::Error::config(format!("cannot bind port {port}: {e}")))?;
    info!(port, "Gateway listening");

    axum::serve(listener, build_router(state))
        .await
        .map_err(|e| maktaba::Error::other(format!("server error: {e}")))
}
