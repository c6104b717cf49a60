//! Export service binary.

use std::sync::Arc;

use maktaba::config::env_vars::{
    CATALOG_DB_PATH, EXPORT_SCRIPT, EXPORT_WORKERS, MILVUS_COLLECTION, MILVUS_PARTITION,
    MILVUS_TOKEN, MILVUS_URI, POSTGRES_URL, S3_ACCESS_KEY, S3_BUCKET, S3_ENDPOINT, S3_SECRET_KEY,
};
use maktaba::config::{env_parse, env_required, env_string};
use maktaba::Result;
use maktaba_catalog::CatalogStore;
use maktaba_embeddings::embedder_from_env;
use maktaba_export::{Exporter, JobManager, DEFAULT_EXPORT_WORKERS};
use maktaba_html::RawHtmlAcquirer;
use maktaba_milvus::{MilvusConfig, MilvusStore};
use maktaba_postgres::LibraryStore;
use maktaba_s3::{ObjectStore, S3Config};
use maktaba_server::{build_router, AppState};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    info!("Starting export service");

    let catalog = CatalogStore::open(
        env_string(CATALOG_DB_PATH).unwrap_or_else(|| "shamela_metadata.db".into()),
    )?;

    let objects = ObjectStore::connect(&S3Config {
        endpoint: env_required(S3_ENDPOINT)?,
        access_key: env_required(S3_ACCESS_KEY)?,
        secret_key: env_required(S3_SECRET_KEY)?,
        bucket: env_string(S3_BUCKET).unwrap_or_else(|| "islamic-library".into()),
    })?;

    let library = LibraryStore::connect(&env_required(POSTGRES_URL)?).await?;

    let vectors = MilvusStore::connect(MilvusConfig {
        uri: env_required(MILVUS_URI)?,
        token: env_string(MILVUS_TOKEN),
        collection: env_string(MILVUS_COLLECTION).unwrap_or_else(|| "islamic_library".into()),
        schema_path: None,
        index_params_path: None,
    })?;
    vectors.ensure_collection().await?;

    let partition = env_string(MILVUS_PARTITION).unwrap_or_else(|| "_default".into());
    let acquirer = RawHtmlAcquirer::new(
        env_string(EXPORT_SCRIPT).unwrap_or_else(|| "export_books.sh".into()),
    );

    let exporter = Arc::new(Exporter::new(
        acquirer,
        objects.clone(),
        library.clone(),
        vectors.clone(),
        Arc::new(embedder_from_env()?),
        partition,
    ));

    let workers = env_parse(EXPORT_WORKERS, DEFAULT_EXPORT_WORKERS)?;
    let jobs = JobManager::new(exporter.clone(), workers);

    let state = Arc::new(AppState {
        catalog,
        objects,
        library,
        vectors,
        jobs,
        exporter,
    });

    let port: u16 = env_parse("PORT", 4000)?;
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .map_err(|e| maktaba::Error::config(format!("cannot bind port {port}: {e}")))?;
    info!(port, workers, "Export service listening");

    axum::serve(listener, build_router(state))
        .await
        .map_err(|e| maktaba::Error::other(format!("server error: {e}")))
}
