mod speech;
mod translate;

use std::net::SocketAddr;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use cove_backend::{Rows, Storage};

use crate::speech::SpeechClient;
use crate::translate::Translator;

#[derive(Clone)]
pub(crate) struct FnState {
    pub rows: Rows,
    pub translator: Translator,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cove=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let data_url = std::env::var("COVE_DATA_URL")
        .unwrap_or_else(|_| "http://127.0.0.1:54321/rest/v1".into());
    let storage_url = std::env::var("COVE_STORAGE_URL")
        .unwrap_or_else(|_| "http://127.0.0.1:54321/storage/v1".into());
    let service_token =
        std::env::var("COVE_SERVICE_TOKEN").unwrap_or_else(|_| "dev-token-change-me".into());
    let translate_url = std::env::var("COVE_TRANSLATE_API_URL")
        .unwrap_or_else(|_| "https://translate.invalid/v1/translate".into());
    let translate_key = std::env::var("COVE_TRANSLATE_API_KEY").unwrap_or_default();
    let speech_url = std::env::var("COVE_SPEECH_API_URL")
        .unwrap_or_else(|_| "https://speech.invalid/v1/synthesize".into());
    let speech_key = std::env::var("COVE_SPEECH_API_KEY").unwrap_or_default();
    let host = std::env::var("COVE_FNS_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("COVE_FNS_PORT")
        .unwrap_or_else(|_| "3400".into())
        .parse()?;
    let speech_interval: u64 = std::env::var("COVE_SPEECH_INTERVAL_SECS")
        .unwrap_or_else(|_| "60".into())
        .parse()?;

    let rows = Rows::new(data_url, service_token.clone());
    let storage = Storage::new(storage_url, service_token);

    // The speech batch job runs beside the HTTP listener.
    let speech_client = SpeechClient::new(speech_url, speech_key);
    tokio::spawn(speech::run_speech_loop(
        rows.clone(),
        storage,
        speech_client,
        speech_interval,
    ));

    let state = FnState {
        rows,
        translator: Translator::new(translate_url, translate_key),
    };

    let app = Router::new()
        .route("/functions/translate", post(translate::translate))
        .route("/health", get(|| async { "ok" }))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Cove functions listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
