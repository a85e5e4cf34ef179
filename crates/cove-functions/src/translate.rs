use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Deserialize;
use tracing::{error, warn};

use cove_types::api::{TranslateRequest, TranslateResponse};
use cove_types::models::{Language, TARGET_LANGUAGES, Translation};

use crate::FnState;

/// Client for the external translation API: one round trip per target
/// language, no retries beyond the HTTP client's own.
#[derive(Clone)]
pub struct Translator {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct TranslateApiResponse {
    translation: String,
}

impl Translator {
    pub fn new(endpoint: String, api_key: String) -> Self {
        Translator {
            http: reqwest::Client::new(),
            endpoint,
            api_key,
        }
    }

    pub async fn translate(
        &self,
        text: &str,
        source: &str,
        target: Language,
    ) -> anyhow::Result<String> {
        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "text": text,
                "source": source,
                "target": target.as_tag(),
            }))
            .send()
            .await?
            .error_for_status()?;
        let body: TranslateApiResponse = resp.json().await?;
        Ok(body.translation)
    }
}

/// Target languages for a sender; their own language is skipped.
fn targets_for(sender_language: &str) -> Vec<Language> {
    TARGET_LANGUAGES
        .into_iter()
        .filter(|lang| lang.as_tag() != sender_language)
        .collect()
}

/// POST /functions/translate — renders one message into every target
/// language and upserts the single translation row for it.
pub async fn translate(
    State(state): State<FnState>,
    Json(req): Json<TranslateRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let source = req.message_ref().map_err(|e| {
        warn!("bad translate request: {}", e);
        StatusCode::BAD_REQUEST
    })?;

    let sender = state
        .rows
        .fetch_user(req.sender_id)
        .await
        .map_err(|e| {
            error!("sender lookup failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::NOT_FOUND)?;

    let row = state
        .rows
        .fetch_message_row(source.table, source.id)
        .await
        .map_err(|e| {
            error!("source lookup failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::NOT_FOUND)?;

    let mut translation = Translation::new(source.table, source.id);
    let mut translated = Vec::new();
    for lang in targets_for(&sender.language) {
        match state.translator.translate(&row.content, &sender.language, lang).await {
            Ok(text) => {
                translation.set(lang, text);
                translated.push(lang);
            }
            Err(e) => {
                error!("translation to {} failed: {}", lang.as_tag(), e);
                return Err(StatusCode::INTERNAL_SERVER_ERROR);
            }
        }
    }

    state.rows.upsert_translation(&translation).await.map_err(|e| {
        error!("translation upsert failed: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(Json(TranslateResponse {
        source_id: source.id,
        translated,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_sender_language_is_skipped() {
        let targets = targets_for("ja");
        assert_eq!(targets.len(), TARGET_LANGUAGES.len() - 1);
        assert!(!targets.contains(&Language::Ja));
    }

    #[test]
    fn an_unsupported_sender_language_gets_every_target() {
        assert_eq!(targets_for("nl").len(), TARGET_LANGUAGES.len());
    }
}
