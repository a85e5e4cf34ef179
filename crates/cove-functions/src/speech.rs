use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use bytes::Bytes;
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use cove_backend::{Rows, Storage};
use cove_types::models::{Attachment, AttachmentLink, AudioStatus, MessageRow, MessageTable};

/// Bucket holding text-to-speech renditions.
pub const SPEECH_BUCKET: &str = "voice";

/// Rows picked up per table per tick.
const BATCH_LIMIT: u32 = 16;

/// Client for the external speech API. Audio comes back base64-encoded.
#[derive(Clone)]
pub struct SpeechClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct SpeechApiResponse {
    audio_content: String,
    #[serde(default)]
    duration_secs: Option<f64>,
}

pub struct SpeechAudio {
    pub bytes: Bytes,
    pub duration_secs: Option<f64>,
}

impl SpeechClient {
    pub fn new(endpoint: String, api_key: String) -> Self {
        SpeechClient {
            http: reqwest::Client::new(),
            endpoint,
            api_key,
        }
    }

    pub async fn synthesize(&self, text: &str) -> anyhow::Result<SpeechAudio> {
        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({ "text": text, "format": "mp3" }))
            .send()
            .await?
            .error_for_status()?;
        let body: SpeechApiResponse = resp.json().await?;
        let bytes = B64.decode(body.audio_content.as_bytes())?;
        Ok(SpeechAudio {
            bytes: Bytes::from(bytes),
            duration_secs: body.duration_secs,
        })
    }
}

/// Background batch job: each tick polls for message rows without an audio
/// rendition, renders them, uploads the audio, links it, and records the
/// outcome. Stateless between ticks.
pub async fn run_speech_loop(
    rows: Rows,
    storage: Storage,
    client: SpeechClient,
    interval_secs: u64,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
    loop {
        interval.tick().await;

        match process_batch(&rows, &storage, &client).await {
            Ok(count) => {
                if count > 0 {
                    info!("speech: rendered {} messages", count);
                }
            }
            Err(e) => {
                warn!("speech batch error: {}", e);
            }
        }
    }
}

async fn process_batch(
    rows: &Rows,
    storage: &Storage,
    client: &SpeechClient,
) -> anyhow::Result<usize> {
    let mut rendered = 0;
    for table in MessageTable::ALL {
        let pending = rows.pending_speech(table, BATCH_LIMIT).await?;
        for row in pending {
            rows.set_audio_status(table, row.id, AudioStatus::Processing).await?;

            match render_one(rows, storage, client, table, &row).await {
                Ok(()) => {
                    rows.set_audio_status(table, row.id, AudioStatus::Completed).await?;
                    rendered += 1;
                }
                Err(e) => {
                    warn!("speech for {} {} failed: {}", table.as_str(), row.id, e);
                    rows.set_audio_status(table, row.id, AudioStatus::Failed).await?;
                }
            }
        }
    }
    Ok(rendered)
}

async fn render_one(
    rows: &Rows,
    storage: &Storage,
    client: &SpeechClient,
    table: MessageTable,
    row: &MessageRow,
) -> anyhow::Result<()> {
    let audio = client.synthesize(&row.content).await?;

    let path = format!("{}/{}.mp3", table.as_str(), row.id);
    storage
        .upload(SPEECH_BUCKET, &path, audio.bytes.clone(), "audio/mpeg")
        .await?;

    let attachment = Attachment {
        id: Uuid::new_v4(),
        name: format!("{}.mp3", row.id),
        size: audio.bytes.len() as u64,
        mime_type: "audio/mpeg".into(),
        bucket: SPEECH_BUCKET.into(),
        path,
        duration_secs: audio.duration_secs,
    };
    rows.insert_attachment(&attachment).await?;
    rows.insert_attachment_link(&AttachmentLink {
        attachment_id: attachment.id,
        message_table: table,
        message_id: row.id,
    })
    .await?;

    Ok(())
}
