use uuid::Uuid;

use crate::feed::ChangeFeed;
use crate::rows::Rows;
use crate::storage::Storage;
use crate::BackendError;

/// Connection settings and identity for one signed-in session.
///
/// The token comes from the platform auth service and is treated as opaque;
/// sign-in and sign-up flows are not this client's concern. One HTTP client
/// is shared by the row and storage APIs.
#[derive(Clone)]
pub struct Session {
    rows: Rows,
    storage: Storage,
    feed_url: String,
    token: String,
    user_id: Uuid,
}

impl Session {
    pub fn new(
        data_url: String,
        storage_url: String,
        feed_url: String,
        token: String,
        user_id: Uuid,
    ) -> Self {
        let http = reqwest::Client::new();
        Session {
            rows: Rows::with_client(http.clone(), data_url, token.clone()),
            storage: Storage::with_client(http, storage_url, token.clone()),
            feed_url,
            token,
            user_id,
        }
    }

    pub fn rows(&self) -> &Rows {
        &self.rows
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub async fn connect_feed(&self) -> Result<ChangeFeed, BackendError> {
        ChangeFeed::connect(&self.feed_url, &self.token).await
    }
}
