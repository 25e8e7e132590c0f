use async_trait::async_trait;

use super::{User, UserDirectory};

pub struct HttpUserDirectory {
    client: reqwest::Client,
    base_url: String,
}

impl HttpUserDirectory {
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }
}

#[async_trait]
impl UserDirectory for HttpUserDirectory {
    async fn list_users(&self) -> anyhow::Result<Vec<User>> {
        let response = self
            .client
            .get(format!("{}/users", self.base_url))
            .send()
            .await?
            .error_for_status()?;

        Ok(response.json().await?)
    }
}
