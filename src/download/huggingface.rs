//! Hugging Face Hub snapshot download.

use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{ModelSource, fetch_to_file, safe_join};
use crate::config::secrets::{ExposeSecret, SecretString};
use crate::error::Result;

pub const HF_ENDPOINT: &str = "https://huggingface.co";

#[derive(Debug, Deserialize)]
struct ModelInfo {
    #[serde(default)]
    siblings: Vec<Sibling>,
}

#[derive(Debug, Deserialize)]
struct Sibling {
    rfilename: String,
}

pub struct HuggingFaceHub {
    client: reqwest::Client,
    endpoint: String,
    token: Option<SecretString>,
}

impl HuggingFaceHub {
    pub fn new(client: reqwest::Client, token: Option<SecretString>) -> Self {
        Self {
            client,
            endpoint: HF_ENDPOINT.to_string(),
            token,
        }
    }

    /// Point at a mirror instead of the public hub.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let request = self.client.get(url);
        match self.token {
            Some(ref token) => request.bearer_auth(token.expose_secret()),
            None => request,
        }
    }
}

#[async_trait]
impl ModelSource for HuggingFaceHub {
    fn name(&self) -> &'static str {
        "huggingface"
    }

    async fn snapshot(&self, repo_id: &str, target_dir: &Path) -> Result<()> {
        let info: ModelInfo = self
            .get(&format!("{}/api/models/{repo_id}", self.endpoint))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        for sibling in info.siblings {
            let dest = safe_join(target_dir, &sibling.rfilename)?;
            let url = format!(
                "{}/{repo_id}/resolve/main/{}",
                self.endpoint, sibling.rfilename
            );
            let bytes = fetch_to_file(self.get(&url), &dest).await?;
            debug!(repo = repo_id, file = %sibling.rfilename, bytes, "fetched");
        }
        Ok(())
    }
}
