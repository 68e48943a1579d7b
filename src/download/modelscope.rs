//! ModelScope snapshot download.

use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{ModelSource, fetch_to_file, safe_join};
use crate::error::{Error, Result};

pub const MODELSCOPE_ENDPOINT: &str = "https://modelscope.cn";

const REVISION: &str = "master";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct FileListing {
    code: i64,
    #[serde(default)]
    message: Option<String>,
    data: Option<FileListingData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct FileListingData {
    #[serde(default)]
    files: Vec<RepoFile>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RepoFile {
    path: String,
    #[serde(rename = "Type")]
    kind: String,
}

pub struct ModelScope {
    client: reqwest::Client,
    endpoint: String,
}

impl ModelScope {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            endpoint: MODELSCOPE_ENDPOINT.to_string(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl ModelSource for ModelScope {
    fn name(&self) -> &'static str {
        "modelscope"
    }

    async fn snapshot(&self, repo_id: &str, target_dir: &Path) -> Result<()> {
        let listing: FileListing = self
            .client
            .get(format!(
                "{}/api/v1/models/{repo_id}/repo/files",
                self.endpoint
            ))
            .query(&[("Revision", REVISION), ("Recursive", "true")])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if listing.code != 200 {
            return Err(Error::Download(format!(
                "modelscope listing for {repo_id} failed: {}",
                listing.message.unwrap_or_else(|| format!("code {}", listing.code))
            )));
        }

        let files = listing.data.map(|d| d.files).unwrap_or_default();
        for file in files.into_iter().filter(|f| f.kind == "blob") {
            let dest = safe_join(target_dir, &file.path)?;
            let request = self
                .client
                .get(format!("{}/api/v1/models/{repo_id}/repo", self.endpoint))
                .query(&[("Revision", REVISION), ("FilePath", file.path.as_str())]);
            let bytes = fetch_to_file(request, &dest).await?;
            debug!(repo = repo_id, file = %file.path, bytes, "fetched");
        }
        Ok(())
    }
}
