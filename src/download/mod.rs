//! Model checkpoint acquisition.
//!
//! A model is looked up under the checkpoint directory first. If it is
//! missing, its repository is fetched from the preferred source and, on
//! failure, from the other one.

pub mod huggingface;
pub mod modelscope;

use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{Error, Result};

pub use huggingface::HuggingFaceHub;
pub use modelscope::ModelScope;

/// Repository that bundles the default model set.
pub const DEFAULT_REPO_ID: &str = "ACE-Step/Ace-Step1.5";

/// Model name → repository id. Unlisted models come from the default repo.
pub const MODEL_REPOS: &[(&str, &str)] = &[
    ("acestep-v15-turbo", DEFAULT_REPO_ID),
    ("acestep-5Hz-lm-1.7B", DEFAULT_REPO_ID),
    ("vae", DEFAULT_REPO_ID),
    ("Qwen3-Embedding-0.6B", DEFAULT_REPO_ID),
    ("acestep-5Hz-lm-0.6B", "ACE-Step/acestep-5Hz-lm-0.6B"),
    ("acestep-5Hz-lm-4B", "ACE-Step/acestep-5Hz-lm-4B"),
    ("acestep-v15-base", "ACE-Step/acestep-v15-base"),
    ("acestep-v15-sft", "ACE-Step/acestep-v15-sft"),
    ("acestep-v15-turbo-shift3", "ACE-Step/acestep-v15-turbo-shift3"),
];

/// How long the reachability probe may take before the network is treated
/// as unable to reach Hugging Face.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

pub fn repo_for_model(model_name: &str) -> &'static str {
    MODEL_REPOS
        .iter()
        .find(|(name, _)| *name == model_name)
        .map(|(_, repo)| *repo)
        .unwrap_or(DEFAULT_REPO_ID)
}

/// Which hub a download should try first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadSource {
    HuggingFace,
    ModelScope,
}

impl DownloadSource {
    pub fn other(self) -> Self {
        match self {
            DownloadSource::HuggingFace => DownloadSource::ModelScope,
            DownloadSource::ModelScope => DownloadSource::HuggingFace,
        }
    }
}

impl FromStr for DownloadSource {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "huggingface" => Ok(DownloadSource::HuggingFace),
            "modelscope" => Ok(DownloadSource::ModelScope),
            other => Err(format!(
                "unknown download source {other:?} (expected huggingface or modelscope)"
            )),
        }
    }
}

/// A hub that can materialise a repository snapshot on local disk.
#[async_trait]
pub trait ModelSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Download every file of `repo_id` into `target_dir`.
    async fn snapshot(&self, repo_id: &str, target_dir: &Path) -> Result<()>;
}

/// Resolves model names to local checkpoint directories, downloading on demand.
pub struct ModelDownloader {
    huggingface: Box<dyn ModelSource>,
    modelscope: Box<dyn ModelSource>,
    preference: Option<DownloadSource>,
}

impl ModelDownloader {
    pub fn new(huggingface: Box<dyn ModelSource>, modelscope: Box<dyn ModelSource>) -> Self {
        Self {
            huggingface,
            modelscope,
            preference: None,
        }
    }

    /// Build the default hub clients from configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("genq/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let mut hf = HuggingFaceHub::new(client.clone(), config.hf_token.clone());
        if let Some(ref endpoint) = config.hf_endpoint {
            hf = hf.with_endpoint(endpoint.as_str());
        }
        let mut ms = ModelScope::new(client);
        if let Some(ref endpoint) = config.modelscope_endpoint {
            ms = ms.with_endpoint(endpoint.as_str());
        }
        Ok(Self::new(Box::new(hf), Box::new(ms)).with_preference(config.download_source))
    }

    /// Force a source instead of probing the network.
    pub fn with_preference(mut self, preference: Option<DownloadSource>) -> Self {
        self.preference = preference;
        self
    }

    fn source(&self, which: DownloadSource) -> &dyn ModelSource {
        match which {
            DownloadSource::HuggingFace => self.huggingface.as_ref(),
            DownloadSource::ModelScope => self.modelscope.as_ref(),
        }
    }

    /// Return `checkpoint_dir/model_name`, downloading it first if the
    /// directory is missing or empty.
    pub async fn ensure_model_downloaded(
        &self,
        model_name: &str,
        checkpoint_dir: &Path,
    ) -> Result<PathBuf> {
        let model_path = checkpoint_dir.join(model_name);
        if dir_has_entries(&model_path).await {
            info!(model = model_name, path = %model_path.display(), "model already present");
            return Ok(model_path);
        }

        let repo_id = repo_for_model(model_name);
        let primary = match self.preference {
            Some(source) => {
                info!(model = model_name, source = ?source, "using configured download source");
                source
            }
            None => {
                let source = if can_access_google(PROBE_TIMEOUT).await {
                    DownloadSource::HuggingFace
                } else {
                    DownloadSource::ModelScope
                };
                info!(model = model_name, source = ?source, "auto-detected download source");
                source
            }
        };

        let first = self.source(primary);
        match download_with(first, repo_id, checkpoint_dir, model_name).await {
            Ok(path) => Ok(path),
            Err(primary_err) => {
                let second = self.source(primary.other());
                warn!(
                    model = model_name,
                    source = first.name(),
                    fallback = second.name(),
                    error = %primary_err,
                    "download failed, falling back"
                );
                download_with(second, repo_id, checkpoint_dir, model_name)
                    .await
                    .map_err(|fallback_err| {
                        Error::Download(format!(
                            "{model_name}: {} failed ({primary_err}); {} failed ({fallback_err})",
                            first.name(),
                            second.name()
                        ))
                    })
            }
        }
    }
}

/// Fetch `repo_id` through `source`. The bundled default repo is unpacked
/// straight into `checkpoint_dir`; any other repo goes into its own
/// `checkpoint_dir/model_name` directory.
pub async fn download_with(
    source: &dyn ModelSource,
    repo_id: &str,
    checkpoint_dir: &Path,
    model_name: &str,
) -> Result<PathBuf> {
    let target_dir = if repo_id == DEFAULT_REPO_ID {
        checkpoint_dir.to_path_buf()
    } else {
        checkpoint_dir.join(model_name)
    };
    tokio::fs::create_dir_all(&target_dir).await?;

    info!(
        source = source.name(),
        repo = repo_id,
        target = %target_dir.display(),
        "downloading model"
    );
    source.snapshot(repo_id, &target_dir).await?;
    info!(source = source.name(), repo = repo_id, "download completed");

    Ok(checkpoint_dir.join(model_name))
}

/// TCP reachability check used to pick the primary hub.
pub async fn can_access_google(timeout: Duration) -> bool {
    matches!(
        tokio::time::timeout(timeout, tokio::net::TcpStream::connect(("www.google.com", 443)))
            .await,
        Ok(Ok(_))
    )
}

async fn dir_has_entries(path: &Path) -> bool {
    match tokio::fs::read_dir(path).await {
        Ok(mut entries) => matches!(entries.next_entry().await, Ok(Some(_))),
        Err(_) => false,
    }
}

/// Join a repository-relative file name onto `dir`, refusing anything that
/// could escape it.
pub(crate) fn safe_join(dir: &Path, relative: &str) -> Result<PathBuf> {
    let rel = Path::new(relative);
    let escapes = rel.components().any(|c| !matches!(c, Component::Normal(_)));
    if relative.is_empty() || escapes {
        return Err(Error::Download(format!(
            "refusing unsafe repository path {relative:?}"
        )));
    }
    Ok(dir.join(rel))
}

/// Stream a response body to `dest`, writing through a `.part` file so an
/// interrupted download never looks complete.
pub(crate) async fn fetch_to_file(request: reqwest::RequestBuilder, dest: &Path) -> Result<u64> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut partial = dest.as_os_str().to_owned();
    partial.push(".part");
    let partial = PathBuf::from(partial);

    let result = async {
        let mut response = request.send().await?.error_for_status()?;
        let mut file = tokio::fs::File::create(&partial).await?;
        let mut total = 0u64;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            total += chunk.len() as u64;
        }
        file.flush().await?;
        Ok::<_, Error>(total)
    }
    .await;

    match result {
        Ok(total) => {
            tokio::fs::rename(&partial, dest).await?;
            Ok(total)
        }
        Err(e) => {
            let _ = tokio::fs::remove_file(&partial).await;
            Err(e)
        }
    }
}
