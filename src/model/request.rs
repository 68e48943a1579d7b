//! Generation request payload carried through the queue.
//!
//! The queue and workers treat the request as opaque; only the execution
//! routine interprets it. Missing fields fall back to the defaults below so
//! sparse JSON submissions are accepted.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::upload::validate_audio_path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerateRequest {
    /// Text prompt describing the music.
    pub prompt: String,
    pub lyrics: String,
    /// Generation model name (e.g. "acestep-v15-turbo"). None = server default.
    pub model: Option<String>,
    /// Use the language model to produce audio codes before synthesis.
    pub thinking: bool,
    pub task_type: String,
    pub bpm: Option<u32>,
    pub key_scale: String,
    pub time_signature: String,
    pub vocal_language: String,
    pub audio_duration: Option<f64>,
    pub batch_size: Option<u32>,
    pub inference_steps: u32,
    pub guidance_scale: f64,
    pub use_random_seed: bool,
    pub seed: Seed,
    pub reference_audio_path: Option<String>,
    pub src_audio_path: Option<String>,
    pub audio_format: String,
    pub lm_model_path: Option<String>,
    /// Anything the schema above does not name is passed through untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Default for GenerateRequest {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            lyrics: String::new(),
            model: None,
            thinking: false,
            task_type: "text2music".to_string(),
            bpm: None,
            key_scale: String::new(),
            time_signature: String::new(),
            vocal_language: "en".to_string(),
            audio_duration: None,
            batch_size: None,
            inference_steps: 8,
            guidance_scale: 7.0,
            use_random_seed: true,
            seed: Seed::default(),
            reference_audio_path: None,
            src_audio_path: None,
            audio_format: "mp3".to_string(),
            lm_model_path: None,
            extra: serde_json::Map::new(),
        }
    }
}

/// Seed as submitted: a single number, or text such as `"42, 7"` giving one
/// seed per batch item. `-1` asks for a random seed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Seed {
    Number(i64),
    Text(String),
}

impl Default for Seed {
    fn default() -> Self {
        Seed::Number(-1)
    }
}

impl GenerateRequest {
    /// Reject unsafe audio paths before the request is queued.
    ///
    /// Accepted paths are rewritten to their validated form; empty strings
    /// become `None`.
    pub fn validate_paths(&mut self) -> Result<()> {
        self.reference_audio_path = validate_audio_path(self.reference_audio_path.as_deref())?
            .map(|p| p.to_string_lossy().into_owned());
        self.src_audio_path = validate_audio_path(self.src_audio_path.as_deref())?
            .map(|p| p.to_string_lossy().into_owned());
        Ok(())
    }
}
