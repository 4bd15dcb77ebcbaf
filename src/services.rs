//! Boundaries to the external conversion engine and vision service.
//!
//! The pipeline only talks to the traits; the concrete types here are what the
//! binary wires in. Tests substitute their own implementations.

use crate::error::ConvertError;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Value, json};
use std::io::ErrorKind;
use std::path::Path;
use std::process::Command;
use std::thread;
use std::time::Duration;

/// File → Markdown text.
pub trait ConversionEngine: Send + Sync {
    /// Identifies the engine in cache fingerprints.
    fn name(&self) -> &str;
    fn convert(&self, path: &Path) -> Result<String, ConvertError>;
}

/// Image bytes + prompt → description.
pub trait VisionService: Send + Sync {
    /// Identifies the model in cache fingerprints.
    fn model(&self) -> &str;
    fn analyze(&self, image: &[u8], prompt: &str) -> Result<String, ConvertError>;
}

/// Runs an external command (by default `markitdown`) with the file path as
/// its last argument and takes stdout as the Markdown result.
#[derive(Debug, Clone)]
pub struct CommandEngine {
    program: String,
    args: Vec<String>,
    label: String,
}

impl CommandEngine {
    pub fn new(command: &[String]) -> Self {
        let mut parts = command.iter().cloned();
        let program = parts.next().unwrap_or_else(|| "markitdown".to_string());
        let args: Vec<String> = parts.collect();
        let label = std::iter::once(program.as_str())
            .chain(args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");
        Self {
            program,
            args,
            label,
        }
    }
}

impl Default for CommandEngine {
    fn default() -> Self {
        Self::new(&["markitdown".to_string()])
    }
}

impl ConversionEngine for CommandEngine {
    fn name(&self) -> &str {
        &self.label
    }

    fn convert(&self, path: &Path) -> Result<String, ConvertError> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(path)
            .output()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => {
                    ConvertError::Unavailable(format!("{} is not installed", self.program))
                }
                _ => ConvertError::Io(e.to_string()),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = stderr.trim().lines().last().unwrap_or("no error output");
            return Err(ConvertError::Conversion(format!(
                "{} exited with {}: {}",
                self.program, output.status, detail
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if text.is_empty() {
            return Err(ConvertError::Conversion("converter produced no output".into()));
        }
        Ok(text)
    }
}

pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_VISION_MODEL: &str = "gpt-4o";

/// Chat-completions client for an OpenAI-compatible vision model.
pub struct OpenAiVision {
    client: reqwest::blocking::Client,
    base_url: String,
    api_key: String,
    model: String,
    max_retries: u32,
    retry_delay: Duration,
}

impl OpenAiVision {
    pub fn new(api_key: String, base_url: &str, model: &str) -> Result<Self, ConvertError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| ConvertError::Service(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: model.to_string(),
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
        })
    }

    fn request_once(&self, payload: &Value) -> Result<String, ConvertError> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(payload)
            .send()
            .map_err(|e| ConvertError::Service(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .map_err(|e| ConvertError::Service(e.to_string()))?;
        if !status.is_success() {
            return Err(ConvertError::Service(format!(
                "vision API {}: {}",
                status.as_u16(),
                body.chars().take(200).collect::<String>()
            )));
        }

        let value: Value =
            serde_json::from_str(&body).map_err(|e| ConvertError::Service(e.to_string()))?;
        value["choices"][0]["message"]["content"]
            .as_str()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .ok_or_else(|| ConvertError::Service("vision response did not include text".into()))
    }
}

impl VisionService for OpenAiVision {
    fn model(&self) -> &str {
        &self.model
    }

    fn analyze(&self, image: &[u8], prompt: &str) -> Result<String, ConvertError> {
        let mime = infer::get(image)
            .map(|t| t.mime_type())
            .unwrap_or("image/png");
        let payload = json!({
            "model": self.model,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": prompt },
                    {
                        "type": "image_url",
                        "image_url": {
                            "url": format!("data:{};base64,{}", mime, BASE64.encode(image)),
                            "detail": "high"
                        }
                    }
                ]
            }]
        });

        let mut attempt = 1;
        loop {
            match self.request_once(&payload) {
                Ok(text) => return Ok(text),
                Err(e) if attempt < self.max_retries => {
                    tracing::warn!("Vision request attempt {} failed: {}", attempt, e);
                    thread::sleep(self.retry_delay);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_engine_label_includes_args() {
        let engine = CommandEngine::new(&["markitdown".into(), "--keep-data-uris".into()]);
        assert_eq!(engine.name(), "markitdown --keep-data-uris");
        assert_eq!(CommandEngine::default().name(), "markitdown");
    }

    #[test]
    fn missing_program_is_unavailable() {
        let engine = CommandEngine::new(&["definitely-not-a-real-converter-binary".into()]);
        let err = engine.convert(Path::new("x.pdf")).unwrap_err();
        assert!(matches!(err, ConvertError::Unavailable(_)));
    }

    #[cfg(unix)]
    #[test]
    fn command_engine_reads_stdout() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "hello from file\n").unwrap();
        let engine = CommandEngine::new(&["cat".into()]);
        assert_eq!(engine.convert(&path).unwrap(), "hello from file");

        let failing = CommandEngine::new(&["false".into()]);
        assert!(matches!(
            failing.convert(&path).unwrap_err(),
            ConvertError::Conversion(_)
        ));
    }
}
