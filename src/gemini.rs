//! Google Gemini REST transport.

use crate::model::{ChatModel, Content, GenerateRequest, ModelError, Part};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, trace, warn};

/// Public Gemini API endpoint.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Model used when the configuration does not name one.
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash-exp";

const API_KEY_HEADER: &str = "x-goog-api-key";
const UPLOAD_URL_HEADER: &str = "x-goog-upload-url";

/// Upload tries, counting the first one. A failed upload deletes the remote
/// file before the next try.
pub const MAX_UPLOAD_ATTEMPTS: u32 = 2;

/// Client for the `generateContent` and file upload endpoints.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    api_key: String,
    model_name: String,
    base_url: String,
    http: reqwest::Client,
}

/// Metadata of a file stored with the Files API.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFile {
    /// Resource name, `files/<id>`
    pub name: String,
    /// Human readable name
    #[serde(default)]
    pub display_name: Option<String>,
    /// URI usable in later prompts
    #[serde(default)]
    pub uri: String,
    /// MIME type recorded by the service
    #[serde(default)]
    pub mime_type: String,
}

impl GeminiClient {
    /// Creates a client for `model_name` against the public endpoint.
    #[must_use]
    pub fn new(api_key: impl Into<String>, model_name: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model_name: model_name.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            http: reqwest::Client::new(),
        }
    }

    /// Points the client at another endpoint, e.g. a proxy.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Name of the model requests are sent to.
    #[must_use]
    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    fn generate_url(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model_name
        )
    }

    /// Uploads a local file to the Files API.
    ///
    /// When `name` is given and an upload fails, the remote file of that
    /// name is deleted and the upload is tried again, at most
    /// `MAX_UPLOAD_ATTEMPTS` times in total.
    ///
    /// # Errors
    ///
    /// Returns the last upload error, or the delete error if clean-up fails.
    pub async fn upload_file(
        &self,
        path: &Path,
        mime_type: &str,
        name: Option<&str>,
    ) -> Result<UploadedFile, ModelError> {
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            ModelError::InvalidInput(format!("cannot read '{}': {e}", path.display()))
        })?;

        let mut attempt = 1;
        loop {
            match self.upload_bytes(&bytes, mime_type, name).await {
                Ok(file) => {
                    debug!("Uploaded {} as {}", path.display(), file.name);
                    return Ok(file);
                }
                Err(e) if attempt < MAX_UPLOAD_ATTEMPTS => {
                    warn!(attempt, error = %e, "Upload of {} failed", path.display());
                    if let Some(name) = name {
                        self.delete_file(name).await?;
                        debug!("Deleted remote file {}", name);
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Deletes a file from the Files API. Accepts `files/<id>` or `<id>`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the service refuses it.
    pub async fn delete_file(&self, name: &str) -> Result<(), ModelError> {
        let id = name.strip_prefix("files/").unwrap_or(name);
        let response = self
            .http
            .delete(format!("{}/v1beta/files/{id}", self.base_url))
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .map_err(map_transport)?;
        check_status(response).await.map(|_| ())
    }

    async fn upload_bytes(
        &self,
        bytes: &[u8],
        mime_type: &str,
        name: Option<&str>,
    ) -> Result<UploadedFile, ModelError> {
        let metadata = match name {
            Some(name) => serde_json::json!({
                "file": { "name": format!("files/{name}"), "displayName": name }
            }),
            None => serde_json::json!({ "file": {} }),
        };

        let start = self
            .http
            .post(format!("{}/upload/v1beta/files", self.base_url))
            .header(API_KEY_HEADER, &self.api_key)
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", bytes.len().to_string())
            .header("X-Goog-Upload-Header-Content-Type", mime_type)
            .json(&metadata)
            .send()
            .await
            .map_err(map_transport)?;
        let start = check_status(start).await?;

        let upload_url = start
            .headers()
            .get(UPLOAD_URL_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ModelError::InvalidInput("upload session returned no URL".into()))?
            .to_string();

        let finish = self
            .http
            .post(upload_url)
            .header("X-Goog-Upload-Offset", "0")
            .header("X-Goog-Upload-Command", "upload, finalize")
            .body(bytes.to_vec())
            .send()
            .await
            .map_err(map_transport)?;
        let body = check_status(finish)
            .await?
            .text()
            .await
            .map_err(map_transport)?;

        serde_json::from_str::<UploadResponse>(&body)
            .map(|r| r.file)
            .map_err(|e| ModelError::InvalidInput(format!("unreadable upload response: {e}")))
    }
}

#[async_trait]
impl ChatModel for GeminiClient {
    async fn generate(&self, request: &GenerateRequest) -> Result<String, ModelError> {
        let body = encode_request(request);
        trace!(model = %self.model_name, contents = request.contents.len(), "Sending request");

        let response = self
            .http
            .post(self.generate_url())
            .header(API_KEY_HEADER, &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(map_transport)?;
        let raw = check_status(response)
            .await?
            .text()
            .await
            .map_err(map_transport)?;

        let parsed: WireResponse = serde_json::from_str(&raw)
            .map_err(|e| ModelError::InvalidInput(format!("unreadable response: {e}")))?;
        Ok(parsed.text())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<WireContent<'a>>,
    contents: Vec<WireContent<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: &'static str,
}

#[derive(Serialize)]
struct WireContent<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<WirePart<'a>>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum WirePart<'a> {
    Text {
        text: &'a str,
    },
    Inline {
        #[serde(rename = "inlineData")]
        inline_data: WireBlob<'a>,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireBlob<'a> {
    mime_type: &'a str,
    data: String,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct WireResponse {
    candidates: Vec<Candidate>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct CandidateContent {
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct ResponsePart {
    text: Option<String>,
}

impl WireResponse {
    /// Text of the first candidate, parts concatenated. Empty when the
    /// service returned no candidate.
    fn text(self) -> String {
        self.candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default()
    }
}

#[derive(Deserialize)]
struct UploadResponse {
    file: UploadedFile,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

fn encode_request(request: &GenerateRequest) -> WireRequest<'_> {
    WireRequest {
        system_instruction: request.system_instruction.as_deref().map(|text| WireContent {
            role: None,
            parts: vec![WirePart::Text { text }],
        }),
        contents: request.contents.iter().map(encode_content).collect(),
        generation_config: GenerationConfig {
            response_mime_type: "text/plain",
        },
    }
}

fn encode_content(content: &Content) -> WireContent<'_> {
    WireContent {
        role: Some(content.role.as_str()),
        parts: content
            .parts
            .iter()
            .map(|part| match part {
                Part::Text(text) => WirePart::Text { text },
                Part::InlineData { mime_type, data } => WirePart::Inline {
                    inline_data: WireBlob {
                        mime_type,
                        data: STANDARD.encode(data),
                    },
                },
            })
            .collect(),
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ModelError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(map_status(status, &body))
}

fn map_status(status: StatusCode, body: &str) -> ModelError {
    let (message, api_status) = serde_json::from_str::<ErrorEnvelope>(body)
        .map(|e| (e.error.message, e.error.status))
        .unwrap_or_else(|_| (body.to_string(), String::new()));

    // invalid keys come back as 400 INVALID_ARGUMENT
    if api_status == "UNAUTHENTICATED" || message.contains("API key not valid") {
        return ModelError::Authentication(message);
    }

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ModelError::Authentication(message),
        StatusCode::TOO_MANY_REQUESTS => ModelError::QuotaExhausted(message),
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT => {
            ModelError::Unavailable {
                status: status.as_u16(),
                message,
            }
        }
        StatusCode::BAD_REQUEST => ModelError::InvalidArgument(message),
        _ => ModelError::Other(format!("{status}: {message}")),
    }
}

fn map_transport(error: reqwest::Error) -> ModelError {
    if error.is_builder() || error.is_decode() {
        ModelError::InvalidInput(error.to_string())
    } else if error.is_timeout() || error.is_connect() || error.is_request() || error.is_body() {
        ModelError::Network(error.to_string())
    } else {
        ModelError::Other(error.to_string())
    }
}
