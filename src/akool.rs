//! Akool face swap API client.
//!
//! Akool is the secondary provider, used when the primary vendor has no API
//! token. Its open API authenticates with a bearer token obtained from a
//! client id and API key; the token is cached and fetched again after
//! `AkoolConfig::token_refresh`. Status queries share the GET-only retry
//! engine with the primary vendor client and report [`TaskStatus`].

use crate::config::{AkoolConfig, Config, RetryConfig};
use crate::error::{Error, Result};
use crate::retry::{retry_budget, with_retry};
use crate::vendor::client::decode;
use crate::vendor::{SwapTask, TaskStatus};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Open API success code
const AKOOL_OK: i64 = 1000;

/// Detection service success code
const DETECT_OK: i64 = 0;

/// Fraction of the landmark spread added on each side of a face box
const BBOX_PADDING: f64 = 0.2;

/// A face found by Akool detection
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AkoolFace {
    /// Position of the face in the detection response
    pub index: usize,
    /// Opaque landmark string identifying this face in a swap request
    pub landmarks_str: String,
    /// Padded bounding box `[x, y, width, height]`, when landmarks were returned
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<[f64; 4]>,
}

/// Result of an Akool detection
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AkoolDetection {
    /// Faces in detection order
    pub faces: Vec<AkoolFace>,
    /// Image the landmarks refer to; pass it back as the swap frame
    pub frame_image: String,
}

/// One face replacement for an Akool swap
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AkoolSwapPair {
    /// Image of the new face
    pub source_image_url: String,
    /// Landmarks of the face to replace, from [`AkoolFace::landmarks_str`]
    pub landmarks_str: String,
}

/// Akool video face swap request
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AkoolSwapRequest {
    /// Video to modify
    pub target_video_url: String,
    /// Frame the landmarks were detected on; the video URL is used when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_image_url: Option<String>,
    /// Replacements to apply
    pub face_swaps: Vec<AkoolSwapPair>,
    /// Ask Akool to enhance swapped faces
    #[serde(default)]
    pub face_enhance: bool,
    /// Callback Akool notifies on completion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenEnvelope {
    code: i64,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct DetectEnvelope {
    error_code: i64,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    data: Option<DetectData>,
}

#[derive(Debug, Default, Deserialize)]
struct DetectData {
    #[serde(default)]
    landmarks: Vec<Vec<[f64; 2]>>,
    #[serde(default)]
    landmarks_str: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TokenData {
    token: String,
}

#[derive(Debug, Deserialize)]
struct CreatedSwap {
    #[serde(rename = "_id")]
    id: String,
}

#[derive(Debug, Deserialize)]
struct ResultList {
    #[serde(default)]
    result: Vec<ResultRecord>,
}

#[derive(Debug, Deserialize)]
struct ResultRecord {
    #[serde(rename = "_id")]
    id: String,
    status: i64,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    msg: Option<String>,
}

#[derive(Debug)]
struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// Client for the Akool open API
///
/// Cheap to clone; clones share the connection pool and the cached token.
#[derive(Clone, Debug)]
pub struct AkoolClient {
    http: reqwest::Client,
    config: AkoolConfig,
    retry: RetryConfig,
    token: Arc<RwLock<Option<CachedToken>>>,
}

impl AkoolClient {
    /// Build a client from configuration
    ///
    /// Fails with [`Error::Config`] when either Akool URL does not parse.
    /// Missing credentials are reported per call as [`Error::NotConfigured`].
    pub fn new(config: &Config) -> Result<Self> {
        for (key, value) in [
            ("akool.base_url", &config.akool.base_url),
            ("akool.detect_url", &config.akool.detect_url),
        ] {
            url::Url::parse(value).map_err(|e| Error::Config {
                message: format!("invalid Akool URL '{}': {}", value, e),
                key: Some(key.to_string()),
            })?;
        }

        let http = reqwest::Client::builder()
            .timeout(config.akool.request_timeout)
            .build()?;

        let mut akool = config.akool.clone();
        akool.base_url = akool.base_url.trim_end_matches('/').to_string();
        akool.detect_url = akool.detect_url.trim_end_matches('/').to_string();

        Ok(Self {
            http,
            config: akool,
            retry: config.retry.clone(),
            token: Arc::new(RwLock::new(None)),
        })
    }

    /// Bearer token for API calls, fetched when missing or due for refresh
    pub async fn token(&self, cancel: &CancellationToken) -> Result<String> {
        if let Some(cached) = self.token.read().await.as_ref() {
            if Instant::now() < cached.expires_at {
                return Ok(cached.token.clone());
            }
        }

        let mut slot = self.token.write().await;
        // Another caller may have refreshed while we waited for the lock
        if let Some(cached) = slot.as_ref() {
            if Instant::now() < cached.expires_at {
                return Ok(cached.token.clone());
            }
        }

        let token = tokio::select! {
            result = self.fetch_token() => result?,
            _ = cancel.cancelled() => return Err(Error::Cancelled),
        };
        *slot = Some(CachedToken {
            token: token.clone(),
            expires_at: Instant::now() + self.config.token_refresh,
        });
        tracing::info!(
            refresh_secs = self.config.token_refresh.as_secs(),
            "Akool token refreshed"
        );
        Ok(token)
    }

    async fn fetch_token(&self) -> Result<String> {
        let (client_id, api_key) = match (&self.config.client_id, &self.config.api_key) {
            (Some(id), Some(key)) if !key.is_empty() => (id.as_str(), key.as_str()),
            _ => return Err(Error::NotConfigured("Akool client id and API key".to_string())),
        };

        let url = format!("{}/api/open/v3/getToken", self.config.base_url);
        let body = json!({ "clientId": client_id, "clientSecret": api_key });
        let value = self.send(Method::POST, &url, None, Some(&body)).await?;
        let data = open_data(value)?;
        let TokenData { token } = decode(data, "Akool token")?;
        Ok(token)
    }

    /// Detect faces in an image
    ///
    /// Every face is returned with its landmark string; a bounding box is
    /// derived from the landmark points when Akool includes them.
    pub async fn detect_faces(
        &self,
        image_url: &str,
        cancel: &CancellationToken,
    ) -> Result<AkoolDetection> {
        let url = format!("{}/detect", self.config.detect_url);
        let body = json!({ "image_url": image_url, "single_face": false });
        let value = self.call(Method::POST, &url, Some(&body), cancel).await?;

        let envelope: DetectEnvelope = decode(value, "Akool detection")?;
        if envelope.error_code != DETECT_OK {
            return Err(Error::Vendor {
                code: envelope.error_code,
                message: envelope.msg.unwrap_or_else(|| "unknown error".to_string()),
            });
        }

        let data = envelope.data.unwrap_or_default();
        let faces = data
            .landmarks_str
            .into_iter()
            .enumerate()
            .map(|(index, landmarks_str)| AkoolFace {
                index,
                landmarks_str,
                bbox: data
                    .landmarks
                    .get(index)
                    .and_then(|points| bounding_box(points)),
            })
            .collect();

        Ok(AkoolDetection {
            faces,
            frame_image: image_url.to_string(),
        })
    }

    /// Start a video face swap
    ///
    /// Creation is attempted exactly once. The returned task is `queuing`.
    pub async fn create_swap_task(
        &self,
        request: &AkoolSwapRequest,
        cancel: &CancellationToken,
    ) -> Result<SwapTask> {
        if request.face_swaps.is_empty() {
            return Err(Error::InvalidInput(
                "at least one face swap pair is required".to_string(),
            ));
        }

        let frame = request
            .frame_image_url
            .as_deref()
            .unwrap_or(&request.target_video_url);
        let source_image: Vec<Value> = request
            .face_swaps
            .iter()
            .map(|pair| json!({ "path": pair.source_image_url }))
            .collect();
        let target_image: Vec<Value> = request
            .face_swaps
            .iter()
            .map(|pair| json!({ "path": frame, "opts": pair.landmarks_str }))
            .collect();

        let mut body = json!({
            "sourceImage": source_image,
            "targetImage": target_image,
            "modifyVideo": request.target_video_url,
            "face_enhance": request.face_enhance,
        });
        if let Some(webhook) = &request.webhook_url {
            body["webhookUrl"] = Value::String(webhook.clone());
        }

        let url = format!(
            "{}/api/open/v3/faceswap/highquality/specifyimage/createbyvideo",
            self.config.base_url
        );
        let value = self.call(Method::POST, &url, Some(&body), cancel).await?;
        let created: CreatedSwap = decode(open_data(value)?, "Akool swap creation")?;

        tracing::info!(task_id = %created.id, "Akool swap task created");
        Ok(SwapTask {
            task_id: created.id,
            status: TaskStatus::Queuing,
            result_url: None,
            error: None,
        })
    }

    /// Current state of a swap task
    ///
    /// Returns [`Error::TaskNotFound`] when Akool has no record of the id.
    pub async fn task_status(&self, job_id: &str, cancel: &CancellationToken) -> Result<SwapTask> {
        let url = format!(
            "{}/api/open/v3/faceswap/result/listbyids?_ids={}",
            self.config.base_url,
            urlencoding::encode(job_id)
        );
        let value = self.call::<Value>(Method::GET, &url, None, cancel).await?;
        let list: ResultList = decode(open_data(value)?, "Akool task status")?;

        let record = list
            .result
            .into_iter()
            .next()
            .ok_or_else(|| Error::TaskNotFound(job_id.to_string()))?;

        Ok(SwapTask {
            task_id: record.id,
            status: akool_status(record.status),
            result_url: record.url.filter(|url| !url.is_empty()),
            error: record.msg.filter(|msg| !msg.is_empty()),
        })
    }

    /// Authenticated call; GET is retried, everything else is attempted once
    async fn call<B>(
        &self,
        method: Method,
        url: &str,
        body: Option<&B>,
        cancel: &CancellationToken,
    ) -> Result<Value>
    where
        B: Serialize + ?Sized,
    {
        let token = self.token(cancel).await?;
        let payload = body.map(serde_json::to_vec).transpose()?;
        let budget = retry_budget(&self.retry, &method);

        with_retry(&self.retry, budget, cancel, || {
            let method = method.clone();
            let payload = payload.clone();
            let token = token.as_str();
            async move {
                tokio::select! {
                    result = self.send_raw(method, url, Some(token), payload) => result,
                    _ = cancel.cancelled() => Err(Error::Cancelled),
                }
            }
        })
        .await
    }

    async fn send<B>(
        &self,
        method: Method,
        url: &str,
        token: Option<&str>,
        body: Option<&B>,
    ) -> Result<Value>
    where
        B: Serialize + ?Sized,
    {
        let payload = body.map(serde_json::to_vec).transpose()?;
        self.send_raw(method, url, token, payload).await
    }

    async fn send_raw(
        &self,
        method: Method,
        url: &str,
        token: Option<&str>,
        payload: Option<Vec<u8>>,
    ) -> Result<Value> {
        tracing::debug!(method = %method, url = %url, "Akool request");

        let mut request = self.http.request(method, url);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        if let Some(payload) = payload {
            request = request.header(CONTENT_TYPE, "application/json").body(payload);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        match serde_json::from_str(&body) {
            Ok(value) if status.is_success() => Ok(value),
            Ok(_) => Err(Error::HttpStatus {
                status: status.as_u16(),
                body,
            }),
            Err(_) if !status.is_success() => Err(Error::HttpStatus {
                status: status.as_u16(),
                body,
            }),
            Err(e) => Err(Error::Decode(format!(
                "Akool response: {} (body: {})",
                e, body
            ))),
        }
    }
}

/// Unwrap an open API envelope, turning a non-success code into [`Error::Vendor`]
fn open_data(value: Value) -> Result<Value> {
    let envelope: OpenEnvelope = decode(value, "Akool envelope")?;
    if envelope.code != AKOOL_OK {
        return Err(Error::Vendor {
            code: envelope.code,
            message: envelope.msg.unwrap_or_else(|| "unknown error".to_string()),
        });
    }
    Ok(envelope.data.unwrap_or(Value::Null))
}

/// Map an Akool numeric task status onto [`TaskStatus`]
pub fn akool_status(code: i64) -> TaskStatus {
    match code {
        1 => TaskStatus::Queuing,
        2 => TaskStatus::Processing,
        3 => TaskStatus::Completed,
        4 => TaskStatus::Failed,
        other => TaskStatus::Other(other.to_string()),
    }
}

/// Padded `[x, y, width, height]` box around landmark points
fn bounding_box(points: &[[f64; 2]]) -> Option<[f64; 4]> {
    let first = points.first()?;
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (first[0], first[1], first[0], first[1]);
    for [x, y] in points.iter().copied() {
        min_x = min_x.min(x);
        max_x = max_x.max(x);
        min_y = min_y.min(y);
        max_y = max_y.max(y);
    }

    // Padding follows the horizontal spread on both axes
    let pad = (max_x - min_x) * BBOX_PADDING;
    Some([
        min_x - pad,
        min_y - pad,
        (max_x - min_x) + 2.0 * pad,
        (max_y - min_y) + 2.0 * pad,
    ])
}
