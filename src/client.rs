use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::multipart::{Form, Part};
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::cache::{cache_key, TokenCache, DEFAULT_CACHE_KEY_PREFIX};
use crate::errors::{Result, XilingError};
use crate::models::{
    json_str, synthesis_status, task_id_from_value, tts_task_info, vendor_error, AccessToken,
    PollOptions, TaskHandle, TaskSnapshot, TaskStatus, TokenResponse, REFRESH_MARGIN_SECS,
};
use crate::poll::poll_until;

const DEFAULT_BASE_URL: &str = "https://aip.baidubce.com";
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);

const TOKEN_PATH: &str = "/oauth/2.0/token";
const UPLOAD_PATH: &str = "/rest/2.0/ai_dh/file/upload";
const SYNTHESIS_PATH: &str = "/rpc/2.0/ai_custom/v1/digital_human/synthesis";
const SYNTHESIS_QUERY_PATH: &str = "/rpc/2.0/ai_custom/v1/digital_human/synthesis/query";
const TTS_CREATE_PATH: &str = "/rpc/2.0/tts/v1/create";
const TTS_QUERY_PATH: &str = "/rpc/2.0/tts/v1/query";

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Builder for constructing a [`Client`] with custom configuration.
///
/// # Example
///
/// ```no_run
/// use baidu_xiling::{ClientBuilder, MemoryTokenCache};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # fn example() -> baidu_xiling::Result<()> {
/// let client = ClientBuilder::new()
///     .api_key("your-api-key")
///     .secret_key("your-secret-key")
///     .cache(Arc::new(MemoryTokenCache::new()))
///     .timeout(Duration::from_secs(120))
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct ClientBuilder {
    api_key: Option<String>,
    secret_key: Option<String>,
    base_url: String,
    max_retries: u32,
    timeout: Duration,
    cache: Option<Arc<dyn TokenCache>>,
    cache_key_prefix: String,
    cache_ttl: Duration,
}

impl ClientBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            api_key: None,
            secret_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
            timeout: DEFAULT_TIMEOUT,
            cache: None,
            cache_key_prefix: DEFAULT_CACHE_KEY_PREFIX.to_string(),
            cache_ttl: DEFAULT_CACHE_TTL,
        }
    }

    /// Set the application's API key (OAuth `client_id`).
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set the application's secret key (OAuth `client_secret`).
    pub fn secret_key(mut self, key: impl Into<String>) -> Self {
        self.secret_key = Some(key.into());
        self
    }

    /// Override the base URL (defaults to `https://aip.baidubce.com`).
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set the maximum number of retries for transient errors (defaults to 3).
    pub fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    /// Set the HTTP request timeout (defaults to 60 seconds).
    pub fn timeout(mut self, d: Duration) -> Self {
        self.timeout = d;
        self
    }

    /// Share access tokens through an external cache.
    pub fn cache(mut self, cache: Arc<dyn TokenCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Prefix for cache keys (defaults to `baidu_api_access_token_`).
    pub fn cache_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.cache_key_prefix = prefix.into();
        self
    }

    /// Token lifetime assumed when the vendor omits `expires_in` (defaults to 1 hour).
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Build the [`Client`].
    ///
    /// Returns [`XilingError::MissingCredentials`] if either key is missing or empty.
    pub fn build(self) -> Result<Client> {
        let api_key = self
            .api_key
            .filter(|k| !k.is_empty())
            .ok_or(XilingError::MissingCredentials)?;
        let secret_key = self
            .secret_key
            .filter(|k| !k.is_empty())
            .ok_or(XilingError::MissingCredentials)?;

        let http = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(XilingError::Http)?;

        Ok(Client {
            base_url: self.base_url.trim_end_matches('/').to_string(),
            cache_key: cache_key(&self.cache_key_prefix, &api_key),
            api_key,
            secret_key,
            http,
            max_retries: self.max_retries,
            cache: self.cache,
            cache_ttl: self.cache_ttl,
            token: Mutex::new(None),
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The Baidu AI open platform client.
///
/// Holds the application credentials, the current access token, and an
/// optional [`TokenCache`]. Tokens are fetched lazily and refreshed when they
/// have less than a minute left.
///
/// # Example
///
/// ```no_run
/// use baidu_xiling::Client;
/// use serde_json::json;
///
/// # async fn example() -> baidu_xiling::Result<()> {
/// let client = Client::new("your-api-key", "your-secret-key")?;
///
/// let result = client
///     .synthesize(&json!({ "figure_id": "A2a_V1" }), None)
///     .await?;
/// println!("video: {}", result.raw);
/// # Ok(())
/// # }
/// ```
pub struct Client {
    base_url: String,
    api_key: String,
    secret_key: String,
    http: reqwest::Client,
    max_retries: u32,
    cache: Option<Arc<dyn TokenCache>>,
    cache_key: String,
    cache_ttl: Duration,
    token: Mutex<Option<AccessToken>>,
}

impl Client {
    /// Create a new client with the given credentials and default settings.
    ///
    /// For customization, use [`ClientBuilder`] instead.
    pub fn new(api_key: impl Into<String>, secret_key: impl Into<String>) -> Result<Self> {
        ClientBuilder::new()
            .api_key(api_key)
            .secret_key(secret_key)
            .build()
    }

    /// The key under which this client's token is cached.
    pub fn cache_key(&self) -> &str {
        &self.cache_key
    }

    // -----------------------------------------------------------------------
    // Access token
    // -----------------------------------------------------------------------

    /// Return a valid access token, fetching a new one if needed.
    ///
    /// The in-memory token is reused while it has more than 60 seconds left.
    /// Otherwise the cache (if any) is consulted, and only then the OAuth
    /// endpoint. Concurrent callers wait for a single refresh.
    pub async fn access_token(&self) -> Result<String> {
        let mut slot = self.token.lock().await;

        if let Some(token) = slot.as_ref().filter(|t| t.is_fresh()) {
            return Ok(token.token.clone());
        }

        if let Some(token) = self.cached_token().await {
            let value = token.token.clone();
            *slot = Some(token);
            return Ok(value);
        }

        let token = self.fetch_token().await?;
        let value = token.token.clone();
        *slot = Some(token);
        Ok(value)
    }

    /// Forget the current token, in memory and in the cache.
    pub async fn invalidate_token(&self) {
        *self.token.lock().await = None;

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.del(&self.cache_key).await {
                warn!(error = %e, "Failed to remove access token from cache");
            }
        }
    }

    async fn cached_token(&self) -> Option<AccessToken> {
        let cache = self.cache.as_ref()?;
        match cache.get(&self.cache_key).await {
            Ok(Some(token)) if token.is_fresh() => {
                debug!("Using access token from cache");
                Some(token)
            }
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "Failed to read access token from cache");
                None
            }
        }
    }

    async fn fetch_token(&self) -> Result<AccessToken> {
        let url = self.endpoint(TOKEN_PATH);
        debug!(url = %url, "Requesting access token");

        let response = self
            .http
            .post(&url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.api_key.as_str()),
                ("client_secret", self.secret_key.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        let body = decode_body(status, &text)?;

        let parsed: TokenResponse = serde_json::from_value(body.clone()).map_err(|e| {
            XilingError::InvalidResponse(format!("malformed token response: {e}"))
        })?;

        let access_token = parsed
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| XilingError::TokenAcquisition(body.to_string()))?;

        let expires_in = match parsed.expires_in {
            Some(secs) => secs,
            None => i64::try_from(self.cache_ttl.as_secs()).unwrap_or(i64::MAX),
        };
        let expires_at = chrono::TimeDelta::try_seconds(expires_in)
            .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
            .ok_or_else(|| {
                XilingError::InvalidResponse(format!("token expires_in out of range: {expires_in}"))
            })?;
        let token = AccessToken {
            token: access_token,
            expires_at,
        };

        info!(expires_in, "Obtained access token");

        if let Some(cache) = &self.cache {
            let ttl_secs = expires_in.saturating_sub(REFRESH_MARGIN_SECS).max(1);
            let ttl = Duration::from_secs(u64::try_from(ttl_secs).unwrap_or(1));
            if let Err(e) = cache.put(&self.cache_key, &token, ttl).await {
                warn!(error = %e, "Failed to store access token in cache");
            }
        }

        Ok(token)
    }

    // -----------------------------------------------------------------------
    // Generic dispatch
    // -----------------------------------------------------------------------

    /// Send an authenticated request and return the decoded JSON body.
    ///
    /// `url` may be absolute or a path relative to the base URL. The access
    /// token is added as the `access_token` query parameter. `params` is sent
    /// as a JSON body when the `Content-Type` header is `application/json`,
    /// as a form body otherwise (the default content type is
    /// `application/x-www-form-urlencoded`), and as query parameters for
    /// `GET` and `DELETE`.
    ///
    /// If the vendor reports the token as invalid or expired, the token is
    /// refreshed and the request sent once more.
    ///
    /// # Errors
    ///
    /// - [`XilingError::Vendor`] if the body carries a vendor error envelope.
    /// - [`XilingError::Api`] for other non-2xx responses.
    /// - [`XilingError::InvalidResponse`] if a 2xx body is not JSON.
    pub async fn request(
        &self,
        method: Method,
        url: &str,
        params: &Value,
        headers: HeaderMap,
    ) -> Result<Value> {
        let mut headers = headers;
        if !headers.contains_key(CONTENT_TYPE) {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(FORM_CONTENT_TYPE));
        }

        match self.send_signed(&method, url, params, &headers).await {
            Err(e) if e.is_token_expired() => {
                warn!(url = %url, error = %e, "Access token rejected, refreshing");
                self.invalidate_token().await;
                self.send_signed(&method, url, params, &headers).await
            }
            other => other,
        }
    }

    /// Execute a signed request with automatic retry for transient failures.
    ///
    /// Retries are performed for HTTP 5xx, HTTP 429 and network-level errors,
    /// with exponential backoff: 1s, 2s, 4s, ...
    async fn send_signed(
        &self,
        method: &Method,
        url: &str,
        params: &Value,
        headers: &HeaderMap,
    ) -> Result<Value> {
        let token = self.access_token().await?;
        let url = self.endpoint(url);
        let as_query = matches!(*method, Method::GET | Method::DELETE);
        let as_json = is_json(headers);

        let mut last_err: Option<XilingError> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(backoff).await;
            }

            debug!(method = %method, url = %url, attempt, "Sending request");

            let mut req = self
                .http
                .request(method.clone(), &url)
                .query(&[("access_token", token.as_str())])
                .headers(headers.clone());

            if !params.is_null() {
                req = if as_query {
                    req.query(params)
                } else if as_json {
                    req.json(params)
                } else {
                    req.form(params)
                };
            }

            let response = match req.send().await {
                Ok(r) => r,
                Err(e) if e.is_builder() => return Err(XilingError::Http(e)),
                Err(e) => {
                    warn!(url = %url, attempt, error = %e, "Request failed");
                    last_err = Some(XilingError::Http(e));
                    continue;
                }
            };

            let status = response.status();
            let text = match response.text().await {
                Ok(t) => t,
                Err(e) => {
                    warn!(url = %url, attempt, error = %e, "Reading response body failed");
                    last_err = Some(XilingError::Http(e));
                    continue;
                }
            };

            match decode_body(status, &text) {
                Err(e) if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS => {
                    warn!(url = %url, attempt, status = status.as_u16(), "Transient API error");
                    last_err = Some(e);
                }
                other => return other,
            }
        }

        // All retries exhausted.
        Err(last_err.unwrap_or_else(|| XilingError::Api {
            status_code: 0,
            message: "request failed after all retries".into(),
            body: None,
        }))
    }

    // -----------------------------------------------------------------------
    // File upload
    // -----------------------------------------------------------------------

    /// Upload a local file as multipart form data, with `params` as extra
    /// text fields.
    ///
    /// Fails with [`XilingError::FileNotFound`] before any network call if the
    /// path does not exist.
    pub async fn upload_file<I, K, V>(&self, path: impl AsRef<Path>, params: I) -> Result<Value>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let path = path.as_ref();
        if !path.exists() {
            return Err(XilingError::FileNotFound(path.to_path_buf()));
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());
        let contents = tokio::fs::read(path).await?;
        let size = contents.len();

        let mut form = Form::new().part("file", Part::bytes(contents).file_name(file_name.clone()));
        for (key, value) in params {
            let (key, value): (String, String) = (key.into(), value.into());
            form = form.text(key, value);
        }

        let token = self.access_token().await?;
        let url = self.endpoint(UPLOAD_PATH);
        debug!(url = %url, file = %file_name, size, "Uploading file");

        let response = self
            .http
            .post(&url)
            .query(&[("access_token", token.as_str())])
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        let body = decode_body(status, &text)?;

        info!(file = %file_name, size, "File uploaded");
        Ok(body)
    }

    // -----------------------------------------------------------------------
    // Digital-human video synthesis
    // -----------------------------------------------------------------------

    /// Submit a digital-human video synthesis task.
    ///
    /// `params` is passed through as the JSON body; see the vendor's
    /// documentation for its fields.
    pub async fn create_synthesis_task(&self, params: &Value) -> Result<TaskHandle> {
        let raw = self
            .request(Method::POST, SYNTHESIS_PATH, params, json_headers())
            .await?;
        let task_id = task_id_from_value(&raw).ok_or_else(|| {
            XilingError::InvalidResponse(format!("synthesis response has no task_id: {raw}"))
        })?;

        info!(task_id = %task_id, "Synthesis task submitted");
        Ok(TaskHandle { task_id, raw })
    }

    /// Query the current state of a synthesis task.
    pub async fn get_synthesis_task_result(&self, task_id: &str) -> Result<TaskSnapshot> {
        let raw = self
            .request(
                Method::POST,
                SYNTHESIS_QUERY_PATH,
                &json!({ "task_id": task_id }),
                json_headers(),
            )
            .await?;

        Ok(TaskSnapshot {
            task_id: task_id.to_string(),
            status: synthesis_status(&raw),
            raw,
        })
    }

    /// Poll a synthesis task until it succeeds, fails, or times out.
    ///
    /// # Errors
    ///
    /// - [`XilingError::TaskFailed`] if the task reaches a failed status.
    /// - [`XilingError::Timeout`] if polling exceeds the configured timeout.
    pub async fn wait_for_synthesis_result(
        &self,
        task_id: &str,
        opts: Option<PollOptions>,
    ) -> Result<TaskSnapshot> {
        let opts = opts.unwrap_or_default();
        poll_until(task_id, &opts, || self.get_synthesis_task_result(task_id)).await
    }

    /// Submit a synthesis task and poll until it completes.
    pub async fn synthesize(&self, params: &Value, opts: Option<PollOptions>) -> Result<TaskSnapshot> {
        let task = self.create_synthesis_task(params).await?;
        self.wait_for_synthesis_result(&task.task_id, opts).await
    }

    // -----------------------------------------------------------------------
    // Long-text speech synthesis
    // -----------------------------------------------------------------------

    /// Submit a long-text speech synthesis task.
    pub async fn create_tts_task(&self, params: &Value) -> Result<TaskHandle> {
        let raw = self
            .request(Method::POST, TTS_CREATE_PATH, params, json_headers())
            .await?;
        let task_id = task_id_from_value(&raw).ok_or_else(|| {
            XilingError::InvalidResponse(format!("TTS response has no task_id: {raw}"))
        })?;

        info!(task_id = %task_id, "TTS task submitted");
        Ok(TaskHandle { task_id, raw })
    }

    /// Query the current state of a TTS task.
    ///
    /// The snapshot's `raw` is the task's `tasks_info` entry, which carries
    /// `task_result.speech_url` once the task succeeds.
    pub async fn get_tts_task_result(&self, task_id: &str) -> Result<TaskSnapshot> {
        let raw = self
            .request(
                Method::POST,
                TTS_QUERY_PATH,
                &json!({ "task_ids": [task_id] }),
                json_headers(),
            )
            .await?;

        let info = tts_task_info(&raw, task_id).ok_or_else(|| {
            XilingError::InvalidResponse(format!("TTS query response has no entry for {task_id}"))
        })?;

        Ok(TaskSnapshot {
            task_id: task_id.to_string(),
            status: TaskStatus::from_vendor(&json_str(&info, "task_status")),
            raw: info,
        })
    }

    /// Poll a TTS task until it succeeds, fails, or times out.
    pub async fn wait_for_tts_result(
        &self,
        task_id: &str,
        opts: Option<PollOptions>,
    ) -> Result<TaskSnapshot> {
        let opts = opts.unwrap_or_default();
        poll_until(task_id, &opts, || self.get_tts_task_result(task_id)).await
    }

    /// Submit a TTS task and poll until it completes.
    pub async fn synthesize_speech(
        &self,
        params: &Value,
        opts: Option<PollOptions>,
    ) -> Result<TaskSnapshot> {
        let task = self.create_tts_task(params).await?;
        self.wait_for_tts_result(&task.task_id, opts).await
    }

    fn endpoint(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!("{}{}", self.base_url, url)
        }
    }
}

fn json_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers
}

/// `true` when the media type of `Content-Type` is `application/json`.
fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|m| m.trim().eq_ignore_ascii_case("application/json"))
        .unwrap_or(false)
}

/// Turn a response into JSON, mapping vendor envelopes and HTTP errors.
fn decode_body(status: StatusCode, text: &str) -> Result<Value> {
    let parsed: Option<Value> = serde_json::from_str(text).ok();

    if let Some((code, message)) = parsed.as_ref().and_then(vendor_error) {
        return Err(XilingError::Vendor { code, message });
    }

    if !status.is_success() {
        return Err(XilingError::Api {
            status_code: status.as_u16(),
            message: text.to_string(),
            body: parsed,
        });
    }

    parsed.ok_or_else(|| {
        let preview: String = text.chars().take(200).collect();
        XilingError::InvalidResponse(format!("expected JSON body, got: {preview}"))
    })
}
