use super::types::{
    ApiError, EditRequest, Subscription, SubscriptionListResponse, UnreadCount,
    UnreadCountResponse,
};
use super::ReaderApi;
use futures::StreamExt;
use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use url::Url;

const MAX_RESPONSE_SIZE: usize = 5 * 1024 * 1024; // 5MB
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// HTTP transport for Google-Reader-compatible services.
///
/// Holds a shared `reqwest::Client`; cloning is cheap.
#[derive(Clone, Debug)]
pub struct HttpReaderApi {
    client: reqwest::Client,
    base: Url,
    client_id: String,
    timeout: Duration,
}

impl HttpReaderApi {
    /// Build a transport for the service rooted at `base_url`.
    ///
    /// # Errors
    ///
    /// - [`ApiError::Parse`] if `base_url` is not an absolute URL
    /// - [`ApiError::Network`] if the TLS backend cannot be initialised
    pub fn new(base_url: &str, client_id: &str, timeout: Duration) -> Result<Self, ApiError> {
        let mut base =
            Url::parse(base_url).map_err(|e| ApiError::Parse(format!("base URL: {}", e)))?;
        // Url::join drops the last segment unless the path ends with a slash
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let client = reqwest::Client::builder()
            .user_agent(concat!("readersync/", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::limited(3))
            .build()?;

        Ok(Self {
            client,
            base,
            client_id: client_id.to_string(),
            timeout,
        })
    }

    fn endpoint(&self, path: &str, params: &[(&str, &str)]) -> Result<Url, ApiError> {
        let mut url = self
            .base
            .join(path)
            .map_err(|e| ApiError::Parse(format!("endpoint {}: {}", path, e)))?;
        {
            let mut query = url.query_pairs_mut();
            for (key, value) in params {
                query.append_pair(key, value);
            }
            query.append_pair("client", &self.client_id);
        }
        Ok(url)
    }

    fn authorized(
        &self,
        request: reqwest::RequestBuilder,
        auth: &SecretString,
    ) -> Result<reqwest::RequestBuilder, ApiError> {
        let mut value = HeaderValue::from_str(auth.expose_secret())
            .map_err(|_| ApiError::Parse("authorization header is not valid ASCII".into()))?;
        value.set_sensitive(true);
        Ok(request.header(AUTHORIZATION, value))
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Vec<u8>, ApiError> {
        let response = tokio::time::timeout(self.timeout, request.send())
            .await
            .map_err(|_| ApiError::Timeout)??;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ApiError::Unauthorized(status.as_u16()));
        }
        if !status.is_success() {
            return Err(ApiError::HttpStatus(status.as_u16()));
        }

        read_limited_bytes(response, MAX_RESPONSE_SIZE).await
    }

    async fn send_text(&self, request: reqwest::RequestBuilder) -> Result<String, ApiError> {
        let bytes = self.send(request).await?;
        String::from_utf8(bytes).map_err(|_| ApiError::Parse("response is not UTF-8".into()))
    }
}

impl ReaderApi for HttpReaderApi {
    async fn login(&self, username: &str, password: &SecretString) -> Result<SecretString, ApiError> {
        let url = self
            .base
            .join("accounts/ClientLogin")
            .map_err(|e| ApiError::Parse(e.to_string()))?;
        let continue_url = self.base.as_str().to_string();
        let body = encode_form(&[
            ("service", "reader"),
            ("Email", username),
            ("Passwd", password.expose_secret()),
            ("source", &self.client_id),
            ("continue", &continue_url),
        ]);

        tracing::debug!(user = %username, "Requesting authorization token");
        let request = self
            .client
            .post(url)
            .header(CONTENT_TYPE, FORM_CONTENT_TYPE)
            .body(body);
        let text = self.send_text(request).await?;

        parse_auth_token(&text)
            .map(|token| SecretString::from(token.to_string()))
            .ok_or(ApiError::MissingAuthToken)
    }

    async fn subscriptions(&self, auth: &SecretString) -> Result<Vec<Subscription>, ApiError> {
        let url = self.endpoint("reader/api/0/subscription/list", &[("output", "json")])?;
        let request = self.authorized(self.client.get(url), auth)?;
        let bytes = self.send(request).await?;

        let parsed: SubscriptionListResponse =
            serde_json::from_slice(&bytes).map_err(|e| ApiError::Parse(e.to_string()))?;
        tracing::debug!(count = parsed.subscriptions.len(), "Fetched subscription list");
        Ok(parsed.subscriptions)
    }

    async fn unread_counts(&self, auth: &SecretString) -> Result<Vec<UnreadCount>, ApiError> {
        let url = self.endpoint(
            "reader/api/0/unread-count",
            &[("all", "true"), ("output", "json")],
        )?;
        let request = self.authorized(self.client.get(url), auth)?;
        let bytes = self.send(request).await?;

        let parsed: UnreadCountResponse =
            serde_json::from_slice(&bytes).map_err(|e| ApiError::Parse(e.to_string()))?;
        Ok(parsed.unreadcounts)
    }

    async fn edit_token(&self, auth: &SecretString) -> Result<String, ApiError> {
        let url = self.endpoint("reader/api/0/token", &[])?;
        let request = self.authorized(self.client.get(url), auth)?;
        let token = self.send_text(request).await?.trim().to_string();

        if token.is_empty() {
            return Err(ApiError::Parse("empty edit token".into()));
        }
        Ok(token)
    }

    async fn edit(
        &self,
        auth: &SecretString,
        token: &str,
        request: &EditRequest,
    ) -> Result<(), ApiError> {
        let path = match request {
            EditRequest::Subscribe(_) | EditRequest::Unsubscribe(_) => {
                "reader/api/0/subscription/edit"
            }
            EditRequest::Tag(_) => "reader/api/0/edit-tag",
        };
        let url = self.endpoint(path, &[])?;

        let fields = request.form_fields();
        let mut pairs: Vec<(&str, &str)> = fields.iter().map(|(k, v)| (*k, v.as_str())).collect();
        pairs.push(("T", token));

        let builder = self
            .client
            .post(url)
            .header(CONTENT_TYPE, FORM_CONTENT_TYPE)
            .body(encode_form(&pairs));
        let builder = self.authorized(builder, auth)?;
        let ack = self.send_text(builder).await?;

        if ack.trim() != "OK" {
            return Err(ApiError::Parse(format!(
                "unexpected edit acknowledgement: {}",
                ack.trim()
            )));
        }
        Ok(())
    }
}

fn encode_form(pairs: &[(&str, &str)]) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish()
}

/// Extract the token from a `ClientLogin` body (`SID=..`, `LSID=..`, `Auth=..` lines).
fn parse_auth_token(body: &str) -> Option<&str> {
    body.lines()
        .find_map(|line| line.trim().strip_prefix("Auth="))
        .filter(|token| !token.is_empty())
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, ApiError> {
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(ApiError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(ApiError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}
