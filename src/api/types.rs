use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Errors returned by a [`ReaderApi`](super::ReaderApi) call.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// Request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// Server answered 401 or 403
    #[error("Not authorized: status {0}")]
    Unauthorized(u16),
    /// Any other non-2xx status
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Response body exceeded the size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Body could not be decoded
    #[error("Malformed response: {0}")]
    Parse(String),
    /// Login answered 200 but carried no `Auth=` line
    #[error("Login response did not contain an Auth token")]
    MissingAuthToken,
}

impl ApiError {
    /// True when the remote side refused our credentials or token.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, ApiError::Unauthorized(_) | ApiError::MissingAuthToken)
    }
}

// ============================================================================
// Remote Tags
// ============================================================================

/// Item states understood by the remote service.
pub mod tags {
    pub const READ: &str = "user/-/state/com.google/read";
    pub const KEPT_UNREAD: &str = "user/-/state/com.google/kept-unread";
    pub const TRACKING_KEPT_UNREAD: &str = "user/-/state/com.google/tracking-kept-unread";
    pub const STARRED: &str = "user/-/state/com.google/starred";
}

/// Namespace prefix the service puts in front of every feed stream id.
pub const FEED_STREAM_PREFIX: &str = "feed/";

/// Stream id of the "shared links" pseudo-feed.
pub const LINK_STREAM: &str = "user/-/source/com.google/link";

// ============================================================================
// Response Payloads
// ============================================================================

/// One entry of the remote subscription list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    /// Stream id, e.g. `feed/https://example.com/rss`.
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub html_url: Option<String>,
    /// Newest item time in epoch seconds (0 when the service omits it).
    #[serde(
        default,
        rename = "newestItemTimestampUsec",
        deserialize_with = "usec_to_secs"
    )]
    pub timestamp: i64,
}

impl Subscription {
    /// Feed URL with the stream namespace removed.
    pub fn feed_url(&self) -> &str {
        self.id
            .strip_prefix(FEED_STREAM_PREFIX)
            .unwrap_or(&self.id)
    }
}

/// Unread counter and freshness marker for one stream.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UnreadCount {
    pub id: String,
    #[serde(default)]
    pub count: u32,
    #[serde(
        default,
        rename = "newestItemTimestampUsec",
        deserialize_with = "usec_to_secs"
    )]
    pub timestamp: i64,
}

impl UnreadCount {
    /// Only `feed/...` streams correspond to subscriptions; labels and states do not.
    pub fn is_feed(&self) -> bool {
        self.id.starts_with(FEED_STREAM_PREFIX)
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct SubscriptionListResponse {
    #[serde(default)]
    pub subscriptions: Vec<Subscription>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UnreadCountResponse {
    #[serde(default)]
    pub unreadcounts: Vec<UnreadCount>,
}

/// The service sends microsecond timestamps as decimal strings, older
/// deployments as plain numbers.
fn usec_to_secs<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(i64),
    }

    let usec = match Raw::deserialize(deserializer)? {
        Raw::Number(n) => n,
        Raw::Text(s) => s.trim().parse::<i64>().map_err(serde::de::Error::custom)?,
    };
    Ok(usec / 1_000_000)
}

// ============================================================================
// Edit Requests
// ============================================================================

/// Stream an edited item belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamRef {
    /// A regular subscription, identified by its feed URL.
    Feed(String),
    /// The shared-links pseudo-feed.
    Link,
}

impl StreamRef {
    /// Classify a locally stored subscription source. Accepts bare feed URLs
    /// and `feed/` stream ids.
    pub fn from_source(source: &str) -> Self {
        let source = source.trim();
        if source == LINK_STREAM {
            return StreamRef::Link;
        }
        let url = source.strip_prefix(FEED_STREAM_PREFIX).unwrap_or(source);
        StreamRef::Feed(url.to_string())
    }

    pub fn stream_id(&self) -> String {
        match self {
            StreamRef::Feed(url) => format!("{}{}", FEED_STREAM_PREFIX, url),
            StreamRef::Link => LINK_STREAM.to_string(),
        }
    }
}

/// Tag change on a single item. At least one of `add`/`remove` is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagEdit {
    pub item_id: String,
    pub stream: StreamRef,
    pub add: Option<String>,
    pub remove: Option<String>,
}

/// A mutating request as sent to the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditRequest {
    Subscribe(String),
    Unsubscribe(String),
    Tag(TagEdit),
}

impl EditRequest {
    pub fn add_tag(item_id: &str, stream: StreamRef, tag: &str) -> Self {
        Self::Tag(TagEdit {
            item_id: item_id.to_string(),
            stream,
            add: Some(tag.to_string()),
            remove: None,
        })
    }

    pub fn remove_tag(item_id: &str, stream: StreamRef, tag: &str) -> Self {
        Self::Tag(TagEdit {
            item_id: item_id.to_string(),
            stream,
            add: None,
            remove: Some(tag.to_string()),
        })
    }

    pub fn add_and_remove_tag(item_id: &str, stream: StreamRef, add: &str, remove: &str) -> Self {
        Self::Tag(TagEdit {
            item_id: item_id.to_string(),
            stream,
            add: Some(add.to_string()),
            remove: Some(remove.to_string()),
        })
    }

    /// `None` when neither tag is given.
    pub fn tag_edit(
        item_id: &str,
        stream: StreamRef,
        add: Option<&str>,
        remove: Option<&str>,
    ) -> Option<Self> {
        match (add, remove) {
            (None, None) => None,
            (add, remove) => Some(Self::Tag(TagEdit {
                item_id: item_id.to_string(),
                stream,
                add: add.map(str::to_string),
                remove: remove.map(str::to_string),
            })),
        }
    }

    /// Form fields for the request, excluding the edit token.
    pub fn form_fields(&self) -> Vec<(&'static str, String)> {
        match self {
            EditRequest::Subscribe(url) => vec![
                ("s", StreamRef::Feed(url.clone()).stream_id()),
                ("i", "null".to_string()),
                ("ac", "subscribe".to_string()),
            ],
            EditRequest::Unsubscribe(url) => vec![
                ("s", StreamRef::Feed(url.clone()).stream_id()),
                ("i", "null".to_string()),
                ("ac", "unsubscribe".to_string()),
            ],
            EditRequest::Tag(edit) => {
                let mut fields = vec![
                    ("i", edit.item_id.clone()),
                    ("s", edit.stream.stream_id()),
                ];
                if let Some(tag) = &edit.add {
                    fields.push(("a", tag.clone()));
                }
                if let Some(tag) = &edit.remove {
                    fields.push(("r", tag.clone()));
                }
                fields.push(("ac", "edit-tags".to_string()));
                fields.push(("async", "true".to_string()));
                fields
            }
        }
    }
}
