//! Gmail REST API client.

use crate::access::MailAccess;
use crate::error::{MailError, Result};
use crate::provider::MailProviderClient;
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use mailscan_core::{MailMessage, ScanWindow};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1";

/// Gmail list pages cap out at 500 ids per request.
const LIST_PAGE_SIZE: usize = 500;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    messages: Vec<MessageRef>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailMessage {
    id: String,
    thread_id: Option<String>,
    internal_date: Option<String>,
    snippet: Option<String>,
    payload: Option<Payload>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Payload {
    #[serde(default)]
    headers: Vec<Header>,
    mime_type: Option<String>,
    body: Option<Body>,
    #[serde(default)]
    parts: Vec<Payload>,
}

#[derive(Debug, Deserialize)]
struct Header {
    name: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct Body {
    data: Option<String>,
}

/// Client for the Gmail users.messages endpoints.
pub struct GmailClient {
    http: Client,
    base_url: String,
}

impl GmailClient {
    /// Build a client with the given per-request timeout.
    ///
    /// # Errors
    /// Returns `MailError::Http` if the HTTP client cannot be built.
    pub fn new(timeout_secs: u64) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            http,
            base_url: GMAIL_API_BASE.to_string(),
        })
    }

    /// Point the client at a different API base (tests).
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown error".to_string());
        Err(MailError::Api {
            status: status.as_u16(),
            message: body,
        })
    }
}

#[async_trait]
impl MailProviderClient for GmailClient {
    async fn list_message_ids(
        &self,
        access: &MailAccess,
        window: &ScanWindow,
        max: usize,
    ) -> Result<Vec<String>> {
        let query = list_query(window);

        let mut ids = Vec::new();
        if max == 0 {
            return Ok(ids);
        }
        let mut page_token: Option<String> = None;

        loop {
            let page_size = LIST_PAGE_SIZE.min(max - ids.len());
            let mut request = self
                .http
                .get(format!("{}/users/me/messages", self.base_url))
                .bearer_auth(&access.access_token)
                .query(&[("q", query.as_str())])
                .query(&[("maxResults", page_size.to_string().as_str())]);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }

            let response = Self::check(request.send().await?).await?;
            let page: ListResponse = response
                .json()
                .await
                .map_err(|e| MailError::Decode(format!("message list: {e}")))?;

            ids.extend(page.messages.into_iter().map(|m| m.id));

            if ids.len() >= max {
                ids.truncate(max);
                break;
            }
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        debug!(count = ids.len(), "listed gmail messages");
        Ok(ids)
    }

    async fn get_message(&self, access: &MailAccess, id: &str) -> Result<MailMessage> {
        let response = self
            .http
            .get(format!("{}/users/me/messages/{id}", self.base_url))
            .bearer_auth(&access.access_token)
            .query(&[("format", "full")])
            .send()
            .await?;
        let response = Self::check(response).await?;

        let raw: GmailMessage = response
            .json()
            .await
            .map_err(|e| MailError::Decode(format!("message {id}: {e}")))?;

        Ok(into_mail_message(raw))
    }
}

/// Search query for an inclusive millisecond window. Gmail's
/// `after:`/`before:` take epoch seconds and `before:` is exclusive, so
/// the end bound rounds up to the next whole second.
fn list_query(window: &ScanWindow) -> String {
    format!(
        "in:inbox after:{} before:{}",
        window.start_ts / 1000,
        window.end_ts / 1000 + 1
    )
}

fn into_mail_message(raw: GmailMessage) -> MailMessage {
    let mut subject = String::new();
    let mut from = String::new();
    if let Some(payload) = &raw.payload {
        for header in &payload.headers {
            if header.name.eq_ignore_ascii_case("subject") {
                subject = header.value.clone();
            } else if header.name.eq_ignore_ascii_case("from") {
                from = header.value.clone();
            }
        }
    }

    let body = raw
        .payload
        .as_ref()
        .and_then(extract_text)
        .or(raw.snippet)
        .unwrap_or_default();

    let date_ts = raw
        .internal_date
        .as_deref()
        .and_then(|d| d.parse::<i64>().ok())
        .unwrap_or(0);

    MailMessage {
        id: raw.id,
        thread_id: raw.thread_id.unwrap_or_default(),
        subject,
        from,
        body,
        date_ts,
    }
}

/// Walk the MIME tree preferring text/plain parts over anything else.
fn extract_text(payload: &Payload) -> Option<String> {
    find_part(payload, true).or_else(|| find_part(payload, false))
}

fn find_part(payload: &Payload, plain_only: bool) -> Option<String> {
    let matches = !plain_only
        || payload
            .mime_type
            .as_deref()
            .is_some_and(|m| m.starts_with("text/plain"));
    if matches {
        if let Some(text) = payload.body.as_ref().and_then(decode_body) {
            return Some(text);
        }
    }

    payload.parts.iter().find_map(|p| find_part(p, plain_only))
}

fn decode_body(body: &Body) -> Option<String> {
    let data = body.data.as_deref()?;
    let bytes = URL_SAFE.decode(data).ok()?;
    String::from_utf8(bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_query_keeps_the_windows_final_second() {
        let window = ScanWindow::new(1_700_000_000_000, 1_700_000_500_250).expect("window");
        // A message at 1_700_000_500_100 ms is inside the inclusive
        // window; with before: exclusive at second granularity, the end
        // bound must sit one second past the truncated end or that
        // message is dropped.
        assert_eq!(
            list_query(&window),
            "in:inbox after:1700000000 before:1700000501"
        );
    }

    fn header(name: &str, value: &str) -> Header {
        Header {
            name: name.to_string(),
            value: value.to_string(),
        }
    }

    #[test]
    fn extracts_headers_and_plain_text_body() {
        let raw = GmailMessage {
            id: "m1".to_string(),
            thread_id: Some("t1".to_string()),
            internal_date: Some("1700000000000".to_string()),
            snippet: Some("snippet".to_string()),
            payload: Some(Payload {
                headers: vec![
                    header("Subject", "Interview invitation"),
                    header("From", "recruiter@example.com"),
                ],
                mime_type: Some("multipart/alternative".to_string()),
                body: None,
                parts: vec![Payload {
                    headers: vec![],
                    mime_type: Some("text/plain".to_string()),
                    body: Some(Body {
                        data: Some(URL_SAFE.encode("Hello candidate")),
                    }),
                    parts: vec![],
                }],
            }),
        };

        let message = into_mail_message(raw);
        assert_eq!(message.subject, "Interview invitation");
        assert_eq!(message.from, "recruiter@example.com");
        assert_eq!(message.body, "Hello candidate");
        assert_eq!(message.date_ts, 1_700_000_000_000);
        assert_eq!(message.thread_id, "t1");
    }

    #[test]
    fn falls_back_to_snippet_when_body_missing() {
        let raw = GmailMessage {
            id: "m2".to_string(),
            thread_id: None,
            internal_date: None,
            snippet: Some("just a preview".to_string()),
            payload: Some(Payload {
                headers: vec![],
                mime_type: Some("text/html".to_string()),
                body: None,
                parts: vec![],
            }),
        };

        let message = into_mail_message(raw);
        assert_eq!(message.body, "just a preview");
        assert_eq!(message.date_ts, 0);
    }

    #[test]
    fn prefers_nested_plain_text_over_html() {
        let raw = GmailMessage {
            id: "m3".to_string(),
            thread_id: None,
            internal_date: None,
            snippet: None,
            payload: Some(Payload {
                headers: vec![],
                mime_type: Some("multipart/mixed".to_string()),
                body: None,
                parts: vec![
                    Payload {
                        headers: vec![],
                        mime_type: Some("text/html".to_string()),
                        body: Some(Body {
                            data: Some(URL_SAFE.encode("<p>html</p>")),
                        }),
                        parts: vec![],
                    },
                    Payload {
                        headers: vec![],
                        mime_type: Some("text/plain".to_string()),
                        body: Some(Body {
                            data: Some(URL_SAFE.encode("plain text wins")),
                        }),
                        parts: vec![],
                    },
                ],
            }),
        };

        assert_eq!(into_mail_message(raw).body, "plain text wins");
    }
}
