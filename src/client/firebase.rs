//! # Firebase REST Client
//!
//! `RemoteDataClient` over the realtime database REST API. Fetches are plain
//! `GET {url}/{path}.json` requests with bounded retries for transient
//! failures; subscriptions hold an `Accept: text/event-stream` request open
//! and translate its frames into `StreamMessage`s on a per-connection task.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::ACCEPT;
use reqwest::{Client, Url};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use super::auth::AuthTokenCache;
use super::sse::{FirebaseStreamEvent, SseParser};
use super::{ClientError, RemoteDataClient, Subscription, SubscriptionFeed};
use crate::config::{ClientConfig, InputConfig};
use crate::constants::defaults;
use crate::registry::QuerySpec;

/// Realtime database client using the REST and streaming endpoints
#[derive(Clone)]
pub struct FirebaseRestClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    http: Client,
    stream_http: Client,
    base_url: Url,
    auth: AuthTokenCache,
    config: ClientConfig,
    shut_down: AtomicBool,
}

impl std::fmt::Debug for FirebaseRestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FirebaseRestClient")
            .field("base_url", &self.inner.base_url.as_str())
            .field("timeout_seconds", &self.inner.config.timeout_seconds)
            .field("max_retries", &self.inner.config.max_retries)
            .field("auth_cached", &self.inner.auth.is_cached())
            .finish()
    }
}

impl FirebaseRestClient {
    /// Create a client for the database rooted at `url`
    pub fn new(url: &str, secret: Option<String>, config: ClientConfig) -> Result<Self, ClientError> {
        let base_url = Url::parse(url)
            .map_err(|e| ClientError::InvalidRequest(format!("invalid url '{url}': {e}")))?;

        let user_agent = format!("firebase-input/{}", env!("CARGO_PKG_VERSION"));
        let http = Client::builder()
            .timeout(config.timeout())
            .user_agent(user_agent.clone())
            .build()?;
        // Streams stay open indefinitely, so only the connect phase is bounded
        let stream_http = Client::builder()
            .connect_timeout(config.timeout())
            .user_agent(user_agent)
            .build()?;

        info!(
            base_url = %base_url,
            timeout_seconds = config.timeout_seconds,
            max_retries = config.max_retries,
            "🌐 CLIENT: Created realtime database client"
        );

        Ok(Self {
            inner: Arc::new(ClientInner {
                http,
                stream_http,
                base_url,
                auth: AuthTokenCache::new(secret, config.token_refresh_interval()),
                config,
                shut_down: AtomicBool::new(false),
            }),
        })
    }

    pub fn from_config(config: &InputConfig) -> Result<Self, ClientError> {
        Self::new(&config.url, config.secret.clone(), config.client.clone())
    }

    /// Full request URL for a query, including auth and ordering parameters
    pub fn request_url(&self, query: &QuerySpec) -> Result<Url, ClientError> {
        self.inner.request_url(query)
    }

    fn ensure_open(&self) -> Result<(), ClientError> {
        if self.inner.shut_down.load(Ordering::Acquire) {
            Err(ClientError::Closed)
        } else {
            Ok(())
        }
    }
}

impl ClientInner {
    fn request_url(&self, query: &QuerySpec) -> Result<Url, ClientError> {
        let base = self.base_url.as_str().trim_end_matches('/');
        let path = query.path.trim_matches('/');
        let mut url = Url::parse(&format!("{base}/{path}.json")).map_err(|e| {
            ClientError::InvalidRequest(format!("invalid path '{}': {e}", query.path))
        })?;

        {
            let mut pairs = url.query_pairs_mut();
            if let Some(token) = self.auth.token() {
                pairs.append_pair("auth", &token);
            }
            if let Some(order_by) = &query.order_by {
                // The REST API expects orderBy as a JSON string literal
                let quoted = serde_json::to_string(order_by)
                    .map_err(|e| ClientError::InvalidRequest(e.to_string()))?;
                pairs.append_pair("orderBy", &quoted);
            }
            if let Some(limit) = query.limit_to_first {
                pairs.append_pair("limitToFirst", &limit.to_string());
            }
        }
        // Avoid a dangling '?' when no parameters were added
        if url.query() == Some("") {
            url.set_query(None);
        }
        Ok(url)
    }

    async fn fetch_once(&self, query: &QuerySpec) -> Result<Value, ClientError> {
        let url = self.request_url(query)?;
        let response = self.http.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Http {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json::<Value>().await?)
    }

    /// Hold one streaming connection open until it ends or errors
    async fn stream_once(
        &self,
        query: &QuerySpec,
        feed: &SubscriptionFeed,
    ) -> Result<(), ClientError> {
        let url = self.request_url(query)?;
        let response = self
            .stream_http
            .get(url)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Http {
                status: status.as_u16(),
                body,
            });
        }

        info!(query = %query.name, "🌐 CLIENT: Stream connected");
        let mut parser = SseParser::new();
        let mut body = response.bytes_stream();

        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            for frame in parser.push(&chunk) {
                match FirebaseStreamEvent::from_frame(&frame) {
                    Ok(FirebaseStreamEvent::Change { kind, path, data }) => {
                        if !feed.data(kind, path, data).await {
                            return Ok(());
                        }
                    }
                    Ok(FirebaseStreamEvent::KeepAlive) => {
                        debug!(query = %query.name, "🌐 CLIENT: keep-alive");
                    }
                    Err(ClientError::Decode(reason)) => {
                        if !feed.error(ClientError::Decode(reason)).await {
                            return Ok(());
                        }
                    }
                    Err(fatal) => return Err(fatal),
                }
            }
        }

        Err(ClientError::StreamClosed(
            "server ended the event stream".to_string(),
        ))
    }

    /// Connection task: stream, report, and reconnect while allowed
    async fn run_stream(self: Arc<Self>, query: QuerySpec, feed: SubscriptionFeed) {
        loop {
            if feed.is_closed() {
                break;
            }

            let outcome = tokio::select! {
                outcome = self.stream_once(&query, &feed) => outcome,
                _ = feed.closed() => break,
            };
            let error = match outcome {
                Ok(()) => break,
                Err(error) => error,
            };

            if error == ClientError::AuthRevoked {
                self.auth.invalidate();
            }
            if !matches!(error, ClientError::StreamClosed(_)) && !feed.error(error.clone()).await {
                break;
            }

            warn!(
                query = %query.name,
                error = %error,
                "🌐 CLIENT: Stream disconnected"
            );
            if !feed.disconnected(error).await {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.reconnect_delay()) => {}
                _ = feed.closed() => break,
            }
            info!(query = %query.name, "🌐 CLIENT: Reconnecting stream");
        }
        debug!(query = %query.name, "🌐 CLIENT: Stream task finished");
    }
}

#[async_trait]
impl RemoteDataClient for FirebaseRestClient {
    #[instrument(skip(self, query), fields(query = %query.name))]
    async fn fetch(&self, query: &QuerySpec) -> Result<Value, ClientError> {
        self.ensure_open()?;

        let max_retries = self.inner.config.max_retries;
        let mut attempt = 0;
        loop {
            match self.inner.fetch_once(query).await {
                Ok(value) => return Ok(value),
                Err(error) if error.is_retryable() && attempt < max_retries => {
                    attempt += 1;
                    let backoff = self.inner.config.retry_backoff() * attempt;
                    warn!(
                        attempt = attempt,
                        max_retries = max_retries,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %error,
                        "🌐 CLIENT: Retrying fetch"
                    );
                    tokio::time::sleep(backoff).await;
                    self.ensure_open()?;
                }
                Err(error) => return Err(error),
            }
        }
    }

    async fn subscribe(&self, query: &QuerySpec) -> Result<Subscription, ClientError> {
        self.ensure_open()?;
        // Surface malformed paths now rather than on the connection task
        self.inner.request_url(query)?;

        let (subscription, feed) =
            Subscription::channel(query.name.clone(), defaults::STREAM_BUFFER_SIZE);
        tokio::spawn(Arc::clone(&self.inner).run_stream(query.clone(), feed));
        Ok(subscription)
    }

    async fn shutdown(&self) -> Result<(), ClientError> {
        if !self.inner.shut_down.swap(true, Ordering::AcqRel) {
            info!("🌐 CLIENT: Shutting down realtime database client");
        }
        self.inner.auth.invalidate();
        Ok(())
    }
}

impl FirebaseRestClient {
    /// Whether the cached credential is currently held
    pub fn has_cached_credential(&self) -> bool {
        self.inner.auth.is_cached()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(secret: Option<&str>) -> FirebaseRestClient {
        FirebaseRestClient::new(
            "https://example.firebaseio.com/",
            secret.map(str::to_string),
            ClientConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_request_url_plain() {
        let url = client(None)
            .request_url(&QuerySpec::new("u", "/users/"))
            .unwrap();
        assert_eq!(url.as_str(), "https://example.firebaseio.com/users.json");
    }

    #[test]
    fn test_request_url_with_auth_and_hints() {
        let query = QuerySpec::new("u", "/users")
            .with_order_by("$key")
            .with_limit_to_first(5);
        let url = client(Some("s3cr3t")).request_url(&query).unwrap();

        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("auth".to_string(), "s3cr3t".to_string()),
                ("orderBy".to_string(), "\"$key\"".to_string()),
                ("limitToFirst".to_string(), "5".to_string()),
            ]
        );
    }

    #[test]
    fn test_invalid_url_is_rejected() {
        assert!(FirebaseRestClient::new("not a url", None, ClientConfig::default()).is_err());
    }

    #[tokio::test]
    async fn test_shutdown_invalidates_and_rejects_requests() {
        let client = client(Some("s3cr3t"));
        client.request_url(&QuerySpec::new("u", "/u")).unwrap();
        assert!(client.has_cached_credential());

        client.shutdown().await.unwrap();
        assert!(!client.has_cached_credential());
        assert_eq!(
            client.fetch(&QuerySpec::new("u", "/u")).await,
            Err(ClientError::Closed)
        );
        assert!(matches!(
            client.subscribe(&QuerySpec::new("u", "/u")).await,
            Err(ClientError::Closed)
        ));
    }
}
