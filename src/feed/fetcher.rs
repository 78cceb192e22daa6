use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};
use reqwest::redirect::Policy;
use reqwest::StatusCode;
use thiserror::Error;

use super::date_parser::parse_date;

/// Feed media types in order of preference.
pub const ACCEPT_HEADER: &str = "application/atom+xml,application/rdf+xml,application/rss+xml,application/x-netcdf,application/xml;q=0.9,text/xml;q=0.2,*/*;q=0.1";

const MAX_REDIRECTS: usize = 10;

/// Transport-level failures. HTTP status codes are not errors here; they are
/// classified into a [`FetchOutcome`].
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, redirect loop, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// Request plus body download exceeded the configured timeout
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    /// Response body exceeded the configured size limit
    #[error("Response too large (limit {0} bytes)")]
    ResponseTooLarge(usize),
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
}

/// HTTP client settings.
#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub user_agent: String,
    pub timeout: Duration,
    pub max_bytes: usize,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            user_agent: concat!("podcrawl/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout: Duration::from_secs(10),
            max_bytes: 10 * 1024 * 1024,
        }
    }
}

/// A 2xx response body plus the validators needed for the next conditional fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedFeed {
    /// Final URL after redirects.
    pub url: String,
    pub content: Vec<u8>,
    pub etag: Option<String>,
    pub modified: Option<DateTime<Utc>>,
}

/// Classified result of one conditional GET.
#[derive(Debug)]
pub enum FetchOutcome {
    Fetched(FetchedFeed),
    /// 304, or any other redirect status that was not followed.
    NotModified { status: u16 },
    /// 4xx other than 429: the feed is gone or forbidden.
    Inaccessible { status: u16 },
    /// 429, 5xx and anything else unexpected.
    HttpError { status: u16 },
    NetworkError(FetchError),
}

impl FetchOutcome {
    /// Maps a response status to its outcome; `None` means 2xx.
    pub fn from_status(status: StatusCode) -> Option<Self> {
        let code = status.as_u16();
        if status.is_success() {
            None
        } else if status.is_redirection() {
            Some(Self::NotModified { status: code })
        } else if status == StatusCode::TOO_MANY_REQUESTS {
            Some(Self::HttpError { status: code })
        } else if status.is_client_error() {
            Some(Self::Inaccessible { status: code })
        } else {
            Some(Self::HttpError { status: code })
        }
    }
}

/// Build the shared HTTP client: feed `Accept` header, user agent,
/// bounded redirects with loop detection.
pub fn build_client(settings: &HttpSettings) -> reqwest::Result<reqwest::Client> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_HEADER));

    reqwest::Client::builder()
        .user_agent(settings.user_agent.as_str())
        .default_headers(headers)
        .redirect(create_redirect_policy())
        .pool_idle_timeout(Duration::from_secs(30))
        .tcp_keepalive(Duration::from_secs(60))
        .timeout(settings.timeout)
        .build()
}

/// Redirect policy with loop detection and limited hops.
fn create_redirect_policy() -> Policy {
    Policy::custom(|attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            return attempt.error(format!("Too many redirects (max {MAX_REDIRECTS})"));
        }

        let url = attempt.url();
        for prev in attempt.previous() {
            if prev.as_str() == url.as_str() {
                return attempt.error("Redirect loop detected");
            }
        }

        tracing::debug!(
            from = %attempt.previous().last().map(|u| u.as_str()).unwrap_or("initial"),
            to = %url,
            hop = attempt.previous().len() + 1,
            "Following redirect"
        );

        attempt.follow()
    })
}

/// Wraps an entity tag in double quotes unless it already is quoted
/// (strong or weak form).
pub fn quote_etag(etag: &str) -> String {
    let etag = etag.trim();
    if (etag.starts_with('"') || etag.starts_with("W/\"")) && etag.ends_with('"') && etag.len() > 1 {
        etag.to_owned()
    } else {
        format!("\"{}\"", etag.replace('"', "\\\""))
    }
}

/// IMF-fixdate, as used by `If-Modified-Since`.
pub fn http_date(dt: DateTime<Utc>) -> String {
    dt.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// `If-None-Match` / `If-Modified-Since` for the stored validators.
pub fn conditional_headers(etag: Option<&str>, modified: Option<DateTime<Utc>>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Some(etag) = etag.filter(|e| !e.trim().is_empty()) {
        match HeaderValue::from_str(&quote_etag(etag)) {
            Ok(value) => {
                headers.insert(IF_NONE_MATCH, value);
            }
            Err(e) => tracing::debug!(etag = %etag, error = %e, "Ignoring unusable stored ETag"),
        }
    }
    if let Some(modified) = modified {
        if let Ok(value) = HeaderValue::from_str(&http_date(modified)) {
            headers.insert(IF_MODIFIED_SINCE, value);
        }
    }
    headers
}

/// Issue a conditional GET and classify the response.
///
/// Never fails: transport problems are returned as
/// [`FetchOutcome::NetworkError`].
pub async fn fetch_feed(
    client: &reqwest::Client,
    url: &str,
    headers: HeaderMap,
    settings: &HttpSettings,
) -> FetchOutcome {
    let request = send_and_read(client, url, headers, settings.max_bytes);
    match tokio::time::timeout(settings.timeout, request).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => FetchOutcome::NetworkError(e),
        Err(_) => FetchOutcome::NetworkError(FetchError::Timeout(settings.timeout)),
    }
}

async fn send_and_read(
    client: &reqwest::Client,
    url: &str,
    headers: HeaderMap,
    max_bytes: usize,
) -> Result<FetchOutcome, FetchError> {
    let response = client.get(url).headers(headers).send().await?;

    if let Some(outcome) = FetchOutcome::from_status(response.status()) {
        return Ok(outcome);
    }

    let final_url = response.url().to_string();
    let etag = header_str(response.headers(), ETAG).map(str::to_owned);
    let modified = header_str(response.headers(), LAST_MODIFIED).and_then(parse_date);
    let content = read_limited_bytes(response, max_bytes).await?;

    Ok(FetchOutcome::Fetched(FetchedFeed {
        url: final_url,
        content,
        etag,
        modified,
    }))
}

fn header_str(headers: &HeaderMap, name: reqwest::header::HeaderName) -> Option<&str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if len > limit as u64 {
            return Err(FetchError::ResponseTooLarge(limit));
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge(limit));
        }
        bytes.extend_from_slice(&chunk);
    }

    // EDGE-005: fewer bytes than Content-Length means the transfer was cut short
    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{header, headers, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const BODY: &str = "<rss><channel><title>t</title></channel></rss>";

    fn settings() -> HttpSettings {
        HttpSettings {
            timeout: Duration::from_secs(5),
            ..HttpSettings::default()
        }
    }

    async fn fetch(server: &MockServer, route: &str, headers: HeaderMap) -> FetchOutcome {
        let client = build_client(&settings()).unwrap();
        fetch_feed(&client, &format!("{}{route}", server.uri()), headers, &settings()).await
    }

    #[test]
    fn test_quote_etag() {
        assert_eq!(quote_etag("abc"), "\"abc\"");
        assert_eq!(quote_etag("\"abc\""), "\"abc\"");
        assert_eq!(quote_etag("W/\"abc\""), "W/\"abc\"");
    }

    #[test]
    fn test_http_date() {
        let dt = Utc.with_ymd_and_hms(2015, 10, 21, 7, 28, 0).unwrap();
        assert_eq!(http_date(dt), "Wed, 21 Oct 2015 07:28:00 GMT");
    }

    #[test]
    fn test_conditional_headers() {
        let dt = Utc.with_ymd_and_hms(2015, 10, 21, 7, 28, 0).unwrap();
        let headers = conditional_headers(Some("abc"), Some(dt));
        assert_eq!(headers.get(IF_NONE_MATCH).unwrap(), "\"abc\"");
        assert_eq!(
            headers.get(IF_MODIFIED_SINCE).unwrap(),
            "Wed, 21 Oct 2015 07:28:00 GMT"
        );
        assert!(conditional_headers(Some(" "), None).is_empty());
        assert!(conditional_headers(None, None).is_empty());
    }

    #[test]
    fn test_status_classification() {
        assert!(FetchOutcome::from_status(StatusCode::OK).is_none());
        assert!(matches!(
            FetchOutcome::from_status(StatusCode::NOT_MODIFIED),
            Some(FetchOutcome::NotModified { status: 304 })
        ));
        assert!(matches!(
            FetchOutcome::from_status(StatusCode::GONE),
            Some(FetchOutcome::Inaccessible { status: 410 })
        ));
        assert!(matches!(
            FetchOutcome::from_status(StatusCode::TOO_MANY_REQUESTS),
            Some(FetchOutcome::HttpError { status: 429 })
        ));
        assert!(matches!(
            FetchOutcome::from_status(StatusCode::BAD_GATEWAY),
            Some(FetchOutcome::HttpError { status: 502 })
        ));
    }

    #[tokio::test]
    async fn test_fetch_success_captures_validators() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .and(headers("accept", ACCEPT_HEADER.split(',').collect()))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(BODY)
                    .insert_header("ETag", "\"v1\"")
                    .insert_header("Last-Modified", "Wed, 21 Oct 2015 07:28:00 GMT"),
            )
            .mount(&server)
            .await;

        match fetch(&server, "/feed", HeaderMap::new()).await {
            FetchOutcome::Fetched(feed) => {
                assert_eq!(feed.url, format!("{}/feed", server.uri()));
                assert_eq!(feed.content, BODY.as_bytes());
                assert_eq!(feed.etag.as_deref(), Some("\"v1\""));
                assert_eq!(
                    feed.modified,
                    Some(Utc.with_ymd_and_hms(2015, 10, 21, 7, 28, 0).unwrap())
                );
            }
            other => panic!("expected Fetched, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_conditional_request_not_modified() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("if-none-match", "\"v1\""))
            .respond_with(ResponseTemplate::new(304))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = fetch(&server, "/feed", conditional_headers(Some("v1"), None)).await;
        assert!(matches!(outcome, FetchOutcome::NotModified { status: 304 }));
    }

    #[tokio::test]
    async fn test_redirect_reports_final_url() {
        let server = MockServer::start().await;
        Mock::given(path("/old"))
            .respond_with(
                ResponseTemplate::new(301).insert_header("Location", format!("{}/new", server.uri())),
            )
            .mount(&server)
            .await;
        Mock::given(path("/new"))
            .respond_with(ResponseTemplate::new(200).set_body_string(BODY))
            .mount(&server)
            .await;

        match fetch(&server, "/old", HeaderMap::new()).await {
            FetchOutcome::Fetched(feed) => assert_eq!(feed.url, format!("{}/new", server.uri())),
            other => panic!("expected Fetched, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_redirect_loop_is_network_error() {
        let server = MockServer::start().await;
        Mock::given(path("/loop"))
            .respond_with(
                ResponseTemplate::new(302).insert_header("Location", format!("{}/loop", server.uri())),
            )
            .mount(&server)
            .await;

        let outcome = fetch(&server, "/loop", HeaderMap::new()).await;
        assert!(matches!(
            outcome,
            FetchOutcome::NetworkError(FetchError::Network(_))
        ));
    }

    #[tokio::test]
    async fn test_gone_is_inaccessible() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(410))
            .mount(&server)
            .await;

        let outcome = fetch(&server, "/feed", HeaderMap::new()).await;
        assert!(matches!(outcome, FetchOutcome::Inaccessible { status: 410 }));
    }

    #[tokio::test]
    async fn test_server_error_is_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = fetch(&server, "/feed", HeaderMap::new()).await;
        assert!(matches!(outcome, FetchOutcome::HttpError { status: 503 }));
    }

    #[tokio::test]
    async fn test_body_over_limit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(2048)))
            .mount(&server)
            .await;

        let small = HttpSettings {
            max_bytes: 1024,
            ..settings()
        };
        let client = build_client(&small).unwrap();
        let outcome = fetch_feed(
            &client,
            &format!("{}/feed", server.uri()),
            HeaderMap::new(),
            &small,
        )
        .await;
        assert!(matches!(
            outcome,
            FetchOutcome::NetworkError(FetchError::ResponseTooLarge(1024))
        ));
    }

    #[tokio::test]
    async fn test_slow_response_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(BODY)
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let quick = HttpSettings {
            timeout: Duration::from_millis(100),
            ..settings()
        };
        let client = build_client(&quick).unwrap();
        let outcome = fetch_feed(
            &client,
            &format!("{}/feed", server.uri()),
            HeaderMap::new(),
            &quick,
        )
        .await;
        assert!(matches!(outcome, FetchOutcome::NetworkError(_)));
    }
}
