use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt as _, Full};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use tokio::time::Instant;

use super::wire;
use super::{Error, HttpRequest, HttpResponse, Result};

/// Unreachable targets should fail well before the OS connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

type Connector = HttpsConnector<HttpConnector>;

/// Pooled HTTP/1.1 client shared by every VU of a run. Cloning is cheap.
#[derive(Debug, Clone)]
pub struct HttpClient {
    pool: Client<Connector, Full<Bytes>>,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new(Some(DEFAULT_CONNECT_TIMEOUT))
    }
}

/// A request ready for hyper plus the bytes it will put on the wire.
struct Outgoing {
    request: hyper::Request<Full<Bytes>>,
    bytes_sent: u64,
    timeout: Option<Duration>,
}

impl HttpClient {
    #[must_use]
    pub fn new(connect_timeout: Option<Duration>) -> Self {
        let mut tcp = HttpConnector::new();
        tcp.enforce_http(false);
        tcp.set_connect_timeout(connect_timeout);
        tcp.set_nodelay(true);

        let connector = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .wrap_connector(tcp);

        Self {
            pool: Client::builder(TokioExecutor::new()).build(connector),
        }
    }

    /// Sends `req` and buffers the whole response body.
    ///
    /// Any status code, 5xx included, is `Ok`. `Err` means no complete response arrived.
    pub async fn perform(&self, req: HttpRequest) -> Result<HttpResponse> {
        let Outgoing {
            request,
            bytes_sent,
            timeout,
        } = prepare(req)?;

        let started = Instant::now();
        let exchange = async {
            let (head, body) = self.pool.request(request).await?.into_parts();
            let body = body.collect().await?.to_bytes();
            Ok::<_, Error>((head, body))
        };
        let (head, body) = match timeout {
            None => exchange.await?,
            Some(limit) => tokio::time::timeout(limit, exchange)
                .await
                .map_err(|_| Error::Timeout(limit))??,
        };
        let duration = started.elapsed();

        let bytes_received =
            wire::response_head_bytes(head.status, &head.headers).saturating_add(body.len() as u64);

        Ok(HttpResponse {
            status: head.status.as_u16(),
            headers: fold_headers(&head.headers),
            body,
            duration,
            bytes_sent,
            bytes_received,
        })
    }
}

fn target_url(url: &str, params: &[(String, String)]) -> Result<url::Url> {
    let mut parsed = url::Url::parse(url).map_err(|_| Error::InvalidUrl(url.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(Error::UnsupportedScheme(url.to_string()));
    }
    if !params.is_empty() {
        parsed.query_pairs_mut().extend_pairs(params);
    }
    Ok(parsed)
}

fn prepare(req: HttpRequest) -> Result<Outgoing> {
    let HttpRequest {
        method,
        url,
        headers,
        params,
        body,
        timeout,
    } = req;

    let target = target_url(&url, &params)?;
    let uri: hyper::Uri = target
        .as_str()
        .parse()
        .map_err(|_| Error::InvalidUrl(target.to_string()))?;

    let path = uri.path_and_query().map_or("/", |p| p.as_str());
    let mut bytes_sent = wire::request_line_bytes(&method, path);
    let mut builder = hyper::Request::builder().method(method).uri(uri.clone());

    // Host and Content-Length are set explicitly so the byte estimate matches what is sent.
    let mut implicit: Vec<(http::HeaderName, String)> = Vec::with_capacity(2);
    if !wire::has_header(&headers, "host")
        && let Some(host) = wire::host_header_value(&target)
    {
        implicit.push((http::header::HOST, host));
    }
    if !body.is_empty() && !wire::has_header(&headers, "content-length") {
        implicit.push((http::header::CONTENT_LENGTH, body.len().to_string()));
    }
    for (name, value) in implicit {
        bytes_sent += wire::header_line_bytes(name.as_str().as_bytes(), value.as_bytes());
        builder = builder.header(name, value);
    }

    for (name, value) in &headers {
        let name = http::HeaderName::from_bytes(name.as_bytes())?;
        let value = http::HeaderValue::from_str(value)?;
        bytes_sent += wire::header_line_bytes(name.as_str().as_bytes(), value.as_bytes());
        builder = builder.header(name, value);
    }
    bytes_sent += wire::CRLF + body.len() as u64;

    Ok(Outgoing {
        request: builder.body(Full::new(body))?,
        bytes_sent,
        timeout,
    })
}

/// Lowercased names; repeated headers are joined with ", ".
fn fold_headers(headers: &http::HeaderMap) -> Vec<(String, String)> {
    let mut out: Vec<(String, String)> = Vec::with_capacity(headers.keys_len());
    for name in headers.keys() {
        let joined = headers
            .get_all(name)
            .iter()
            .map(|v| String::from_utf8_lossy(v.as_bytes()))
            .collect::<Vec<_>>()
            .join(", ");
        out.push((name.as_str().to_string(), joined));
    }
    out.sort_by(|a, b| a.0.cmp(&b.0));
    out
}
