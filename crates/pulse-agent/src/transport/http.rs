//! JSON over HTTP to `POST {base}/updates/`.

use std::error::Error as StdError;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use http::uri::Scheme;
use http::{Method, Request, Uri, header};
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use pulse_core::MetricRecord;
use pulse_core::security::{self, REAL_IP_HEADER, SIGNATURE_HEADER};
use tracing::{debug, info};

use super::{RetryPolicy, Sealed, Sealer, Transport, outbound_ipv4, with_scheme};
use crate::error::{TransportError, TransportResult};

/// Client-side deadline for one request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct HttpTransport {
    client: Client<HttpConnector, Full<Bytes>>,
    endpoint: Uri,
    sealer: Sealer,
    retry: RetryPolicy,
    real_ip: Option<String>,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(address: &str, sealer: Sealer) -> TransportResult<Self> {
        let endpoint: Uri = format!("{}/updates/", with_scheme(address))
            .parse()
            .map_err(|e: http::uri::InvalidUri| TransportError::Address {
                address: address.to_string(),
                reason: e.to_string(),
            })?;
        if endpoint.scheme() != Some(&Scheme::HTTP) {
            return Err(TransportError::Address {
                address: address.to_string(),
                reason: "only plain http is supported".to_string(),
            });
        }
        let client = Client::builder(TokioExecutor::new()).build_http();

        Ok(Self {
            client,
            endpoint,
            sealer,
            retry: RetryPolicy::default(),
            real_ip: outbound_ipv4().map(|ip| ip.to_string()),
            timeout: REQUEST_TIMEOUT,
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Override the `X-Real-IP` value; `None` omits the header.
    pub fn with_real_ip(mut self, real_ip: Option<String>) -> Self {
        self.real_ip = real_ip;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &Uri {
        &self.endpoint
    }

    fn request(&self, sealed: &Sealed) -> TransportResult<Request<Full<Bytes>>> {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(self.endpoint.clone())
            .header(header::CONTENT_TYPE, "application/json");
        if sealed.compressed {
            builder = builder
                .header(header::CONTENT_ENCODING, "gzip")
                .header(header::ACCEPT_ENCODING, "gzip");
        }
        if let Some(signature) = &sealed.signature {
            builder = builder.header(SIGNATURE_HEADER, signature);
        }
        if let Some(ip) = &self.real_ip {
            builder = builder.header(REAL_IP_HEADER, ip);
        }
        builder
            .body(Full::new(Bytes::from(sealed.body.clone())))
            .map_err(|e| TransportError::Address {
                address: self.endpoint.to_string(),
                reason: e.to_string(),
            })
    }

    async fn send_once(&self, sealed: &Sealed) -> TransportResult<()> {
        let request = self.request(sealed)?;
        let response = match tokio::time::timeout(self.timeout, self.client.request(request)).await
        {
            Err(_) => return Err(TransportError::Timeout(self.timeout)),
            Ok(Err(e)) => return Err(TransportError::Request(describe(&e))),
            Ok(Ok(response)) => response,
        };

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let gzipped = response
            .headers()
            .get(header::CONTENT_ENCODING)
            .is_some_and(|v| v.as_bytes().eq_ignore_ascii_case(b"gzip"));
        let body = match response.into_body().collect().await {
            Ok(collected) => {
                let bytes = collected.to_bytes();
                let bytes = if gzipped {
                    security::gunzip(&bytes).unwrap_or_else(|_| bytes.to_vec())
                } else {
                    bytes.to_vec()
                };
                String::from_utf8_lossy(&bytes).into_owned()
            }
            Err(_) => String::new(),
        };
        Err(TransportError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

/// Error text including its source chain.
fn describe(err: &(dyn StdError + 'static)) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, records: &[MetricRecord]) -> TransportResult<()> {
        if records.is_empty() {
            debug!("empty batch, nothing to send");
            return Ok(());
        }

        let sealed = self.sealer.seal(serde_json::to_vec(records)?)?;
        let started = Instant::now();
        self.retry.execute(|| self.send_once(&sealed)).await?;

        info!(
            uri = %self.endpoint,
            metrics = records.len(),
            bytes = sealed.body.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "batch delivered"
        );
        Ok(())
    }
}
