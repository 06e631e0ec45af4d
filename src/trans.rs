use std::{future::Future, time::Duration};

use serde::Deserialize;

use crate::{
    error::*,
    req::{req_handle_error, req_post, req_read_body},
};

/// Moves encoded CMP messages to a CA and back.
///
/// Implementations only deal in bytes. Everything CMP-specific (encoding, protection, validation)
/// happens in the transaction engine, so the same engine runs over HTTP, in tests over an
/// in-memory CA, or over any other channel.
pub trait Transport {
    /// Sends one request and returns the raw response.
    ///
    /// `timeout` bounds the whole exchange; `None` means no bound.
    fn send(
        &self,
        endpoint: &str,
        request: &[u8],
        timeout: Option<Duration>,
    ) -> impl Future<Output = Result<Vec<u8>, TransportError>> + Send;
}

/// HTTP settings for [`HttpTransport`].
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Proxy URL for all requests, e.g. `http://proxy.example:3128`.
    pub proxy: Option<String>,

    /// Ignore proxy settings from the environment.
    pub no_proxy: bool,

    /// Extra PEM encoded root certificates to trust for TLS.
    pub tls_roots_pem: Option<String>,

    /// TCP keep-alive interval, in seconds.
    pub keep_alive: Option<u64>,

    pub user_agent: Option<String>,

    /// Largest accepted response body, in bytes. Defaults to [`DEFAULT_MAX_RESPONSE_LEN`].
    pub max_response_len: Option<usize>,
}

/// Response size limit unless [`HttpConfig::max_response_len`] is set.
pub const DEFAULT_MAX_RESPONSE_LEN: usize = 1024 * 1024;

/// CMP over HTTP, [RFC 6712].
///
/// Requests are POSTed as `application/pkixcmp`. The underlying client pools connections, so
/// share one transport between transactions.
///
/// [RFC 6712]: https://datatracker.ietf.org/doc/html/rfc6712
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    max_response_len: usize,
}

impl HttpTransport {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let user_agent = config
            .user_agent
            .clone()
            .unwrap_or_else(|| format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")));

        let mut builder = reqwest::Client::builder().user_agent(user_agent);

        if let Some(proxy) = &config.proxy {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|err| CmpError::invalid_args(format!("proxy {proxy}: {err}")))?;
            builder = builder.proxy(proxy);
        }

        if config.no_proxy {
            builder = builder.no_proxy();
        }

        if let Some(secs) = config.keep_alive {
            builder = builder.tcp_keepalive(Duration::from_secs(secs));
        }

        if let Some(pem) = &config.tls_roots_pem {
            builder = add_root_certificates(builder, pem)?;
        }

        let client = builder
            .build()
            .map_err(|err| CmpError::invalid_args(format!("HTTP client: {err}")))?;

        Ok(HttpTransport {
            client,
            max_response_len: config.max_response_len.unwrap_or(DEFAULT_MAX_RESPONSE_LEN),
        })
    }

    /// Wraps an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        HttpTransport {
            client,
            max_response_len: DEFAULT_MAX_RESPONSE_LEN,
        }
    }
}

#[cfg(feature = "rustls-tls")]
fn add_root_certificates(
    mut builder: reqwest::ClientBuilder,
    pem: &str,
) -> Result<reqwest::ClientBuilder> {
    let mut rdr = std::io::BufReader::new(pem.as_bytes());

    for cert in rustls_pemfile::certs(&mut rdr) {
        let cert = cert.map_err(|err| CmpError::invalid_args(format!("TLS roots: {err}")))?;
        let cert = reqwest::Certificate::from_der(&cert)
            .map_err(|err| CmpError::invalid_args(format!("TLS roots: {err}")))?;
        builder = builder.add_root_certificate(cert);
    }

    Ok(builder)
}

#[cfg(not(feature = "rustls-tls"))]
fn add_root_certificates(
    _builder: reqwest::ClientBuilder,
    _pem: &str,
) -> Result<reqwest::ClientBuilder> {
    Err(CmpError::invalid_args(
        "TLS root certificates require the rustls-tls feature",
    ))
}

impl Transport for HttpTransport {
    async fn send(
        &self,
        endpoint: &str,
        request: &[u8],
        timeout: Option<Duration>,
    ) -> Result<Vec<u8>, TransportError> {
        log::debug!("Call endpoint: {endpoint}");

        let res = req_post(&self.client, endpoint, request.to_vec(), timeout).await?;
        let res = req_handle_error(res).await?;

        req_read_body(res, timeout, self.max_response_len).await
    }
}
