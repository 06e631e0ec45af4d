use std::{error::Error as StdError, io, time::Duration};

use reqwest::header::{HeaderValue, CONTENT_TYPE};

use crate::error::TransportError;

pub(crate) const PKIXCMP: &str = "application/pkixcmp";

/// Longest response body excerpt kept in an error.
const MAX_DETAIL_LEN: usize = 512;

pub(crate) async fn req_post(
    client: &reqwest::Client,
    url: &str,
    body: Vec<u8>,
    timeout: Option<Duration>,
) -> Result<reqwest::Response, TransportError> {
    let mut req = client
        .post(url)
        .header(CONTENT_TYPE, HeaderValue::from_static(PKIXCMP))
        .body(body);

    if let Some(timeout) = timeout {
        req = req.timeout(timeout);
    }

    log::trace!("{req:?}");
    req.send().await.map_err(|err| classify(err, timeout))
}

/// Passes CMP messages through, including those some CAs send with an HTTP error status.
pub(crate) async fn req_handle_error(
    res: reqwest::Response,
) -> Result<reqwest::Response, TransportError> {
    let content_type = res
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|val| val.to_str().ok())
        .map(str::to_owned);

    let is_cmp = content_type.as_deref().is_some_and(is_pkixcmp);

    if res.status().is_success() {
        return if is_cmp {
            Ok(res)
        } else {
            Err(TransportError::ContentType(content_type))
        };
    }

    if is_cmp {
        log::debug!("CMP message with HTTP status {}", res.status());
        return Ok(res);
    }

    let status = res.status().as_u16();
    let mut detail = req_safe_read_body(res).await;
    if detail.len() > MAX_DETAIL_LEN {
        let mut end = MAX_DETAIL_LEN;
        while !detail.is_char_boundary(end) {
            end -= 1;
        }
        detail.truncate(end);
    }

    Err(TransportError::Http { status, detail })
}

/// Reads the response body, failing once it grows beyond `limit` bytes.
pub(crate) async fn req_read_body(
    mut res: reqwest::Response,
    timeout: Option<Duration>,
    limit: usize,
) -> Result<Vec<u8>, TransportError> {
    let too_large = || TransportError::Transfer(format!("response body exceeds {limit} bytes"));

    let announced = res.content_length().unwrap_or(0);
    if announced > limit as u64 {
        return Err(too_large());
    }

    let mut body = Vec::with_capacity(announced as usize);

    while let Some(chunk) = res.chunk().await.map_err(|err| classify(err, timeout))? {
        if body.len() + chunk.len() > limit {
            return Err(too_large());
        }
        body.extend_from_slice(&chunk);
    }

    Ok(body)
}

pub(crate) async fn req_safe_read_body(res: reqwest::Response) -> String {
    // some servers close the connection abruptly after the body
    res.text().await.unwrap_or_default()
}

fn is_pkixcmp(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .is_some_and(|essence| essence.trim().eq_ignore_ascii_case(PKIXCMP))
}

fn classify(err: reqwest::Error, timeout: Option<Duration>) -> TransportError {
    if err.is_timeout() {
        return TransportError::Timeout(timeout.unwrap_or_default());
    }

    if err.is_connect() {
        return TransportError::Connect(error_chain(&err));
    }

    match io_error_kind(&err) {
        Some(io::ErrorKind::ConnectionRefused) => TransportError::Connect(error_chain(&err)),
        Some(io::ErrorKind::TimedOut) => TransportError::Timeout(timeout.unwrap_or_default()),
        Some(
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof,
        ) => TransportError::Reset(error_chain(&err)),

        // connection dropped before a complete response arrived
        _ if err.is_request() => TransportError::Reset(error_chain(&err)),

        // redirect, body, decode and builder errors
        _ => TransportError::Transfer(error_chain(&err)),
    }
}

fn io_error_kind(err: &(dyn StdError + 'static)) -> Option<io::ErrorKind> {
    let mut source = Some(err);

    while let Some(err) = source {
        if let Some(io_err) = err.downcast_ref::<io::Error>() {
            return Some(io_err.kind());
        }
        source = err.source();
    }

    None
}

fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut msg = err.to_string();
    let mut source = err.source();

    while let Some(err) = source {
        msg.push_str(": ");
        msg.push_str(&err.to_string());
        source = err.source();
    }

    msg
}
