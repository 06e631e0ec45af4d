//! Error types of the transaction engine.

use std::{fmt, time::Duration};

use der::asn1::ObjectIdentifier;
use thiserror::Error;

use crate::{
    asn1::BodyKind,
    status::{FailInfo, StatusInfo},
};

/// Result type alias using [`CmpError`].
pub type Result<T, E = CmpError> = std::result::Result<T, E>;

/// Failure reported by a [`Transport`](crate::Transport) implementation.
///
/// The variants are kept apart so that callers can tell a CA that is down from one that is slow.
#[derive(Debug, Error)]
pub enum TransportError {
    /// No connection could be established.
    #[error("connect failed: {0}")]
    Connect(String),

    /// The exchange did not finish in time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The connection was closed or reset by the peer mid-exchange.
    #[error("connection reset: {0}")]
    Reset(String),

    /// The server answered with a non-success HTTP status and no CMP message.
    #[error("HTTP status {status}: {detail}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        detail: String,
    },

    /// The server answered with something other than `application/pkixcmp`.
    #[error("unexpected content type {0:?}")]
    ContentType(Option<String>),

    /// The HTTP exchange failed for another reason, e.g. too many redirects or an oversized body.
    #[error("transfer failed: {0}")]
    Transfer(String),
}

/// Error report sent by the server in an `error` body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerReport {
    pub status: StatusInfo,
    pub error_code: Option<i64>,
    pub details: Vec<String>,
}

impl fmt::Display for ServerReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.status)?;

        if let Some(code) = self.error_code {
            write!(f, "; errorCode: {code}")?;
        }

        if !self.details.is_empty() {
            write!(f, "; errorDetails: {}", self.details.join(", "))?;
        }

        Ok(())
    }
}

/// Coarse classification of a [`CmpError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Transport,
    Decode,
    Protection,
    Validation,
    Server,
    PollingTimeout,
    Cancelled,
    Usage,
}

/// Every way a CMP transaction can fail.
///
/// Each failure is final for the transaction it occurred in.
#[derive(Debug, Error)]
pub enum CmpError {
    #[error("failed to connect to CMP server: {0}")]
    ConnectFailed(String),

    #[error("CMP server did not answer within {0:?}")]
    TransportTimeout(Duration),

    #[error("connection reset by CMP server: {0}")]
    PeerReset(String),

    #[error("error transferring CMP message: {0}")]
    TransferError(String),

    #[error("failed to decode CMP message: {0}")]
    Decode(der::Error),

    #[error("failed to encode CMP message: {0}")]
    Encode(#[from] der::Error),

    #[error("request must be protected but no protection is configured")]
    MissingProtection,

    #[error("error protecting message: {0}")]
    ErrorProtectingMessage(String),

    #[error("error validating protection: {0}")]
    ErrorValidatingProtection(String),

    #[error("no suitable certificate to verify the response signature")]
    NoSuitableSenderCert,

    #[error("unsupported algorithm {0}")]
    UnsupportedAlgorithm(ObjectIdentifier),

    #[error("transaction id unmatched: expected {expected:02x?}, got {actual:02x?}")]
    TransactionIdUnmatched {
        expected: Vec<u8>,
        actual: Option<Vec<u8>>,
    },

    #[error("recipient nonce unmatched: expected {expected:02x?}, got {actual:02x?}")]
    RecipNonceUnmatched { expected: Vec<u8>, actual: Vec<u8> },

    #[error("unexpected protocol version number {0}")]
    UnexpectedPvno(u8),

    #[error("unexpected PKI body {actual}, expected one of {}", DisplayKinds(.expected))]
    UnexpectedPkiBody {
        expected: Vec<BodyKind>,
        actual: BodyKind,
    },

    #[error("unknown PKIStatus value {0}")]
    UnknownPkiStatus(i64),

    #[error("PKIFailureInfo out of range: bit {0}")]
    FailInfoOutOfRange(usize),

    #[error("unexpected PKIStatus {0}")]
    UnexpectedPkiStatus(StatusInfo),

    #[error("CMP server reported an error: {0}")]
    ServerError(ServerReport),

    #[error("request rejected by CMP server: {fail_info} {}", .text.join(", "))]
    RequestRejected { fail_info: FailInfo, text: Vec<String> },

    #[error("polling did not finish within {0:?}")]
    PollingTimeout(Duration),

    #[error("transaction cancelled")]
    Cancelled,

    #[error("certReqId mismatch: expected {expected}, got {actual}")]
    CertIdMismatch { expected: i64, actual: i64 },

    #[error("{0} responses received, only one is supported")]
    MultipleResponsesNotSupported(usize),

    #[error("certificate response not found")]
    CertResponseNotFound,

    #[error("certificate not found in response")]
    CertificateNotFound,

    #[error("encrypted certificates are not supported")]
    EncryptedCertNotSupported,

    #[error("issued certificate does not match the requested key")]
    CertAndKeyDoNotMatch,

    #[error("unexpected confirmation response {0}")]
    UnexpectedConfirmation(BodyKind),

    #[error("bad checkAfter value {0} in pollRep")]
    BadCheckAfter(i64),

    #[error("revocation response has {0} status entries, expected one")]
    WrongRpComponentCount(usize),

    #[error("revocation response names a different certificate")]
    WrongCertIdInRp,

    #[error("invalid arguments: {0}")]
    InvalidArgs(String),
}

impl CmpError {
    pub(crate) fn invalid_args(msg: impl Into<String>) -> Self {
        Self::InvalidArgs(msg.into())
    }

    pub(crate) fn validating(msg: impl Into<String>) -> Self {
        Self::ErrorValidatingProtection(msg.into())
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        use CmpError::*;

        match self {
            ConnectFailed(_) | TransportTimeout(_) | PeerReset(_) | TransferError(_) => {
                ErrorKind::Transport
            }
            Decode(_) => ErrorKind::Decode,
            MissingProtection
            | ErrorProtectingMessage(_)
            | ErrorValidatingProtection(_)
            | NoSuitableSenderCert
            | UnsupportedAlgorithm(_) => ErrorKind::Protection,
            ServerError(_) | RequestRejected { .. } => ErrorKind::Server,
            PollingTimeout(_) => ErrorKind::PollingTimeout,
            Cancelled => ErrorKind::Cancelled,
            Encode(_) | InvalidArgs(_) => ErrorKind::Usage,
            TransactionIdUnmatched { .. }
            | RecipNonceUnmatched { .. }
            | UnexpectedPvno(_)
            | UnexpectedPkiBody { .. }
            | UnknownPkiStatus(_)
            | FailInfoOutOfRange(_)
            | UnexpectedPkiStatus(_)
            | CertIdMismatch { .. }
            | MultipleResponsesNotSupported(_)
            | CertResponseNotFound
            | CertificateNotFound
            | EncryptedCertNotSupported
            | CertAndKeyDoNotMatch
            | UnexpectedConfirmation(_)
            | BadCheckAfter(_)
            | WrongRpComponentCount(_)
            | WrongCertIdInRp => ErrorKind::Validation,
        }
    }

    /// Short, stable reason text for this kind of error.
    ///
    /// Unlike [`Display`](fmt::Display), the text carries no details and is suitable for
    /// matching in logs or metrics.
    pub fn reason(&self) -> &'static str {
        use CmpError::*;

        match self {
            ConnectFailed(_) => "connect failed",
            TransportTimeout(_) => "transfer timeout",
            PeerReset(_) => "connection reset",
            TransferError(_) => "transfer error",
            Decode(_) => "error decoding message",
            Encode(_) => "error encoding message",
            MissingProtection => "missing protection",
            ErrorProtectingMessage(_) => "error protecting message",
            ErrorValidatingProtection(_) => "error validating protection",
            NoSuitableSenderCert => "no suitable sender cert",
            UnsupportedAlgorithm(_) => "unsupported algorithm",
            TransactionIdUnmatched { .. } => "transactionid unmatched",
            RecipNonceUnmatched { .. } => "recipnonce unmatched",
            UnexpectedPvno(_) => "unexpected pvno",
            UnexpectedPkiBody { .. } => "unexpected pkibody",
            UnknownPkiStatus(_) => "unknown pki status",
            FailInfoOutOfRange(_) => "fail info out of range",
            UnexpectedPkiStatus(_) => "unexpected pkistatus",
            ServerError(_) => "received error",
            RequestRejected { .. } => "request rejected by server",
            PollingTimeout(_) => "total timeout",
            Cancelled => "cancelled",
            CertIdMismatch { .. } => "bad request id",
            MultipleResponsesNotSupported(_) => "multiple responses not supported",
            CertResponseNotFound => "certresponse not found",
            CertificateNotFound => "certificate not found",
            EncryptedCertNotSupported => "encrypted certificates not supported",
            CertAndKeyDoNotMatch => "cert and key do not match",
            UnexpectedConfirmation(_) => "pkiconf not received",
            BadCheckAfter(_) => "bad checkafter in pollrep",
            WrongRpComponentCount(_) => "wrong rp component count",
            WrongCertIdInRp => "wrong certid in rp",
            InvalidArgs(_) => "invalid args",
        }
    }
}

impl From<TransportError> for CmpError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Connect(detail) => CmpError::ConnectFailed(detail),
            TransportError::Timeout(after) => CmpError::TransportTimeout(after),
            TransportError::Reset(detail) => CmpError::PeerReset(detail),
            err @ (TransportError::Http { .. }
            | TransportError::ContentType(_)
            | TransportError::Transfer(_)) => {
                CmpError::TransferError(err.to_string())
            }
        }
    }
}

struct DisplayKinds<'a>(&'a [BodyKind]);

impl fmt::Display for DisplayKinds<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, kind) in self.0.iter().enumerate() {
            if idx > 0 {
                f.write_str("|")?;
            }
            write!(f, "{kind}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_errors_stay_distinct() {
        let err = CmpError::from(TransportError::Connect("refused".to_owned()));
        assert!(matches!(err, CmpError::ConnectFailed(_)));

        let err = CmpError::from(TransportError::Timeout(Duration::from_secs(3)));
        assert!(matches!(err, CmpError::TransportTimeout(_)));

        let err = CmpError::from(TransportError::Reset("eof".to_owned()));
        assert!(matches!(err, CmpError::PeerReset(_)));

        let err = CmpError::from(TransportError::Http {
            status: 500,
            detail: String::new(),
        });
        assert!(matches!(err, CmpError::TransferError(_)));
        assert_eq!(err.kind(), ErrorKind::Transport);
    }

    #[test]
    fn test_unexpected_body_message() {
        let err = CmpError::UnexpectedPkiBody {
            expected: vec![BodyKind::Rp],
            actual: BodyKind::Cp,
        };
        assert_eq!(err.to_string(), "unexpected PKI body cp, expected one of rp");
        assert_eq!(err.reason(), "unexpected pkibody");
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_reason_has_no_details() {
        let err = CmpError::TransactionIdUnmatched {
            expected: vec![1, 2],
            actual: Some(vec![3]),
        };
        assert_eq!(err.reason(), "transactionid unmatched");
        assert!(err.to_string().contains("[01, 02]"));
    }
}
