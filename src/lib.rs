//! Client side of the Certificate Management Protocol (CMP) as specified in
//! [RFC 4210](https://datatracker.ietf.org/doc/html/rfc4210), carried over HTTP as in
//! [RFC 6712](https://datatracker.ietf.org/doc/html/rfc6712).
//!
//! # Usage
//!
//! Build a [`ClientConfig`] naming the CA's endpoint and how requests are protected, then run
//! transactions through a [`Client`]:
//!
//! ```no_run
//! # async fn run() -> eyre::Result<()> {
//! use cmp::{Client, ClientConfig, Enrollment, MacProtection, Protection, SenderKey, ServerUrl};
//!
//! let config = ClientConfig::builder()
//!     .server(ServerUrl::with_label("ca.example.com", "devices"))
//!     .sender("CN=device-42".parse()?)
//!     .protection(Protection::Mac(MacProtection::new("ref-42", "one-time-secret")))
//!     .build()?;
//!
//! let client = Client::new(config)?;
//! let issued = client.initialize(Enrollment::new(SenderKey::generate())).await?;
//!
//! println!("{}", issued.certificate_pem()?);
//! # Ok(())
//! # }
//! ```
//!
//! Complete usage examples are provided in the `demos` directory of the source repository.
//!
//! # Transactions
//!
//! Each call runs one transaction: request, polling while the CA answers `waiting`, and the
//! certConf/pkiConf confirmation for issued certificates. Every response is checked by
//! [`validate`] before its content is used. Any failure is final; nothing is retried except the
//! poll loop, which is bounded by [`TransactionOptions::total_timeout`].
//!
//! For control over a single transaction (cancellation, snapshots for resuming after a restart),
//! create a [`TransactionContext`] with [`Client::new_context`] and pass it to
//! [`Client::run_transaction`].
//!
//! # Protection
//!
//! Requests are protected either with a shared secret ([`MacProtection`], RFC 4211
//! PasswordBasedMac) or signed with the end entity's key ([`SignatureProtection`], ECDSA P-256).
//! Signed responses are checked against the [`Trust`] material of the transaction.
//!
//! # Transports
//!
//! [`HttpTransport`] posts `application/pkixcmp` messages with `reqwest`. Anything implementing
//! [`Transport`] can be used instead with [`Client::with_transport`].

#![deny(rust_2018_idioms, nonstandard_style, future_incompatible)]

mod cert;
mod client;
mod config;
mod ctx;
mod endpoint;
mod error;
mod key;
mod protect;
mod req;
mod status;
mod trans;
mod util;
mod validate;

pub mod asn1;
pub mod txn;

#[cfg(test)]
mod test;

pub use crate::{
    cert::{create_csr, create_p256_key, Enrollment, IssuedCertificate, RevocationReason},
    client::Client,
    config::{ClientConfig, ClientConfigBuilder},
    ctx::{
        CancelHandle, PendingPoll, TransactionContext, TransactionOptions, TransactionSnapshot,
        DEFAULT_MSG_TIMEOUT,
    },
    endpoint::ServerUrl,
    error::{CmpError, ErrorKind, Result, ServerReport, TransportError},
    key::SenderKey,
    protect::{
        protect, protect_message, verify, MacAlgorithm, MacProtection, OwfAlgorithm, Protection,
        ProtectionAlgorithm, SignatureProtection, Trust,
    },
    status::{FailInfo, PkiStatus, StatusInfo},
    trans::{HttpConfig, HttpTransport, Transport, DEFAULT_MAX_RESPONSE_LEN},
    txn::{resume_polling, run_transaction, Outcome, Payload, RequestKind, State},
    validate::validate,
};
