//! State of a single CMP transaction.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, SystemTime},
};

use der::asn1::{GeneralizedTime, OctetString};
use rand::RngCore as _;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use x509_cert::{ext::pkix::name::GeneralName, name::Name};

use crate::{
    asn1::{PkiHeader, PkiMessage},
    error::*,
    protect::{Protection, Trust},
    txn::{RequestKind, State},
};

/// Length of generated transaction ids and nonces.
const NONCE_LEN: usize = 16;

/// Default bound on a single request/response exchange.
pub const DEFAULT_MSG_TIMEOUT: Duration = Duration::from_secs(120);

/// Per-transaction policy switches.
///
/// Deserializable so it can be kept in a configuration file; timeouts are given in seconds.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TransactionOptions {
    /// Ask the CA to skip the certConf/pkiConf round-trip.
    pub implicit_confirm: bool,

    /// Never send certConf, even if the CA did not grant implicit confirmation.
    pub disable_confirm: bool,

    /// Accept unprotected `error` responses (and only those) when protection is configured.
    pub unprotected_errors: bool,

    /// Allow sending requests without protection.
    pub unprotected_requests: bool,

    /// Bound on the whole transaction including polling. Unlimited when absent.
    #[serde(with = "crate::util::opt_secs")]
    pub total_timeout: Option<Duration>,

    /// Bound on each request/response exchange. Unlimited when absent.
    #[serde(with = "crate::util::opt_secs")]
    pub msg_timeout: Option<Duration>,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        TransactionOptions {
            implicit_confirm: false,
            disable_confirm: false,
            unprotected_errors: false,
            unprotected_requests: false,
            total_timeout: None,
            msg_timeout: Some(DEFAULT_MSG_TIMEOUT),
        }
    }
}

/// Cooperative cancellation of a running transaction.
///
/// Checked before each poll request; a cancelled transaction fails with
/// [`Cancelled`](CmpError::Cancelled).
#[derive(Clone, Debug, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Certification request that is waiting for the CA, kept for resuming.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingPoll {
    pub kind: RequestKind,
    pub cert_req_id: i64,
}

/// Serializable state needed to continue a transaction later, e.g. after a restart while the CA
/// is still processing a request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionSnapshot {
    #[serde(with = "crate::util::b64")]
    pub transaction_id: Vec<u8>,
    #[serde(with = "crate::util::b64_opt")]
    pub sender_nonce: Option<Vec<u8>>,
    #[serde(with = "crate::util::b64_opt")]
    pub recip_nonce: Option<Vec<u8>>,
    pub poll_count: u32,
    pub pending: Option<PendingPoll>,
    pub elapsed_ms: u64,
}

impl TransactionSnapshot {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

/// Everything one CMP exchange needs to remember between messages.
///
/// A context belongs to exactly one transaction. Run independent transactions with independent
/// contexts.
#[derive(Debug)]
pub struct TransactionContext {
    sender: Name,
    recipient: Name,
    protection: Protection,
    trust: Trust,
    options: TransactionOptions,

    transaction_id: Option<Vec<u8>>,
    sender_nonce: Option<Vec<u8>>,
    recip_nonce: Option<Vec<u8>>,

    state: State,
    poll_count: u32,
    check_after: Option<Duration>,
    pending: Option<PendingPoll>,
    start_time: Option<Instant>,
    elapsed_before: Duration,

    last_request: Option<PkiMessage>,
    last_response: Option<PkiMessage>,
    cancel: CancelHandle,
}

impl TransactionContext {
    /// New context. The protection mode cannot be changed afterwards.
    pub fn new(sender: Name, recipient: Name, protection: Protection) -> Self {
        TransactionContext {
            sender,
            recipient,
            protection,
            trust: Trust::default(),
            options: TransactionOptions::default(),
            transaction_id: None,
            sender_nonce: None,
            recip_nonce: None,
            state: State::Idle,
            poll_count: 0,
            check_after: None,
            pending: None,
            start_time: None,
            elapsed_before: Duration::ZERO,
            last_request: None,
            last_response: None,
            cancel: CancelHandle::default(),
        }
    }

    pub fn with_trust(mut self, trust: Trust) -> Self {
        self.trust = trust;
        self
    }

    pub fn with_options(mut self, options: TransactionOptions) -> Self {
        self.options = options;
        self
    }

    /// Continues a transaction captured by [`snapshot`](Self::snapshot).
    pub fn with_snapshot(mut self, snapshot: TransactionSnapshot) -> Result<Self> {
        if self.transaction_id.is_some() {
            return Err(CmpError::invalid_args("transaction already started"));
        }

        self.transaction_id = Some(snapshot.transaction_id);
        self.sender_nonce = snapshot.sender_nonce;
        self.recip_nonce = snapshot.recip_nonce;
        self.poll_count = snapshot.poll_count;
        self.pending = snapshot.pending;
        self.elapsed_before = Duration::from_millis(snapshot.elapsed_ms);

        Ok(self)
    }

    /// Captures the state needed to resume the transaction.
    ///
    /// Returns `None` before the first request was built.
    pub fn snapshot(&self) -> Option<TransactionSnapshot> {
        Some(TransactionSnapshot {
            transaction_id: self.transaction_id.clone()?,
            sender_nonce: self.sender_nonce.clone(),
            recip_nonce: self.recip_nonce.clone(),
            poll_count: self.poll_count,
            pending: self.pending,
            elapsed_ms: u64::try_from(self.elapsed().as_millis()).unwrap_or(u64::MAX),
        })
    }

    pub fn transaction_id(&self) -> Option<&[u8]> {
        self.transaction_id.as_deref()
    }

    /// Nonce sent with the most recent request.
    pub fn sender_nonce(&self) -> Option<&[u8]> {
        self.sender_nonce.as_deref()
    }

    /// Sender nonce of the most recently accepted response.
    pub fn recip_nonce(&self) -> Option<&[u8]> {
        self.recip_nonce.as_deref()
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn poll_count(&self) -> u32 {
        self.poll_count
    }

    /// Last `checkAfter` received, as used for waiting.
    pub fn check_after(&self) -> Option<Duration> {
        self.check_after
    }

    pub fn pending(&self) -> Option<PendingPoll> {
        self.pending
    }

    pub fn last_request(&self) -> Option<&PkiMessage> {
        self.last_request.as_ref()
    }

    pub fn last_response(&self) -> Option<&PkiMessage> {
        self.last_response.as_ref()
    }

    pub fn protection(&self) -> &Protection {
        &self.protection
    }

    pub fn trust(&self) -> &Trust {
        &self.trust
    }

    pub fn options(&self) -> &TransactionOptions {
        &self.options
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Time spent in the transaction so far.
    pub fn elapsed(&self) -> Duration {
        let running = self
            .start_time
            .map(|start| start.elapsed())
            .unwrap_or_default();

        self.elapsed_before + running
    }

    pub(crate) fn start(&mut self) {
        if self.start_time.is_none() {
            self.start_time = Some(Instant::now());
        }
    }

    pub(crate) fn set_state(&mut self, state: State) {
        if self.state != state {
            log::trace!("Transaction state {:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }

    pub(crate) fn set_pending(&mut self, pending: Option<PendingPoll>) {
        self.pending = pending;
    }

    /// Header for the next request: fresh sender nonce, the transaction id (generated on first
    /// use) and the last response's nonce as recipNonce.
    pub(crate) fn new_header(&mut self) -> Result<PkiHeader> {
        let transaction_id = self
            .transaction_id
            .get_or_insert_with(|| random_bytes(NONCE_LEN))
            .clone();

        let sender_nonce = random_bytes(NONCE_LEN);
        self.sender_nonce = Some(sender_nonce.clone());

        let mut header = PkiHeader::new(
            GeneralName::DirectoryName(self.sender.clone()),
            GeneralName::DirectoryName(self.recipient.clone()),
        );
        header.message_time = Some(GeneralizedTime::from_system_time(SystemTime::now())?);
        header.trans_id = Some(OctetString::new(transaction_id)?);
        header.sender_nonce = Some(OctetString::new(sender_nonce)?);
        header.recip_nonce = self
            .recip_nonce
            .clone()
            .map(OctetString::new)
            .transpose()?;

        Ok(header)
    }

    pub(crate) fn record_request(&mut self, req: &PkiMessage) {
        self.last_request = Some(req.clone());
    }

    /// Takes over the nonce of a validated response.
    pub(crate) fn accept_response(&mut self, rsp: &PkiMessage) {
        self.recip_nonce = rsp.header.sender_nonce().map(<[u8]>::to_vec);
        self.last_response = Some(rsp.clone());
    }

    pub(crate) fn count_poll(&mut self) {
        self.poll_count += 1;
    }

    pub(crate) fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(CmpError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn remaining(&self) -> Option<Duration> {
        self.options
            .total_timeout
            .map(|total| total.saturating_sub(self.elapsed()))
    }

    fn total_timeout_error(&self) -> CmpError {
        CmpError::PollingTimeout(self.options.total_timeout.unwrap_or_default())
    }

    /// Bound for the next exchange: the message timeout, capped by what is left of the total
    /// timeout. `None` means unbounded.
    pub(crate) fn send_timeout(&self) -> Result<Option<Duration>> {
        match (self.options.msg_timeout, self.remaining()) {
            (_, Some(remaining)) if remaining.is_zero() => Err(self.total_timeout_error()),
            (Some(msg), Some(remaining)) => Ok(Some(msg.min(remaining))),
            (msg, remaining) => Ok(msg.or(remaining)),
        }
    }

    /// How long to wait before the next poll request, given the CA's `checkAfter`.
    pub(crate) fn poll_wait(&mut self, check_after: Duration) -> Result<Duration> {
        self.check_after = Some(check_after);

        match self.remaining() {
            None => Ok(check_after),
            Some(remaining) if remaining.is_zero() => Err(self.total_timeout_error()),
            Some(remaining) => Ok(check_after.min(remaining)),
        }
    }
}

fn random_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}
