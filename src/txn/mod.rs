//! Transaction state machine.
//!
//! A transaction runs through these states:
//!
//! 1. [`Idle`] -> [`RequestBuilt`] -> [`Sent`] -> [`ResponseReceived`]
//! 2. If the CA answers `waiting`: [`AwaitingPollDecision`] -> [`Polling`]* until the final
//!    response arrives.
//! 3. For issued certificates: [`Confirming`] while certConf/pkiConf is exchanged.
//! 4. [`Complete`], or [`Failed`] from any step.
//!
//! Every failure is final. Nothing is retried except the bounded poll loop.
//!
//! [`Idle`]: State::Idle
//! [`RequestBuilt`]: State::RequestBuilt
//! [`Sent`]: State::Sent
//! [`ResponseReceived`]: State::ResponseReceived
//! [`AwaitingPollDecision`]: State::AwaitingPollDecision
//! [`Polling`]: State::Polling
//! [`Confirming`]: State::Confirming
//! [`Complete`]: State::Complete
//! [`Failed`]: State::Failed

use std::fmt;

use der::asn1::OctetString;
use serde::{Deserialize, Serialize};
use x509_cert::{
    ext::pkix::name::GeneralName, name::Name, request::CertReq, serial_number::SerialNumber,
    spki::SubjectPublicKeyInfoOwned, Certificate,
};

use crate::{
    asn1::{
        self, BodyKind, CertOrEncCert, CertRepMessage, CertResponse, CertStatus, ErrorMsgContent,
        InfoTypeAndValue, PkiBody, PkiMessage, RevRepContent,
    },
    cert::{Enrollment, IssuedCertificate, RevocationReason},
    ctx::{PendingPoll, TransactionContext},
    error::*,
    key::SenderKey,
    protect,
    status::{FailInfo, PkiStatus, StatusInfo},
    trans::Transport,
    util::base64url,
    validate::validate,
};

mod build;
mod poll;

/// Where a transaction is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Idle,
    RequestBuilt,
    Sent,
    AwaitingPollDecision,
    Polling,
    ResponseReceived,
    Confirming,
    Complete,
    Failed,
}

/// Kinds of requests a transaction can start with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    /// Initialization request.
    Ir,
    /// Certification request.
    Cr,
    /// PKCS#10 certification request.
    P10cr,
    /// Key update request.
    Kur,
    /// Revocation request.
    Rr,
    /// General message.
    Genm,
}

impl RequestKind {
    pub fn body_kind(self) -> BodyKind {
        match self {
            RequestKind::Ir => BodyKind::Ir,
            RequestKind::Cr => BodyKind::Cr,
            RequestKind::P10cr => BodyKind::P10cr,
            RequestKind::Kur => BodyKind::Kur,
            RequestKind::Rr => BodyKind::Rr,
            RequestKind::Genm => BodyKind::Genm,
        }
    }

    /// Body kind of a successful answer.
    pub fn expected_response(self) -> BodyKind {
        match self {
            RequestKind::Ir => BodyKind::Ip,
            RequestKind::Cr | RequestKind::P10cr => BodyKind::Cp,
            RequestKind::Kur => BodyKind::Kup,
            RequestKind::Rr => BodyKind::Rp,
            RequestKind::Genm => BodyKind::Genp,
        }
    }

    /// True for requests answered with a certificate.
    pub fn is_certification(self) -> bool {
        self.expected_response().is_poll_eligible()
    }

    /// certReqId used for the single request in the message.
    pub(crate) fn cert_req_id(self) -> i64 {
        match self {
            RequestKind::P10cr => -1,
            _ => 0,
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.body_kind().fmt(f)
    }
}

/// Content of the request, matching its [`RequestKind`].
#[derive(Debug, Clone)]
pub enum Payload {
    /// For ir, cr and kur. A kur also needs [`Enrollment::with_old_cert`].
    Enrollment(Enrollment),
    /// For p10cr.
    Pkcs10(CertReq),
    /// For rr.
    Revocation {
        cert: Certificate,
        reason: RevocationReason,
    },
    /// For genm.
    General(Vec<InfoTypeAndValue>),
}

/// Result of a completed transaction.
#[derive(Debug, Clone)]
pub enum Outcome {
    Certificate(IssuedCertificate),
    Revoked(StatusInfo),
    General(Vec<InfoTypeAndValue>),
}

impl Outcome {
    pub fn into_certificate(self) -> Option<IssuedCertificate> {
        match self {
            Outcome::Certificate(cert) => Some(cert),
            _ => None,
        }
    }
}

/// What the final response must match.
#[derive(Debug, Clone)]
struct Expected {
    kind: RequestKind,
    cert_req_id: i64,
    public_key: Option<SubjectPublicKeyInfoOwned>,
    key: Option<SenderKey>,
    revoked: Option<(Name, SerialNumber)>,
}

impl Expected {
    fn new(kind: RequestKind) -> Self {
        Expected {
            kind,
            cert_req_id: kind.cert_req_id(),
            public_key: None,
            key: None,
            revoked: None,
        }
    }
}

/// Runs one complete transaction: request, polling if the CA asks for it, and confirmation.
///
/// `ctx` must be fresh. On return it is in [`State::Complete`] or [`State::Failed`] and still
/// holds the last request and response for inspection.
pub async fn run_transaction<T: Transport>(
    ctx: &mut TransactionContext,
    transport: &T,
    endpoint: &str,
    kind: RequestKind,
    payload: Payload,
) -> Result<Outcome> {
    if ctx.state() != State::Idle || ctx.transaction_id().is_some() {
        return Err(CmpError::invalid_args(
            "transaction context was already used",
        ));
    }

    log::debug!("Starting {kind} transaction with {endpoint}");
    ctx.start();

    let res = request(ctx, transport, endpoint, kind, payload).await;
    finish(ctx, res)
}

/// Continues polling for a certificate requested in an earlier transaction.
///
/// `ctx` must have been restored with
/// [`with_snapshot`](TransactionContext::with_snapshot) from a snapshot taken while the CA was
/// still processing the request.
pub async fn resume_polling<T: Transport>(
    ctx: &mut TransactionContext,
    transport: &T,
    endpoint: &str,
) -> Result<Outcome> {
    let Some(pending) = ctx.pending() else {
        return Err(CmpError::invalid_args("no request is pending"));
    };

    log::debug!("Resuming {} transaction with {endpoint}", pending.kind);
    ctx.start();

    let mut expected = Expected::new(pending.kind);
    expected.cert_req_id = pending.cert_req_id;

    let res = async {
        let response = poll::poll_until_ready(ctx, transport, endpoint).await?;
        certified(ctx, transport, endpoint, &expected, response, true).await
    }
    .await;

    finish(ctx, res)
}

fn finish(ctx: &mut TransactionContext, res: Result<Outcome>) -> Result<Outcome> {
    match &res {
        Ok(_) => {
            log::debug!("Transaction complete");
            ctx.set_state(State::Complete);
        }
        Err(err) => {
            log::debug!("Transaction failed: {err}");
            ctx.set_state(State::Failed);
        }
    }

    res
}

async fn request<T: Transport>(
    ctx: &mut TransactionContext,
    transport: &T,
    endpoint: &str,
    kind: RequestKind,
    payload: Payload,
) -> Result<Outcome> {
    let (request, expected) = build::request(ctx, kind, payload)?;
    ctx.set_state(State::RequestBuilt);

    let response = exchange(ctx, transport, endpoint, request, &[kind.expected_response()]).await?;

    match &response.body {
        PkiBody::Ip(_) | PkiBody::Cp(_) | PkiBody::Kup(_) => {
            certified(ctx, transport, endpoint, &expected, response, false).await
        }
        PkiBody::Rp(rep) => revoked(&expected, rep).map(Outcome::Revoked),
        PkiBody::Genp(itavs) => Ok(Outcome::General(itavs.clone())),
        body => Err(CmpError::UnexpectedPkiBody {
            expected: vec![kind.expected_response()],
            actual: body.kind(),
        }),
    }
}

/// Sends `request` and returns the validated answer.
///
/// `error` bodies are turned into [`CmpError::ServerError`].
pub(crate) async fn exchange<T: Transport>(
    ctx: &mut TransactionContext,
    transport: &T,
    endpoint: &str,
    request: PkiMessage,
    expected: &[BodyKind],
) -> Result<PkiMessage> {
    let bytes = asn1::encode(&request)?;
    log::trace!("Send {}: {}", request.body.kind(), base64url(&bytes));

    let timeout = ctx.send_timeout()?;
    ctx.record_request(&request);
    ctx.set_state(State::Sent);

    let send = transport.send(endpoint, &bytes, timeout);
    let bytes = match timeout {
        Some(timeout) => tokio::time::timeout(timeout, send)
            .await
            .map_err(|_| CmpError::TransportTimeout(timeout))??,
        None => send.await?,
    };

    log::trace!("Received: {}", base64url(&bytes));
    let response = asn1::decode(&bytes)?;
    ctx.set_state(State::ResponseReceived);

    validate(ctx, &request, &response, expected)?;
    ctx.accept_response(&response);

    log::debug!("Received {}", response.body.kind());

    if let PkiBody::Error(err) = &response.body {
        return Err(CmpError::ServerError(server_report(err)?));
    }

    Ok(response)
}

fn server_report(err: &ErrorMsgContent) -> Result<ServerReport> {
    Ok(ServerReport {
        status: StatusInfo::try_from(&err.pki_status_info)?,
        error_code: err.error_code,
        details: err.error_details.clone().unwrap_or_default(),
    })
}

/// Handles ip/cp/kup, polling first if the CA is not done yet.
async fn certified<T: Transport>(
    ctx: &mut TransactionContext,
    transport: &T,
    endpoint: &str,
    expected: &Expected,
    response: PkiMessage,
    mut polled: bool,
) -> Result<Outcome> {
    let mut response = response;

    loop {
        let (_, _, status) = cert_response(&response, expected.cert_req_id)?;
        if status.status != PkiStatus::Waiting {
            break;
        }

        // the CA must not answer a pollReq with another waiting ip/cp/kup
        if polled {
            return Err(CmpError::UnexpectedPkiStatus(status));
        }

        ctx.set_state(State::AwaitingPollDecision);
        ctx.set_pending(Some(PendingPoll {
            kind: expected.kind,
            cert_req_id: expected.cert_req_id,
        }));

        response = poll::poll_until_ready(ctx, transport, endpoint).await?;
        polled = true;
    }

    let (rep, rsp, status) = cert_response(&response, expected.cert_req_id)?;

    match status.status {
        PkiStatus::Accepted | PkiStatus::GrantedWithMods => {}
        PkiStatus::KeyUpdateWarning if expected.kind == RequestKind::Kur => {}
        PkiStatus::Rejection => {
            return Err(CmpError::RequestRejected {
                fail_info: status.fail_info,
                text: status.text,
            })
        }
        _ => return Err(CmpError::UnexpectedPkiStatus(status)),
    }

    let certificate = match rsp.certified_key_pair.as_ref().map(|pair| &pair.cert_or_enc_cert) {
        Some(CertOrEncCert::Certificate(cert)) => cert.clone(),
        Some(CertOrEncCert::EncryptedCert(_)) => return Err(CmpError::EncryptedCertNotSupported),
        None => return Err(CmpError::CertificateNotFound),
    };

    let issued = IssuedCertificate {
        certificate,
        ca_pubs: rep.ca_pubs.clone().unwrap_or_default(),
        extra_certs: response.extra_certs().to_vec(),
        status,
        key: expected.key.clone(),
    };

    let implicit = ctx.options().implicit_confirm && response.header.has_implicit_confirm();

    if let Some(public_key) = &expected.public_key {
        if issued.certificate.tbs_certificate.subject_public_key_info != *public_key {
            if !implicit && !ctx.options().disable_confirm {
                let mut reject = StatusInfo::new(PkiStatus::Rejection);
                reject.fail_info = FailInfo::INCORRECT_DATA;
                reject.text =
                    vec!["issued certificate does not match the requested key".to_owned()];

                let negative =
                    confirm(ctx, transport, endpoint, expected, &issued.certificate, Some(reject));
                if let Err(err) = negative.await {
                    log::debug!("Negative certConf failed: {err}");
                }
            }

            return Err(CmpError::CertAndKeyDoNotMatch);
        }
    }

    if implicit {
        log::debug!("Implicit confirmation granted");
    } else if ctx.options().disable_confirm {
        log::debug!("Skipping certConf");
    } else {
        confirm(ctx, transport, endpoint, expected, &issued.certificate, None).await?;
    }

    ctx.set_pending(None);
    Ok(Outcome::Certificate(issued))
}

/// The single CertResponse of a certificate response, with its validated status.
fn cert_response(
    msg: &PkiMessage,
    cert_req_id: i64,
) -> Result<(&CertRepMessage, &CertResponse, StatusInfo)> {
    let rep = match &msg.body {
        PkiBody::Ip(rep) | PkiBody::Cp(rep) | PkiBody::Kup(rep) => rep,
        body => {
            return Err(CmpError::UnexpectedPkiBody {
                expected: vec![BodyKind::Ip, BodyKind::Cp, BodyKind::Kup],
                actual: body.kind(),
            })
        }
    };

    let rsp = match rep.response.as_slice() {
        [] => return Err(CmpError::CertResponseNotFound),
        [rsp] => rsp,
        all => return Err(CmpError::MultipleResponsesNotSupported(all.len())),
    };

    if rsp.cert_req_id != cert_req_id {
        return Err(CmpError::CertIdMismatch {
            expected: cert_req_id,
            actual: rsp.cert_req_id,
        });
    }

    Ok((rep, rsp, StatusInfo::try_from(&rsp.status)?))
}

/// Sends certConf for `cert` and waits for pkiConf.
///
/// `status` is absent for a plain acceptance.
async fn confirm<T: Transport>(
    ctx: &mut TransactionContext,
    transport: &T,
    endpoint: &str,
    expected: &Expected,
    cert: &Certificate,
    status: Option<StatusInfo>,
) -> Result<()> {
    ctx.set_state(State::Confirming);

    let body = PkiBody::CertConf(vec![CertStatus {
        cert_hash: OctetString::new(protect::cert_hash(cert)?)?,
        cert_req_id: expected.cert_req_id,
        status_info: status.as_ref().map(StatusInfo::to_asn1).transpose()?,
    }]);

    let request = build::message(ctx, body)?;

    match exchange(ctx, transport, endpoint, request, &[BodyKind::PkiConf]).await {
        Ok(_) => Ok(()),
        Err(CmpError::UnexpectedPkiBody { actual, .. }) => {
            Err(CmpError::UnexpectedConfirmation(actual))
        }
        Err(err) => Err(err),
    }
}

fn revoked(expected: &Expected, rep: &RevRepContent) -> Result<StatusInfo> {
    let [status] = rep.status.as_slice() else {
        return Err(CmpError::WrongRpComponentCount(rep.status.len()));
    };

    let status = StatusInfo::try_from(status)?;

    match status.status {
        PkiStatus::Accepted
        | PkiStatus::GrantedWithMods
        | PkiStatus::RevocationWarning
        | PkiStatus::RevocationNotification => {}
        PkiStatus::Rejection => {
            return Err(CmpError::RequestRejected {
                fail_info: status.fail_info,
                text: status.text,
            })
        }
        _ => return Err(CmpError::UnexpectedPkiStatus(status)),
    }

    if let (Some(rev_certs), Some((issuer, serial))) = (&rep.rev_certs, &expected.revoked) {
        let matches = match rev_certs.as_slice() {
            [cert_id] => {
                cert_id.issuer == GeneralName::DirectoryName(issuer.clone())
                    && cert_id.serial_number == *serial
            }
            _ => false,
        };

        if !matches {
            return Err(CmpError::WrongCertIdInRp);
        }
    }

    Ok(status)
}
