use der::{Decode as _, Encode as _};
use x509_cert::{request::CertReq, Certificate};

use crate::{
    asn1::{oid, InfoTypeAndValue},
    cert::{Enrollment, IssuedCertificate, RevocationReason},
    config::ClientConfig,
    ctx::{TransactionContext, TransactionSnapshot},
    error::*,
    status::StatusInfo,
    trans::{HttpTransport, Transport},
    txn::{self, Outcome, Payload, RequestKind},
};

/// Entry point for running CMP transactions against one CA.
///
/// A client only holds configuration and the transport. Every call runs its own transaction with
/// its own [`TransactionContext`], so one client can be shared by concurrent tasks.
#[derive(Debug, Clone)]
pub struct Client<T = HttpTransport> {
    config: ClientConfig,
    endpoint: String,
    transport: T,
}

impl Client<HttpTransport> {
    /// Client posting to the configured server over HTTP(S).
    pub fn new(config: ClientConfig) -> Result<Self> {
        let transport = HttpTransport::new(config.http())?;
        Ok(Self::with_transport(config, transport))
    }
}

impl<T: Transport> Client<T> {
    pub fn with_transport(config: ClientConfig, transport: T) -> Self {
        let endpoint = config.server().to_url();

        Client {
            config,
            endpoint,
            transport,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// A fresh context, for callers that need its cancel handle or want to inspect it afterwards.
    pub fn new_context(&self) -> TransactionContext {
        self.config.new_context()
    }

    /// Runs a transaction with a caller-provided context.
    pub async fn run_transaction(
        &self,
        ctx: &mut TransactionContext,
        kind: RequestKind,
        payload: Payload,
    ) -> Result<Outcome> {
        txn::run_transaction(ctx, &self.transport, &self.endpoint, kind, payload).await
    }

    async fn run(&self, kind: RequestKind, payload: Payload) -> Result<Outcome> {
        let mut ctx = self.new_context();
        self.run_transaction(&mut ctx, kind, payload).await
    }

    async fn run_certification(
        &self,
        kind: RequestKind,
        payload: Payload,
    ) -> Result<IssuedCertificate> {
        self.run(kind, payload)
            .await?
            .into_certificate()
            .ok_or(CmpError::CertificateNotFound)
    }

    /// Requests a first certificate (ir).
    pub async fn initialize(&self, enrollment: Enrollment) -> Result<IssuedCertificate> {
        self.run_certification(RequestKind::Ir, Payload::Enrollment(enrollment))
            .await
    }

    /// Requests an additional certificate (cr).
    pub async fn certify(&self, enrollment: Enrollment) -> Result<IssuedCertificate> {
        self.run_certification(RequestKind::Cr, Payload::Enrollment(enrollment))
            .await
    }

    /// Replaces a certificate with one for a new key (kur).
    ///
    /// `enrollment` must name the old certificate with [`Enrollment::with_old_cert`].
    pub async fn update_key(&self, enrollment: Enrollment) -> Result<IssuedCertificate> {
        self.run_certification(RequestKind::Kur, Payload::Enrollment(enrollment))
            .await
    }

    /// Requests a certificate for a PKCS#10 CSR (p10cr), e.g. one made with
    /// [`create_csr`](crate::create_csr).
    pub async fn certify_pkcs10(&self, csr: CertReq) -> Result<IssuedCertificate> {
        self.run_certification(RequestKind::P10cr, Payload::Pkcs10(csr))
            .await
    }

    /// Revoke a certificate for the reason given.
    pub async fn revoke(&self, cert: &Certificate, reason: RevocationReason) -> Result<StatusInfo> {
        let payload = Payload::Revocation {
            cert: cert.clone(),
            reason,
        };

        match self.run(RequestKind::Rr, payload).await? {
            Outcome::Revoked(status) => Ok(status),
            _ => Err(CmpError::invalid_args("rr did not end in a revocation")),
        }
    }

    /// Sends a genm with `itavs` and returns the content of the genp.
    pub async fn general_message(
        &self,
        itavs: Vec<InfoTypeAndValue>,
    ) -> Result<Vec<InfoTypeAndValue>> {
        match self.run(RequestKind::Genm, Payload::General(itavs)).await? {
            Outcome::General(itavs) => Ok(itavs),
            _ => Err(CmpError::invalid_args("genm did not end in a genp")),
        }
    }

    /// Fetches the CA certificates the server publishes (RFC 9480 `id-it-caCerts`).
    ///
    /// An empty list means the server has none to offer.
    pub async fn ca_certs(&self) -> Result<Vec<Certificate>> {
        let itavs = self
            .general_message(vec![InfoTypeAndValue::new(oid::IT_CA_CERTS)])
            .await?;

        let Some(itav) = itavs.iter().find(|itav| itav.info_type == oid::IT_CA_CERTS) else {
            return Ok(Vec::new());
        };

        match &itav.info_value {
            Some(value) => Vec::<Certificate>::from_der(&value.to_der()?).map_err(CmpError::Decode),
            None => Ok(Vec::new()),
        }
    }

    /// Continues polling for a certificate whose transaction was captured with
    /// [`TransactionContext::snapshot`].
    ///
    /// The private key is not part of the snapshot, so the result carries none.
    pub async fn resume_polling(
        &self,
        snapshot: TransactionSnapshot,
    ) -> Result<IssuedCertificate> {
        let mut ctx = self.new_context().with_snapshot(snapshot)?;

        txn::resume_polling(&mut ctx, &self.transport, &self.endpoint)
            .await?
            .into_certificate()
            .ok_or(CmpError::CertificateNotFound)
    }
}
