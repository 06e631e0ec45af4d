use std::{
    net::TcpListener,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use actix_web::{dev::ServerHandle, web, App, HttpResponse, HttpServer};
use der::asn1::{Any, BitString, Null, OctetString};
use p256::ecdsa::DerSignature;
use parking_lot::Mutex;
use rand::RngCore as _;
use x509_cert::{
    builder::{Builder, CertificateBuilder, Profile},
    ext::pkix::name::GeneralName,
    name::Name,
    serial_number::SerialNumber,
    spki::SubjectPublicKeyInfoOwned,
    time::Validity,
    Certificate,
};

use crate::{
    asn1::{
        self, oid, BodyKind, CertId, CertOrEncCert, CertRepMessage, CertResponse,
        CertifiedKeyPair, ErrorMsgContent, InfoTypeAndValue, PkiBody, PkiHeader, PkiMessage,
        PkiStatusInfo, PollRepEntry, RevRepContent,
    },
    ctx::TransactionContext,
    error::TransportError,
    key::SenderKey,
    protect::{protect_message, verify, MacProtection, Protection, SignatureProtection, Trust},
    req::PKIXCMP,
    status::{FailInfo, PkiStatus, StatusInfo},
    trans::Transport,
};

pub(crate) const REFERENCE: &str = "client-ref";
pub(crate) const SECRET: &str = "s3cr3t";

static SERIAL: AtomicU64 = AtomicU64::new(1);

/// Certificate for `subject` signed by `issuer`, or self-signed.
pub(crate) fn issue(
    subject: Name,
    public_key: SubjectPublicKeyInfoOwned,
    issuer: Option<(&SenderKey, &Name)>,
    signer: &SenderKey,
) -> Certificate {
    let serial = SERIAL.fetch_add(1, Ordering::Relaxed).to_be_bytes();
    let start = serial.iter().position(|b| *b != 0).unwrap_or(serial.len() - 1);
    let serial = SerialNumber::new(&serial[start..]).unwrap();
    let validity = Validity::from_now(Duration::from_secs(24 * 60 * 60)).unwrap();

    let (signer, issuer) = match issuer {
        Some((key, name)) => (key, Some(name.clone())),
        None => (signer, None),
    };

    CertificateBuilder::new(
        Profile::Manual { issuer },
        serial,
        validity,
        subject,
        public_key,
        signer.signing_key(),
    )
    .unwrap()
    .build::<DerSignature>()
    .unwrap()
}

pub(crate) fn public_key(key: &SenderKey) -> SubjectPublicKeyInfoOwned {
    SubjectPublicKeyInfoOwned::from_key(*key.signing_key().verifying_key()).unwrap()
}

/// Fresh key with a self-signed certificate.
pub(crate) fn key_and_cert(subject: &str) -> (SenderKey, Certificate) {
    let key = SenderKey::generate();
    let cert = issue(subject.parse().unwrap(), public_key(&key), None, &key);
    (key, cert)
}

/// What the client asked to be certified.
#[derive(Debug, Clone)]
struct Requested {
    kind: BodyKind,
    cert_req_id: i64,
    public_key: SubjectPublicKeyInfoOwned,
    subject: Option<Name>,
}

/// In-process CA answering CMP requests the way a well-behaved server does, with knobs to make
/// it misbehave.
pub(crate) struct MockCa {
    key: SenderKey,
    cert: Certificate,
    name: Name,
    shared: Protection,
    protection: Protection,

    /// Answer the certification request with `waiting`, then this many pollReps.
    pub waiting: Option<usize>,
    /// checkAfter of the next pollRep, growing by one second with each.
    pub check_after: i64,
    pub grant_implicit_confirm: bool,
    pub reject: Option<FailInfo>,
    pub error: bool,
    pub tamper: bool,
    pub wrong_key: bool,
    pub unprotected: bool,
    /// Answer the next request with this body instead.
    pub reply_body: Option<PkiBody>,

    pub received: Vec<PkiMessage>,
    requested: Option<Requested>,
    polls_left: usize,
}

impl MockCa {
    /// CA protecting its responses with the shared secret.
    pub(crate) fn with_mac() -> Self {
        let (key, cert) = key_and_cert("CN=Mock CA");
        let shared = Protection::Mac(MacProtection::new(REFERENCE, SECRET));

        MockCa {
            name: cert.tbs_certificate.subject.clone(),
            key,
            cert,
            protection: shared.clone(),
            shared,
            waiting: None,
            check_after: 1,
            grant_implicit_confirm: false,
            reject: None,
            error: false,
            tamper: false,
            wrong_key: false,
            unprotected: false,
            reply_body: None,
            received: Vec::new(),
            requested: None,
            polls_left: 0,
        }
    }

    /// CA signing its responses with its own key.
    pub(crate) fn with_signature() -> Self {
        let mut ca = Self::with_mac();
        ca.protection = Protection::Signature(
            SignatureProtection::new(ca.key.clone(), ca.cert.clone()).unwrap(),
        );
        ca
    }

    pub(crate) fn cert(&self) -> &Certificate {
        &self.cert
    }

    /// Client side context matching this CA's configuration.
    pub(crate) fn context(&self) -> TransactionContext {
        let protection = Protection::Mac(MacProtection::new(REFERENCE, SECRET));

        TransactionContext::new("CN=client".parse().unwrap(), self.name.clone(), protection)
            .with_trust(Trust::default().pin_server_cert(self.cert.clone()))
    }

    pub(crate) fn count(&self, kind: BodyKind) -> usize {
        self.received
            .iter()
            .filter(|msg| msg.body.kind() == kind)
            .count()
    }

    pub(crate) fn handle(&mut self, bytes: &[u8]) -> Vec<u8> {
        let req = asn1::decode(bytes).unwrap();
        self.received.push(req.clone());

        let body = if let Some(body) = self.reply_body.take() {
            body
        } else if self.error {
            error_body(FailInfo::SYSTEM_FAILURE)
        } else if is_mac_protected(&req) && verify(&req, &self.shared, &Trust::default()).is_err() {
            error_body(FailInfo::BAD_MESSAGE_CHECK)
        } else {
            self.answer(&req)
        };

        let mut rsp = PkiMessage::new(self.header(&req), body);

        if !self.unprotected {
            protect_message(&mut rsp, &self.protection).unwrap();
        }

        if self.tamper {
            let mut value = rsp.protection.as_ref().unwrap().raw_bytes().to_vec();
            *value.last_mut().unwrap() ^= 1;
            rsp.protection = Some(BitString::from_bytes(&value).unwrap());
        }

        asn1::encode(&rsp).unwrap()
    }

    fn header(&self, req: &PkiMessage) -> PkiHeader {
        let mut nonce = vec![0; 16];
        rand::thread_rng().fill_bytes(&mut nonce);

        let mut header = PkiHeader::new(
            GeneralName::DirectoryName(self.name.clone()),
            req.header.sender.clone(),
        );
        header.trans_id = req.header.trans_id.clone();
        header.sender_nonce = Some(OctetString::new(nonce).unwrap());
        header.recip_nonce = req.header.sender_nonce.clone();

        if self.grant_implicit_confirm && req.header.has_implicit_confirm() {
            header.push_general_info(InfoTypeAndValue::new(oid::IT_IMPLICIT_CONFIRM));
        }

        header
    }

    fn answer(&mut self, req: &PkiMessage) -> PkiBody {
        match &req.body {
            PkiBody::Ir(msgs) | PkiBody::Cr(msgs) | PkiBody::Kur(msgs) => {
                let cert_req = &msgs[0].cert_req;
                self.certification(Requested {
                    kind: req.body.kind(),
                    cert_req_id: cert_req.cert_req_id,
                    public_key: cert_req.cert_template.public_key.clone().unwrap(),
                    subject: cert_req.cert_template.subject.clone(),
                })
            }

            PkiBody::P10cr(csr) => self.certification(Requested {
                kind: BodyKind::P10cr,
                cert_req_id: -1,
                public_key: csr.info.public_key.clone(),
                subject: Some(csr.info.subject.clone()),
            }),

            PkiBody::PollReq(entries) => {
                let cert_req_id = entries[0].cert_req_id;

                if self.polls_left > 0 {
                    self.polls_left -= 1;
                    let check_after = self.check_after;
                    self.check_after += 1;

                    PkiBody::PollRep(vec![PollRepEntry {
                        cert_req_id,
                        check_after,
                        reason: None,
                    }])
                } else {
                    self.issue()
                }
            }

            PkiBody::CertConf(_) => PkiBody::PkiConf(Null),

            PkiBody::Rr(details) => {
                let template = &details[0].cert_details;
                PkiBody::Rp(RevRepContent {
                    status: vec![PkiStatusInfo::accepted()],
                    rev_certs: Some(vec![CertId {
                        issuer: GeneralName::DirectoryName(template.issuer.clone().unwrap()),
                        serial_number: template.serial_number.clone().unwrap(),
                    }]),
                    crls: None,
                })
            }

            PkiBody::Genm(itavs) => PkiBody::Genp(
                itavs
                    .iter()
                    .map(|itav| {
                        if itav.info_type == oid::IT_CA_CERTS {
                            InfoTypeAndValue {
                                info_type: oid::IT_CA_CERTS,
                                info_value: Some(
                                    Any::encode_from(&vec![self.cert.clone()]).unwrap(),
                                ),
                            }
                        } else {
                            itav.clone()
                        }
                    })
                    .collect(),
            ),

            _ => error_body(FailInfo::BAD_REQUEST),
        }
    }

    fn certification(&mut self, requested: Requested) -> PkiBody {
        self.requested = Some(requested);

        match self.waiting.take() {
            Some(polls) => {
                self.polls_left = polls;
                self.cert_rep(PkiStatusInfo::waiting(), None)
            }
            None => self.issue(),
        }
    }

    fn issue(&mut self) -> PkiBody {
        if let Some(fail_info) = self.reject {
            let mut status = StatusInfo::new(PkiStatus::Rejection);
            status.fail_info = fail_info;
            status.text = vec!["mock rejection".to_owned()];
            return self.cert_rep(status.to_asn1().unwrap(), None);
        }

        let requested = self.requested.clone().unwrap();

        let public_key = if self.wrong_key {
            public_key(&SenderKey::generate())
        } else {
            requested.public_key
        };

        let subject = requested
            .subject
            .unwrap_or_else(|| "CN=ee".parse().unwrap());
        let cert = issue(subject, public_key, Some((&self.key, &self.name)), &self.key);

        self.cert_rep(PkiStatusInfo::accepted(), Some(cert))
    }

    fn cert_rep(&self, status: PkiStatusInfo, cert: Option<Certificate>) -> PkiBody {
        let requested = self.requested.as_ref().unwrap();

        let rep = CertRepMessage {
            ca_pubs: cert.as_ref().map(|_| vec![self.cert.clone()]),
            response: vec![CertResponse {
                cert_req_id: requested.cert_req_id,
                status,
                certified_key_pair: cert.map(|cert| CertifiedKeyPair {
                    cert_or_enc_cert: CertOrEncCert::Certificate(cert),
                    private_key: None,
                    publication_info: None,
                }),
                rsp_info: None,
            }],
        };

        match requested.kind {
            BodyKind::Ir => PkiBody::Ip(rep),
            BodyKind::Kur => PkiBody::Kup(rep),
            _ => PkiBody::Cp(rep),
        }
    }
}

fn is_mac_protected(msg: &PkiMessage) -> bool {
    msg.header
        .protection_alg
        .as_ref()
        .is_some_and(|alg| alg.oid == oid::PASSWORD_BASED_MAC)
}

pub(crate) fn error_body(fail_info: FailInfo) -> PkiBody {
    let mut status = StatusInfo::new(PkiStatus::Rejection);
    status.fail_info = fail_info;

    PkiBody::Error(ErrorMsgContent {
        pki_status_info: status.to_asn1().unwrap(),
        error_code: Some(42),
        error_details: Some(vec!["mock failure".to_owned()]),
    })
}

/// Transport delivering straight to a [`MockCa`].
#[derive(Clone)]
pub(crate) struct MockTransport {
    pub ca: Arc<Mutex<MockCa>>,
}

impl MockTransport {
    pub(crate) fn new(ca: MockCa) -> Self {
        MockTransport {
            ca: Arc::new(Mutex::new(ca)),
        }
    }
}

impl Transport for MockTransport {
    async fn send(
        &self,
        _endpoint: &str,
        request: &[u8],
        _timeout: Option<Duration>,
    ) -> Result<Vec<u8>, TransportError> {
        Ok(self.ca.lock().handle(request))
    }
}

/// Transport whose peer never answers.
pub(crate) struct SilentTransport;

impl Transport for SilentTransport {
    async fn send(
        &self,
        _endpoint: &str,
        _request: &[u8],
        _timeout: Option<Duration>,
    ) -> Result<Vec<u8>, TransportError> {
        tokio::time::sleep(Duration::from_secs(24 * 60 * 60)).await;
        Err(TransportError::Reset("gave up".to_owned()))
    }
}

pub struct TestServer {
    pub cmp_url: String,
    pub echo_url: String,
    pub html_url: String,
    pub missing_url: String,
    pub redirect_url: String,
    pub rejecting_url: String,
    pub ca: web::Data<Mutex<MockCa>>,
    handle: ServerHandle,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        drop(self.handle.stop(false));
    }
}

async fn post_cmp(ca: web::Data<Mutex<MockCa>>, body: web::Bytes) -> HttpResponse {
    let rsp = ca.lock().handle(&body);
    HttpResponse::Ok().content_type(PKIXCMP).body(rsp)
}

async fn post_echo(body: web::Bytes) -> HttpResponse {
    HttpResponse::Ok().content_type(PKIXCMP).body(body)
}

async fn post_rejecting(body: web::Bytes) -> HttpResponse {
    HttpResponse::BadRequest().content_type(PKIXCMP).body(body)
}

async fn post_redirect() -> HttpResponse {
    HttpResponse::TemporaryRedirect()
        .insert_header(("location", "/redirect"))
        .finish()
}

async fn post_html() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body("<html><body>login</body></html>")
}

pub fn with_cmp_server() -> TestServer {
    with_ca_server(MockCa::with_mac())
}

pub fn with_ca_server(ca: MockCa) -> TestServer {
    let lst = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = lst.local_addr().unwrap().port();
    let url = format!("http://127.0.0.1:{port}");

    let ca = web::Data::new(Mutex::new(ca));
    let data = ca.clone();

    let server = HttpServer::new(move || {
        App::new()
            .app_data(data.clone())
            .route("/.well-known/cmp", web::post().to(post_cmp))
            .route("/echo", web::post().to(post_echo))
            .route("/rejecting", web::post().to(post_rejecting))
            .route("/html", web::post().to(post_html))
            .route("/redirect", web::post().to(post_redirect))
    })
    .listen(lst)
    .unwrap()
    .workers(1)
    .run();

    let handle = server.handle();

    tokio::spawn(server);

    TestServer {
        cmp_url: format!("{url}/.well-known/cmp"),
        echo_url: format!("{url}/echo"),
        html_url: format!("{url}/html"),
        missing_url: format!("{url}/missing"),
        redirect_url: format!("{url}/redirect"),
        rejecting_url: format!("{url}/rejecting"),
        ca,
        handle,
    }
}

#[test]
fn test_key_and_cert() {
    let (key, cert) = key_and_cert("CN=self");

    assert_eq!(cert.tbs_certificate.subject, cert.tbs_certificate.issuer);
    assert_eq!(
        cert.tbs_certificate.subject_public_key_info,
        public_key(&key)
    );
}
