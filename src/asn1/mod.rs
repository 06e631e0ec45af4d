//! Low-level DER structures of [RFC 4210] and [RFC 4211].
//!
//! Unstable and not intended to be used directly. Provided to aid debugging and for callers that
//! need to build unusual payloads.
//!
//! [RFC 4210]: https://datatracker.ietf.org/doc/html/rfc4210
//! [RFC 4211]: https://datatracker.ietf.org/doc/html/rfc4211

use der::{asn1::BitString, Decode as _, Encode as _, Sequence};
use x509_cert::Certificate;

use crate::error::*;

mod body;
mod crmf;
mod header;
pub mod oid;
mod response;

pub use self::{
    body::{
        BodyKind, CertConfirmContent, CertStatus, ErrorMsgContent, GenMsgContent, InfoTypeAndValue,
        PkiBody, PollRepContent, PollRepEntry, PollReqContent, PollReqEntry,
    },
    crmf::{
        CertId, CertReqMessages, CertReqMsg, CertRequest, CertTemplate, PopoSigningKey,
        ProofOfPossession,
    },
    header::{PkiHeader, PVNO_CMP2000, PVNO_CMP2021},
    response::{
        CertOrEncCert, CertRepMessage, CertResponse, CertifiedKeyPair, PkiStatusInfo, RevDetails,
        RevRepContent, RevReqContent,
    },
};

/// The `PKIMessage` type defined in [RFC 4210 §5.1].
///
/// ```text
/// PKIMessage ::= SEQUENCE {
///     header           PKIHeader,
///     body             PKIBody,
///     protection   [0] PKIProtection OPTIONAL,
///     extraCerts   [1] SEQUENCE SIZE (1..MAX) OF CMPCertificate
///     OPTIONAL }
/// ```
///
/// [RFC 4210 §5.1]: https://datatracker.ietf.org/doc/html/rfc4210#section-5.1
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct PkiMessage {
    pub header: PkiHeader,
    pub body: PkiBody,
    #[asn1(context_specific = "0", tag_mode = "EXPLICIT", optional = "true")]
    pub protection: Option<BitString>,
    #[asn1(context_specific = "1", tag_mode = "EXPLICIT", optional = "true")]
    pub extra_certs: Option<Vec<Certificate>>,
}

impl PkiMessage {
    pub fn new(header: PkiHeader, body: PkiBody) -> Self {
        PkiMessage {
            header,
            body,
            protection: None,
            extra_certs: None,
        }
    }

    /// DER encoding of the header and body, the input to protection.
    pub fn protected_part(&self) -> Result<Vec<u8>> {
        let part = ProtectedPart {
            header: self.header.clone(),
            body: self.body.clone(),
        };

        Ok(part.to_der()?)
    }

    pub fn extra_certs(&self) -> &[Certificate] {
        self.extra_certs.as_deref().unwrap_or_default()
    }
}

/// The `ProtectedPart` type defined in [RFC 4210 §5.1.3].
///
/// [RFC 4210 §5.1.3]: https://datatracker.ietf.org/doc/html/rfc4210#section-5.1.3
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct ProtectedPart {
    pub header: PkiHeader,
    pub body: PkiBody,
}

/// `PBMParameter` from [RFC 4211 §4.4].
///
/// [RFC 4211 §4.4]: https://datatracker.ietf.org/doc/html/rfc4211#section-4.4
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct PbmParameter {
    pub salt: der::asn1::OctetString,
    pub owf: x509_cert::spki::AlgorithmIdentifierOwned,
    pub iteration_count: u32,
    pub mac: x509_cert::spki::AlgorithmIdentifierOwned,
}

/// Encodes a message as DER.
pub fn encode(msg: &PkiMessage) -> Result<Vec<u8>> {
    Ok(msg.to_der()?)
}

/// Decodes a DER message. Trailing data is an error.
pub fn decode(bytes: &[u8]) -> Result<PkiMessage> {
    PkiMessage::from_der(bytes).map_err(CmpError::Decode)
}
