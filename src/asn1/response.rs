use der::{
    asn1::{Any, BitString, OctetString},
    Choice, Sequence,
};
use x509_cert::{ext::Extensions, Certificate};

use super::{CertId, CertTemplate};
use crate::status::PkiStatus;

/// The `PKIStatusInfo` type defined in [RFC 4210 §5.2.3].
///
/// [RFC 4210 §5.2.3]: https://datatracker.ietf.org/doc/html/rfc4210#section-5.2.3
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct PkiStatusInfo {
    pub status: i64,
    pub status_string: Option<Vec<String>>,
    pub fail_info: Option<BitString>,
}

impl PkiStatusInfo {
    pub fn accepted() -> Self {
        Self::with_status(PkiStatus::Accepted)
    }

    pub fn waiting() -> Self {
        Self::with_status(PkiStatus::Waiting)
    }

    pub fn with_status(status: PkiStatus) -> Self {
        PkiStatusInfo {
            status: status as i64,
            status_string: None,
            fail_info: None,
        }
    }
}

/// The `CertRepMessage` type defined in [RFC 4210 §5.3.4].
///
/// [RFC 4210 §5.3.4]: https://datatracker.ietf.org/doc/html/rfc4210#section-5.3.4
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct CertRepMessage {
    #[asn1(context_specific = "1", tag_mode = "EXPLICIT", optional = "true")]
    pub ca_pubs: Option<Vec<Certificate>>,
    pub response: Vec<CertResponse>,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct CertResponse {
    pub cert_req_id: i64,
    pub status: PkiStatusInfo,
    pub certified_key_pair: Option<CertifiedKeyPair>,
    pub rsp_info: Option<OctetString>,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct CertifiedKeyPair {
    pub cert_or_enc_cert: CertOrEncCert,
    #[asn1(context_specific = "0", tag_mode = "EXPLICIT", optional = "true")]
    pub private_key: Option<Any>,
    #[asn1(context_specific = "1", tag_mode = "EXPLICIT", optional = "true")]
    pub publication_info: Option<Any>,
}

/// Issued certificate, either in the clear or encrypted to the requester.
#[derive(Clone, Debug, Eq, PartialEq, Choice)]
#[allow(clippy::large_enum_variant)]
pub enum CertOrEncCert {
    #[asn1(context_specific = "0", tag_mode = "EXPLICIT", constructed = "true")]
    Certificate(Certificate),
    #[asn1(context_specific = "1", tag_mode = "EXPLICIT", constructed = "true")]
    EncryptedCert(Any),
}

pub type RevReqContent = Vec<RevDetails>;

/// `RevDetails` from [RFC 4210 §5.3.9].
///
/// [RFC 4210 §5.3.9]: https://datatracker.ietf.org/doc/html/rfc4210#section-5.3.9
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct RevDetails {
    pub cert_details: CertTemplate,
    pub crl_entry_details: Option<Extensions>,
}

/// `RevRepContent` from [RFC 4210 §5.3.10].
///
/// [RFC 4210 §5.3.10]: https://datatracker.ietf.org/doc/html/rfc4210#section-5.3.10
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct RevRepContent {
    pub status: Vec<PkiStatusInfo>,
    #[asn1(context_specific = "0", tag_mode = "EXPLICIT", optional = "true")]
    pub rev_certs: Option<Vec<CertId>>,
    #[asn1(context_specific = "1", tag_mode = "EXPLICIT", optional = "true")]
    pub crls: Option<Vec<Any>>,
}
