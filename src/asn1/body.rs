use std::fmt;

use der::{
    asn1::{Any, Null, ObjectIdentifier, OctetString},
    Choice, Sequence,
};
use x509_cert::request::CertReq;

use super::{CertRepMessage, CertReqMessages, PkiStatusInfo, RevRepContent, RevReqContent};

/// The `PKIBody` type defined in [RFC 4210 §5.1.2], restricted to the kinds a client sends or
/// receives.
///
/// [RFC 4210 §5.1.2]: https://datatracker.ietf.org/doc/html/rfc4210#section-5.1.2
#[derive(Clone, Debug, Eq, PartialEq, Choice)]
#[allow(clippy::large_enum_variant)]
pub enum PkiBody {
    #[asn1(context_specific = "0", tag_mode = "EXPLICIT", constructed = "true")]
    Ir(CertReqMessages),
    #[asn1(context_specific = "1", tag_mode = "EXPLICIT", constructed = "true")]
    Ip(CertRepMessage),
    #[asn1(context_specific = "2", tag_mode = "EXPLICIT", constructed = "true")]
    Cr(CertReqMessages),
    #[asn1(context_specific = "3", tag_mode = "EXPLICIT", constructed = "true")]
    Cp(CertRepMessage),
    #[asn1(context_specific = "4", tag_mode = "EXPLICIT", constructed = "true")]
    P10cr(CertReq),
    #[asn1(context_specific = "7", tag_mode = "EXPLICIT", constructed = "true")]
    Kur(CertReqMessages),
    #[asn1(context_specific = "8", tag_mode = "EXPLICIT", constructed = "true")]
    Kup(CertRepMessage),
    #[asn1(context_specific = "11", tag_mode = "EXPLICIT", constructed = "true")]
    Rr(RevReqContent),
    #[asn1(context_specific = "12", tag_mode = "EXPLICIT", constructed = "true")]
    Rp(RevRepContent),
    #[asn1(context_specific = "19", tag_mode = "EXPLICIT", constructed = "true")]
    PkiConf(Null),
    #[asn1(context_specific = "21", tag_mode = "EXPLICIT", constructed = "true")]
    Genm(GenMsgContent),
    #[asn1(context_specific = "22", tag_mode = "EXPLICIT", constructed = "true")]
    Genp(GenMsgContent),
    #[asn1(context_specific = "23", tag_mode = "EXPLICIT", constructed = "true")]
    Error(ErrorMsgContent),
    #[asn1(context_specific = "24", tag_mode = "EXPLICIT", constructed = "true")]
    CertConf(CertConfirmContent),
    #[asn1(context_specific = "25", tag_mode = "EXPLICIT", constructed = "true")]
    PollReq(PollReqContent),
    #[asn1(context_specific = "26", tag_mode = "EXPLICIT", constructed = "true")]
    PollRep(PollRepContent),
}

impl PkiBody {
    pub fn kind(&self) -> BodyKind {
        match self {
            PkiBody::Ir(_) => BodyKind::Ir,
            PkiBody::Ip(_) => BodyKind::Ip,
            PkiBody::Cr(_) => BodyKind::Cr,
            PkiBody::Cp(_) => BodyKind::Cp,
            PkiBody::P10cr(_) => BodyKind::P10cr,
            PkiBody::Kur(_) => BodyKind::Kur,
            PkiBody::Kup(_) => BodyKind::Kup,
            PkiBody::Rr(_) => BodyKind::Rr,
            PkiBody::Rp(_) => BodyKind::Rp,
            PkiBody::PkiConf(_) => BodyKind::PkiConf,
            PkiBody::Genm(_) => BodyKind::Genm,
            PkiBody::Genp(_) => BodyKind::Genp,
            PkiBody::Error(_) => BodyKind::Error,
            PkiBody::CertConf(_) => BodyKind::CertConf,
            PkiBody::PollReq(_) => BodyKind::PollReq,
            PkiBody::PollRep(_) => BodyKind::PollRep,
        }
    }

    /// Every status info carried by the body.
    pub fn status_infos(&self) -> Vec<&PkiStatusInfo> {
        match self {
            PkiBody::Ip(rep) | PkiBody::Cp(rep) | PkiBody::Kup(rep) => {
                rep.response.iter().map(|rsp| &rsp.status).collect()
            }
            PkiBody::Rp(rep) => rep.status.iter().collect(),
            PkiBody::Error(err) => vec![&err.pki_status_info],
            PkiBody::CertConf(statuses) => statuses
                .iter()
                .filter_map(|status| status.status_info.as_ref())
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Tag of a [`PkiBody`], without its content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BodyKind {
    Ir,
    Ip,
    Cr,
    Cp,
    P10cr,
    Kur,
    Kup,
    Rr,
    Rp,
    PkiConf,
    Genm,
    Genp,
    Error,
    CertConf,
    PollReq,
    PollRep,
}

impl BodyKind {
    /// Responses that may carry `waiting` and be followed by polling.
    pub fn is_poll_eligible(self) -> bool {
        matches!(self, BodyKind::Ip | BodyKind::Cp | BodyKind::Kup)
    }

    fn name(self) -> &'static str {
        match self {
            BodyKind::Ir => "ir",
            BodyKind::Ip => "ip",
            BodyKind::Cr => "cr",
            BodyKind::Cp => "cp",
            BodyKind::P10cr => "p10cr",
            BodyKind::Kur => "kur",
            BodyKind::Kup => "kup",
            BodyKind::Rr => "rr",
            BodyKind::Rp => "rp",
            BodyKind::PkiConf => "pkiconf",
            BodyKind::Genm => "genm",
            BodyKind::Genp => "genp",
            BodyKind::Error => "error",
            BodyKind::CertConf => "certConf",
            BodyKind::PollReq => "pollReq",
            BodyKind::PollRep => "pollRep",
        }
    }
}

impl fmt::Display for BodyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// `InfoTypeAndValue` from [RFC 4210 §5.3.19].
///
/// [RFC 4210 §5.3.19]: https://datatracker.ietf.org/doc/html/rfc4210#section-5.3.19
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct InfoTypeAndValue {
    pub info_type: ObjectIdentifier,
    pub info_value: Option<Any>,
}

impl InfoTypeAndValue {
    pub fn new(info_type: ObjectIdentifier) -> Self {
        InfoTypeAndValue {
            info_type,
            info_value: None,
        }
    }
}

pub type GenMsgContent = Vec<InfoTypeAndValue>;

/// `ErrorMsgContent` from [RFC 4210 §5.3.21].
///
/// [RFC 4210 §5.3.21]: https://datatracker.ietf.org/doc/html/rfc4210#section-5.3.21
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct ErrorMsgContent {
    pub pki_status_info: PkiStatusInfo,
    pub error_code: Option<i64>,
    pub error_details: Option<Vec<String>>,
}

pub type CertConfirmContent = Vec<CertStatus>;

/// `CertStatus` from [RFC 4210 §5.3.18].
///
/// [RFC 4210 §5.3.18]: https://datatracker.ietf.org/doc/html/rfc4210#section-5.3.18
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct CertStatus {
    pub cert_hash: OctetString,
    pub cert_req_id: i64,
    pub status_info: Option<PkiStatusInfo>,
}

pub type PollReqContent = Vec<PollReqEntry>;

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct PollReqEntry {
    pub cert_req_id: i64,
}

pub type PollRepContent = Vec<PollRepEntry>;

/// One `pollRep` entry; `check_after` is in seconds.
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct PollRepEntry {
    pub cert_req_id: i64,
    pub check_after: i64,
    pub reason: Option<Vec<String>>,
}
