//! Certificate request structures of [RFC 4211].
//!
//! [RFC 4211]: https://datatracker.ietf.org/doc/html/rfc4211

use der::{
    asn1::{BitString, Null},
    Choice, Sequence,
};
use x509_cert::{
    attr::AttributeTypeAndValue,
    ext::{pkix::name::GeneralName, Extensions},
    name::Name,
    serial_number::SerialNumber,
    spki::{AlgorithmIdentifierOwned, SubjectPublicKeyInfoOwned},
};

pub type CertReqMessages = Vec<CertReqMsg>;

/// `CertReqMsg` from [RFC 4211 §3].
///
/// [RFC 4211 §3]: https://datatracker.ietf.org/doc/html/rfc4211#section-3
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct CertReqMsg {
    pub cert_req: CertRequest,
    pub popo: Option<ProofOfPossession>,
    pub reg_info: Option<Vec<AttributeTypeAndValue>>,
}

#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct CertRequest {
    pub cert_req_id: i64,
    pub cert_template: CertTemplate,
    pub controls: Option<Vec<AttributeTypeAndValue>>,
}

/// `CertTemplate` from [RFC 4211 §5], limited to the fields this client fills in.
///
/// [RFC 4211 §5]: https://datatracker.ietf.org/doc/html/rfc4211#section-5
#[derive(Clone, Debug, Default, Eq, PartialEq, Sequence)]
pub struct CertTemplate {
    #[asn1(context_specific = "1", tag_mode = "IMPLICIT", optional = "true")]
    pub serial_number: Option<SerialNumber>,
    #[asn1(context_specific = "3", tag_mode = "EXPLICIT", optional = "true")]
    pub issuer: Option<Name>,
    #[asn1(context_specific = "5", tag_mode = "EXPLICIT", optional = "true")]
    pub subject: Option<Name>,
    #[asn1(context_specific = "6", tag_mode = "IMPLICIT", optional = "true")]
    pub public_key: Option<SubjectPublicKeyInfoOwned>,
    #[asn1(context_specific = "9", tag_mode = "IMPLICIT", optional = "true")]
    pub extensions: Option<Extensions>,
}

/// `ProofOfPossession` from [RFC 4211 §4].
///
/// [RFC 4211 §4]: https://datatracker.ietf.org/doc/html/rfc4211#section-4
#[derive(Clone, Debug, Eq, PartialEq, Choice)]
pub enum ProofOfPossession {
    #[asn1(context_specific = "0", tag_mode = "IMPLICIT", constructed = "false")]
    RaVerified(Null),
    #[asn1(context_specific = "1", tag_mode = "IMPLICIT", constructed = "true")]
    Signature(PopoSigningKey),
}

/// `POPOSigningKey` without `poposkInput`, which is absent whenever the template carries subject
/// and public key.
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct PopoSigningKey {
    pub algorithm_identifier: AlgorithmIdentifierOwned,
    pub signature: BitString,
}

/// `CertId` from [RFC 4211 §6.5].
///
/// [RFC 4211 §6.5]: https://datatracker.ietf.org/doc/html/rfc4211#section-6.5
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct CertId {
    pub issuer: GeneralName,
    pub serial_number: SerialNumber,
}
