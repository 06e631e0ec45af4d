use der::{
    asn1::{GeneralizedTime, OctetString},
    Sequence,
};
use x509_cert::{ext::pkix::name::GeneralName, spki::AlgorithmIdentifierOwned};

use super::{oid, InfoTypeAndValue};

pub const PVNO_CMP2000: u8 = 2;
pub const PVNO_CMP2021: u8 = 3;

/// The `PKIHeader` type defined in [RFC 4210 §5.1.1].
///
/// The protocol version is kept as a plain integer so that unexpected versions surface as a
/// validation error rather than a decode error.
///
/// [RFC 4210 §5.1.1]: https://datatracker.ietf.org/doc/html/rfc4210#section-5.1.1
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct PkiHeader {
    pub pvno: u8,
    pub sender: GeneralName,
    pub recipient: GeneralName,
    #[asn1(context_specific = "0", tag_mode = "EXPLICIT", optional = "true")]
    pub message_time: Option<GeneralizedTime>,
    #[asn1(context_specific = "1", tag_mode = "EXPLICIT", optional = "true")]
    pub protection_alg: Option<AlgorithmIdentifierOwned>,
    #[asn1(context_specific = "2", tag_mode = "EXPLICIT", optional = "true")]
    pub sender_kid: Option<OctetString>,
    #[asn1(context_specific = "3", tag_mode = "EXPLICIT", optional = "true")]
    pub recip_kid: Option<OctetString>,
    #[asn1(context_specific = "4", tag_mode = "EXPLICIT", optional = "true")]
    pub trans_id: Option<OctetString>,
    #[asn1(context_specific = "5", tag_mode = "EXPLICIT", optional = "true")]
    pub sender_nonce: Option<OctetString>,
    #[asn1(context_specific = "6", tag_mode = "EXPLICIT", optional = "true")]
    pub recip_nonce: Option<OctetString>,
    #[asn1(context_specific = "7", tag_mode = "EXPLICIT", optional = "true")]
    pub free_text: Option<Vec<String>>,
    #[asn1(context_specific = "8", tag_mode = "EXPLICIT", optional = "true")]
    pub general_info: Option<Vec<InfoTypeAndValue>>,
}

impl PkiHeader {
    pub fn new(sender: GeneralName, recipient: GeneralName) -> Self {
        PkiHeader {
            pvno: PVNO_CMP2000,
            sender,
            recipient,
            message_time: None,
            protection_alg: None,
            sender_kid: None,
            recip_kid: None,
            trans_id: None,
            sender_nonce: None,
            recip_nonce: None,
            free_text: None,
            general_info: None,
        }
    }

    pub fn trans_id(&self) -> Option<&[u8]> {
        self.trans_id.as_ref().map(OctetString::as_bytes)
    }

    pub fn sender_nonce(&self) -> Option<&[u8]> {
        self.sender_nonce.as_ref().map(OctetString::as_bytes)
    }

    pub fn recip_nonce(&self) -> Option<&[u8]> {
        self.recip_nonce.as_ref().map(OctetString::as_bytes)
    }

    pub fn general_info(&self) -> &[InfoTypeAndValue] {
        self.general_info.as_deref().unwrap_or_default()
    }

    pub fn has_implicit_confirm(&self) -> bool {
        self.general_info()
            .iter()
            .any(|itav| itav.info_type == oid::IT_IMPLICIT_CONFIRM)
    }

    pub(crate) fn push_general_info(&mut self, itav: InfoTypeAndValue) {
        self.general_info.get_or_insert_with(Vec::new).push(itav);
    }
}
