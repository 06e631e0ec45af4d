//! Typed view of `PKIStatusInfo`.
//!
//! The wire form ([`asn1::PkiStatusInfo`]) keeps the raw status integer so that values outside the
//! closed set in [RFC 4210 §5.2.3] are rejected here instead of failing the whole decode.
//!
//! [RFC 4210 §5.2.3]: https://datatracker.ietf.org/doc/html/rfc4210#section-5.2.3

use std::fmt;

use der::asn1::BitString;

use crate::{asn1, error::*};

/// `PKIStatus` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PkiStatus {
    Accepted = 0,
    GrantedWithMods = 1,
    Rejection = 2,
    Waiting = 3,
    RevocationWarning = 4,
    RevocationNotification = 5,
    KeyUpdateWarning = 6,
}

impl PkiStatus {
    pub fn from_raw(raw: i64) -> Result<Self> {
        Ok(match raw {
            0 => PkiStatus::Accepted,
            1 => PkiStatus::GrantedWithMods,
            2 => PkiStatus::Rejection,
            3 => PkiStatus::Waiting,
            4 => PkiStatus::RevocationWarning,
            5 => PkiStatus::RevocationNotification,
            6 => PkiStatus::KeyUpdateWarning,
            other => return Err(CmpError::UnknownPkiStatus(other)),
        })
    }

    fn name(self) -> &'static str {
        match self {
            PkiStatus::Accepted => "accepted",
            PkiStatus::GrantedWithMods => "grantedWithMods",
            PkiStatus::Rejection => "rejection",
            PkiStatus::Waiting => "waiting",
            PkiStatus::RevocationWarning => "revocationWarning",
            PkiStatus::RevocationNotification => "revocationNotification",
            PkiStatus::KeyUpdateWarning => "keyUpdateWarning",
        }
    }
}

impl fmt::Display for PkiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

const FAIL_INFO_NAMES: [&str; 27] = [
    "badAlg",
    "badMessageCheck",
    "badRequest",
    "badTime",
    "badCertId",
    "badDataFormat",
    "wrongAuthority",
    "incorrectData",
    "missingTimeStamp",
    "badPOP",
    "certRevoked",
    "certConfirmed",
    "wrongIntegrity",
    "badRecipientNonce",
    "timeNotAvailable",
    "unacceptedPolicy",
    "unacceptedExtension",
    "addInfoNotAvailable",
    "badSenderNonce",
    "badCertTemplate",
    "signerNotTrusted",
    "transactionIdInUse",
    "unsupportedVersion",
    "notAuthorized",
    "systemUnavail",
    "systemFailure",
    "duplicateCertReq",
];

/// `PKIFailureInfo` bit set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FailInfo(u32);

impl FailInfo {
    pub const BAD_ALG: FailInfo = FailInfo(1 << 0);
    pub const BAD_MESSAGE_CHECK: FailInfo = FailInfo(1 << 1);
    pub const BAD_REQUEST: FailInfo = FailInfo(1 << 2);
    pub const BAD_TIME: FailInfo = FailInfo(1 << 3);
    pub const BAD_CERT_ID: FailInfo = FailInfo(1 << 4);
    pub const BAD_DATA_FORMAT: FailInfo = FailInfo(1 << 5);
    pub const WRONG_AUTHORITY: FailInfo = FailInfo(1 << 6);
    pub const INCORRECT_DATA: FailInfo = FailInfo(1 << 7);
    pub const BAD_POP: FailInfo = FailInfo(1 << 9);
    pub const CERT_REVOKED: FailInfo = FailInfo(1 << 10);
    pub const WRONG_INTEGRITY: FailInfo = FailInfo(1 << 12);
    pub const BAD_RECIPIENT_NONCE: FailInfo = FailInfo(1 << 13);
    pub const BAD_SENDER_NONCE: FailInfo = FailInfo(1 << 18);
    pub const BAD_CERT_TEMPLATE: FailInfo = FailInfo(1 << 19);
    pub const SIGNER_NOT_TRUSTED: FailInfo = FailInfo(1 << 20);
    pub const TRANSACTION_ID_IN_USE: FailInfo = FailInfo(1 << 21);
    pub const UNSUPPORTED_VERSION: FailInfo = FailInfo(1 << 22);
    pub const NOT_AUTHORIZED: FailInfo = FailInfo(1 << 23);
    pub const SYSTEM_UNAVAIL: FailInfo = FailInfo(1 << 24);
    pub const SYSTEM_FAILURE: FailInfo = FailInfo(1 << 25);
    pub const DUPLICATE_CERT_REQ: FailInfo = FailInfo(1 << 26);

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: FailInfo) -> bool {
        self.0 & other.0 == other.0
    }

    /// Names of the bits that are set, lowest bit first.
    pub fn names(self) -> impl Iterator<Item = &'static str> {
        FAIL_INFO_NAMES
            .iter()
            .enumerate()
            .filter(move |(bit, _)| self.0 & (1 << bit) != 0)
            .map(|(_, name)| *name)
    }

    /// Parses a DER named-bit list. Bits past `duplicateCertReq` are rejected.
    pub fn from_bit_string(bits: &BitString) -> Result<Self> {
        let bytes = bits.raw_bytes();
        let mut info = 0u32;

        for bit in 0..bits.bit_len() {
            if bytes[bit / 8] & (0x80 >> (bit % 8)) == 0 {
                continue;
            }

            if bit >= FAIL_INFO_NAMES.len() {
                return Err(CmpError::FailInfoOutOfRange(bit));
            }

            info |= 1 << bit;
        }

        Ok(FailInfo(info))
    }

    pub fn to_bit_string(self) -> Result<BitString> {
        if self.0 == 0 {
            return Ok(BitString::new(0, Vec::new())?);
        }

        let highest = 31 - self.0.leading_zeros() as usize;
        let mut bytes = vec![0u8; highest / 8 + 1];

        for bit in 0..=highest {
            if self.0 & (1 << bit) != 0 {
                bytes[bit / 8] |= 0x80 >> (bit % 8);
            }
        }

        Ok(BitString::new((7 - highest % 8) as u8, bytes)?)
    }
}

impl std::ops::BitOr for FailInfo {
    type Output = FailInfo;

    fn bitor(self, rhs: FailInfo) -> FailInfo {
        FailInfo(self.0 | rhs.0)
    }
}

impl fmt::Display for FailInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("<no failure info>");
        }

        for (idx, name) in self.names().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            f.write_str(name)?;
        }

        Ok(())
    }
}

/// Validated `PKIStatusInfo`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusInfo {
    pub status: PkiStatus,
    pub fail_info: FailInfo,
    pub text: Vec<String>,
}

impl StatusInfo {
    pub fn new(status: PkiStatus) -> Self {
        StatusInfo {
            status,
            fail_info: FailInfo::default(),
            text: Vec::new(),
        }
    }

    pub fn to_asn1(&self) -> Result<asn1::PkiStatusInfo> {
        Ok(asn1::PkiStatusInfo {
            status: self.status as i64,
            status_string: (!self.text.is_empty()).then(|| self.text.clone()),
            fail_info: if self.fail_info.is_empty() {
                None
            } else {
                Some(self.fail_info.to_bit_string()?)
            },
        })
    }
}

impl TryFrom<&asn1::PkiStatusInfo> for StatusInfo {
    type Error = CmpError;

    fn try_from(info: &asn1::PkiStatusInfo) -> Result<Self> {
        Ok(StatusInfo {
            status: PkiStatus::from_raw(info.status)?,
            fail_info: info
                .fail_info
                .as_ref()
                .map(FailInfo::from_bit_string)
                .transpose()?
                .unwrap_or_default(),
            text: info.status_string.clone().unwrap_or_default(),
        })
    }
}

impl fmt::Display for StatusInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PKIStatus: {}", self.status)?;

        if !self.fail_info.is_empty() {
            write!(f, "; PKIFailureInfo: {}", self.fail_info)?;
        }

        if !self.text.is_empty() {
            write!(f, "; StatusString: {:?}", self.text.join(" "))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_status_fails_closed() {
        let info = asn1::PkiStatusInfo {
            status: 7,
            status_string: None,
            fail_info: None,
        };

        assert!(matches!(
            StatusInfo::try_from(&info),
            Err(CmpError::UnknownPkiStatus(7))
        ));
    }

    #[test]
    fn test_fail_info_bits() {
        let info = FailInfo::BAD_POP | FailInfo::BAD_ALG;
        let bits = info.to_bit_string().unwrap();
        // badAlg is bit 0 (MSB of first byte), badPOP bit 9
        assert_eq!(bits.raw_bytes(), &[0x80, 0x40]);
        assert_eq!(bits.unused_bits(), 6);

        let parsed = FailInfo::from_bit_string(&bits).unwrap();
        assert_eq!(parsed, info);
        assert_eq!(parsed.to_string(), "badAlg, badPOP");
    }

    #[test]
    fn test_fail_info_out_of_range() {
        // bit 27 is past duplicateCertReq
        let bits = BitString::new(4, vec![0, 0, 0, 0x10]).unwrap();
        assert!(matches!(
            FailInfo::from_bit_string(&bits),
            Err(CmpError::FailInfoOutOfRange(27))
        ));
    }

    #[test]
    fn test_display() {
        let mut info = StatusInfo::new(PkiStatus::Rejection);
        info.fail_info = FailInfo::BAD_REQUEST;
        info.text = vec!["nope".to_owned()];

        assert_eq!(
            info.to_string(),
            r#"PKIStatus: rejection; PKIFailureInfo: badRequest; StatusString: "nope""#
        );
    }
}
