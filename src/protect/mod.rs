//! Message protection, [RFC 4210 §5.1.3].
//!
//! Requests are protected either with a MAC keyed by a secret shared with the CA
//! ([`MacProtection`]) or with a signature by the end entity's key ([`SignatureProtection`]).
//! Responses are verified against the same shared secret, or against a pinned or trusted CA
//! certificate held in [`Trust`].
//!
//! Only the algorithms enumerated here are accepted. Anything else is
//! [`UnsupportedAlgorithm`](CmpError::UnsupportedAlgorithm).
//!
//! [RFC 4210 §5.1.3]: https://datatracker.ietf.org/doc/html/rfc4210#section-5.1.3

use std::fmt;

use der::{
    asn1::{BitString, ObjectIdentifier, OctetString},
    Encode as _,
};
use p256::ecdsa::{signature::Verifier as _, Signature, VerifyingKey};
use sha2::Digest as _;
use x509_cert::{ext::pkix::name::GeneralName, spki::AlgorithmIdentifierOwned, Certificate};
use zeroize::Zeroizing;

use crate::{
    asn1::{oid, PkiMessage},
    error::*,
    key::SenderKey,
};

mod pbm;

/// Default PBM iteration count for outgoing messages.
pub const DEFAULT_ITERATION_COUNT: u32 = 500;

/// Message protection algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtectionAlgorithm {
    PasswordBasedMac,
    EcdsaWithSha256,
}

impl ProtectionAlgorithm {
    pub const ALL: [ProtectionAlgorithm; 2] = [
        ProtectionAlgorithm::PasswordBasedMac,
        ProtectionAlgorithm::EcdsaWithSha256,
    ];

    pub fn oid(self) -> ObjectIdentifier {
        match self {
            ProtectionAlgorithm::PasswordBasedMac => oid::PASSWORD_BASED_MAC,
            ProtectionAlgorithm::EcdsaWithSha256 => oid::ECDSA_WITH_SHA256,
        }
    }

    pub fn from_oid(oid: &ObjectIdentifier) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|alg| alg.oid() == *oid)
            .ok_or(CmpError::UnsupportedAlgorithm(*oid))
    }
}

/// One-way functions for PBM key derivation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum OwfAlgorithm {
    #[default]
    Sha256,
    Sha384,
    Sha512,
}

impl OwfAlgorithm {
    pub fn oid(self) -> ObjectIdentifier {
        match self {
            OwfAlgorithm::Sha256 => oid::SHA256,
            OwfAlgorithm::Sha384 => oid::SHA384,
            OwfAlgorithm::Sha512 => oid::SHA512,
        }
    }

    pub fn from_oid(oid: &ObjectIdentifier) -> Result<Self> {
        [OwfAlgorithm::Sha256, OwfAlgorithm::Sha384, OwfAlgorithm::Sha512]
            .into_iter()
            .find(|alg| alg.oid() == *oid)
            .ok_or(CmpError::UnsupportedAlgorithm(*oid))
    }

    pub(crate) fn digest(self, data: &[u8]) -> Vec<u8> {
        match self {
            OwfAlgorithm::Sha256 => sha2::Sha256::digest(data).to_vec(),
            OwfAlgorithm::Sha384 => sha2::Sha384::digest(data).to_vec(),
            OwfAlgorithm::Sha512 => sha2::Sha512::digest(data).to_vec(),
        }
    }
}

/// MAC algorithms for PBM.
///
/// [`HmacSha1`](MacAlgorithm::HmacSha1) is only accepted on responses when selected on
/// [`MacProtection::with_mac`] or listed in [`Trust::allow_macs`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum MacAlgorithm {
    HmacSha1,
    #[default]
    HmacSha256,
    HmacSha384,
    HmacSha512,
}

impl MacAlgorithm {
    pub const ALL: [MacAlgorithm; 4] = [
        MacAlgorithm::HmacSha1,
        MacAlgorithm::HmacSha256,
        MacAlgorithm::HmacSha384,
        MacAlgorithm::HmacSha512,
    ];

    /// Accepted on responses unless [`Trust::allow_macs`] says otherwise.
    pub const DEFAULT_ALLOWED: [MacAlgorithm; 3] = [
        MacAlgorithm::HmacSha256,
        MacAlgorithm::HmacSha384,
        MacAlgorithm::HmacSha512,
    ];

    pub fn oid(self) -> ObjectIdentifier {
        match self {
            MacAlgorithm::HmacSha1 => oid::HMAC_SHA1,
            MacAlgorithm::HmacSha256 => oid::HMAC_WITH_SHA256,
            MacAlgorithm::HmacSha384 => oid::HMAC_WITH_SHA384,
            MacAlgorithm::HmacSha512 => oid::HMAC_WITH_SHA512,
        }
    }

    pub fn from_oid(oid: &ObjectIdentifier) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|alg| alg.oid() == *oid)
            .ok_or(CmpError::UnsupportedAlgorithm(*oid))
    }
}

/// Protection applied to outgoing messages, fixed for the lifetime of a transaction.
#[derive(Clone, Debug, Default)]
pub enum Protection {
    /// Send unprotected. Only accepted when the transaction explicitly allows it.
    #[default]
    None,
    Mac(MacProtection),
    Signature(SignatureProtection),
}

impl Protection {
    pub fn is_none(&self) -> bool {
        matches!(self, Protection::None)
    }
}

/// Shared secret MAC protection (PBM).
#[derive(Clone)]
pub struct MacProtection {
    reference: Vec<u8>,
    secret: Zeroizing<Vec<u8>>,
    owf: OwfAlgorithm,
    mac: MacAlgorithm,
    iteration_count: u32,
}

impl MacProtection {
    /// `reference` is sent as senderKID so the CA can find the secret.
    pub fn new(reference: impl Into<Vec<u8>>, secret: impl Into<Vec<u8>>) -> Self {
        MacProtection {
            reference: reference.into(),
            secret: Zeroizing::new(secret.into()),
            owf: OwfAlgorithm::default(),
            mac: MacAlgorithm::default(),
            iteration_count: DEFAULT_ITERATION_COUNT,
        }
    }

    pub fn with_owf(mut self, owf: OwfAlgorithm) -> Self {
        self.owf = owf;
        self
    }

    pub fn with_mac(mut self, mac: MacAlgorithm) -> Self {
        self.mac = mac;
        self
    }

    /// Fails with [`InvalidArgs`](CmpError::InvalidArgs) outside the range also required of
    /// received messages (100 to 100000).
    pub fn with_iteration_count(mut self, iteration_count: u32) -> Result<Self> {
        pbm::check_iteration_count(iteration_count).map_err(|_| {
            CmpError::invalid_args(format!("PBM iteration count {iteration_count}"))
        })?;

        self.iteration_count = iteration_count;
        Ok(self)
    }

    pub fn reference(&self) -> &[u8] {
        &self.reference
    }
}

impl fmt::Debug for MacProtection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MacProtection")
            .field("reference", &String::from_utf8_lossy(&self.reference))
            .field("secret", &"<redacted>")
            .field("owf", &self.owf)
            .field("mac", &self.mac)
            .field("iteration_count", &self.iteration_count)
            .finish()
    }
}

/// Signature protection with the end entity's key and certificate.
#[derive(Clone, Debug)]
pub struct SignatureProtection {
    key: SenderKey,
    cert: Certificate,
    chain: Vec<Certificate>,
}

impl SignatureProtection {
    /// Fails with [`CertAndKeyDoNotMatch`](CmpError::CertAndKeyDoNotMatch) if `cert` does not
    /// carry the public key of `key`.
    pub fn new(key: SenderKey, cert: Certificate) -> Result<Self> {
        let cert_key = cert_verifying_key(&cert).ok_or(CmpError::CertAndKeyDoNotMatch)?;
        if cert_key != *key.signing_key().verifying_key() {
            return Err(CmpError::CertAndKeyDoNotMatch);
        }

        Ok(SignatureProtection {
            key,
            cert,
            chain: Vec::new(),
        })
    }

    /// Intermediate certificates sent along in extraCerts.
    pub fn with_chain(mut self, chain: Vec<Certificate>) -> Self {
        self.chain = chain;
        self
    }

    pub fn certificate(&self) -> &Certificate {
        &self.cert
    }

    pub fn key(&self) -> &SenderKey {
        &self.key
    }
}

/// Material for verifying signature-protected responses.
#[derive(Clone, Debug, Default)]
pub struct Trust {
    server_cert: Option<Certificate>,
    trusted: Vec<Certificate>,
    allowed: Option<Vec<ProtectionAlgorithm>>,
    allowed_macs: Option<Vec<MacAlgorithm>>,
}

impl Trust {
    /// Pins the CA's protection certificate. Responses must be signed by this certificate.
    pub fn pin_server_cert(mut self, cert: Certificate) -> Self {
        self.server_cert = Some(cert);
        self
    }

    /// Accepts a signer certificate from a response's extraCerts if it is one of these.
    pub fn with_trusted(mut self, certs: Vec<Certificate>) -> Self {
        self.trusted = certs;
        self
    }

    /// Restricts accepted response protection algorithms. All known algorithms are accepted by
    /// default.
    pub fn allow_only(mut self, algorithms: Vec<ProtectionAlgorithm>) -> Self {
        self.allowed = Some(algorithms);
        self
    }

    /// Replaces the PBM MACs accepted on responses, [`MacAlgorithm::DEFAULT_ALLOWED`] by
    /// default. Needed for CAs answering with HMAC-SHA1 to requests using another MAC.
    pub fn allow_macs(mut self, macs: Vec<MacAlgorithm>) -> Self {
        self.allowed_macs = Some(macs);
        self
    }

    pub(crate) fn has_certs(&self) -> bool {
        self.server_cert.is_some() || !self.trusted.is_empty()
    }

    fn is_allowed(&self, alg: ProtectionAlgorithm) -> bool {
        self.allowed
            .as_ref()
            .map_or(true, |allowed| allowed.contains(&alg))
    }

    fn is_mac_allowed(&self, mac: MacAlgorithm) -> bool {
        match &self.allowed_macs {
            Some(allowed) => allowed.contains(&mac),
            None => MacAlgorithm::DEFAULT_ALLOWED.contains(&mac),
        }
    }

    /// Certificate whose key must have signed `msg`.
    fn sender_cert<'a>(&'a self, msg: &'a PkiMessage) -> Result<&'a Certificate> {
        if let Some(cert) = &self.server_cert {
            return Ok(cert);
        }

        msg.extra_certs()
            .iter()
            .filter(|cert| match &msg.header.sender {
                GeneralName::DirectoryName(name) => cert.tbs_certificate.subject == *name,
                _ => true,
            })
            .find(|cert| self.trusted.contains(cert))
            .ok_or(CmpError::NoSuitableSenderCert)
    }
}

/// Computes the protection value of `protected_part` under `alg`.
///
/// `alg` must agree with the kind of `protection`.
pub fn protect(
    protected_part: &[u8],
    alg: &AlgorithmIdentifierOwned,
    protection: &Protection,
) -> Result<BitString> {
    let value = match (ProtectionAlgorithm::from_oid(&alg.oid)?, protection) {
        (ProtectionAlgorithm::PasswordBasedMac, Protection::Mac(mac)) => {
            let params = pbm::parameters(alg)?;
            pbm::compute(&mac.secret, &params, protected_part)?
        }

        (ProtectionAlgorithm::EcdsaWithSha256, Protection::Signature(sig)) => {
            let signature = sig
                .key
                .sign(protected_part)
                .map_err(|err| CmpError::ErrorProtectingMessage(err.to_string()))?;
            signature.as_bytes().to_vec()
        }

        (_, Protection::None) => return Err(CmpError::MissingProtection),

        (alg, protection) => {
            return Err(CmpError::ErrorProtectingMessage(format!(
                "{alg:?} does not match configured protection {protection:?}"
            )))
        }
    };

    Ok(BitString::from_bytes(&value)?)
}

/// Fills in protectionAlg, senderKID, the protection value and (for signatures) extraCerts.
///
/// Messages are left untouched when `protection` is [`Protection::None`].
pub fn protect_message(msg: &mut PkiMessage, protection: &Protection) -> Result<()> {
    let alg = match protection {
        Protection::None => return Ok(()),

        Protection::Mac(mac) => {
            let (alg, _) = pbm::algorithm_identifier(mac.owf, mac.mac, mac.iteration_count)?;
            msg.header.sender_kid = Some(OctetString::new(mac.reference.clone())?);
            alg
        }

        Protection::Signature(sig) => {
            let mut extra_certs = vec![sig.cert.clone()];
            extra_certs.extend(sig.chain.iter().cloned());
            extra_certs.extend(msg.extra_certs().iter().cloned());
            msg.extra_certs = Some(extra_certs);

            AlgorithmIdentifierOwned {
                oid: oid::ECDSA_WITH_SHA256,
                parameters: None,
            }
        }
    };

    msg.header.protection_alg = Some(alg.clone());
    let part = msg.protected_part()?;
    msg.protection = Some(protect(&part, &alg, protection)?);

    Ok(())
}

/// Verifies the protection of a received message.
///
/// MAC protection is checked with the secret of `protection`, signatures against `trust`.
pub fn verify(msg: &PkiMessage, protection: &Protection, trust: &Trust) -> Result<()> {
    let (alg, value) = match (&msg.header.protection_alg, &msg.protection) {
        (Some(alg), Some(value)) => (alg, value),
        _ => return Err(CmpError::validating("message is not protected")),
    };

    let kind = ProtectionAlgorithm::from_oid(&alg.oid)?;
    if !trust.is_allowed(kind) {
        return Err(CmpError::UnsupportedAlgorithm(alg.oid));
    }

    let part = msg.protected_part()?;

    match kind {
        ProtectionAlgorithm::PasswordBasedMac => {
            let Protection::Mac(mac) = protection else {
                return Err(CmpError::validating("no shared secret to verify MAC"));
            };

            let params = pbm::parameters(alg)?;

            let mac_alg = MacAlgorithm::from_oid(&params.mac.oid)?;
            if mac_alg != mac.mac && !trust.is_mac_allowed(mac_alg) {
                return Err(CmpError::UnsupportedAlgorithm(params.mac.oid));
            }

            pbm::verify(&mac.secret, &params, &part, value.raw_bytes())
        }

        ProtectionAlgorithm::EcdsaWithSha256 => {
            let cert = trust.sender_cert(msg)?;
            let key = cert_verifying_key(cert).ok_or(CmpError::NoSuitableSenderCert)?;

            let signature = Signature::from_der(value.raw_bytes())
                .map_err(|_| CmpError::validating("malformed signature"))?;

            key.verify(&part, &signature)
                .map_err(|_| CmpError::validating("signature mismatch"))
        }
    }
}

pub(crate) fn cert_verifying_key(cert: &Certificate) -> Option<VerifyingKey> {
    let spki = &cert.tbs_certificate.subject_public_key_info;
    VerifyingKey::from_sec1_bytes(spki.subject_public_key.raw_bytes()).ok()
}

/// Hash of a certificate for certConf, using the digest of its signature algorithm.
pub(crate) fn cert_hash(cert: &Certificate) -> Result<Vec<u8>> {
    let der = cert.to_der()?;

    let sig_alg = cert.signature_algorithm.oid;
    let owf = if sig_alg == oid::ECDSA_WITH_SHA384 || sig_alg == oid::SHA384_WITH_RSA {
        OwfAlgorithm::Sha384
    } else if sig_alg == oid::ECDSA_WITH_SHA512 || sig_alg == oid::SHA512_WITH_RSA {
        OwfAlgorithm::Sha512
    } else {
        OwfAlgorithm::Sha256
    };

    Ok(owf.digest(&der))
}
