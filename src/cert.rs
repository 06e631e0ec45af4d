use std::collections::HashSet;

use der::{asn1::Ia5String, EncodePem as _};
use eyre::{eyre, WrapErr as _};
use pem::LineEnding;
use time::{OffsetDateTime, PrimitiveDateTime};
use x509_cert::{
    builder::{Builder, RequestBuilder as CsrBuilder},
    ext::pkix::{name::GeneralName, SubjectAltName},
    name::Name,
    Certificate,
};
use zeroize::Zeroizing;

use crate::{error::*, key::SenderKey, status::StatusInfo};

/// Make a P-256 private key (from which we can derive a public key).
pub fn create_p256_key() -> p256::ecdsa::SigningKey {
    let csprng = &mut rand::thread_rng();
    ecdsa::SigningKey::from(p256::SecretKey::random(csprng))
}

/// Creates a PKCS#10 CSR with `domains` and signs it with `signer`, for use with
/// [`Client::certify_pkcs10`](crate::Client::certify_pkcs10).
///
/// The first item of `domains` is picked for the CSR's Common Name (CN). All domains are added to a
/// Subject Alternative Name (SAN) extension.
pub fn create_csr(
    signer: &p256::ecdsa::SigningKey,
    domains: &[&str],
) -> eyre::Result<x509_cert::request::CertReq> {
    let primary_domain = domains.first().ok_or_else(|| eyre!("no domains given"))?;
    let subject = format!("CN={primary_domain}")
        .parse::<Name>()
        .context("CSR subject")?;

    let mut csr = CsrBuilder::new(subject, signer).context("CSR builder")?;

    if domains.len() > 1 {
        csr.add_extension(&subject_alt_name(domains)?)
            .context("add SAN extension")?;
    }

    csr.build::<p256::ecdsa::DerSignature>()
        .context("build csr")
}

pub(crate) fn subject_alt_name<S: AsRef<str>>(domains: &[S]) -> Result<SubjectAltName> {
    let names = domains
        .iter()
        .map(|domain| {
            Ia5String::new(domain.as_ref())
                .map(GeneralName::DnsName)
                .map_err(|err| {
                    CmpError::invalid_args(format!("DNS name {}: {err}", domain.as_ref()))
                })
        })
        .collect::<Result<_>>()?;

    Ok(SubjectAltName(names))
}

/// What to ask the CA for in an ir, cr or kur.
#[derive(Clone, Debug)]
pub struct Enrollment {
    pub(crate) key: SenderKey,
    pub(crate) subject: Option<Name>,
    pub(crate) dns_names: Vec<String>,
    pub(crate) old_cert: Option<Certificate>,
}

impl Enrollment {
    /// Requests a certificate for the public half of `key`.
    pub fn new(key: SenderKey) -> Self {
        Enrollment {
            key,
            subject: None,
            dns_names: Vec::new(),
            old_cert: None,
        }
    }

    pub fn with_subject(mut self, subject: Name) -> Self {
        self.subject = Some(subject);
        self
    }

    /// DNS names for a Subject Alternative Name extension. Duplicates are dropped.
    pub fn with_dns_names(mut self, names: &[&str]) -> Self {
        let mut dedup = HashSet::new();
        self.dns_names = names
            .iter()
            .filter(|name| dedup.insert(**name))
            .map(|name| (*name).to_owned())
            .collect();
        self
    }

    /// Certificate being replaced by a key update. Its subject is used unless
    /// [`with_subject`](Self::with_subject) overrides it.
    pub fn with_old_cert(mut self, cert: Certificate) -> Self {
        self.old_cert = Some(cert);
        self
    }

    pub fn key(&self) -> &SenderKey {
        &self.key
    }

    pub(crate) fn subject(&self) -> Option<&Name> {
        self.subject
            .as_ref()
            .or(self.old_cert.as_ref().map(|cert| &cert.tbs_certificate.subject))
    }
}

/// Certificate issued by the CA, with everything the CA sent along.
#[derive(Debug, Clone)]
pub struct IssuedCertificate {
    pub(crate) certificate: Certificate,
    pub(crate) ca_pubs: Vec<Certificate>,
    pub(crate) extra_certs: Vec<Certificate>,
    pub(crate) status: StatusInfo,
    pub(crate) key: Option<SenderKey>,
}

impl IssuedCertificate {
    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    /// The issued certificate in PEM format.
    pub fn certificate_pem(&self) -> eyre::Result<String> {
        self.certificate
            .to_pem(LineEnding::LF)
            .context("certificate_to_pem")
    }

    /// CA certificates published with the response (`caPubs`).
    pub fn ca_pubs(&self) -> &[Certificate] {
        &self.ca_pubs
    }

    /// The issued certificate followed by the response's extraCerts, in PEM format.
    ///
    /// Which extraCerts a CA includes varies; typically the issuing chain.
    pub fn chain_pem(&self) -> eyre::Result<String> {
        let mut pem = self.certificate_pem()?;

        for cert in self.extra_certs.iter().filter(|cert| **cert != self.certificate) {
            pem.push_str(&cert.to_pem(LineEnding::LF).context("chain_to_pem")?);
        }

        Ok(pem)
    }

    pub fn extra_certs(&self) -> &[Certificate] {
        &self.extra_certs
    }

    /// Status the certificate was granted with.
    pub fn status(&self) -> &StatusInfo {
        &self.status
    }

    /// The requested key in PKCS#8 PEM format. Absent for PKCS#10 requests and resumed
    /// transactions.
    pub fn private_key_pem(&self) -> eyre::Result<Zeroizing<String>> {
        self.key
            .as_ref()
            .ok_or_else(|| eyre!("private key not known"))?
            .to_pem()
    }

    /// Inspect the certificate to count the number of (whole) valid days left.
    ///
    /// It is possible to get negative days for an expired certificate.
    pub fn valid_days_left(&self) -> eyre::Result<i64> {
        let not_after = self
            .certificate
            .tbs_certificate
            .validity
            .not_after
            .to_date_time();

        let not_after = PrimitiveDateTime::try_from(not_after)
            .context("notAfter out of range")?
            .assume_utc();

        let diff = not_after - OffsetDateTime::now_utc();

        Ok(diff.whole_days())
    }
}

/// Enumeration of reasons for revocation.
///
/// The reason codes are taken from [RFC 5280 §5.3.1].
///
/// [RFC 5280 §5.3.1]: https://tools.ietf.org/html/rfc5280#section-5.3.1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevocationReason {
    Unspecified = 0,
    KeyCompromise = 1,
    CACompromise = 2,
    AffiliationChanged = 3,
    Superseded = 4,
    CessationOfOperation = 5,
    CertificateHold = 6,
    // value 7 is not used
    RemoveFromCRL = 8,
    PrivilegeWithdrawn = 9,
    AACompromise = 10,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{status::PkiStatus, test};

    #[test]
    fn test_create_csr() {
        let key = create_p256_key();
        let csr = create_csr(&key, &["example.com", "www.example.com"]).unwrap();
        assert_eq!(csr.info.subject.to_string(), "CN=example.com");
        assert_eq!(csr.info.attributes.len(), 1);

        assert!(create_csr(&key, &[]).is_err());
    }

    #[test]
    fn test_enrollment_dns_names() {
        let enrollment =
            Enrollment::new(SenderKey::generate()).with_dns_names(&["a.test", "b.test", "a.test"]);
        assert_eq!(enrollment.dns_names, ["a.test", "b.test"]);
    }

    #[test]
    fn test_enrollment_subject_from_old_cert() {
        let (_, old) = test::key_and_cert("CN=old");

        let enrollment = Enrollment::new(SenderKey::generate()).with_old_cert(old);
        assert_eq!(enrollment.subject().unwrap().to_string(), "CN=old");

        let enrollment = enrollment.with_subject("CN=new".parse().unwrap());
        assert_eq!(enrollment.subject().unwrap().to_string(), "CN=new");
    }

    #[test]
    fn test_issued_certificate_pem() {
        let (key, cert) = test::key_and_cert("CN=ee");
        let (_, ca) = test::key_and_cert("CN=ca");

        let issued = IssuedCertificate {
            certificate: cert.clone(),
            ca_pubs: Vec::new(),
            extra_certs: vec![cert, ca],
            status: StatusInfo::new(PkiStatus::Accepted),
            key: Some(key),
        };

        let pem = issued.certificate_pem().unwrap();
        assert!(pem.starts_with("-----BEGIN CERTIFICATE-----"));
        assert_eq!(issued.chain_pem().unwrap().matches("BEGIN CERTIFICATE").count(), 2);
        assert!(issued.private_key_pem().is_ok());

        // test certificates are valid for one day
        let days = issued.valid_days_left().unwrap();
        assert!((0..=1).contains(&days), "{days}");
    }
}
