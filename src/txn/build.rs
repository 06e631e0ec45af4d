//! Request construction.

use der::{
    asn1::{Any, BitString, OctetString},
    Encode as _,
};
use x509_cert::{
    attr::AttributeTypeAndValue,
    ext::{pkix::name::GeneralName, Extension},
    spki::{AlgorithmIdentifierOwned, SubjectPublicKeyInfoOwned},
    Certificate,
};

use super::{Expected, Payload, RequestKind};
use crate::{
    asn1::{
        oid, BodyKind, CertId, CertReqMsg, CertRequest, CertTemplate, InfoTypeAndValue, PkiBody,
        PkiMessage, PopoSigningKey, ProofOfPossession, RevDetails,
    },
    cert::{subject_alt_name, Enrollment, RevocationReason},
    ctx::TransactionContext,
    error::*,
    protect::protect_message,
};

/// Builds the first message of a transaction.
pub(super) fn request(
    ctx: &mut TransactionContext,
    kind: RequestKind,
    payload: Payload,
) -> Result<(PkiMessage, Expected)> {
    let mut expected = Expected::new(kind);

    let body = match (kind, payload) {
        (RequestKind::Ir | RequestKind::Cr | RequestKind::Kur, Payload::Enrollment(enrollment)) => {
            let public_key = public_key(&enrollment)?;
            let msg = cert_req_msg(kind, &enrollment, public_key.clone())?;

            expected.public_key = Some(public_key);
            expected.key = Some(enrollment.key);

            match kind {
                RequestKind::Ir => PkiBody::Ir(vec![msg]),
                RequestKind::Cr => PkiBody::Cr(vec![msg]),
                _ => PkiBody::Kur(vec![msg]),
            }
        }

        (RequestKind::P10cr, Payload::Pkcs10(csr)) => {
            expected.public_key = Some(csr.info.public_key.clone());
            PkiBody::P10cr(csr)
        }

        (RequestKind::Rr, Payload::Revocation { cert, reason }) => {
            let details = rev_details(&cert, reason)?;

            let tbs = cert.tbs_certificate;
            expected.revoked = Some((tbs.issuer, tbs.serial_number));

            PkiBody::Rr(vec![details])
        }

        (RequestKind::Genm, Payload::General(itavs)) => PkiBody::Genm(itavs),

        (kind, payload) => {
            return Err(CmpError::invalid_args(format!(
                "{kind} request cannot carry {}",
                payload_name(&payload)
            )))
        }
    };

    Ok((message(ctx, body)?, expected))
}

fn payload_name(payload: &Payload) -> &'static str {
    match payload {
        Payload::Enrollment(_) => "an enrollment",
        Payload::Pkcs10(_) => "a PKCS#10 request",
        Payload::Revocation { .. } => "a revocation",
        Payload::General(_) => "general info",
    }
}

/// Wraps `body` in a message with a fresh header and applies the configured protection.
pub(super) fn message(ctx: &mut TransactionContext, body: PkiBody) -> Result<PkiMessage> {
    if ctx.protection().is_none() && !ctx.options().unprotected_requests {
        return Err(CmpError::MissingProtection);
    }

    let mut header = ctx.new_header()?;

    let asks_for_cert = matches!(
        body.kind(),
        BodyKind::Ir | BodyKind::Cr | BodyKind::P10cr | BodyKind::Kur
    );
    if asks_for_cert && ctx.options().implicit_confirm {
        header.push_general_info(InfoTypeAndValue::new(oid::IT_IMPLICIT_CONFIRM));
    }

    let mut msg = PkiMessage::new(header, body);
    protect_message(&mut msg, ctx.protection())?;

    Ok(msg)
}

fn public_key(enrollment: &Enrollment) -> Result<SubjectPublicKeyInfoOwned> {
    SubjectPublicKeyInfoOwned::from_key(*enrollment.key.signing_key().verifying_key())
        .map_err(|err| CmpError::invalid_args(format!("public key: {err}")))
}

fn cert_req_msg(
    kind: RequestKind,
    enrollment: &Enrollment,
    public_key: SubjectPublicKeyInfoOwned,
) -> Result<CertReqMsg> {
    let mut template = CertTemplate {
        subject: enrollment.subject().cloned(),
        public_key: Some(public_key),
        ..Default::default()
    };

    if !enrollment.dns_names.is_empty() {
        let san = subject_alt_name(enrollment.dns_names.as_slice())?;
        template.extensions = Some(vec![Extension {
            extn_id: oid::CE_SUBJECT_ALT_NAME,
            critical: false,
            extn_value: OctetString::new(san.to_der()?)?,
        }]);
    }

    let controls = match (&enrollment.old_cert, kind) {
        (Some(old_cert), RequestKind::Kur) => Some(vec![old_cert_id(old_cert)?]),
        (None, RequestKind::Kur) => {
            return Err(CmpError::invalid_args(
                "key update needs the certificate being replaced",
            ))
        }
        _ => None,
    };

    let cert_req = CertRequest {
        cert_req_id: kind.cert_req_id(),
        cert_template: template,
        controls,
    };

    // proof of possession: the new key signs the request it certifies
    let signature = enrollment
        .key
        .sign(&cert_req.to_der()?)
        .map_err(|err| CmpError::ErrorProtectingMessage(format!("POPO: {err}")))?;

    let popo = ProofOfPossession::Signature(PopoSigningKey {
        algorithm_identifier: AlgorithmIdentifierOwned {
            oid: oid::ECDSA_WITH_SHA256,
            parameters: None,
        },
        signature: BitString::from_bytes(signature.as_bytes())?,
    });

    Ok(CertReqMsg {
        cert_req,
        popo: Some(popo),
        reg_info: None,
    })
}

fn old_cert_id(cert: &Certificate) -> Result<AttributeTypeAndValue> {
    let cert_id = CertId {
        issuer: GeneralName::DirectoryName(cert.tbs_certificate.issuer.clone()),
        serial_number: cert.tbs_certificate.serial_number.clone(),
    };

    Ok(AttributeTypeAndValue {
        oid: oid::REG_CTRL_OLD_CERT_ID,
        value: Any::encode_from(&cert_id)?,
    })
}

fn rev_details(cert: &Certificate, reason: RevocationReason) -> Result<RevDetails> {
    let template = CertTemplate {
        serial_number: Some(cert.tbs_certificate.serial_number.clone()),
        issuer: Some(cert.tbs_certificate.issuer.clone()),
        ..Default::default()
    };

    let crl_entry_details = match reason {
        // > the reason code CRL entry extension SHOULD be absent instead of
        // > using the unspecified (0) reasonCode value
        // see <https://datatracker.ietf.org/doc/html/rfc5280#section-5.3.1>
        RevocationReason::Unspecified => None,

        // CRLReason ::= ENUMERATED
        reason => Some(vec![Extension {
            extn_id: oid::CE_CRL_REASONS,
            critical: false,
            extn_value: OctetString::new(vec![0x0a, 0x01, reason as u8])?,
        }]),
    };

    Ok(RevDetails {
        cert_details: template,
        crl_entry_details,
    })
}
