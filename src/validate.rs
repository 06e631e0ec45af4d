//! Checks applied to every received message before its content is acted on.

use crate::{
    asn1::{BodyKind, PkiBody, PkiMessage, PVNO_CMP2000, PVNO_CMP2021},
    ctx::TransactionContext,
    error::*,
    protect,
    status::StatusInfo,
};

/// Validates `response` as the answer to `request`.
///
/// In order: transaction id, recipient nonce, protection, protocol version, body kind against
/// `expected` (an `error` body is always acceptable here), and every embedded status.
pub fn validate(
    ctx: &TransactionContext,
    request: &PkiMessage,
    response: &PkiMessage,
    expected: &[BodyKind],
) -> Result<()> {
    let header = &response.header;

    let transaction_id = request
        .header
        .trans_id()
        .or(ctx.transaction_id())
        .unwrap_or_default();

    if header.trans_id() != Some(transaction_id) {
        return Err(CmpError::TransactionIdUnmatched {
            expected: transaction_id.to_vec(),
            actual: header.trans_id().map(<[u8]>::to_vec),
        });
    }

    if let Some(recip_nonce) = header.recip_nonce() {
        let sender_nonce = request.header.sender_nonce().unwrap_or_default();
        if recip_nonce != sender_nonce {
            return Err(CmpError::RecipNonceUnmatched {
                expected: sender_nonce.to_vec(),
                actual: recip_nonce.to_vec(),
            });
        }
    }

    check_protection(ctx, response)?;

    if header.pvno != PVNO_CMP2000 && header.pvno != PVNO_CMP2021 {
        return Err(CmpError::UnexpectedPvno(header.pvno));
    }

    let kind = response.body.kind();
    if kind != BodyKind::Error && !expected.contains(&kind) {
        return Err(CmpError::UnexpectedPkiBody {
            expected: expected.to_vec(),
            actual: kind,
        });
    }

    for info in response.body.status_infos() {
        StatusInfo::try_from(info)?;
    }

    Ok(())
}

fn check_protection(ctx: &TransactionContext, response: &PkiMessage) -> Result<()> {
    let is_protected = response.protection.is_some();

    if ctx.protection().is_none() {
        // nothing to hold the CA to unless it signed and we can check the signature
        if is_protected && ctx.trust().has_certs() {
            return verify_protection(ctx, response);
        }
        return Ok(());
    }

    if !is_protected
        && ctx.options().unprotected_errors
        && matches!(response.body, PkiBody::Error(_))
    {
        log::warn!("Accepting unprotected error response");
        return Ok(());
    }

    verify_protection(ctx, response)
}

/// Any protection failure of a response is reported as
/// [`ErrorValidatingProtection`](CmpError::ErrorValidatingProtection), naming the cause.
fn verify_protection(ctx: &TransactionContext, response: &PkiMessage) -> Result<()> {
    protect::verify(response, ctx.protection(), ctx.trust()).map_err(|err| match err {
        CmpError::UnsupportedAlgorithm(_) | CmpError::NoSuitableSenderCert => {
            CmpError::validating(err.to_string())
        }
        err => err,
    })
}

#[cfg(test)]
mod tests {
    use der::asn1::{Null, OctetString};

    use super::*;
    use crate::{
        asn1::{CertRepMessage, CertResponse, ErrorMsgContent, PkiStatusInfo, RevRepContent},
        ctx::TransactionOptions,
        protect::{protect_message, MacAlgorithm, MacProtection, Protection, Trust},
        test,
    };

    fn mac() -> Protection {
        Protection::Mac(MacProtection::new("ref", "secret"))
    }

    fn context(protection: Protection) -> TransactionContext {
        TransactionContext::new(
            "CN=ee".parse().unwrap(),
            "CN=ca".parse().unwrap(),
            protection,
        )
    }

    /// Request plus a well-formed, protected answer to it.
    fn exchange(ctx: &mut TransactionContext, body: PkiBody) -> (PkiMessage, PkiMessage) {
        let request = PkiMessage::new(ctx.new_header().unwrap(), PkiBody::PkiConf(Null));

        let mut header = request.header.clone();
        header.recip_nonce = request.header.sender_nonce.clone();
        header.sender_nonce = Some(OctetString::new(vec![5; 16]).unwrap());

        let mut response = PkiMessage::new(header, body);
        protect_message(&mut response, ctx.protection()).unwrap();

        (request, response)
    }

    fn rp() -> PkiBody {
        PkiBody::Rp(RevRepContent {
            status: vec![PkiStatusInfo::accepted()],
            rev_certs: None,
            crls: None,
        })
    }

    fn error_body() -> PkiBody {
        PkiBody::Error(ErrorMsgContent {
            pki_status_info: PkiStatusInfo::with_status(crate::status::PkiStatus::Rejection),
            error_code: None,
            error_details: None,
        })
    }

    #[test]
    fn test_matching_response() {
        let mut ctx = context(mac());
        let (req, rsp) = exchange(&mut ctx, rp());
        validate(&ctx, &req, &rsp, &[BodyKind::Rp]).unwrap();
    }

    #[test]
    fn test_transaction_id_checked_first() {
        let mut ctx = context(mac());
        let (req, mut rsp) = exchange(&mut ctx, rp());

        // also breaks nonce, protection and body kind
        rsp.header.trans_id = Some(OctetString::new(vec![0; 16]).unwrap());
        rsp.header.recip_nonce = Some(OctetString::new(vec![0; 16]).unwrap());

        let err = validate(&ctx, &req, &rsp, &[BodyKind::Cp]).unwrap_err();
        assert!(matches!(err, CmpError::TransactionIdUnmatched { .. }));
    }

    #[test]
    fn test_missing_transaction_id() {
        let mut ctx = context(Protection::None);
        let (req, mut rsp) = exchange(&mut ctx, rp());
        rsp.header.trans_id = None;

        let err = validate(&ctx, &req, &rsp, &[BodyKind::Rp]).unwrap_err();
        assert!(matches!(
            err,
            CmpError::TransactionIdUnmatched { actual: None, .. }
        ));
    }

    #[test]
    fn test_recip_nonce_mismatch() {
        let mut ctx = context(Protection::None);
        let (req, mut rsp) = exchange(&mut ctx, rp());
        rsp.header.recip_nonce = Some(OctetString::new(vec![1; 16]).unwrap());

        let err = validate(&ctx, &req, &rsp, &[BodyKind::Rp]).unwrap_err();
        assert!(matches!(err, CmpError::RecipNonceUnmatched { .. }));
    }

    #[test]
    fn test_unprotected_response_rejected() {
        let mut ctx = context(mac());
        let (req, mut rsp) = exchange(&mut ctx, rp());
        rsp.protection = None;

        let err = validate(&ctx, &req, &rsp, &[BodyKind::Rp]).unwrap_err();
        assert!(matches!(err, CmpError::ErrorValidatingProtection(_)));
    }

    #[test]
    fn test_unprotected_error_policy() {
        let mut ctx = context(mac());
        let (req, mut rsp) = exchange(&mut ctx, error_body());
        rsp.protection = None;

        let err = validate(&ctx, &req, &rsp, &[BodyKind::Rp]).unwrap_err();
        assert!(matches!(err, CmpError::ErrorValidatingProtection(_)));

        let ctx = context(mac()).with_options(TransactionOptions {
            unprotected_errors: true,
            ..Default::default()
        });
        validate(&ctx, &req, &rsp, &[BodyKind::Rp]).unwrap();
    }

    #[test]
    fn test_unprotected_errors_only_cover_errors() {
        let mut ctx = context(mac()).with_options(TransactionOptions {
            unprotected_errors: true,
            ..Default::default()
        });
        let (req, mut rsp) = exchange(&mut ctx, rp());
        rsp.protection = None;

        let err = validate(&ctx, &req, &rsp, &[BodyKind::Rp]).unwrap_err();
        assert!(matches!(err, CmpError::ErrorValidatingProtection(_)));
    }

    #[test]
    fn test_protection_failures_reported_as_validation() {
        // MAC the client did not select and the trust settings do not allow
        let mut ctx = context(mac());
        let (req, mut rsp) = exchange(&mut ctx, rp());
        let sha1 = MacProtection::new("ref", "secret").with_mac(MacAlgorithm::HmacSha1);
        protect_message(&mut rsp, &Protection::Mac(sha1)).unwrap();

        let err = validate(&ctx, &req, &rsp, &[BodyKind::Rp]).unwrap_err();
        assert!(matches!(err, CmpError::ErrorValidatingProtection(_)));

        let ctx = ctx.with_trust(Trust::default().allow_macs(vec![MacAlgorithm::HmacSha1]));
        validate(&ctx, &req, &rsp, &[BodyKind::Rp]).unwrap();

        // signer that is neither pinned nor trusted
        let (_, trusted) = test::key_and_cert("CN=ca");
        let (key, cert) = test::key_and_cert("CN=ca");
        let mut ctx =
            context(Protection::None).with_trust(Trust::default().with_trusted(vec![trusted]));
        let (req, mut rsp) = exchange(&mut ctx, rp());
        let signer = crate::protect::SignatureProtection::new(key, cert).unwrap();
        protect_message(&mut rsp, &Protection::Signature(signer)).unwrap();

        let err = validate(&ctx, &req, &rsp, &[BodyKind::Rp]).unwrap_err();
        assert!(matches!(err, CmpError::ErrorValidatingProtection(_)));
    }

    #[test]
    fn test_unexpected_pvno() {
        let mut ctx = context(Protection::None);
        let (req, mut rsp) = exchange(&mut ctx, rp());
        rsp.header.pvno = 1;

        let err = validate(&ctx, &req, &rsp, &[BodyKind::Rp]).unwrap_err();
        assert!(matches!(err, CmpError::UnexpectedPvno(1)));
    }

    #[test]
    fn test_cp_while_awaiting_rp() {
        let body = PkiBody::Cp(CertRepMessage {
            ca_pubs: None,
            response: vec![CertResponse {
                cert_req_id: 0,
                status: PkiStatusInfo::accepted(),
                certified_key_pair: None,
                rsp_info: None,
            }],
        });

        let mut ctx = context(mac());
        let (req, rsp) = exchange(&mut ctx, body);

        let err = validate(&ctx, &req, &rsp, &[BodyKind::Rp]).unwrap_err();
        match err {
            CmpError::UnexpectedPkiBody { expected, actual } => {
                assert_eq!(expected, vec![BodyKind::Rp]);
                assert_eq!(actual, BodyKind::Cp);
            }
            err => panic!("unexpected error: {err}"),
        }
    }

    #[test]
    fn test_error_body_always_expected() {
        let mut ctx = context(mac());
        let (req, rsp) = exchange(&mut ctx, error_body());
        validate(&ctx, &req, &rsp, &[BodyKind::Ip]).unwrap();
    }

    #[test]
    fn test_unknown_status() {
        let mut status = PkiStatusInfo::accepted();
        status.status = 9;
        let body = PkiBody::Rp(RevRepContent {
            status: vec![status],
            rev_certs: None,
            crls: None,
        });

        let mut ctx = context(mac());
        let (req, rsp) = exchange(&mut ctx, body);

        let err = validate(&ctx, &req, &rsp, &[BodyKind::Rp]).unwrap_err();
        assert!(matches!(err, CmpError::UnknownPkiStatus(9)));
    }
}
