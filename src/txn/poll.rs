use std::time::Duration;

use crate::{
    asn1::{BodyKind, PkiBody, PkiMessage, PollRepEntry, PollReqEntry},
    ctx::TransactionContext,
    error::*,
    trans::Transport,
};

use super::{build, exchange, State};

/// Sends pollReq until the CA answers with something other than pollRep.
///
/// The first pollReq goes out immediately. Each pollRep's checkAfter is waited out, capped so the
/// transaction stays within its total timeout.
pub(super) async fn poll_until_ready<T: Transport>(
    ctx: &mut TransactionContext,
    transport: &T,
    endpoint: &str,
) -> Result<PkiMessage> {
    let pending = ctx
        .pending()
        .ok_or_else(|| CmpError::invalid_args("no request is pending"))?;

    let expected = [BodyKind::PollRep, pending.kind.expected_response()];

    loop {
        ctx.check_cancelled()?;
        // nothing is counted or built for a pollReq the budget no longer allows
        ctx.send_timeout()?;
        ctx.set_state(State::Polling);
        ctx.count_poll();

        log::debug!(
            "Poll {} for certReqId {}",
            ctx.poll_count(),
            pending.cert_req_id
        );

        let request = build::message(
            ctx,
            PkiBody::PollReq(vec![PollReqEntry {
                cert_req_id: pending.cert_req_id,
            }]),
        )?;

        let response = exchange(ctx, transport, endpoint, request, &expected).await?;

        let PkiBody::PollRep(entries) = &response.body else {
            return Ok(response);
        };

        let check_after = check_after(entries, pending.cert_req_id)?;
        let wait = ctx.poll_wait(check_after)?;
        ctx.set_state(State::AwaitingPollDecision);

        log::debug!("CA asks to check back after {check_after:?}, waiting {wait:?}");
        tokio::time::sleep(wait).await;
    }
}

fn check_after(entries: &[PollRepEntry], cert_req_id: i64) -> Result<Duration> {
    let entry = match entries {
        [] => return Err(CmpError::CertResponseNotFound),
        [entry] => entry,
        all => return Err(CmpError::MultipleResponsesNotSupported(all.len())),
    };

    if entry.cert_req_id != cert_req_id {
        return Err(CmpError::CertIdMismatch {
            expected: cert_req_id,
            actual: entry.cert_req_id,
        });
    }

    let secs = u64::try_from(entry.check_after)
        .map_err(|_| CmpError::BadCheckAfter(entry.check_after))?;

    if let Some(reason) = &entry.reason {
        log::debug!("pollRep reason: {}", reason.join(" "));
    }

    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(cert_req_id: i64, check_after: i64) -> PollRepEntry {
        PollRepEntry {
            cert_req_id,
            check_after,
            reason: None,
        }
    }

    #[test]
    fn test_check_after() {
        assert_eq!(
            check_after(&[entry(0, 7)], 0).unwrap(),
            Duration::from_secs(7)
        );
    }

    #[test]
    fn test_check_after_negative() {
        assert!(matches!(
            check_after(&[entry(0, -1)], 0),
            Err(CmpError::BadCheckAfter(-1))
        ));
    }

    #[test]
    fn test_check_after_wrong_id() {
        assert!(matches!(
            check_after(&[entry(3, 1)], 0),
            Err(CmpError::CertIdMismatch {
                expected: 0,
                actual: 3
            })
        ));
    }

    #[test]
    fn test_check_after_entry_count() {
        assert!(matches!(
            check_after(&[], 0),
            Err(CmpError::CertResponseNotFound)
        ));
        assert!(matches!(
            check_after(&[entry(0, 1), entry(1, 1)], 0),
            Err(CmpError::MultipleResponsesNotSupported(2))
        ));
    }
}
