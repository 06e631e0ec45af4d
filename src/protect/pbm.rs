//! PasswordBasedMac, [RFC 4211 §4.4].
//!
//! [RFC 4211 §4.4]: https://datatracker.ietf.org/doc/html/rfc4211#section-4.4

use der::{asn1::OctetString, Decode as _, Encode as _};
use hmac::{digest::KeyInit, Hmac, Mac};
use rand::RngCore as _;
use sha1::Sha1;
use sha2::{Sha256, Sha384, Sha512};
use x509_cert::spki::AlgorithmIdentifierOwned;
use zeroize::Zeroizing;

use super::{MacAlgorithm, OwfAlgorithm};
use crate::{
    asn1::{oid, PbmParameter},
    error::*,
};

const SALT_LEN: usize = 16;

/// Iteration counts accepted from the server.
const ITERATION_RANGE: std::ops::RangeInclusive<u32> = 100..=100_000;

/// Fresh parameters with a random salt, wrapped as a protection algorithm identifier.
pub(crate) fn algorithm_identifier(
    owf: OwfAlgorithm,
    mac: MacAlgorithm,
    iteration_count: u32,
) -> Result<(AlgorithmIdentifierOwned, PbmParameter)> {
    let mut salt = vec![0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);

    let params = PbmParameter {
        salt: OctetString::new(salt)?,
        owf: AlgorithmIdentifierOwned {
            oid: owf.oid(),
            parameters: None,
        },
        iteration_count,
        mac: AlgorithmIdentifierOwned {
            oid: mac.oid(),
            parameters: None,
        },
    };

    let alg = AlgorithmIdentifierOwned {
        oid: oid::PASSWORD_BASED_MAC,
        parameters: Some(der::Any::from_der(&params.to_der()?)?),
    };

    Ok((alg, params))
}

/// Extracts and checks the parameters of a received PBM algorithm identifier.
pub(crate) fn parameters(alg: &AlgorithmIdentifierOwned) -> Result<PbmParameter> {
    let any = alg
        .parameters
        .as_ref()
        .ok_or_else(|| CmpError::validating("missing PBM parameters"))?;

    let params = any
        .to_der()
        .and_then(|der| PbmParameter::from_der(&der))
        .map_err(|err| CmpError::validating(format!("bad PBM parameters: {err}")))?;

    check_iteration_count(params.iteration_count)?;

    Ok(params)
}

pub(crate) fn check_iteration_count(iteration_count: u32) -> Result<()> {
    if ITERATION_RANGE.contains(&iteration_count) {
        Ok(())
    } else {
        Err(CmpError::validating(format!(
            "PBM iteration count {iteration_count} out of range"
        )))
    }
}

/// Base key: the one-way function applied `iteration_count` times, starting from `secret || salt`.
fn derive_key(
    owf: OwfAlgorithm,
    secret: &[u8],
    salt: &[u8],
    iteration_count: u32,
) -> Zeroizing<Vec<u8>> {
    let mut input = Zeroizing::new(Vec::with_capacity(secret.len() + salt.len()));
    input.extend_from_slice(secret);
    input.extend_from_slice(salt);

    let mut key = Zeroizing::new(owf.digest(&input));
    for _ in 1..iteration_count {
        key = Zeroizing::new(owf.digest(&key));
    }

    key
}

pub(crate) fn compute(secret: &[u8], params: &PbmParameter, data: &[u8]) -> Result<Vec<u8>> {
    if params.iteration_count == 0 {
        return Err(CmpError::ErrorProtectingMessage(
            "PBM iteration count must be positive".to_owned(),
        ));
    }

    let owf = OwfAlgorithm::from_oid(&params.owf.oid)?;
    let mac = MacAlgorithm::from_oid(&params.mac.oid)?;
    let key = derive_key(owf, secret, params.salt.as_bytes(), params.iteration_count);

    let tag = match mac {
        MacAlgorithm::HmacSha1 => hmac_tag::<Hmac<Sha1>>(&key, data),
        MacAlgorithm::HmacSha256 => hmac_tag::<Hmac<Sha256>>(&key, data),
        MacAlgorithm::HmacSha384 => hmac_tag::<Hmac<Sha384>>(&key, data),
        MacAlgorithm::HmacSha512 => hmac_tag::<Hmac<Sha512>>(&key, data),
    };

    tag.ok_or_else(|| CmpError::ErrorProtectingMessage("invalid HMAC key".to_owned()))
}

/// Constant-time check of `tag` against the MAC of `data`.
pub(crate) fn verify(secret: &[u8], params: &PbmParameter, data: &[u8], tag: &[u8]) -> Result<()> {
    let owf = OwfAlgorithm::from_oid(&params.owf.oid)?;
    let mac = MacAlgorithm::from_oid(&params.mac.oid)?;
    let key = derive_key(owf, secret, params.salt.as_bytes(), params.iteration_count);

    let matches = match mac {
        MacAlgorithm::HmacSha1 => hmac_verify::<Hmac<Sha1>>(&key, data, tag),
        MacAlgorithm::HmacSha256 => hmac_verify::<Hmac<Sha256>>(&key, data, tag),
        MacAlgorithm::HmacSha384 => hmac_verify::<Hmac<Sha384>>(&key, data, tag),
        MacAlgorithm::HmacSha512 => hmac_verify::<Hmac<Sha512>>(&key, data, tag),
    };

    if matches {
        Ok(())
    } else {
        Err(CmpError::validating("MAC mismatch"))
    }
}

fn hmac_tag<M: Mac + KeyInit>(key: &[u8], data: &[u8]) -> Option<Vec<u8>> {
    let mut mac = <M as KeyInit>::new_from_slice(key).ok()?;
    Mac::update(&mut mac, data);
    Some(mac.finalize().into_bytes().to_vec())
}

fn hmac_verify<M: Mac + KeyInit>(key: &[u8], data: &[u8], tag: &[u8]) -> bool {
    match <M as KeyInit>::new_from_slice(key) {
        Ok(mut mac) => {
            Mac::update(&mut mac, data);
            mac.verify_slice(tag).is_ok()
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(iteration_count: u32) -> PbmParameter {
        let (_, mut params) =
            algorithm_identifier(OwfAlgorithm::Sha256, MacAlgorithm::HmacSha256, 500).unwrap();
        params.iteration_count = iteration_count;
        params
    }

    #[test]
    fn test_mac_verifies() {
        let params = params(500);
        let tag = compute(b"secret", &params, b"protected part").unwrap();
        assert_eq!(tag.len(), 32);

        verify(b"secret", &params, b"protected part", &tag).unwrap();
    }

    fn hex(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }

    fn fixed_params(mac: MacAlgorithm) -> PbmParameter {
        let (_, mut params) = algorithm_identifier(OwfAlgorithm::Sha256, mac, 500).unwrap();
        params.salt = OctetString::new((0u8..16).collect::<Vec<_>>()).unwrap();
        params
    }

    #[test]
    fn test_known_answers() {
        let sha1 = fixed_params(MacAlgorithm::HmacSha1);
        let tag = compute(b"insta", &sha1, b"protected part").unwrap();
        assert_eq!(hex(&tag), "8e72f4c97cd00f9d3b478a4dc02e73874da371c0");
        verify(b"insta", &sha1, b"protected part", &tag).unwrap();

        let sha256 = fixed_params(MacAlgorithm::HmacSha256);
        let tag = compute(b"insta", &sha256, b"protected part").unwrap();
        assert_eq!(
            hex(&tag),
            "6ec32e85d7e5cd4ed0cc40b64133c47fd48f24f7e241c594dc92ed47d2769ef6"
        );
    }

    #[test]
    fn test_wrong_secret() {
        let params = params(500);
        let tag = compute(b"secret", &params, b"protected part").unwrap();

        let err = verify(b"other", &params, b"protected part", &tag).unwrap_err();
        assert!(matches!(err, CmpError::ErrorValidatingProtection(_)));
    }

    #[test]
    fn test_truncated_tag() {
        let params = params(500);
        let tag = compute(b"secret", &params, b"data").unwrap();

        let err = verify(b"secret", &params, b"data", &tag[..16]).unwrap_err();
        assert!(matches!(err, CmpError::ErrorValidatingProtection(_)));
    }

    #[test]
    fn test_salt_is_fresh() {
        assert_ne!(params(500).salt, params(500).salt);
    }

    #[test]
    fn test_key_depends_on_iterations() {
        let one = derive_key(OwfAlgorithm::Sha256, b"s", b"salt", 1);
        let two = derive_key(OwfAlgorithm::Sha256, b"s", b"salt", 2);

        assert_eq!(*one, OwfAlgorithm::Sha256.digest(b"ssalt"));
        assert_eq!(*two, OwfAlgorithm::Sha256.digest(&one));
    }

    #[test]
    fn test_iteration_bounds_on_receipt() {
        let (mut alg, _) =
            algorithm_identifier(OwfAlgorithm::Sha256, MacAlgorithm::HmacSha256, 500).unwrap();
        parameters(&alg).unwrap();

        let (too_many, _) =
            algorithm_identifier(OwfAlgorithm::Sha256, MacAlgorithm::HmacSha256, 1_000_000)
                .unwrap();
        alg.parameters = too_many.parameters;
        assert!(matches!(
            parameters(&alg),
            Err(CmpError::ErrorValidatingProtection(_))
        ));
    }
}
