//! PKCS#10 certificate signing requests ([RFC 2986]) for P-256 keys.
//!
//! [RFC 2986]: https://datatracker.ietf.org/doc/html/rfc2986

use p256::ecdsa::{signature::Signer as _, Signature, SigningKey};

use crate::{asn1, error::*};

const OID_COMMON_NAME: &[u64] = &[2, 5, 4, 3];
const OID_EC_PUBLIC_KEY: &[u64] = &[1, 2, 840, 10045, 2, 1];
const OID_PRIME256V1: &[u64] = &[1, 2, 840, 10045, 3, 1, 7];
const OID_ECDSA_WITH_SHA256: &[u64] = &[1, 2, 840, 10045, 4, 3, 2];
const OID_EXTENSION_REQUEST: &[u64] = &[1, 2, 840, 113549, 1, 9, 14];
const OID_SUBJECT_ALT_NAME: &[u64] = &[2, 5, 29, 17];

/// `dNSName [2] IA5String` in a GeneralName.
const GENERAL_NAME_DNS: u8 = 2;

/// Creates a DER encoded CSR for `domains`, signed with `signing_key`.
///
/// The first domain becomes the subject's Common Name (CN). All domains, wildcards included as
/// written, are listed in a Subject Alternative Name (SAN) extension.
pub(crate) fn create_csr(signing_key: &SigningKey, domains: &[&str]) -> Result<Vec<u8>> {
    let info = certification_request_info(signing_key, domains)?;

    let signature: Signature = signing_key.try_sign(&info)?;
    let (r, s) = signature.split_bytes();

    Ok(asn1::sequence([
        info,
        algorithm(OID_ECDSA_WITH_SHA256, None),
        asn1::bit_string(&asn1::sequence([asn1::uint(&r), asn1::uint(&s)])),
    ]))
}

fn certification_request_info(signing_key: &SigningKey, domains: &[&str]) -> Result<Vec<u8>> {
    let primary_domain = domains
        .first()
        .ok_or_else(|| Error::Config("a CSR needs at least one domain".to_owned()))?;

    let subject = asn1::sequence([asn1::set([asn1::sequence([
        asn1::oid(OID_COMMON_NAME),
        asn1::utf8_string(primary_domain),
    ])])]);

    let point = signing_key.verifying_key().to_encoded_point(false);
    let subject_pk_info = asn1::sequence([
        algorithm(OID_EC_PUBLIC_KEY, Some(OID_PRIME256V1)),
        asn1::bit_string(point.as_bytes()),
    ]);

    let alt_names = asn1::sequence(
        domains
            .iter()
            .map(|domain| asn1::context(GENERAL_NAME_DNS, false, domain.as_bytes())),
    );

    let san_extension = asn1::sequence([
        asn1::oid(OID_SUBJECT_ALT_NAME),
        asn1::octet_string(&alt_names),
    ]);

    let attributes = asn1::context(
        0,
        true,
        &asn1::sequence([
            asn1::oid(OID_EXTENSION_REQUEST),
            asn1::set([asn1::sequence([san_extension])]),
        ]),
    );

    Ok(asn1::sequence([
        asn1::integer(0),
        subject,
        subject_pk_info,
        attributes,
    ]))
}

fn algorithm(oid: &[u64], parameter: Option<&[u64]>) -> Vec<u8> {
    match parameter {
        Some(parameter) => asn1::sequence([asn1::oid(oid), asn1::oid(parameter)]),
        None => asn1::sequence([asn1::oid(oid)]),
    }
}
