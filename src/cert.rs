use std::io::{BufReader, Cursor};

use pkcs8::{DecodePrivateKey as _, EncodePrivateKey as _};
use time::OffsetDateTime;
use zeroize::Zeroizing;

use crate::{
    asn1::{self, DecodeError},
    error::*,
};

/// Make a P-256 private key (from which we can derive a public key).
pub fn create_p256_key() -> p256::ecdsa::SigningKey {
    let csprng = &mut rand::thread_rng();
    p256::ecdsa::SigningKey::from(p256::SecretKey::random(csprng))
}

/// The validity window of a certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Validity {
    pub not_before: OffsetDateTime,
    pub not_after: OffsetDateTime,
}

/// Reads the validity window of the first certificate in `pem`.
///
/// Both UTCTime and GeneralizedTime encodings are understood.
pub fn decode_validity(pem: &str) -> Result<Validity, DecodeError> {
    let der = first_certificate(pem)?;
    decode_validity_der(&der)
}

/// Reads the validity window of a DER encoded certificate.
pub fn decode_validity_der(der: &[u8]) -> Result<Validity, DecodeError> {
    let cert = asn1::decode_sequence(der)?;

    let tbs = cert
        .first()
        .ok_or(DecodeError::MissingElement("tbsCertificate"))?
        .expect(asn1::SEQUENCE)?
        .children()?;

    // version [0], serialNumber, signature, issuer, validity
    let validity = tbs
        .get(4)
        .ok_or(DecodeError::MissingElement("validity"))?
        .expect(asn1::SEQUENCE)?
        .children()?;

    let not_before = validity
        .first()
        .ok_or(DecodeError::MissingElement("notBefore"))?;
    let not_after = validity
        .get(1)
        .ok_or(DecodeError::MissingElement("notAfter"))?;

    Ok(Validity {
        not_before: asn1::decode_time(not_before)?,
        not_after: asn1::decode_time(not_after)?,
    })
}

fn pem_certificates(pem: &str) -> Result<Vec<Vec<u8>>, DecodeError> {
    let mut rdr = BufReader::new(Cursor::new(pem));

    rustls_pemfile::certs(&mut rdr)
        .map(|res| res.map(|cert| cert.to_vec()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| DecodeError::Pem(err.to_string()))
}

fn first_certificate(pem: &str) -> Result<Vec<u8>, DecodeError> {
    pem_certificates(pem)?
        .into_iter()
        .next()
        .ok_or_else(|| DecodeError::Pem("no certificate found".to_owned()))
}

/// Encapsulated certificate and private key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    private_key_pem: Zeroizing<String>,
    certificate: String,
}

impl Certificate {
    pub(crate) fn new(private_key_pem: Zeroizing<String>, certificate: String) -> Self {
        Certificate {
            private_key_pem,
            certificate,
        }
    }

    /// Bundles a stored certificate chain with its private key, checking both can be read.
    pub fn parse(private_key_pem: Zeroizing<String>, certificate: String) -> Result<Self> {
        // validate certificate
        first_certificate(&certificate)?;

        // validate private key
        p256::ecdsa::SigningKey::from_pkcs8_pem(&private_key_pem)?;

        Ok(Certificate {
            private_key_pem,
            certificate,
        })
    }

    /// The private key in PEM format.
    pub fn private_key(&self) -> &str {
        &self.private_key_pem
    }

    /// The private key in DER encoding.
    pub fn private_key_der(&self) -> Result<Zeroizing<Vec<u8>>> {
        let private_key = p256::ecdsa::SigningKey::from_pkcs8_pem(&self.private_key_pem)?;
        let der = private_key.to_pkcs8_der()?;
        Ok(Zeroizing::new(der.as_bytes().to_vec()))
    }

    /// The issued certificate file in PEM format.
    pub fn certificate(&self) -> &str {
        &self.certificate
    }

    /// The issued certificate chain in DER format.
    pub fn certificate_chain(&self) -> Result<Vec<Vec<u8>>> {
        Ok(pem_certificates(&self.certificate)?)
    }

    /// Validity window of the end-entity certificate.
    pub fn validity(&self) -> Result<Validity> {
        Ok(decode_validity(&self.certificate)?)
    }

    /// Inspect the certificate to count the number of (whole) valid days left.
    ///
    /// It's up to the ACME API provider to decide how long an issued certificate is valid.
    /// Let's Encrypt sets the validity to 90 days. This function reports 89 days for newly
    /// issued cert, since it counts _whole_ days.
    ///
    /// It is possible to get negative days for an expired certificate.
    pub fn valid_days_left(&self) -> Result<i64> {
        let not_after = self.validity()?.not_after;
        let diff = not_after - OffsetDateTime::now_utc();
        Ok(diff.whole_days())
    }
}
