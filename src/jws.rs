//! See [RFC 8555 §6.2](https://datatracker.ietf.org/doc/html/rfc8555#section-6.2).

use p256::ecdsa::{signature::Signer as _, Signature, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

use crate::{acc::AcmeKey, error::*, util::base64url};

/// JWT Protected Header scheme as defined in [RFC 8555 §6.2].
///
/// > For newAccount requests, and for revokeCert requests authenticated by a certificate key,
/// there MUST be a "jwk" field. This field MUST contain the public key corresponding to the
/// private key used to sign the JWS.
/// >
/// > For all other requests, the request is signed using an existing account, and there MUST be a
/// "kid" field. This field MUST contain the account URL received by POSTing to the newAccount
/// resource.
///
/// [RFC 8555 §6.2]: https://datatracker.ietf.org/doc/html/rfc8555#section-6.2
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub(crate) struct JwsProtectedHeader {
    /// Algorithm.
    ///
    /// Always "ES256"; only P-256 keys are supported.
    alg: String,

    /// A unique value that enables the verifier of a JWS to recognize when replay has occurred.
    ///
    /// As defined in [RFC 8555 §6.5]. Absent only for the inner JWS of a key change.
    ///
    /// [RFC 8555 §6.5]: https://datatracker.ietf.org/doc/html/rfc8555#section-6.5
    #[serde(skip_serializing_if = "Option::is_none")]
    nonce: Option<String>,

    /// Defined in [RFC 8555 §6.4].
    ///
    /// > The "url" header parameter specifies the URL (RFC 3986) to which this JWS object is
    /// directed. The "url" header parameter MUST be carried in the protected header of the JWS. The
    /// value of the "url" header parameter MUST be a string representing the target URL.
    ///
    /// [RFC 8555 §6.4]: https://datatracker.ietf.org/doc/html/rfc8555#section-6.4
    url: String,

    /// JSON Web Key.
    ///
    /// Mutually exclusive with `kid` field.
    #[serde(skip_serializing_if = "Option::is_none")]
    jwk: Option<Jwk>,

    /// Key ID.
    ///
    /// Mutually exclusive with `jwk` field.
    #[serde(skip_serializing_if = "Option::is_none")]
    kid: Option<String>,
}

impl JwsProtectedHeader {
    pub(crate) fn new_jwk(jwk: Jwk, url: &str, nonce: String) -> Self {
        JwsProtectedHeader {
            alg: "ES256".to_owned(),
            url: url.to_owned(),
            nonce: Some(nonce),
            jwk: Some(jwk),
            ..Default::default()
        }
    }

    pub(crate) fn new_kid(kid: &str, url: &str, nonce: String) -> Self {
        JwsProtectedHeader {
            alg: "ES256".to_owned(),
            url: url.to_owned(),
            nonce: Some(nonce),
            kid: Some(kid.to_owned()),
            ..Default::default()
        }
    }

    /// Header for the inner, nonce-less JWS of a key rollover.
    pub(crate) fn new_key_change(jwk: Jwk, url: &str) -> Self {
        JwsProtectedHeader {
            alg: "ES256".to_owned(),
            url: url.to_owned(),
            jwk: Some(jwk),
            ..Default::default()
        }
    }
}

/// Public half of a P-256 key as a JSON Web Key.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Jwk {
    alg: String,
    crv: String,
    kty: String,
    #[serde(rename = "use")]
    _use: String,
    x: String,
    y: String,
}

impl Jwk {
    pub(crate) fn from_verifying_key(key: &VerifyingKey) -> Result<Self> {
        let point = key.to_encoded_point(false);

        let (x, y) = point
            .x()
            .zip(point.y())
            .ok_or_else(|| Error::Config("public key is the identity point".to_owned()))?;

        Ok(Jwk {
            alg: "ES256".to_owned(),
            kty: "EC".to_owned(),
            crv: "P-256".to_owned(),
            _use: "sig".to_owned(),
            x: base64url(x),
            y: base64url(y),
        })
    }

    /// JWK thumbprint as defined in [RFC 7638], base64url-encoded.
    ///
    /// [RFC 7638]: https://datatracker.ietf.org/doc/html/rfc7638
    pub fn thumbprint(&self) -> Result<String> {
        let jwk_json = serde_json::to_string(&JwkThumb::from(self))?;
        Ok(base64url(&Sha256::digest(jwk_json)))
    }
}

impl TryFrom<&AcmeKey> for Jwk {
    type Error = Error;

    fn try_from(a: &AcmeKey) -> Result<Self> {
        Jwk::from_verifying_key(a.signing_key().verifying_key())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
// LEXICAL ORDER OF FIELDS MATTER!
pub(crate) struct JwkThumb {
    crv: String,
    kty: String,
    x: String,
    y: String,
}

impl From<&Jwk> for JwkThumb {
    fn from(a: &Jwk) -> Self {
        JwkThumb {
            crv: a.crv.clone(),
            kty: a.kty.clone(),
            x: a.x.clone(),
            y: a.y.clone(),
        }
    }
}

/// <https://datatracker.ietf.org/doc/html/rfc7515#section-7.2.2>
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct FlattenedJsonJws {
    pub(crate) protected: String,
    pub(crate) payload: String,
    pub(crate) signature: String,
}

/// Signs `payload` under `protected` with ES256, as described in [RFC 7515 §5.1].
///
/// A missing payload is signed and sent as the empty string, which is how ACME spells
/// POST-as-GET.
///
/// [RFC 7515 §5.1]: https://datatracker.ietf.org/doc/html/rfc7515#section-5.1
pub(crate) fn sign<T: Serialize + ?Sized>(
    key: &SigningKey,
    protected: &JwsProtectedHeader,
    payload: Option<&T>,
) -> Result<FlattenedJsonJws> {
    let protected = base64url(&serde_json::to_string(protected)?);

    let payload = match payload {
        Some(payload) => base64url(&serde_json::to_string(payload)?),
        None => String::new(),
    };

    let to_sign = format!("{protected}.{payload}");
    let signature: Signature = key.try_sign(to_sign.as_bytes())?;

    Ok(FlattenedJsonJws {
        protected,
        payload,
        signature: base64url(&signature.to_bytes()),
    })
}

#[cfg(test)]
mod tests {
    use base64::prelude::*;
    use p256::ecdsa::signature::Verifier as _;
    use pkcs8::DecodePrivateKey as _;

    use super::*;

    const FIXTURE_KEY: &str = include_str!("testdata/csr-key.pem");

    fn decode_json(field: &str) -> serde_json::Value {
        let json = BASE64_URL_SAFE_NO_PAD.decode(field).unwrap();
        serde_json::from_slice(&json).unwrap()
    }

    #[test]
    fn test_signature_verifies() {
        let key = crate::create_p256_key();
        let header = JwsProtectedHeader::new_kid(
            "https://example.com/acct/1",
            "https://example.com/new-order",
            "nonce-1".to_owned(),
        );

        let jws = sign(&key, &header, Some(&serde_json::json!({ "a": 1 }))).unwrap();

        let signature = BASE64_URL_SAFE_NO_PAD.decode(&jws.signature).unwrap();
        assert_eq!(signature.len(), 64);

        let signature = Signature::from_slice(&signature).unwrap();
        let signed = format!("{}.{}", jws.protected, jws.payload);
        key.verifying_key()
            .verify(signed.as_bytes(), &signature)
            .unwrap();

        let protected = decode_json(&jws.protected);
        assert_eq!(protected["alg"], "ES256");
        assert_eq!(protected["nonce"], "nonce-1");
        assert_eq!(protected["url"], "https://example.com/new-order");
        assert_eq!(protected["kid"], "https://example.com/acct/1");
        assert!(protected.get("jwk").is_none());

        assert_eq!(decode_json(&jws.payload), serde_json::json!({ "a": 1 }));
    }

    #[test]
    fn test_post_as_get_has_empty_payload() {
        let key = crate::create_p256_key();
        let jwk = Jwk::from_verifying_key(key.verifying_key()).unwrap();
        let header = JwsProtectedHeader::new_jwk(jwk, "https://example.com/x", "n".to_owned());

        let jws = sign::<()>(&key, &header, None).unwrap();
        assert_eq!(jws.payload, "");

        let protected = decode_json(&jws.protected);
        assert_eq!(protected["jwk"]["kty"], "EC");
        assert_eq!(protected["jwk"]["crv"], "P-256");
        assert!(protected.get("kid").is_none());
    }

    #[test]
    fn test_key_change_header_has_no_nonce() {
        let key = crate::create_p256_key();
        let jwk = Jwk::from_verifying_key(key.verifying_key()).unwrap();
        let header = JwsProtectedHeader::new_key_change(jwk, "https://example.com/key-change");

        let json = serde_json::to_value(&header).unwrap();
        assert!(json.get("nonce").is_none());
        assert!(json.get("jwk").is_some());
    }

    #[test]
    fn test_thumbprint() {
        let key = SigningKey::from_pkcs8_pem(FIXTURE_KEY).unwrap();
        let jwk = Jwk::from_verifying_key(key.verifying_key()).unwrap();

        assert_eq!(jwk.x, "aKW4sGHZRfGhgrEPOHfKf-5_bZnMEooTAivnLXJfJjU");
        assert_eq!(jwk.y, "SOIT62M2sq50XOuaU0tiwuT6bn4WFk6B5QYmbKT7UtA");
        assert_eq!(
            jwk.thumbprint().unwrap(),
            "JNz_MitLZJNDPC92Eol_k7iKPa-UdLhtFVhcqKBhPX4"
        );
    }
}
