use pkcs8::{DecodePrivateKey as _, EncodePrivateKey as _};
use zeroize::Zeroizing;

use crate::error::*;

#[derive(Clone, Debug)]
pub(crate) struct AcmeKey {
    signing_key: p256::ecdsa::SigningKey,

    /// Set once we contacted the ACME API to figure out the key ID.
    key_id: Option<String>,
}

impl AcmeKey {
    pub(crate) fn new() -> AcmeKey {
        Self::from_key(crate::create_p256_key())
    }

    pub(crate) fn from_pem(pem: &str) -> Result<AcmeKey> {
        let pri_key = p256::ecdsa::SigningKey::from_pkcs8_pem(pem)?;
        Ok(Self::from_key(pri_key))
    }

    pub(crate) fn from_key(signing_key: p256::ecdsa::SigningKey) -> AcmeKey {
        AcmeKey {
            signing_key,
            key_id: None,
        }
    }

    pub(crate) fn to_pem(&self) -> Result<Zeroizing<String>> {
        Ok(self.signing_key.to_pkcs8_pem(pem::LineEnding::LF)?)
    }

    pub(crate) fn signing_key(&self) -> &p256::ecdsa::SigningKey {
        &self.signing_key
    }

    /// The account URL, once known.
    pub(crate) fn key_id(&self) -> Result<&str> {
        self.key_id
            .as_deref()
            .ok_or_else(|| Error::Config("account key ID is not known yet".to_owned()))
    }

    pub(crate) fn set_key_id(&mut self, kid: String) {
        self.key_id = Some(kid)
    }
}
