use serde::{Deserialize, Serialize};

use crate::jws::Jwk;

/// Payload of the inner JWS for an account key rollover.
///
/// See [RFC 8555 §7.3.5].
///
/// [RFC 8555 §7.3.5]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.3.5
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyChange {
    /// URL of the account being modified.
    pub account: String,

    /// The JWK of the key currently registered for the account.
    pub old_key: Jwk,
}
