use serde::{Deserialize, Serialize};

use crate::api;

/// The status of an [`api::Order`].
///
/// See [RFC 8555 §7.1.3].
///
/// [RFC 8555 §7.1.3]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.1.3
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Ready,
    Processing,
    Valid,
    Invalid,
}

/// An ACME order object.
///
/// Represents a client's request for a certificate and is used to track the progress of that order
/// through to issuance.
///
/// See [RFC 8555 §7.1.3].
///
/// [RFC 8555 §7.1.3]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.1.3
///
/// # Example JSON
///
/// ```json
/// {
///   "status": "pending",
///   "expires": "2019-01-09T08:26:43.570360537Z",
///   "identifiers": [
///     {
///       "type": "dns",
///       "value": "acmetest.algesten.se"
///     }
///   ],
///   "authorizations": [
///     "https://example.com/acme/authz/YTqpYUthlVfwBncUufE8IRA2TkzZkN4eYWWLMSRqcSs"
///   ],
///   "finalize": "https://example.com/acme/finalize/7738992/18234324"
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<OrderStatus>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires: Option<String>,

    pub identifiers: Vec<api::Identifier>,

    /// Requested start of the certificate validity.
    ///
    /// Uses RFC 3339 format.
    pub not_before: Option<String>,

    /// Requested end of the certificate validity.
    ///
    /// Uses RFC 3339 format.
    pub not_after: Option<String>,

    /// The error that occurred while processing the order, if any.
    pub error: Option<api::Problem>,

    /// One authorization URL per identifier.
    pub authorizations: Option<Vec<String>>,

    /// URL that the CSR must be POSTed to once the order is `ready`.
    pub finalize: String,

    /// URL for the issued certificate, present once the order is `valid`.
    pub certificate: Option<String>,
}

impl Order {
    pub fn is_status(&self, status: OrderStatus) -> bool {
        self.status == Some(status)
    }

    /// Returns all domains associated with this order.
    pub fn domains(&self) -> Vec<&str> {
        self.identifiers
            .iter()
            .map(|identifier| identifier.value.as_str())
            .collect()
    }

    // Let's Encrypt was observed to return domains in alternate order which
    // may flip primary with SAN(s).
    //
    // This overwrites self without changing the order of the domains.
    pub(crate) fn overwrite(&mut self, mut from_api: Self) -> crate::Result<()> {
        // Make sure the lists are the same.
        if from_api.identifiers.len() != self.identifiers.len()
            || from_api
                .identifiers
                .iter()
                .any(|id| !self.identifiers.contains(id))
        {
            return Err(crate::Error::Config(format!(
                "Order domain(s) mismatch: had {:?} and got {:?}",
                self.identifiers, from_api.identifiers
            )));
        }
        // Then keep the requested order.
        from_api.identifiers = std::mem::take(&mut self.identifiers);
        *self = from_api;
        Ok(())
    }
}

/// A newOrder request.
///
/// See [RFC 8555 §7.4].
///
/// [RFC 8555 §7.4]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.4
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrder {
    pub identifiers: Vec<api::Identifier>,
}

impl NewOrder {
    pub(crate) fn from_identifiers(identifiers: Vec<api::Identifier>) -> Self {
        Self { identifiers }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(domains: &[&str]) -> Order {
        Order {
            identifiers: domains.iter().map(|d| api::Identifier::dns(d)).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_overwrite_keeps_requested_order() {
        let mut requested = order(&["a.example.com", "b.example.com"]);
        let mut from_api = order(&["b.example.com", "a.example.com"]);
        from_api.status = Some(OrderStatus::Pending);

        requested.overwrite(from_api).unwrap();
        assert_eq!(requested.domains(), ["a.example.com", "b.example.com"]);
        assert!(requested.is_status(OrderStatus::Pending));
    }

    #[test]
    fn test_overwrite_rejects_other_domains() {
        let mut requested = order(&["a.example.com"]);
        let from_api = order(&["c.example.com"]);

        assert!(matches!(
            requested.overwrite(from_api),
            Err(crate::Error::Config(_))
        ));
    }

    #[test]
    fn test_new_order_payload() {
        let payload = NewOrder::from_identifiers(vec![api::Identifier::dns("*.example.com")]);
        assert_eq!(
            serde_json::to_string(&payload).unwrap(),
            r#"{"identifiers":[{"type":"dns","value":"*.example.com"}]}"#
        );
    }
}
