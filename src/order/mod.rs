//! Order life cycle.
//!
//! An order goes through a life cycle of different states that require various actions by
//! the user.
//!
//! 1. First prove ownership of every domain:
//!    * [`Order`] -> [`Authorization`]* -> [`Dns01Challenge`]
//! 2. Then poll until `ready`, submit a CSR and download the certificate:
//!    * [`Order::poll_status`] -> [`Order::finalize`] -> [`Order::poll_status`] ->
//!      [`Order::download_certificate`]
//!
//! \* One authorization per domain.
//!
//! Every type here is a snapshot of the server side object. Refreshing or polling returns a new
//! snapshot.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use p256::ecdsa::SigningKey;
use pkcs8::EncodePrivateKey as _;

use crate::{
    acc::AccountInner,
    api::{self, OrderStatus},
    cert::{create_p256_key, Certificate},
    csr::create_csr,
    error::*,
    util::base64url,
};

mod auth;

pub use self::auth::{Authorization, Challenge, Dns01Challenge, OtherChallenge};

/// How often and for how long to poll an order or authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOptions {
    /// Delay between two attempts.
    pub interval: Duration,

    /// Give up once this much time has passed since the first attempt.
    pub timeout: Duration,
}

impl Default for PollOptions {
    fn default() -> Self {
        PollOptions {
            interval: Duration::from_millis(5000),
            timeout: Duration::from_secs(300),
        }
    }
}

impl PollOptions {
    /// Time to sleep before the next attempt, or `None` when the deadline has passed.
    pub(crate) fn next_delay(&self, start: Instant) -> Option<Duration> {
        let elapsed = start.elapsed();

        if elapsed >= self.timeout {
            return None;
        }

        Some(self.interval.min(self.timeout - elapsed))
    }
}

/// A certificate order.
///
/// An order is created by [`Account::new_order`] using one or many domains. All domains in the
/// order must have authorizations ([confirmed ownership]) before the order becomes `ready` and a
/// [CSR] can be submitted.
///
/// The ACME API provider might "remember" for a time that you already own a domain, which
/// means some authorizations may already be `valid`.
///
/// [`Account::new_order`]: crate::Account::new_order
/// [confirmed ownership]: crate#domain-ownership
/// [CSR]: https://en.wikipedia.org/wiki/Certificate_signing_request
#[derive(Debug, Clone)]
pub struct Order {
    inner: Arc<AccountInner>,
    url: String,
    api_order: api::Order,
    authorizations: Vec<Authorization>,
}

impl Order {
    /// Assembles an order from its fetched authorizations.
    ///
    /// Authorizations are put in the order of the requested domains, matching on the domain they
    /// were created for.
    pub(crate) fn new(
        inner: &Arc<AccountInner>,
        url: String,
        api_order: api::Order,
        authorizations: Vec<Authorization>,
    ) -> Result<Self> {
        let authorizations = match_authorizations(&api_order.domains(), authorizations)?;

        Ok(Order {
            inner: Arc::clone(inner),
            url,
            api_order,
            authorizations,
        })
    }

    /// Order URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Order status as of this snapshot.
    pub fn status(&self) -> Option<OrderStatus> {
        self.api_order.status
    }

    /// The requested domains, in the order they were requested.
    pub fn domains(&self) -> Vec<&str> {
        self.api_order.domains()
    }

    /// One authorization per domain, in the same order as [`domains`](Self::domains).
    ///
    /// Authorizations are fetched when the order is created and not updated by [`refresh`]; use
    /// [`Authorization::refresh`] for that.
    ///
    /// [`refresh`]: Self::refresh
    pub fn authorizations(&self) -> &[Authorization] {
        &self.authorizations
    }

    /// Fetches the order again (POST-as-GET).
    pub async fn refresh(&self) -> Result<Order> {
        let res = self
            .inner
            .transport
            .post_as_get(&self.url)
            .await?
            .into_result()?;

        let mut api_order = self.api_order.clone();
        api_order.overwrite(res.json()?)?;

        Ok(Order {
            inner: Arc::clone(&self.inner),
            url: self.url.clone(),
            api_order,
            authorizations: self.authorizations.clone(),
        })
    }

    /// Polls the order until its status is `want`.
    ///
    /// An `invalid` order is final: polling stops with [`Error::OrderInvalid`] unless `invalid` is
    /// what was asked for. When `opts.timeout` passes first the error carries the last snapshot.
    pub async fn poll_status(&self, want: OrderStatus, opts: PollOptions) -> Result<Order> {
        let start = Instant::now();

        loop {
            let order = self.refresh().await?;

            match order.status() {
                Some(status) if status == want => return Ok(order),

                Some(OrderStatus::Invalid) => {
                    return Err(Error::OrderInvalid {
                        url: order.url,
                        order: Box::new(order.api_order),
                    })
                }

                status => log::debug!("Order {} is {status:?}, waiting for {want:?}", self.url),
            }

            match opts.next_delay(start) {
                Some(delay) => tokio::time::sleep(delay).await,
                None => {
                    return Err(Error::OrderTimeout {
                        url: order.url,
                        want,
                        last: Box::new(order.api_order),
                    })
                }
            }
        }
    }

    /// Finalizes the order with a freshly generated P-256 key and returns that key.
    ///
    /// The order should be `ready`. Afterwards it goes through `processing` to `valid`; use
    /// [`poll_status`](Self::poll_status) to wait for that.
    pub async fn finalize(&self) -> Result<SigningKey> {
        let signing_key = create_p256_key();
        self.finalize_with_key(&signing_key).await?;
        Ok(signing_key)
    }

    /// Finalizes the order with a certificate key supplied by the caller.
    ///
    /// Creates the CSR for the domains in the order and submits it to the ACME API.
    pub async fn finalize_with_key(&self, signing_key: &SigningKey) -> Result<()> {
        // csr from private key and the requested domains.
        let csr = create_csr(signing_key, &self.domains())?;

        // this is not the same as PEM.
        let finalize = api::Finalize::new(base64url(&csr));

        self.inner
            .transport
            .call_kid(&self.api_order.finalize, &finalize)
            .await?
            .into_result()?;

        Ok(())
    }

    /// Downloads the issued certificate chain as PEM.
    ///
    /// Only possible once the order is `valid`.
    pub async fn certificate(&self) -> Result<String> {
        let url = self.api_order.certificate.as_deref().ok_or_else(|| {
            Error::Config(format!(
                "order {} has no certificate URL (status {:?})",
                self.url, self.api_order.status
            ))
        })?;

        let res = self.inner.transport.post_as_get(url).await?.into_result()?;

        Ok(res.text())
    }

    /// Downloads the issued certificate and bundles it with its private key.
    pub async fn download_certificate(&self, signing_key: &SigningKey) -> Result<Certificate> {
        let certificate = self.certificate().await?;
        let private_key_pem = signing_key.to_pkcs8_pem(pem::LineEnding::LF)?;

        Ok(Certificate::new(private_key_pem, certificate))
    }

    /// Access the underlying JSON object for debugging.
    pub fn api_order(&self) -> &api::Order {
        &self.api_order
    }
}

/// Lines up `authorizations` with `domains`.
///
/// Each domain takes the first unused authorization whose effective domain equals it, so
/// `example.com` and `*.example.com` end up with distinct authorizations even though the server
/// names both `example.com`.
fn match_authorizations(
    domains: &[&str],
    authorizations: Vec<Authorization>,
) -> Result<Vec<Authorization>> {
    let mut remaining: Vec<Option<Authorization>> = authorizations.into_iter().map(Some).collect();
    let mut matched = Vec::with_capacity(domains.len());

    for &domain in domains {
        let pos = remaining
            .iter()
            .position(|auth| {
                auth.as_ref()
                    .is_some_and(|auth| auth.domain().eq_ignore_ascii_case(domain))
            })
            .ok_or_else(|| Error::Config(format!("no authorization for domain {domain}")))?;

        if let Some(auth) = remaining[pos].take() {
            matched.push(auth);
        }
    }

    for auth in remaining.into_iter().flatten() {
        log::warn!("Authorization {} matches no requested domain", auth.url());
    }

    Ok(matched)
}
