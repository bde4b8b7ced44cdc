use std::{sync::Arc, time::Instant};

use sha2::{Digest as _, Sha256};

use crate::{
    acc::AccountInner,
    api::{self, AuthorizationStatus, ChallengeStatus},
    dns::DnsTxtRecord,
    error::*,
    jws::Jwk,
    order::PollOptions,
    util::base64url,
};

/// An authorization ([ownership proof]) for a domain name.
///
/// Each authorization for an order must be progressed to a valid state before the ACME API
/// will issue a certificate.
///
/// Authorizations may or may not be required depending on previous orders against the same
/// ACME account. The ACME API decides if the authorization is needed.
///
/// [ownership proof]: crate#domain-ownership
#[derive(Debug, Clone)]
pub struct Authorization {
    inner: Arc<AccountInner>,
    url: String,
    api_auth: api::Authorization,
    challenges: Vec<Challenge>,
}

impl Authorization {
    fn new(inner: &Arc<AccountInner>, url: String, api_auth: api::Authorization) -> Self {
        let base_domain = api_auth.base_domain().to_owned();

        let challenges = api_auth
            .challenges
            .iter()
            .map(|api_challenge| {
                let core = ChallengeCore {
                    inner: Arc::clone(inner),
                    api_challenge: api_challenge.clone(),
                    auth_url: url.clone(),
                };

                if api_challenge._type == DNS_01 {
                    Challenge::Dns01(Dns01Challenge {
                        core,
                        base_domain: base_domain.clone(),
                    })
                } else {
                    Challenge::Other(OtherChallenge { core })
                }
            })
            .collect();

        Authorization {
            inner: Arc::clone(inner),
            url,
            api_auth,
            challenges,
        }
    }

    /// Fetches the authorization at `url` (POST-as-GET).
    pub(crate) async fn fetch(inner: &Arc<AccountInner>, url: String) -> Result<Self> {
        let res = inner
            .transport
            .post_as_get(&url)
            .await?
            .into_result()?;

        Ok(Self::new(inner, url, res.json()?))
    }

    /// Authorization URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The domain as requested in the order.
    ///
    /// For wildcard orders this is `*.example.com`, even though the server identifies the
    /// authorization by the base domain.
    pub fn domain(&self) -> String {
        self.api_auth.effective_domain()
    }

    /// The domain without any wildcard prefix.
    pub fn base_domain(&self) -> &str {
        self.api_auth.base_domain()
    }

    /// Returns true if the authorization was created for a wildcard domain.
    pub fn is_wildcard(&self) -> bool {
        self.api_auth.is_wildcard()
    }

    /// Authorization status as of this snapshot.
    pub fn status(&self) -> AuthorizationStatus {
        self.api_auth.status
    }

    /// Whether we actually need to do the authorization. This might not be needed if we have
    /// proven ownership of the domain recently in a previous order.
    pub fn need_challenge(&self) -> bool {
        !matches!(self.api_auth.status, AuthorizationStatus::Valid)
    }

    /// All challenges offered by the server.
    pub fn challenges(&self) -> &[Challenge] {
        &self.challenges
    }

    /// Returns the `dns-01` challenge, if the server offered one.
    pub fn find_dns01_challenge(&self) -> Option<&Dns01Challenge> {
        self.challenges.iter().find_map(Challenge::as_dns01)
    }

    /// Fetches the authorization again (POST-as-GET).
    pub async fn refresh(&self) -> Result<Authorization> {
        Self::fetch(&self.inner, self.url.clone()).await
    }

    /// Returns a reference to the authorization's API object.
    ///
    /// Useful for debugging.
    pub fn api_auth(&self) -> &api::Authorization {
        &self.api_auth
    }
}

const DNS_01: &str = "dns-01";

/// State shared by every kind of challenge.
#[derive(Debug, Clone)]
struct ChallengeCore {
    inner: Arc<AccountInner>,
    api_challenge: api::Challenge,
    auth_url: String,
}

impl ChallengeCore {
    fn account_jwk(&self) -> Result<Jwk> {
        Jwk::try_from(self.inner.transport.acme_key())
    }

    fn key_authorization(&self) -> Result<String> {
        key_authorization(&self.api_challenge.token, &self.account_jwk()?)
    }

    fn digest_token(&self) -> Result<String> {
        dns01_digest(&self.api_challenge.token, &self.account_jwk()?)
    }

    async fn submit(&self) -> Result<()> {
        let res = self
            .inner
            .transport
            .call_kid(&self.api_challenge.url, &api::EmptyObject)
            .await?
            .into_result()?;

        let api_challenge = res.json::<api::Challenge>()?;
        log::debug!(
            "Submitted {} challenge, now {:?}",
            api_challenge._type,
            api_challenge.status
        );

        Ok(())
    }
}

/// A challenge offered in an [`Authorization`].
///
/// Only `dns-01` challenges can be completed with this library; others are kept so they can be
/// inspected.
#[derive(Debug, Clone)]
pub enum Challenge {
    Dns01(Dns01Challenge),
    Other(OtherChallenge),
}

impl Challenge {
    fn core(&self) -> &ChallengeCore {
        match self {
            Challenge::Dns01(challenge) => &challenge.core,
            Challenge::Other(challenge) => &challenge.core,
        }
    }

    /// Challenge type, e.g. `dns-01`.
    pub fn kind(&self) -> &str {
        &self.core().api_challenge._type
    }

    /// Returns the token, a unique identifier of the challenge.
    pub fn token(&self) -> &str {
        &self.core().api_challenge.token
    }

    pub fn status(&self) -> ChallengeStatus {
        self.core().api_challenge.status
    }

    /// Challenge URL.
    pub fn url(&self) -> &str {
        &self.core().api_challenge.url
    }

    /// Returns true if this challenge needs validation.
    ///
    /// It might already been done in a previous order for the same account.
    pub fn need_validate(&self) -> bool {
        matches!(self.status(), ChallengeStatus::Pending)
    }

    /// `<token>.<account key thumbprint>`.
    pub fn key_authorization(&self) -> Result<String> {
        self.core().key_authorization()
    }

    /// Base64url SHA-256 digest of the key authorization.
    pub fn digest_token(&self) -> Result<String> {
        self.core().digest_token()
    }

    /// Tells the ACME API to attempt to validate the proof of this challenge.
    pub async fn submit(&self) -> Result<()> {
        self.core().submit().await
    }

    pub fn as_dns01(&self) -> Option<&Dns01Challenge> {
        match self {
            Challenge::Dns01(challenge) => Some(challenge),
            Challenge::Other(_) => None,
        }
    }

    /// Returns a reference to the challenge's API object.
    pub fn api_challenge(&self) -> &api::Challenge {
        &self.core().api_challenge
    }
}

/// A challenge of a type this library doesn't solve.
#[derive(Debug, Clone)]
pub struct OtherChallenge {
    core: ChallengeCore,
}

/// A `dns-01` challenge.
///
/// See [RFC 8555 §8.4].
///
/// [RFC 8555 §8.4]: https://datatracker.ietf.org/doc/html/rfc8555#section-8.4
#[derive(Debug, Clone)]
pub struct Dns01Challenge {
    core: ChallengeCore,
    base_domain: String,
}

impl Dns01Challenge {
    pub fn token(&self) -> &str {
        &self.core.api_challenge.token
    }

    pub fn status(&self) -> ChallengeStatus {
        self.core.api_challenge.status
    }

    pub fn url(&self) -> &str {
        &self.core.api_challenge.url
    }

    pub fn need_validate(&self) -> bool {
        matches!(self.status(), ChallengeStatus::Pending)
    }

    pub fn key_authorization(&self) -> Result<String> {
        self.core.key_authorization()
    }

    /// The TXT record content proving control of the domain.
    pub fn digest_token(&self) -> Result<String> {
        self.core.digest_token()
    }

    /// The TXT record to publish before submitting this challenge.
    ///
    /// The record lives under the base domain, so a wildcard authorization and the plain one for
    /// the same domain share a record name with different contents.
    ///
    /// ```plain
    /// _acme-challenge.<base domain>.  TXT  <digest>
    /// ```
    pub fn dns_record(&self) -> Result<DnsTxtRecord> {
        Ok(DnsTxtRecord::new(
            format!("_acme-challenge.{}.", self.base_domain),
            self.digest_token()?,
        ))
    }

    /// Tells the ACME API to attempt to validate the proof of this challenge.
    ///
    /// The TXT record must be published before this call.
    pub async fn submit(&self) -> Result<()> {
        self.core.submit().await
    }

    /// Submits the challenge and polls the owning authorization until it leaves `pending`.
    ///
    /// An authorization that ends up anything other than `valid` fails with
    /// [`Error::ChallengeFailed`], carrying the server's explanation when there is one.
    pub async fn validate(&self, opts: PollOptions) -> Result<()> {
        self.submit().await?;

        let start = Instant::now();

        let auth = loop {
            let auth = Authorization::fetch(&self.core.inner, self.core.auth_url.clone()).await?;

            if !matches!(auth.status(), AuthorizationStatus::Pending) {
                break auth;
            }

            match opts.next_delay(start) {
                Some(delay) => tokio::time::sleep(delay).await,
                None => {
                    return Err(Error::AuthorizationTimeout {
                        url: auth.url,
                        last: Box::new(auth.api_auth),
                    })
                }
            }
        };

        if matches!(auth.status(), AuthorizationStatus::Valid) {
            return Ok(());
        }

        let problem = auth
            .api_auth
            .challenges
            .iter()
            .find_map(|c| c.error.clone());

        Err(Error::ChallengeFailed {
            domain: auth.domain(),
            problem,
        })
    }

    /// Returns a reference to the challenge's API object.
    pub fn api_challenge(&self) -> &api::Challenge {
        &self.core.api_challenge
    }
}

/// `<token>.<thumbprint>` as defined in [RFC 8555 §8.1].
///
/// [RFC 8555 §8.1]: https://datatracker.ietf.org/doc/html/rfc8555#section-8.1
pub(crate) fn key_authorization(token: &str, jwk: &Jwk) -> Result<String> {
    Ok(format!("{token}.{}", jwk.thumbprint()?))
}

/// Base64url SHA-256 of the key authorization, the content of a `dns-01` TXT record.
pub(crate) fn dns01_digest(token: &str, jwk: &Jwk) -> Result<String> {
    let key_auth = key_authorization(token, jwk)?;
    Ok(base64url(&Sha256::digest(key_auth)))
}
