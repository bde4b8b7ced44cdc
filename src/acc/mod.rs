use std::{collections::HashSet, sync::Arc};

use futures::future::try_join_all;
use p256::ecdsa::SigningKey;
use zeroize::Zeroizing;

use crate::{
    api,
    error::*,
    jws::{self, Jwk, JwsProtectedHeader},
    order::{Authorization, Order},
    trans::Transport,
};

mod acme_key;

pub(crate) use self::acme_key::AcmeKey;

#[derive(Debug, Clone)]
pub(crate) struct AccountInner {
    pub transport: Transport,
    pub api_account: api::Account,
    pub api_directory: api::Directory,
}

/// Account with an ACME provider.
///
/// Accounts are created using [`Directory::register_account()`] and consists of a contact email
/// address and a private key for signing requests to the ACME API.
///
/// This library uses elliptic curve P-256 for accessing the account.
///
/// The advantages of using elliptic curve cryptography are that the signed requests against the
/// ACME lib are small and that the public key can be derived from the private key.
///
/// An `Account` is a snapshot. Calls that change the account on the server return a new `Account`
/// and leave the one they were called on untouched.
///
/// [`Directory::register_account()`]: crate::Directory::register_account()
#[derive(Debug, Clone)]
pub struct Account {
    inner: Arc<AccountInner>,
}

impl Account {
    pub(crate) fn new(
        transport: Transport,
        api_account: api::Account,
        api_directory: api::Directory,
    ) -> Self {
        Self {
            inner: Arc::new(AccountInner {
                transport,
                api_account,
                api_directory,
            }),
        }
    }

    /// Private key for this account.
    ///
    /// The key is an elliptic curve private key in PKCS#8 PEM format. Store it to log in again
    /// with [`Directory::load_existing_account()`](crate::Directory::load_existing_account()).
    pub fn private_key_pem(&self) -> Result<Zeroizing<String>> {
        self.inner.transport.acme_key().to_pem()
    }

    /// Account URL, used as the key ID of every request after account creation.
    pub fn key_id(&self) -> &str {
        // set by the directory before an `Account` is handed out
        self.inner.transport.acme_key().key_id().unwrap_or_default()
    }

    /// Create a new order to issue a certificate for this account.
    ///
    /// The first domain will be the certificate's `CN`; all of them end up in the subject
    /// alternative names. Wildcards (`*.example.com`) are passed to the server as written.
    /// Duplicate domains are dropped.
    ///
    /// All authorizations of the order are fetched before this returns, and
    /// [`Order::authorizations()`] lines up with the domains given here.
    ///
    /// This library doesn't constrain the number of domains, but it is limited by the ACME API
    /// provider. Let's Encrypt [sets a max of 100 names] per certificate.
    ///
    /// Every call creates a new order with the ACME API provider, even when the domain names
    /// supplied are exactly the same.
    ///
    /// [sets a max of 100 names]: https://letsencrypt.org/docs/rate-limits/
    pub async fn new_order(&self, domains: &[&str]) -> Result<Order> {
        let mut identifiers = Vec::new();
        let mut dedup = HashSet::new();
        for &domain in domains {
            if dedup.insert(domain) {
                identifiers.push(api::Identifier::dns(domain));
            }
        }

        if identifiers.is_empty() {
            return Err(Error::Config("an order needs at least one domain".to_owned()));
        }

        let new_order = api::NewOrder::from_identifiers(identifiers.clone());
        let new_order_url = self.inner.api_directory.new_order.as_str();

        let res = self
            .inner
            .transport
            .call_kid(new_order_url, &new_order)
            .await?
            .into_result()?;

        let order_url = res.location()?;
        log::debug!("Order URL is: {order_url}");

        let mut api_order = api::Order {
            identifiers,
            ..Default::default()
        };
        api_order.overwrite(res.json()?)?;

        let urls = api_order.authorizations.clone().unwrap_or_default();
        let authorizations = try_join_all(
            urls.iter()
                .map(|url| Authorization::fetch(&self.inner, url.clone())),
        )
        .await?;

        Order::new(&self.inner, order_url, api_order, authorizations)
    }

    /// Fetches the account object again (POST-as-GET).
    pub async fn refresh(&self) -> Result<Account> {
        let res = self
            .inner
            .transport
            .post_as_get(self.key_id())
            .await?
            .into_result()?;

        self.with_api_account(res.json()?)
    }

    /// Replaces the account's contacts with `emails`.
    ///
    /// An empty list removes all contacts.
    pub async fn update_contact<S: AsRef<str>>(&self, emails: &[S]) -> Result<Account> {
        let update = api::Account {
            contact: Some(api::Account::contact_from_emails(emails).unwrap_or_default()),
            ..Default::default()
        };

        let res = self
            .inner
            .transport
            .call_kid(self.key_id(), &update)
            .await?
            .into_result()?;

        self.with_api_account(res.json()?)
    }

    /// Rolls the account over to `new_key`.
    ///
    /// The returned account signs with the new key; this one keeps signing with the old key, which
    /// the server no longer accepts.
    ///
    /// See [RFC 8555 §7.3.5].
    ///
    /// [RFC 8555 §7.3.5]: https://datatracker.ietf.org/doc/html/rfc8555#section-7.3.5
    pub async fn change_key(&self, new_key: SigningKey) -> Result<Account> {
        let key_change_url = self.inner.api_directory.key_change.as_str();
        let old_key = Jwk::try_from(self.inner.transport.acme_key())?;

        // inner JWS: signed by the new key, embeds it, no nonce
        let new_jwk = Jwk::from_verifying_key(new_key.verifying_key())?;
        let protected = JwsProtectedHeader::new_key_change(new_jwk, key_change_url);
        let payload = api::KeyChange {
            account: self.key_id().to_owned(),
            old_key,
        };
        let inner_jws = jws::sign(&new_key, &protected, Some(&payload))?;

        self.inner
            .transport
            .call_kid(key_change_url, &inner_jws)
            .await?
            .into_result()?;

        let mut acme_key = AcmeKey::from_key(new_key);
        acme_key.set_key_id(self.key_id().to_owned());

        let transport = Transport::new(Arc::clone(self.inner.transport.nonce_pool()), acme_key);

        Ok(Account::new(
            transport,
            self.inner.api_account.clone(),
            self.inner.api_directory.clone(),
        ))
    }

    fn with_api_account(&self, api_account: api::Account) -> Result<Account> {
        Ok(Account::new(
            self.inner.transport.clone(),
            api_account,
            self.inner.api_directory.clone(),
        ))
    }

    /// Returns a reference to the account's API object.
    ///
    /// Useful for debugging.
    pub fn api_account(&self) -> &api::Account {
        &self.inner.api_account
    }
}
