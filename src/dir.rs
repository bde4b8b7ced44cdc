use std::sync::Arc;

use crate::{
    acc::AcmeKey,
    api,
    error::*,
    req::req_get,
    trans::{NoncePool, Transport},
    Account,
};

const LETSENCRYPT_URL: &str = "https://acme-v02.api.letsencrypt.org/directory";
const LETSENCRYPT_STAGING_URL: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";

/// Enumeration of known ACME API directories.
#[derive(Debug, Clone)]
pub enum DirectoryUrl<'a> {
    /// The main Let's Encrypt directory.
    ///
    /// Not appropriate for testing / development.
    LetsEncrypt,

    /// The staging Let's Encrypt directory.
    ///
    /// Use for testing and development. Doesn't issue "valid" certificates. The root signing
    /// certificate is not supposed to be in any trust chains.
    LetsEncryptStaging,

    /// Provide an arbitrary directory URL to connect to.
    Other(&'a str),
}

impl DirectoryUrl<'_> {
    fn to_url(&self) -> &str {
        match self {
            DirectoryUrl::LetsEncrypt => LETSENCRYPT_URL,
            DirectoryUrl::LetsEncryptStaging => LETSENCRYPT_STAGING_URL,
            DirectoryUrl::Other(url) => url,
        }
    }
}

/// Entry point for accessing an ACME API.
///
/// The directory is fetched once; the nonce pool it sets up is shared by every account created
/// from it.
#[derive(Debug, Clone)]
pub struct Directory {
    nonce_pool: Arc<NoncePool>,
    api_directory: api::Directory,
}

impl Directory {
    /// Fetches the directory using a default HTTP client.
    pub async fn fetch(url: DirectoryUrl<'_>) -> Result<Directory> {
        Self::fetch_with_client(url, reqwest::Client::new()).await
    }

    /// Fetches the directory using `client` for this and all subsequent requests.
    pub async fn fetch_with_client(
        url: DirectoryUrl<'_>,
        client: reqwest::Client,
    ) -> Result<Directory> {
        let res = req_get(&client, url.to_url()).await?.into_result()?;
        let api_directory = res.json::<api::Directory>()?;
        let nonce_pool = Arc::new(NoncePool::new(client, &api_directory.new_nonce));

        Ok(Directory {
            nonce_pool,
            api_directory,
        })
    }

    /// Creates an account with a freshly generated key.
    ///
    /// `emails` become the account's `mailto:` contacts; the terms of service are agreed to.
    pub async fn register_account<S: AsRef<str>>(&self, emails: &[S]) -> Result<Account> {
        let acme_key = AcmeKey::new();
        self.upsert_account(acme_key, emails).await
    }

    /// Creates an account for an existing key, or finds the one the key is already registered to.
    pub async fn load_account<S: AsRef<str>>(
        &self,
        private_key_pem: &str,
        emails: &[S],
    ) -> Result<Account> {
        let acme_key = AcmeKey::from_pem(private_key_pem)?;
        self.upsert_account(acme_key, emails).await
    }

    /// Logs in with the key of an existing account.
    ///
    /// Fails with [`Error::AccountDoesNotExist`] if the server doesn't know the key.
    pub async fn load_existing_account(&self, private_key_pem: &str) -> Result<Account> {
        let acme_key = AcmeKey::from_pem(private_key_pem)?;

        let acc = api::Account {
            only_return_existing: Some(true),
            ..Default::default()
        };

        self.call_new_account(acme_key, &acc).await
    }

    async fn upsert_account<S: AsRef<str>>(
        &self,
        acme_key: AcmeKey,
        emails: &[S],
    ) -> Result<Account> {
        // Prepare making a call to newAccount. This is fine to do both for new
        // keys and existing. For existing ones RFC 8555 says to return a 200 with
        // the Location header set to the key ID (kid).
        let acc = api::Account {
            contact: api::Account::contact_from_emails(emails),
            terms_of_service_agreed: Some(true),
            ..Default::default()
        };

        self.call_new_account(acme_key, &acc).await
    }

    async fn call_new_account(&self, acme_key: AcmeKey, acc: &api::Account) -> Result<Account> {
        let mut transport = Transport::new(Arc::clone(&self.nonce_pool), acme_key);

        let res = transport
            .call_jwk(&self.api_directory.new_account, acc)
            .await?
            .into_result()?;

        let kid = res.location()?;
        log::debug!("Key ID is: {kid}");
        let api_account = res.json::<api::Account>()?;

        // fill in the server returned key ID
        transport.set_key_id(kid);

        Ok(Account::new(
            transport,
            api_account,
            self.api_directory.clone(),
        ))
    }

    /// Returns a reference to the directory's API object.
    ///
    /// Useful for debugging.
    pub fn api_directory(&self) -> &api::Directory {
        &self.api_directory
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::{with_directory_server, with_scenario, Scenario};

    #[tokio::test]
    async fn test_create_directory() {
        let server = with_directory_server();

        let url = DirectoryUrl::Other(&server.dir_url);
        let dir = Directory::fetch(url).await.unwrap();

        assert_eq!(dir.api_directory().new_nonce, server.url("/acme/new-nonce"));
        assert_eq!(dir.api_directory().key_change, server.url("/acme/key-change"));
    }

    #[tokio::test]
    async fn test_unreachable_directory() {
        let server = with_directory_server();

        let url = server.url("/not-a-directory");
        let err = Directory::fetch(DirectoryUrl::Other(&url))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Api(_)));
    }

    #[tokio::test]
    async fn test_create_account() {
        let server = with_directory_server();

        let url = DirectoryUrl::Other(&server.dir_url);
        let dir = Directory::fetch(url).await.unwrap();

        let acc = dir.register_account(&["foo@bar.com"]).await.unwrap();
        assert_eq!(acc.key_id(), server.url("/acme/acct/7728515"));

        let sent = server.state.last_new_account().unwrap();
        assert_eq!(sent["contact"], serde_json::json!(["mailto:foo@bar.com"]));
        assert_eq!(sent["termsOfServiceAgreed"], true);
        assert!(sent.get("onlyReturnExisting").is_none());
    }

    #[tokio::test]
    async fn test_load_account_keeps_key() {
        let server = with_directory_server();

        let dir = Directory::fetch(DirectoryUrl::Other(&server.dir_url))
            .await
            .unwrap();

        let acc = dir.register_account::<&str>(&[]).await.unwrap();
        let pem = acc.private_key_pem().unwrap();

        let loaded = dir.load_account::<&str>(&pem, &[]).await.unwrap();
        assert_eq!(*loaded.private_key_pem().unwrap(), *pem);

        let existing = dir.load_existing_account(&pem).await.unwrap();
        assert_eq!(*existing.private_key_pem().unwrap(), *pem);

        let sent = server.state.last_new_account().unwrap();
        assert_eq!(sent, serde_json::json!({ "onlyReturnExisting": true }));
    }

    #[tokio::test]
    async fn test_missing_account() {
        let server = with_scenario(Scenario {
            missing_account: true,
            ..Default::default()
        });

        let dir = Directory::fetch(DirectoryUrl::Other(&server.dir_url))
            .await
            .unwrap();

        let pem = crate::acc::AcmeKey::new().to_pem().unwrap();
        let err = dir.load_existing_account(&pem).await.unwrap_err();

        match err {
            Error::AccountDoesNotExist(problem) => {
                assert_eq!(problem.acme_error(), Some("accountDoesNotExist"));
                assert_eq!(problem.status, Some(400));
            }
            err => panic!("unexpected error: {err}"),
        }
    }
}
