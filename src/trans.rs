use std::{collections::VecDeque, sync::Arc};

use parking_lot::Mutex;
use serde::Serialize;

use crate::{
    acc::AcmeKey,
    error::*,
    jws::{self, Jwk, JwsProtectedHeader},
    req::{req_expect_header, req_head, req_post, AcmeResponse, REPLAY_NONCE},
};

/// How many times a request is re-sent after the server rejected its nonce.
pub(crate) const MAX_BAD_NONCE_RETRIES: usize = 5;

/// Upper bound of unused nonces kept around.
const NONCE_POOL_SIZE: usize = 10;

/// JWS payload and nonce handling for requests to the API.
///
/// Setup is:
///
/// 1. `Transport::new()`
/// 2. `call_jwk()` against newAccount url
/// 3. `set_key_id` from the returned `Location` header.
/// 4. `call_kid()` / `post_as_get()` for all calls after that.
#[derive(Clone, Debug)]
pub(crate) struct Transport {
    acme_key: AcmeKey,
    nonce_pool: Arc<NoncePool>,
}

impl Transport {
    pub fn new(nonce_pool: Arc<NoncePool>, acme_key: AcmeKey) -> Self {
        Transport {
            acme_key,
            nonce_pool,
        }
    }

    /// Update the key ID once it is known (part of setting up the transport).
    pub fn set_key_id(&mut self, kid: String) {
        self.acme_key.set_key_id(kid);
    }

    /// The key used in the transport
    pub fn acme_key(&self) -> &AcmeKey {
        &self.acme_key
    }

    pub fn nonce_pool(&self) -> &Arc<NoncePool> {
        &self.nonce_pool
    }

    /// Make call using the full JWS.
    ///
    /// Only needed for the newAccount request.
    pub async fn call_jwk<T>(&self, url: &str, body: &T) -> Result<AcmeResponse>
    where
        T: Serialize + ?Sized,
    {
        fn header_with_jwk(url: &str, nonce: String, key: &AcmeKey) -> Result<JwsProtectedHeader> {
            let jwk = Jwk::try_from(key)?;
            Ok(JwsProtectedHeader::new_jwk(jwk, url, nonce))
        }

        self.signed_request(url, Some(body), header_with_jwk).await
    }

    /// Make call using the key ID.
    pub async fn call_kid<T>(&self, url: &str, body: &T) -> Result<AcmeResponse>
    where
        T: Serialize + ?Sized,
    {
        self.signed_request(url, Some(body), header_with_kid).await
    }

    /// POST-as-GET using the key ID.
    pub async fn post_as_get(&self, url: &str) -> Result<AcmeResponse> {
        self.signed_request::<(), _>(url, None, header_with_kid).await
    }

    /// Signs and posts `body`, taking care of nonces.
    ///
    /// Every attempt consumes one nonce and every response, successful or not, refills the pool.
    /// Requests rejected with `badNonce` are re-sent with a fresh nonce up to
    /// [`MAX_BAD_NONCE_RETRIES`] times. Other error responses are returned as they are.
    async fn signed_request<T, F>(
        &self,
        url: &str,
        body: Option<&T>,
        make_header: F,
    ) -> Result<AcmeResponse>
    where
        T: Serialize + ?Sized,
        F: Fn(&str, String, &AcmeKey) -> Result<JwsProtectedHeader>,
    {
        let mut attempts = 0;

        // The ACME API may at any point invalidate all nonces. If we detect such an
        // error, we loop until the server accepts the nonce.
        loop {
            attempts += 1;

            // Either get a new nonce, or reuse one from a previous request.
            let nonce = self.nonce_pool.get_nonce().await?;

            // Sign the body.
            let protected = make_header(url, nonce, &self.acme_key)?;
            let jws = jws::sign(self.acme_key.signing_key(), &protected, body)?;

            log::debug!("Call endpoint: {url}");

            // Post it to the URL
            let response = req_post(self.nonce_pool.client(), url, serde_json::to_string(&jws)?).await?;

            // Regardless of the request being a success or not, there might be a nonce in the
            // response.
            self.nonce_pool.extract_nonce(response.headers());

            let response = AcmeResponse::read(response).await?;

            match response.problem() {
                Some(problem) if problem.is_bad_nonce() => {
                    if attempts > MAX_BAD_NONCE_RETRIES {
                        return Err(Error::BadNonce { attempts, problem });
                    }

                    // retry the request with a new nonce.
                    log::debug!("Retrying on bad nonce ({attempts}/{MAX_BAD_NONCE_RETRIES})");
                }

                _ => return Ok(response),
            }
        }
    }
}

fn header_with_kid(url: &str, nonce: String, key: &AcmeKey) -> Result<JwsProtectedHeader> {
    Ok(JwsProtectedHeader::new_kid(key.key_id()?, url, nonce))
}

/// Shared pool of nonces.
///
/// Access is serialized so concurrent requests never share or lose a nonce.
#[derive(Debug)]
pub(crate) struct NoncePool {
    client: reqwest::Client,
    nonce_url: String,
    pool: Mutex<VecDeque<String>>,
}

impl NoncePool {
    pub fn new(client: reqwest::Client, nonce_url: &str) -> Self {
        NoncePool {
            client,
            nonce_url: nonce_url.to_owned(),
            pool: Mutex::default(),
        }
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    fn extract_nonce(&self, headers: &reqwest::header::HeaderMap) {
        // see https://datatracker.ietf.org/doc/html/rfc8555#section-6.5.1
        let Some(nonce) = headers
            .get(REPLAY_NONCE)
            .and_then(|nonce| nonce.to_str().ok())
            .filter(|nonce| is_base64url(nonce))
        else {
            return;
        };

        log::trace!("Extracting new nonce");

        let mut pool = self.pool.lock();
        pool.push_back(nonce.to_owned());

        if pool.len() > NONCE_POOL_SIZE {
            pool.pop_front();
        }
    }

    async fn get_nonce(&self) -> Result<String> {
        if let Some(nonce) = self.pool.lock().pop_front() {
            log::trace!("Use previous nonce");
            return Ok(nonce);
        }

        log::debug!("Request new nonce");
        let res = req_head(&self.client, &self.nonce_url).await?;

        req_expect_header(res.headers(), REPLAY_NONCE)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.pool.lock().len()
    }
}

/// Replay-Nonce values are base64url without padding.
fn is_base64url(nonce: &str) -> bool {
    !nonce.is_empty()
        && nonce
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::{with_scenario, Scenario};

    async fn transport(dir_url: &str) -> Transport {
        let client = reqwest::Client::new();
        let nonce_url = dir_url.replace("/directory", "/acme/new-nonce");
        let pool = Arc::new(NoncePool::new(client, &nonce_url));
        Transport::new(pool, AcmeKey::new())
    }

    #[tokio::test]
    async fn test_retries_bad_nonce_until_accepted() {
        for bad_nonces in 0..=MAX_BAD_NONCE_RETRIES {
            let server = with_scenario(Scenario {
                bad_nonces,
                ..Default::default()
            });

            let trans = transport(&server.dir_url).await;
            let res = trans
                .call_jwk(&server.url("/acme/new-acct"), &crate::api::Account::default())
                .await
                .unwrap();

            assert!(res.is_success());
            assert_eq!(server.state.new_acct_calls(), bad_nonces + 1);
        }
    }

    #[tokio::test]
    async fn test_gives_up_on_persistent_bad_nonce() {
        let server = with_scenario(Scenario {
            bad_nonces: MAX_BAD_NONCE_RETRIES + 1,
            ..Default::default()
        });

        let trans = transport(&server.dir_url).await;
        let err = trans
            .call_jwk(&server.url("/acme/new-acct"), &crate::api::Account::default())
            .await
            .unwrap_err();

        match err {
            Error::BadNonce { attempts, problem } => {
                assert_eq!(attempts, MAX_BAD_NONCE_RETRIES + 1);
                assert!(problem.is_bad_nonce());
            }
            err => panic!("unexpected error: {err}"),
        }
        assert_eq!(server.state.new_acct_calls(), MAX_BAD_NONCE_RETRIES + 1);
    }

    #[tokio::test]
    async fn test_every_response_refills_the_pool() {
        let server = with_scenario(Scenario {
            bad_nonces: 2,
            ..Default::default()
        });

        let trans = transport(&server.dir_url).await;
        trans
            .call_jwk(&server.url("/acme/new-acct"), &crate::api::Account::default())
            .await
            .unwrap();

        // first nonce came from a HEAD request, the next two from the failed responses, and the
        // successful response left one behind
        assert_eq!(server.state.nonce_requests(), 1);
        assert_eq!(trans.nonce_pool().len(), 1);
    }

    #[tokio::test]
    async fn test_other_errors_are_returned_as_responses() {
        let server = with_scenario(Scenario::default());

        let trans = transport(&server.dir_url).await;
        let res = trans
            .call_jwk(&server.url("/acme/not-here"), &crate::api::Account::default())
            .await
            .unwrap();

        assert!(!res.is_success());
        assert_eq!(res.problem().unwrap()._type, "httpReqError");
        assert!(res.into_result().is_err());
    }

    #[tokio::test]
    async fn test_missing_nonce_header_is_fatal() {
        let server = with_scenario(Scenario::default());

        let client = reqwest::Client::new();
        let pool = Arc::new(NoncePool::new(client, &server.url("/directory")));
        let trans = Transport::new(pool, AcmeKey::new());

        let err = trans
            .call_jwk(&server.url("/acme/new-acct"), &crate::api::Account::default())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::MissingHeader(REPLAY_NONCE)));
    }

    #[tokio::test]
    async fn test_concurrent_requests_use_distinct_nonces() {
        const REQUESTS: usize = 8;

        let server = with_scenario(Scenario::default());

        let mut trans = transport(&server.dir_url).await;
        trans.set_key_id(server.url("/acme/acct/7728515"));
        let account_url = server.url("/acme/acct/7728515");

        // first round starts with an empty pool, the second drains what the first left behind
        for round in 1..=2 {
            let responses =
                futures::future::join_all((0..REQUESTS).map(|_| trans.post_as_get(&account_url)))
                    .await;

            for res in responses {
                assert!(res.unwrap().is_success());
            }

            assert_eq!(server.state.nonce_reuses(), 0);
            assert_eq!(server.state.used_nonces(), round * REQUESTS);
        }

        assert!(server.state.nonce_requests() <= REQUESTS);
        assert_eq!(trans.nonce_pool().len(), REQUESTS);
    }

    #[tokio::test]
    async fn test_replayed_nonce_is_rejected() {
        let server = with_scenario(Scenario::default());

        let mut trans = transport(&server.dir_url).await;
        trans.set_key_id(server.url("/acme/acct/7728515"));
        let account_url = server.url("/acme/acct/7728515");

        let nonce = trans.nonce_pool().get_nonce().await.unwrap();
        let protected = header_with_kid(&account_url, nonce, trans.acme_key()).unwrap();
        let jws = jws::sign(trans.acme_key().signing_key(), &protected, None::<&()>).unwrap();
        let body = serde_json::to_string(&jws).unwrap();

        let client = trans.nonce_pool().client();
        let first = req_post(client, &account_url, body.clone()).await.unwrap();
        assert!(first.status().is_success());

        let replay = AcmeResponse::read(req_post(client, &account_url, body).await.unwrap())
            .await
            .unwrap();
        assert!(replay.problem().unwrap().is_bad_nonce());
        assert_eq!(server.state.nonce_reuses(), 1);
    }

    #[test]
    fn test_nonce_syntax() {
        assert!(is_base64url("8_uBBV3N2DBRJczhoiB46ugJKUkUHxGzVe6xIMpjHFM"));
        assert!(!is_base64url(""));
        assert!(!is_base64url("abc="));
    }
}
