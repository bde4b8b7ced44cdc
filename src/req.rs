use reqwest::{header, StatusCode};
use serde::de;

use crate::{api::Problem, error::*};

pub(crate) const REPLAY_NONCE: &str = "replay-nonce";
pub(crate) const LOCATION: &str = "location";

const JOSE_JSON: &str = "application/jose+json";
const PROBLEM_JSON: &str = "application/problem+json";

pub(crate) async fn req_get(client: &reqwest::Client, url: &str) -> Result<AcmeResponse> {
    let req = client.get(url);
    log::trace!("{req:?}");
    AcmeResponse::read(req.send().await?).await
}

pub(crate) async fn req_head(client: &reqwest::Client, url: &str) -> Result<reqwest::Response> {
    let req = client.head(url);
    log::trace!("{req:?}");
    Ok(req.send().await?)
}

pub(crate) async fn req_post(
    client: &reqwest::Client,
    url: &str,
    body: String,
) -> Result<reqwest::Response> {
    let req = client
        .post(url)
        .header(header::CONTENT_TYPE, JOSE_JSON)
        .body(body);
    log::trace!("{req:?}");
    Ok(req.send().await?)
}

pub(crate) fn req_expect_header(
    headers: &header::HeaderMap,
    name: &'static str,
) -> Result<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
        .ok_or(Error::MissingHeader(name))
}

/// A fully read HTTP response from the ACME server.
///
/// Non-success responses are kept as they are; use [`AcmeResponse::problem`] or
/// [`AcmeResponse::into_result`] to inspect them.
#[derive(Debug, Clone)]
pub(crate) struct AcmeResponse {
    status: StatusCode,
    headers: header::HeaderMap,
    body: Vec<u8>,
}

impl AcmeResponse {
    pub(crate) async fn read(res: reqwest::Response) -> Result<Self> {
        let status = res.status();
        let headers = res.headers().clone();
        let body = req_safe_read_body(res).await;

        log::debug!("{status} {}", String::from_utf8_lossy(&body));

        Ok(AcmeResponse {
            status,
            headers,
            body,
        })
    }

    pub(crate) fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Returns the problem document of a non-success response.
    ///
    /// Bodies that aren't `application/problem+json` (or don't parse) are turned into a synthetic
    /// problem so that nothing the server said gets lost.
    pub(crate) fn problem(&self) -> Option<Problem> {
        if self.is_success() {
            return None;
        }

        let content_type = self
            .headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();

        let body = String::from_utf8_lossy(&self.body);

        let problem = if content_type.starts_with(PROBLEM_JSON) {
            // if we were sent a problem+json, deserialize it
            serde_json::from_slice(&self.body).unwrap_or_else(|err| Problem {
                _type: "problemJsonFail".to_owned(),
                detail: Some(format!(
                    "Failed to deserialize application/problem+json ({err}) body: {body}"
                )),
                status: Some(self.status.as_u16()),
                subproblems: None,
            })
        } else {
            // some other problem
            Problem {
                _type: "httpReqError".to_owned(),
                detail: Some(format!("{} body: {body}", self.status)),
                status: Some(self.status.as_u16()),
                subproblems: None,
            }
        };

        Some(problem)
    }

    /// Turns a non-success response into an error.
    pub(crate) fn into_result(self) -> Result<Self> {
        match self.problem() {
            Some(problem) => Err(problem.into()),
            None => Ok(self),
        }
    }

    pub(crate) fn location(&self) -> Result<String> {
        req_expect_header(&self.headers, LOCATION)
    }

    pub(crate) fn json<T: de::DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    pub(crate) fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

pub(crate) async fn req_safe_read_body(res: reqwest::Response) -> Vec<u8> {
    // letsencrypt sometimes closes the TLS abruptly causing io error
    // even though we did capture the body.
    res.bytes()
        .await
        .map(|body| body.to_vec())
        .unwrap_or_default()
}
