use crate::{api, asn1::DecodeError, dns::TxtAnswer};

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Everything that can go wrong while talking to an ACME provider.
///
/// `BadNonce` and `AccountDoesNotExist` are singled out of the generic [`Error::Api`] since callers
/// are expected to branch on them.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The HTTP request could not be completed.
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("JSON (de)serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("response is missing the {0} header")]
    MissingHeader(&'static str),

    /// Any ACME problem document not covered by a more specific variant.
    #[error("ACME error: {0}")]
    Api(api::Problem),

    /// The server rejected every nonce offered, up to the retry ceiling.
    #[error("server kept rejecting nonces after {attempts} attempts: {problem}")]
    BadNonce {
        attempts: usize,
        problem: api::Problem,
    },

    /// `onlyReturnExisting` was requested for a key the server doesn't know.
    #[error("account does not exist: {0}")]
    AccountDoesNotExist(api::Problem),

    /// The order reached the terminal `invalid` status.
    #[error("order {url} is invalid")]
    OrderInvalid {
        url: String,
        order: Box<api::Order>,
    },

    #[error("timed out waiting for order {url} to become {want:?}")]
    OrderTimeout {
        url: String,
        want: api::OrderStatus,
        last: Box<api::Order>,
    },

    #[error("timed out waiting for authorization {url} to leave pending")]
    AuthorizationTimeout {
        url: String,
        last: Box<api::Authorization>,
    },

    #[error("validation of {domain} failed: {}", problem_or_unknown(.problem))]
    ChallengeFailed {
        domain: String,
        problem: Option<api::Problem>,
    },

    /// The expected TXT content didn't show up on every queried name server in time.
    #[error("timed out waiting for TXT record {name}")]
    DnsTimeout {
        name: String,
        answers: Vec<TxtAnswer>,
    },

    #[error("DNS lookup error: {0}")]
    Dns(#[from] hickory_resolver::ResolveError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("signing error: {0}")]
    Signature(#[from] p256::ecdsa::Error),

    #[error("private key error: {0}")]
    Key(#[from] pkcs8::Error),

    /// Caller or protocol assumption violated; retrying won't help.
    #[error("{0}")]
    Config(String),
}

fn problem_or_unknown(problem: &Option<api::Problem>) -> String {
    match problem {
        Some(problem) => problem.to_string(),
        None => "no error reported by server".to_owned(),
    }
}

impl From<api::Problem> for Error {
    fn from(problem: api::Problem) -> Self {
        if problem.is_account_does_not_exist() {
            Error::AccountDoesNotExist(problem)
        } else {
            Error::Api(problem)
        }
    }
}

impl Error {
    /// Returns the server's problem document, if the error carries one.
    pub fn problem(&self) -> Option<&api::Problem> {
        match self {
            Error::Api(problem)
            | Error::AccountDoesNotExist(problem)
            | Error::BadNonce { problem, .. } => Some(problem),
            Error::ChallengeFailed { problem, .. } => problem.as_ref(),
            _ => None,
        }
    }
}
