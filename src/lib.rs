//! Provisioning certificates from ACME (Automatic Certificate Management Environment) providers
//! such as [Let's Encrypt](https://letsencrypt.org/), proving domain control with `dns-01`
//! challenges.
//!
//! It follows [RFC 8555](https://datatracker.ietf.org/doc/html/rfc8555), using ACME v2 to
//! issue/renew certificates. Account and certificate keys are ECDSA P-256.
//!
//! # Usage
//!
//! 1. Fetch a [`Directory`] and register or load an [`Account`].
//! 2. Create an [`Order`](order::Order) for one or more domains.
//! 3. For each [`Authorization`](order::Authorization), publish the TXT record of its
//!    [`Dns01Challenge`](order::Dns01Challenge), wait for it with a [`DnsPoller`] and
//!    [`validate`](order::Dns01Challenge::validate) the challenge.
//! 4. Wait for the order to become `ready`, [`finalize`](order::Order::finalize) it, wait for
//!    `valid` and download the [`Certificate`].
//!
//! ## Examples
//!
//! A complete run against Let's Encrypt staging lives in `demos/dns-01.rs` in the source
//! repository.
//!
//! # Domain Ownership
//!
//! Most website TLS certificates tries to prove ownership/control over the domain they are issued
//! for. This library proves it through the DNS server answering name lookups against the domain:
//! the ACME provider looks up a TXT record at `_acme-challenge.<domain>` that only the account
//! holder can compute.
//!
//! Publishing the record is up to you; this library tells you what to publish
//! ([`DnsTxtRecord`]) and can wait until every authoritative name server serves it.
//!
//! ## Multiple Domains
//!
//! When creating a new order, it's possible to provide multiple alt-names that will also be part of
//! the certificate. The ACME API requires you to prove ownership of each such domain. See
//! [`authorizations`].
//!
//! ## Wildcards
//!
//! `*.example.com` is authorized through a TXT record at `_acme-challenge.example.com`, the same
//! name used for `example.com` itself. Ordering both means publishing two values under one name.
//!
//! # Rate Limits
//!
//! The ACME API provider Let's Encrypt uses [rate limits] to ensure the API is not being abused. It
//! might be tempting to put the `interval` really low in some of this library's polling calls, but
//! balance this against the real risk of having access cut off.
//!
//! ## Use Staging For Development!
//!
//! Especially take care to use the Let's Encrypt staging environment for development where the rate
//! limits are more relaxed. See [`DirectoryUrl::LetsEncryptStaging`].
//!
//! [`authorizations`]: crate::order::Order::authorizations()
//! [rate limits]: https://letsencrypt.org/docs/rate-limits

#![deny(rust_2018_idioms, nonstandard_style, future_incompatible)]

mod acc;
mod cert;
mod csr;
mod dir;
mod error;
mod jws;
mod req;
mod trans;
mod util;

pub mod api;
pub mod asn1;
pub mod dns;
pub mod order;


pub use crate::{
    acc::Account,
    cert::{create_p256_key, decode_validity, decode_validity_der, Certificate, Validity},
    dir::{Directory, DirectoryUrl},
    dns::{DnsPollOptions, DnsPoller, DnsTxtRecord, HickoryResolver},
    error::{Error, Result},
    jws::Jwk,
    order::PollOptions,
};
