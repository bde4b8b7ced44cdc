//! DNS side of the `dns-01` challenge.
//!
//! [`DnsPoller`] waits for a TXT record to show up on a domain's authoritative name servers before
//! the challenge is submitted, so the CA doesn't look too early. Lookups go through the
//! [`DnsResolve`] trait; [`HickoryResolver`] is the default implementation.

use std::{
    fmt,
    future::Future,
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
};

use futures::future::try_join_all;
use serde::{Deserialize, Serialize};

use crate::error::*;

mod hickory;
mod poll;

pub use self::{
    hickory::HickoryResolver,
    poll::{DnsPollOptions, DnsPoller, IpFamilies},
};

/// The TXT record a caller must publish for a `dns-01` challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsTxtRecord {
    /// Fully qualified record name, e.g. `_acme-challenge.example.com.`.
    pub name: String,

    /// Always `TXT`.
    #[serde(rename = "type")]
    pub record_type: String,

    /// Base64url digest of the key authorization.
    pub content: String,
}

impl DnsTxtRecord {
    pub(crate) fn new(name: String, content: String) -> Self {
        DnsTxtRecord {
            name,
            record_type: "TXT".to_owned(),
            content,
        }
    }
}

/// Formats the record as a zone file line.
impl fmt::Display for DnsTxtRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} IN {} \"{}\"", self.name, self.record_type, self.content)
    }
}

/// Record types the resolver is asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    A,
    Aaaa,
    Ns,
    Txt,
}

/// One resource record from a lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DnsAnswer {
    A(Ipv4Addr),
    Aaaa(Ipv6Addr),

    /// Name server host name.
    Ns(String),

    /// TXT character strings as sent, i.e. long values split into chunks of up to 255 bytes.
    Txt(Vec<String>),
}

/// A DNS lookup backend.
///
/// `name_servers` selects the servers to ask directly; when empty the backend uses whatever it
/// is configured with. A name that doesn't exist, or has no records of the type, resolves to an
/// empty list rather than an error.
pub trait DnsResolve: Send + Sync {
    fn resolve(
        &self,
        name: &str,
        record_type: RecordType,
        name_servers: &[IpAddr],
    ) -> impl Future<Output = Result<Vec<DnsAnswer>>> + Send;
}

/// The TXT values one server returned, chunks joined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxtAnswer {
    /// `None` for a lookup through the resolver's default servers.
    pub server: Option<IpAddr>,
    pub values: Vec<String>,
}

/// Finds the IP addresses of the name servers authoritative for `domain`.
///
/// Walks up from `domain` one label at a time until some level has NS records, then resolves the
/// A and AAAA records of each name server. Returns an empty list if no level has NS records.
pub async fn find_authoritative_name_server_ips<R: DnsResolve>(
    resolver: &R,
    domain: &str,
) -> Result<Vec<IpAddr>> {
    let mut labels = domain.trim_end_matches('.').split('.').collect::<Vec<_>>();
    labels.retain(|label| !label.is_empty());

    let mut name_servers = Vec::new();

    while !labels.is_empty() {
        let zone = format!("{}.", labels.join("."));

        name_servers = resolver
            .resolve(&zone, RecordType::Ns, &[])
            .await?
            .into_iter()
            .filter_map(|answer| match answer {
                DnsAnswer::Ns(name) => Some(name),
                _ => None,
            })
            .collect::<Vec<_>>();

        if !name_servers.is_empty() {
            log::debug!("Authoritative name servers for {zone}: {name_servers:?}");
            break;
        }

        labels.remove(0);
    }

    let lookups = name_servers.iter().flat_map(|name_server| {
        [RecordType::A, RecordType::Aaaa]
            .map(|record_type| resolver.resolve(name_server, record_type, &[]))
    });

    let mut ips = Vec::new();

    for answer in try_join_all(lookups).await?.into_iter().flatten() {
        let ip = match answer {
            DnsAnswer::A(ip) => IpAddr::V4(ip),
            DnsAnswer::Aaaa(ip) => IpAddr::V6(ip),
            _ => continue,
        };

        if !ips.contains(&ip) {
            ips.push(ip);
        }
    }

    Ok(ips)
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{collections::HashMap, sync::Arc};

    use parking_lot::Mutex;

    use super::*;

    /// Serves records from memory; TXT answers may differ per queried server.
    #[derive(Default, Clone)]
    pub(crate) struct MemoryResolver {
        records: Arc<Mutex<HashMap<(String, RecordType, Option<IpAddr>), Vec<DnsAnswer>>>>,
        pub(crate) queries: Arc<Mutex<Vec<(String, RecordType, Vec<IpAddr>)>>>,
    }

    impl MemoryResolver {
        pub(crate) fn insert(
            &self,
            name: &str,
            record_type: RecordType,
            server: Option<IpAddr>,
            answers: Vec<DnsAnswer>,
        ) {
            self.records
                .lock()
                .insert((name.to_owned(), record_type, server), answers);
        }

        pub(crate) fn query_count(&self, record_type: RecordType) -> usize {
            self.queries
                .lock()
                .iter()
                .filter(|(_, ty, _)| *ty == record_type)
                .count()
        }
    }

    impl DnsResolve for MemoryResolver {
        async fn resolve(
            &self,
            name: &str,
            record_type: RecordType,
            name_servers: &[IpAddr],
        ) -> Result<Vec<DnsAnswer>> {
            self.queries
                .lock()
                .push((name.to_owned(), record_type, name_servers.to_vec()));

            let server = name_servers.first().copied();
            let records = self.records.lock();

            Ok(records
                .get(&(name.to_owned(), record_type, server))
                .cloned()
                .unwrap_or_default())
        }
    }

    pub(crate) const NS1_V4: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1));
    pub(crate) const NS1_V6: IpAddr = IpAddr::V6(Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1));
    pub(crate) const NS2_V4: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 2));

    /// `example.com.` delegated to `ns1` (dual stack) and `ns2` (v4 only).
    pub(crate) fn delegated_zone() -> MemoryResolver {
        let resolver = MemoryResolver::default();

        resolver.insert(
            "example.com.",
            RecordType::Ns,
            None,
            vec![
                DnsAnswer::Ns("ns1.example.net.".to_owned()),
                DnsAnswer::Ns("ns2.example.net.".to_owned()),
            ],
        );

        for (name, ip) in [
            ("ns1.example.net.", NS1_V4),
            ("ns1.example.net.", NS1_V6),
            ("ns2.example.net.", NS2_V4),
        ] {
            let (record_type, answer) = match ip {
                IpAddr::V4(ip) => (RecordType::A, DnsAnswer::A(ip)),
                IpAddr::V6(ip) => (RecordType::Aaaa, DnsAnswer::Aaaa(ip)),
            };
            resolver.insert(name, record_type, None, vec![answer]);
        }

        // shares its address with ns2
        resolver.insert(
            "ns3.example.net.",
            RecordType::A,
            None,
            vec![DnsAnswer::A(Ipv4Addr::new(192, 0, 2, 2))],
        );

        resolver
    }

    #[tokio::test]
    async fn test_walks_up_to_the_zone() {
        let resolver = delegated_zone();

        let ips = find_authoritative_name_server_ips(&resolver, "_acme-challenge.www.example.com.")
            .await
            .unwrap();
        assert_eq!(ips, [NS1_V4, NS1_V6, NS2_V4]);

        let asked = resolver
            .queries
            .lock()
            .iter()
            .filter(|(_, ty, _)| *ty == RecordType::Ns)
            .map(|(name, _, _)| name.clone())
            .collect::<Vec<_>>();
        assert_eq!(
            asked,
            [
                "_acme-challenge.www.example.com.",
                "www.example.com.",
                "example.com."
            ]
        );
    }

    #[tokio::test]
    async fn test_addresses_are_deduplicated() {
        let resolver = delegated_zone();
        resolver.insert(
            "example.com.",
            RecordType::Ns,
            None,
            vec![
                DnsAnswer::Ns("ns2.example.net.".to_owned()),
                DnsAnswer::Ns("ns3.example.net.".to_owned()),
            ],
        );

        let ips = find_authoritative_name_server_ips(&resolver, "example.com")
            .await
            .unwrap();
        assert_eq!(ips, [NS2_V4]);
    }

    #[tokio::test]
    async fn test_no_name_servers_anywhere() {
        let resolver = MemoryResolver::default();

        let ips = find_authoritative_name_server_ips(&resolver, "a.b.invalid")
            .await
            .unwrap();
        assert!(ips.is_empty());
        assert_eq!(resolver.query_count(RecordType::Ns), 3);
    }

    #[test]
    fn test_record_as_zone_line() {
        let record = DnsTxtRecord::new(
            "_acme-challenge.example.com.".to_owned(),
            "tArBJigC7ktSbkGi7YtdEnwNWmrp8QANQ-zulm5lWTM".to_owned(),
        );

        assert_eq!(
            record.to_string(),
            "_acme-challenge.example.com. IN TXT \"tArBJigC7ktSbkGi7YtdEnwNWmrp8QANQ-zulm5lWTM\""
        );
        assert_eq!(
            serde_json::to_value(&record).unwrap(),
            serde_json::json!({
                "name": "_acme-challenge.example.com.",
                "type": "TXT",
                "content": "tArBJigC7ktSbkGi7YtdEnwNWmrp8QANQ-zulm5lWTM",
            })
        );
    }
}
