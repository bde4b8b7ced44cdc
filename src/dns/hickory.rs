use std::{
    net::{IpAddr, SocketAddr},
    time::Duration,
};

use hickory_resolver::{
    config::{NameServerConfig, ResolverConfig, ResolverOpts},
    name_server::TokioConnectionProvider,
    proto::xfer::Protocol,
    ResolveError, Resolver, TokioResolver,
};

use super::{DnsAnswer, DnsResolve, RecordType};
use crate::error::*;

/// [`DnsResolve`] backed by `hickory-resolver`.
///
/// Lookups without explicit name servers use the system configuration. Caching is disabled so
/// repeated polls see fresh answers.
#[derive(Debug, Clone)]
pub struct HickoryResolver {
    system: TokioResolver,
    opts: ResolverOpts,
}

impl HickoryResolver {
    /// Creates a resolver from the system configuration (`/etc/resolv.conf` on Unix).
    pub fn new() -> Result<Self> {
        let opts = Self::default_opts();

        let system = Resolver::builder_tokio()?.with_options(opts.clone()).build();

        Ok(HickoryResolver { system, opts })
    }

    /// Creates a resolver that sends lookups without explicit name servers to `config`.
    pub fn with_config(config: ResolverConfig) -> Self {
        let opts = Self::default_opts();

        let system = Resolver::builder_with_config(config, TokioConnectionProvider::default())
            .with_options(opts.clone())
            .build();

        HickoryResolver { system, opts }
    }

    fn default_opts() -> ResolverOpts {
        let mut opts = ResolverOpts::default();
        opts.timeout = Duration::from_secs(5);
        opts.attempts = 2;
        opts.cache_size = 0;
        opts
    }

    /// A one-off resolver that only asks `name_servers`.
    fn direct(&self, name_servers: &[IpAddr]) -> TokioResolver {
        let mut config = ResolverConfig::new();

        for ip in name_servers {
            config.add_name_server(NameServerConfig::new(
                SocketAddr::new(*ip, 53),
                Protocol::Udp,
            ));
        }

        Resolver::builder_with_config(config, TokioConnectionProvider::default())
            .with_options(self.opts.clone())
            .build()
    }
}

impl DnsResolve for HickoryResolver {
    async fn resolve(
        &self,
        name: &str,
        record_type: RecordType,
        name_servers: &[IpAddr],
    ) -> Result<Vec<DnsAnswer>> {
        let resolver = if name_servers.is_empty() {
            self.system.clone()
        } else {
            self.direct(name_servers)
        };

        log::trace!("Lookup {record_type:?} {name} via {name_servers:?}");

        let answers = match record_type {
            RecordType::A => resolver
                .ipv4_lookup(name)
                .await
                .map(|lookup| lookup.iter().map(|a| DnsAnswer::A(a.0)).collect()),

            RecordType::Aaaa => resolver
                .ipv6_lookup(name)
                .await
                .map(|lookup| lookup.iter().map(|aaaa| DnsAnswer::Aaaa(aaaa.0)).collect()),

            RecordType::Ns => resolver
                .ns_lookup(name)
                .await
                .map(|lookup| lookup.iter().map(|ns| DnsAnswer::Ns(ns.0.to_utf8())).collect()),

            RecordType::Txt => resolver.txt_lookup(name).await.map(|lookup| {
                lookup
                    .iter()
                    .map(|txt| {
                        DnsAnswer::Txt(
                            txt.txt_data()
                                .iter()
                                .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
                                .collect(),
                        )
                    })
                    .collect()
            }),
        };

        match answers {
            Ok(answers) => Ok(answers),
            Err(err) if is_empty_answer(&err) => Ok(Vec::new()),
            Err(err) => Err(err.into()),
        }
    }
}

/// NXDOMAIN and NOERROR without records are answers, not failures.
fn is_empty_answer(err: &ResolveError) -> bool {
    err.is_nx_domain() || err.is_no_records_found()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolver_creation() {
        let resolver = HickoryResolver::with_config(ResolverConfig::new());
        assert_eq!(resolver.opts.cache_size, 0);

        // building a direct resolver does no I/O
        let _direct = resolver.direct(&[IpAddr::from([192, 0, 2, 1])]);
    }
}
