use std::{
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
    time::{Duration, Instant},
};

use futures::future::join_all;
use tokio::{net::UdpSocket, sync::OnceCell};

use super::{find_authoritative_name_server_ips, DnsAnswer, DnsResolve, RecordType, TxtAnswer};
use crate::{error::*, order::PollOptions};

/// a.root-servers.net
const ROOT_SERVER_V4: SocketAddr =
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(198, 41, 0, 4)), 53);
const ROOT_SERVER_V6: SocketAddr = SocketAddr::new(
    IpAddr::V6(Ipv6Addr::new(0x2001, 0x503, 0xba3e, 0, 0, 0, 0x2, 0x30)),
    53,
);

/// Which IP versions the local host can send DNS queries over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpFamilies {
    pub ipv4: bool,
    pub ipv6: bool,
}

impl IpFamilies {
    /// Checks for a route to a root server over each IP version.
    ///
    /// Connecting a UDP socket sends nothing; it only fails when there is no route.
    pub async fn detect() -> Self {
        let (ipv4, ipv6) = tokio::join!(can_route(ROOT_SERVER_V4), can_route(ROOT_SERVER_V6));
        log::debug!("Reachable IP families: v4 {ipv4}, v6 {ipv6}");
        IpFamilies { ipv4, ipv6 }
    }

    pub fn allows(&self, ip: &IpAddr) -> bool {
        match ip {
            IpAddr::V4(_) => self.ipv4,
            IpAddr::V6(_) => self.ipv6,
        }
    }
}

async fn can_route(addr: SocketAddr) -> bool {
    let bind_address = match addr {
        SocketAddr::V4(_) => SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), 0),
        SocketAddr::V6(_) => SocketAddr::new(Ipv6Addr::UNSPECIFIED.into(), 0),
    };

    match UdpSocket::bind(bind_address).await {
        Ok(socket) => socket.connect(addr).await.is_ok(),
        Err(_) => false,
    }
}

/// How long and where to look for a TXT record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsPollOptions {
    /// Delay between two attempts.
    pub interval: Duration,

    /// Give up once this much time has passed since the first attempt.
    pub timeout: Duration,

    /// Name servers to query. When unset, the authoritative name servers of the record are looked
    /// up and used.
    pub name_servers: Option<Vec<IpAddr>>,
}

impl Default for DnsPollOptions {
    fn default() -> Self {
        DnsPollOptions {
            interval: Duration::from_millis(5000),
            timeout: Duration::from_millis(30000),
            name_servers: None,
        }
    }
}

type BeforeAttempt = Box<dyn Fn(usize) + Send + Sync>;
type AfterFailAttempt = Box<dyn Fn(usize, &[TxtAnswer]) + Send + Sync>;

/// Waits for TXT records to propagate.
pub struct DnsPoller<R> {
    resolver: R,
    ip_families: OnceCell<IpFamilies>,
    on_before_attempt: Option<BeforeAttempt>,
    on_after_fail_attempt: Option<AfterFailAttempt>,
}

impl<R: DnsResolve> DnsPoller<R> {
    pub fn new(resolver: R) -> Self {
        DnsPoller {
            resolver,
            ip_families: OnceCell::new(),
            on_before_attempt: None,
            on_after_fail_attempt: None,
        }
    }

    /// Uses `ip_families` instead of probing the network.
    pub fn with_ip_families(mut self, ip_families: IpFamilies) -> Self {
        self.ip_families = OnceCell::new_with(Some(ip_families));
        self
    }

    /// Called with the attempt number (starting at 1) before each attempt.
    pub fn on_before_attempt(mut self, f: impl Fn(usize) + Send + Sync + 'static) -> Self {
        self.on_before_attempt = Some(Box::new(f));
        self
    }

    /// Called with the attempt number and the answers seen after each attempt that fell short.
    pub fn on_after_fail_attempt(
        mut self,
        f: impl Fn(usize, &[TxtAnswer]) + Send + Sync + 'static,
    ) -> Self {
        self.on_after_fail_attempt = Some(Box::new(f));
        self
    }

    pub fn resolver(&self) -> &R {
        &self.resolver
    }

    async fn ip_families(&self) -> IpFamilies {
        *self.ip_families.get_or_init(IpFamilies::detect).await
    }

    /// Polls until every value of `expected` is in the TXT record `name` on every queried server.
    ///
    /// Queries go to `opts.name_servers`, or the record's authoritative name servers, restricted
    /// to the IP versions this host can reach. If that leaves nothing, one lookup through the
    /// resolver's default servers is made per attempt instead.
    ///
    /// On success the answers of the last attempt are returned. When `opts.timeout` passes first,
    /// [`Error::DnsTimeout`] carries them instead.
    pub async fn poll_txt_record(
        &self,
        name: &str,
        expected: &[&str],
        opts: &DnsPollOptions,
    ) -> Result<Vec<TxtAnswer>> {
        let start = Instant::now();

        let candidates = match &opts.name_servers {
            Some(name_servers) => name_servers.clone(),
            None => find_authoritative_name_server_ips(&self.resolver, name).await?,
        };

        let ip_families = self.ip_families().await;
        let mut servers = candidates
            .into_iter()
            .filter(|ip| ip_families.allows(ip))
            .map(Some)
            .collect::<Vec<_>>();

        if servers.is_empty() {
            servers.push(None);
        }

        let deadline = PollOptions {
            interval: opts.interval,
            timeout: opts.timeout,
        };

        let mut attempt = 0;

        loop {
            attempt += 1;

            if let Some(f) = &self.on_before_attempt {
                f(attempt);
            }

            log::debug!("Looking up TXT {name} on {servers:?}, attempt {attempt}");

            let answers = join_all(servers.iter().map(|&server| self.query_txt(name, server))).await;

            let found = answers.iter().all(|answer| {
                expected
                    .iter()
                    .all(|value| answer.values.iter().any(|v| v == value))
            });

            if found {
                return Ok(answers);
            }

            if let Some(f) = &self.on_after_fail_attempt {
                f(attempt, &answers);
            }

            match deadline.next_delay(start) {
                Some(delay) => tokio::time::sleep(delay).await,
                None => {
                    return Err(Error::DnsTimeout {
                        name: name.to_owned(),
                        answers,
                    })
                }
            }
        }
    }

    /// TXT values of `name` on one server, chunks joined. Lookup failures count as no values.
    async fn query_txt(&self, name: &str, server: Option<IpAddr>) -> TxtAnswer {
        let name_servers = server.as_slice();

        let values = match self.resolver.resolve(name, RecordType::Txt, name_servers).await {
            Ok(answers) => answers
                .into_iter()
                .filter_map(|answer| match answer {
                    DnsAnswer::Txt(chunks) => Some(chunks.concat()),
                    _ => None,
                })
                .collect(),

            Err(err) => {
                log::warn!("TXT lookup of {name} on {server:?} failed: {err}");
                Vec::new()
            }
        };

        TxtAnswer { server, values }
    }
}
