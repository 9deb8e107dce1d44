// DNS query client abstraction over hickory-resolver.
//
// A fresh resolver is built per query with client-side caching disabled;
// benchmark latencies must measure the server, not our own cache.

use crate::core::monitor::types::DnsRecordType;
use async_trait::async_trait;
use hickory_resolver::config::{NameServerConfig, Protocol, ResolverConfig, ResolverOpts};
use hickory_resolver::error::ResolveErrorKind;
use hickory_resolver::proto::rr::RecordType;
use hickory_resolver::TokioAsyncResolver;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

/// Outcome of one query. NXDOMAIN still carries a latency: the recursion
/// happened, there just was no record (the uncached benchmark depends on
/// exactly that).
#[derive(Debug, Clone, PartialEq)]
pub struct DnsAnswer {
    pub records: usize,
    pub nxdomain: bool,
    pub latency_ms: f64,
}

#[async_trait]
pub trait DnsClient: Send + Sync {
    /// Query `name` for `record_type` against `server` (or the system
    /// resolver when `None`). Errors carry the resolver's message.
    async fn query(
        &self,
        server: Option<IpAddr>,
        name: &str,
        record_type: DnsRecordType,
        timeout: Duration,
    ) -> Result<DnsAnswer, String>;
}

pub struct HickoryDnsClient;

fn to_record_type(rt: DnsRecordType) -> RecordType {
    match rt {
        DnsRecordType::A => RecordType::A,
        DnsRecordType::Aaaa => RecordType::AAAA,
        DnsRecordType::Cname => RecordType::CNAME,
        DnsRecordType::Mx => RecordType::MX,
        DnsRecordType::Txt => RecordType::TXT,
        DnsRecordType::Ns => RecordType::NS,
    }
}

fn build_resolver(server: Option<IpAddr>, timeout: Duration) -> Result<TokioAsyncResolver, String> {
    let mut opts = ResolverOpts::default();
    opts.timeout = timeout;
    opts.attempts = 1;
    opts.cache_size = 0;

    match server {
        Some(ip) => {
            let mut config = ResolverConfig::new();
            config.add_name_server(NameServerConfig::new(SocketAddr::new(ip, 53), Protocol::Udp));
            Ok(TokioAsyncResolver::tokio(config, opts))
        }
        None => TokioAsyncResolver::tokio_from_system_conf().map_err(|e| e.to_string()),
    }
}

#[async_trait]
impl DnsClient for HickoryDnsClient {
    async fn query(
        &self,
        server: Option<IpAddr>,
        name: &str,
        record_type: DnsRecordType,
        timeout: Duration,
    ) -> Result<DnsAnswer, String> {
        let resolver = build_resolver(server, timeout)?;
        let started = Instant::now();
        // The resolver enforces its own timeout; the outer bound catches a
        // wedged transport.
        let outcome = tokio::time::timeout(
            timeout + Duration::from_millis(500),
            resolver.lookup(name, to_record_type(record_type)),
        )
        .await;
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

        match outcome {
            Ok(Ok(lookup)) => Ok(DnsAnswer {
                records: lookup.iter().count(),
                nxdomain: false,
                latency_ms,
            }),
            Ok(Err(e)) => match e.kind() {
                ResolveErrorKind::NoRecordsFound { .. } => Ok(DnsAnswer {
                    records: 0,
                    nxdomain: true,
                    latency_ms,
                }),
                _ => Err(e.to_string()),
            },
            Err(_) => Err(format!("lookup timed out after {:?}", timeout)),
        }
    }
}
