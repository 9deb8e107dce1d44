// Rate-limited, cached IP geolocation lookups.
//
// The upstream endpoint tolerates roughly 45 requests a minute and drops
// excess silently, so the client enforces its own budget and treats every
// failure as "no geo yet". Missing geo is an empty field, never an alert.

use crate::core::monitor::http::HttpFetcher;
use crate::core::monitor::types::MonitorError;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeoInfo {
    pub country: Option<String>,
    pub asn: Option<String>,
    pub city: Option<String>,
}

#[async_trait]
pub trait GeoProvider: Send + Sync {
    async fn fetch(&self, ip: IpAddr) -> Result<GeoInfo, MonitorError>;
}

#[derive(Debug, Deserialize)]
struct IpApiResponse {
    #[serde(default)]
    country: Option<String>,
    #[serde(rename = "as", default)]
    asn: Option<String>,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

/// ip-api.com JSON endpoint.
pub struct IpApiGeoProvider {
    fetcher: std::sync::Arc<dyn HttpFetcher>,
    timeout: Duration,
}

impl IpApiGeoProvider {
    pub fn new(fetcher: std::sync::Arc<dyn HttpFetcher>, timeout: Duration) -> Self {
        Self { fetcher, timeout }
    }
}

#[async_trait]
impl GeoProvider for IpApiGeoProvider {
    async fn fetch(&self, ip: IpAddr) -> Result<GeoInfo, MonitorError> {
        let url = format!("http://ip-api.com/json/{}?fields=status,country,city,as", ip);
        let body = self.fetcher.get_text(&url, self.timeout).await?;
        let parsed: IpApiResponse = serde_json::from_str(&body)
            .map_err(|e| MonitorError::ParseError(format!("geo response: {}", e)))?;
        if parsed.status.as_deref() == Some("fail") {
            return Err(MonitorError::HttpError("geo lookup refused".into()));
        }
        Ok(GeoInfo {
            country: parsed.country,
            asn: parsed.asn,
            city: parsed.city,
        })
    }
}

struct RateWindow {
    window_start: Instant,
    used: u32,
}

/// Caching front over a [`GeoProvider`].
pub struct GeoClient {
    provider: std::sync::Arc<dyn GeoProvider>,
    cache: Mutex<HashMap<IpAddr, (GeoInfo, Instant)>>,
    rate: Mutex<RateWindow>,
    per_minute: u32,
    cache_ttl: Duration,
}

impl GeoClient {
    pub fn new(provider: std::sync::Arc<dyn GeoProvider>, per_minute: u32, cache_ttl: Duration) -> Self {
        Self {
            provider,
            cache: Mutex::new(HashMap::new()),
            rate: Mutex::new(RateWindow {
                window_start: Instant::now(),
                used: 0,
            }),
            per_minute,
            cache_ttl,
        }
    }

    fn budget_available(&self) -> bool {
        let mut rate = self.rate.lock().unwrap_or_else(|e| e.into_inner());
        if rate.window_start.elapsed() >= Duration::from_secs(60) {
            rate.window_start = Instant::now();
            rate.used = 0;
        }
        if rate.used < self.per_minute {
            rate.used += 1;
            true
        } else {
            false
        }
    }

    /// Look up geo for `ip`. Returns `None` when the cache misses and the
    /// minute budget is spent, or when the provider fails; callers render
    /// the absence, they never alert on it.
    pub async fn lookup(&self, ip: IpAddr) -> Option<GeoInfo> {
        {
            let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            if let Some((info, at)) = cache.get(&ip) {
                if at.elapsed() < self.cache_ttl {
                    return Some(info.clone());
                }
            }
        }
        if !self.budget_available() {
            return None;
        }
        match self.provider.fetch(ip).await {
            Ok(info) => {
                let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
                cache.insert(ip, (info.clone(), Instant::now()));
                Some(info)
            }
            Err(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingProvider {
        calls: AtomicU32,
    }

    #[async_trait]
    impl GeoProvider for CountingProvider {
        async fn fetch(&self, _ip: IpAddr) -> Result<GeoInfo, MonitorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(GeoInfo {
                country: Some("DE".into()),
                asn: Some("AS3320".into()),
                city: None,
            })
        }
    }

    #[tokio::test]
    async fn cache_prevents_repeat_fetches() {
        let provider = std::sync::Arc::new(CountingProvider {
            calls: AtomicU32::new(0),
        });
        let client = GeoClient::new(provider.clone(), 40, Duration::from_secs(3600));
        let ip: IpAddr = "9.9.9.9".parse().unwrap();
        assert!(client.lookup(ip).await.is_some());
        assert!(client.lookup(ip).await.is_some());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rate_budget_caps_fetches() {
        let provider = std::sync::Arc::new(CountingProvider {
            calls: AtomicU32::new(0),
        });
        let client = GeoClient::new(provider.clone(), 3, Duration::from_secs(3600));
        for i in 0..10u8 {
            let ip: IpAddr = format!("10.1.1.{}", i).parse().unwrap();
            let _ = client.lookup(ip).await;
        }
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    struct FailingProvider;

    #[async_trait]
    impl GeoProvider for FailingProvider {
        async fn fetch(&self, _ip: IpAddr) -> Result<GeoInfo, MonitorError> {
            Err(MonitorError::HttpError("boom".into()))
        }
    }

    #[tokio::test]
    async fn failure_is_silent_absence() {
        let client = GeoClient::new(
            std::sync::Arc::new(FailingProvider),
            40,
            Duration::from_secs(3600),
        );
        assert!(client.lookup("9.9.9.9".parse().unwrap()).await.is_none());
    }
}
