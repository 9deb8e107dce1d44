pub mod benchmark;
pub mod client;
pub mod monitor;
pub mod score;

// Re-export commonly used items
pub use benchmark::DnsBenchmarkWorker;
pub use client::{DnsAnswer, DnsClient, HickoryDnsClient};
pub use monitor::DnsMonitorWorker;
pub use score::{dns_score, DnsScore, DnsScoreInputs};
