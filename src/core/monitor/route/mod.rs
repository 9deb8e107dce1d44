pub mod detector;
pub mod geo;
pub mod hop_prober;
pub mod parsing;

// Re-export commonly used items
pub use detector::{RouteDetectorWorker, RouteProbeTrigger};
pub use geo::{GeoClient, GeoInfo, GeoProvider, IpApiGeoProvider};
pub use hop_prober::HopProberWorker;
pub use parsing::{parse_traceroute, route_fingerprint};
