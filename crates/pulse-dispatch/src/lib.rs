//! Event Subscriber & Dispatcher (spec component C6): fans in-process
//! worker events and out-of-process pub/sub events into the export
//! pipeline (`pulse-export`'s C7-C9).
//!
//! [`ingress`] is the in-process path (drains a `BoundedEventQueue`
//! directly), [`pubsub`] is the out-of-process path (a Redis pub/sub
//! subscriber with a channel-pattern routing table), and [`gateway`]
//! bundles both behind one facade with a health/status view.

pub mod gateway;
pub mod ingress;
pub mod pubsub;

pub use gateway::{CspGateway, GatewayStatus};
pub use ingress::IngressDispatcher;
pub use pubsub::{PubSubDispatcher, PubSubError};
