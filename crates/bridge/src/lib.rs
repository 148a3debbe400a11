//! mdbridge-lib: Market data bridge core
//!
//! Resolves the configured roster, subscribes it on a feed, routes every
//! event into a catalog while counting it, and reports progress. The
//! [`Runner`] hosts a [`Collector`] for a binary; the health server exposes
//! its state over HTTP.

pub mod collector;
pub mod counters;
pub mod error;
pub mod identifiers;
pub mod memory;
pub mod metrics;
pub mod resolver;
pub mod router;
pub mod runner;
pub mod server;
pub mod status;
pub mod subscription;
pub mod traits;

pub use collector::{Collector, CollectorSettings};
pub use counters::{CategoryTotal, CounterEntry, CounterTable, Tally};
pub use error::{BridgeError, FeedError, ResolverError};
pub use identifiers::{IdentifierResolver, Resolved};
pub use memory::{FeedCall, InMemoryFeed};
pub use resolver::EnvResolver;
pub use router::{EventRouter, RouteOutcome};
pub use runner::{Runner, RunnerSettings};
pub use server::{create_router, run_server, ServerState};
pub use status::{Inventory, StatusReporter, StatusSnapshot};
pub use subscription::{
    ActivationReport, DeactivationReport, SubscriptionEntry, SubscriptionManager,
    SubscriptionState, SubscriptionTimeouts,
};
pub use traits::{FeedClient, KeyResolver, Subscription};
