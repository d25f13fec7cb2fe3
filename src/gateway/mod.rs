//! # Gateway Provisioning
//!
//! Everything that talks to the gateway admin API: the HTTP client, the
//! readiness probe, deterministic route identifiers, desired-state bodies and
//! the reconciler that converges routes and consumers.

pub mod client;
pub mod credentials;
pub mod model;
pub mod provisioner;
pub mod readiness;
pub mod route_id;

pub use client::{with_retry, AdminClient, AdminClientConfig, AdminError};
pub use credentials::{upstream_headers, Credentials};
pub use model::{build_consumer, build_route, is_subset, DesiredRoute, Operation, MANAGED_BY};
pub use provisioner::{
    ClearReport, ConsumerFailure, ProviderSummary, ProvisionError, ReconcileCounts,
    ReconcileReport, RouteFailure, RouteProvisioner, SkipReason, SkippedProvider,
};
pub use readiness::{ReadinessError, ReadinessProbe, ReadinessReport};
pub use route_id::{route_id, split_route_id, MAX_ROUTE_ID_LEN};
