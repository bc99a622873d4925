//! Admission control: policy tiers, caller identity and sliding-window state.

mod clock;
mod controller;
mod decision;
mod identity;
mod policy;
mod store;
mod sweeper;
mod window;

pub use clock::{Clock, MockClock, SystemClock};
pub use controller::AdmissionController;
pub use decision::{AdmissionDecision, Verdict};
pub use identity::{Identity, IdentityError, IdentityResolver, RequestContext};
pub use policy::{PolicyConfig, PolicyKey, PolicyTable, PolicyTier, ResolvedPolicy, UnknownPolicy};
pub use store::{InMemoryWindowStore, StoreError, WindowStore};
pub use sweeper::{Sweeper, SweeperHandle};
pub use window::{RateWindowEntry, WindowKey, WindowOutcome, WindowSnapshot};
