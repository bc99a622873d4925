//! Core admission controller implementation.

use std::sync::Arc;
use tracing::{debug, trace, warn};

use super::clock::{Clock, SystemClock};
use super::decision::{AdmissionDecision, Verdict};
use super::identity::{Identity, IdentityResolver, RequestContext};
use super::policy::{PolicyKey, PolicyTable, PolicyTier};
use super::store::{InMemoryWindowStore, WindowStore};
use super::window::WindowKey;

/// Decides whether inbound requests may proceed.
///
/// The controller owns the window store; nothing else mutates it. It is
/// thread-safe and meant to be shared behind an `Arc` by every route.
pub struct AdmissionController {
    /// Validated policy tiers
    policies: Arc<PolicyTable>,
    /// Maps request contexts to caller identities
    resolver: IdentityResolver,
    /// Sliding-window state per (identity, bucket)
    store: Arc<dyn WindowStore>,
    /// Time source for window accounting
    clock: Arc<dyn Clock>,
}

impl AdmissionController {
    /// Create a controller with an in-memory store and the system clock.
    pub fn new(policies: PolicyTable) -> Self {
        Self {
            policies: Arc::new(policies),
            resolver: IdentityResolver::default(),
            store: Arc::new(InMemoryWindowStore::new()),
            clock: Arc::new(SystemClock::new()),
        }
    }

    /// Replace the window store.
    pub fn with_store(mut self, store: Arc<dyn WindowStore>) -> Self {
        self.store = store;
        self
    }

    /// Replace the clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the identity resolver.
    pub fn with_resolver(mut self, resolver: IdentityResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// The policy table this controller enforces.
    pub fn policies(&self) -> &PolicyTable {
        &self.policies
    }

    /// The identity resolver in use.
    pub fn resolver(&self) -> &IdentityResolver {
        &self.resolver
    }

    /// Current time according to the controller's clock.
    pub fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now()
    }

    /// Evaluate a request against the tier named `policy`.
    ///
    /// Unknown names fall back to the table's default tier. This never
    /// fails: store errors admit the request.
    pub async fn evaluate(&self, ctx: &RequestContext, policy: &str) -> Verdict {
        let resolved = self.policies.resolve(policy);
        self.admit(ctx, resolved.key, resolved.tier).await
    }

    /// Evaluate a request against a known tier.
    pub async fn evaluate_policy(&self, ctx: &RequestContext, policy: PolicyKey) -> Verdict {
        let tier = self.policies.get(policy);
        self.admit(ctx, policy, tier).await
    }

    /// Quota state for a caller without counting a request.
    ///
    /// Returns `None` when a strict tier cannot identify the caller or the
    /// store cannot be read.
    pub async fn peek(&self, ctx: &RequestContext, policy: PolicyKey) -> Option<AdmissionDecision> {
        let tier = self.policies.get(policy);
        let identity = self.identify(ctx, policy, &tier)?;
        let key = WindowKey::new(identity.key(), policy.as_str());
        let now = self.clock.now();

        match self.store.get(&key, now).await {
            Ok(snapshot) => {
                let count = snapshot.map_or(0, |s| s.count);
                let oldest = snapshot.and_then(|s| s.oldest).unwrap_or(now);
                Some(AdmissionDecision {
                    allowed: count < tier.limit,
                    remaining: tier.limit.saturating_sub(count),
                    reset_at: oldest + tier.window(),
                    limit: tier.limit,
                    policy,
                })
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Window store read failed");
                None
            }
        }
    }

    /// Remove stale windows. Returns how many were removed.
    pub async fn sweep(&self) -> usize {
        let now = self.clock.now();
        match self.store.evict(now).await {
            Ok(removed) => {
                debug!(removed, remaining = self.store.len(), "Swept stale windows");
                removed
            }
            Err(e) => {
                warn!(error = %e, "Window sweep failed");
                0
            }
        }
    }

    /// Get the number of tracked windows.
    pub fn window_count(&self) -> usize {
        self.store.len()
    }

    fn identify(
        &self,
        ctx: &RequestContext,
        policy: PolicyKey,
        tier: &PolicyTier,
    ) -> Option<Identity> {
        match self.resolver.resolve(ctx) {
            Ok(identity) => Some(identity),
            Err(e) if tier.strict => {
                warn!(policy = %policy, error = %e, "Caller identity unresolved on strict tier");
                None
            }
            Err(e) => {
                debug!(policy = %policy, error = %e, "Caller identity unresolved, using shared bucket");
                Some(Identity::Anonymous)
            }
        }
    }

    async fn admit(&self, ctx: &RequestContext, policy: PolicyKey, tier: PolicyTier) -> Verdict {
        let Some(identity) = self.identify(ctx, policy, &tier) else {
            return Verdict::Unidentified {
                policy,
                limit: tier.limit,
            };
        };

        let key = WindowKey::new(identity.key(), policy.as_str());
        let now = self.clock.now();

        trace!(key = %key, limit = tier.limit, window_secs = tier.window_secs, "Evaluating admission");

        let outcome = match self.store.increment(&key, &tier, now).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(key = %key, error = %e, "Window store failed, admitting request");
                return Verdict::Admitted(AdmissionDecision {
                    allowed: true,
                    remaining: tier.limit.saturating_sub(1),
                    reset_at: now + tier.window(),
                    limit: tier.limit,
                    policy,
                });
            }
        };

        let decision = AdmissionDecision {
            allowed: outcome.admitted,
            remaining: if outcome.admitted {
                tier.limit.saturating_sub(outcome.count)
            } else {
                0
            },
            reset_at: outcome.reset_at,
            limit: tier.limit,
            policy,
        };

        if decision.allowed {
            Verdict::Admitted(decision)
        } else {
            debug!(
                key = %key,
                limit = tier.limit,
                reset_at = %decision.reset_at,
                "Rate limit exceeded"
            );
            Verdict::Throttled(decision)
        }
    }
}
