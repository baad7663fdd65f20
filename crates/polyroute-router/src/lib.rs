//! The virtual-router control plane: request classification, in-band
//! directives, session routing state, health and rate-limit bookkeeping, and
//! target selection.

mod classify;
mod directive;
mod engine;
mod health;
mod pool;
mod ratelimit;
mod session;
mod target;

pub use classify::{
    Classification, ClassificationSource, Classifier, ClassifyRule, ModelPattern, RuleCondition,
    RuleField, RuleOp,
};
pub use directive::{Directive, DisableSpec, parse_directives};
pub use engine::{RouteDecision, RouteError, RouterEngine};
pub use health::{HealthConfig, HealthManager, HealthState};
pub use pool::RoutePools;
pub use ratelimit::{CooldownEntry, CooldownReason, RateLimitConfig, RateLimitManager};
pub use session::{SessionRoutingState, SessionStore, StopMessage, TargetSelector};
pub use target::{RouteCategory, Target};
