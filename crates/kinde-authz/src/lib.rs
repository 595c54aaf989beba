//! Authorization checks for the Kinde client
//!
//! Answers "may this user do X" from verified token claims, or from the
//! account API when forced. Checks fail closed: any error while resolving
//! becomes `false` plus a warning.
//!
//! Evaluation order for `has()`:
//! 1. Roles
//! 2. Permissions
//! 3. Feature flags
//! 4. Billing entitlements (always from the paginated account API)

pub mod client;
pub mod condition;
pub mod entitlements;
pub mod evaluator;

pub use client::KindeClient;
pub use condition::{Condition, ForceApi, HasConditions, PermissionContext, Predicate};
pub use entitlements::EntitlementPager;
pub use evaluator::AuthorizationEvaluator;
