// handlers/mod.rs - two handler tiers
//
// Public (no auth) → Protected (bearer token required, owner-scoped)
pub mod protected;
pub mod public;
