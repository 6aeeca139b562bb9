// handlers/protected/mod.rs - Protected handlers (bearer token required)
//
// Every route in this tier sits behind `middleware::require_bearer`, so
// handlers receive the caller as `Extension<AuthUser>`. Ownership is enforced
// by the todo service, not here.
pub mod todos;
