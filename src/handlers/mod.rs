//! HTTP handlers. Each one is thin and delegates to a service.

pub mod health_handlers;
pub mod object_handlers;
pub mod shot_handlers;
