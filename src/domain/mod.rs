//! Domain layer: entities, invariants, and the ports the services
//! depend on.

pub mod errors;
pub mod models;
pub mod ports;
