//! Platform integrations implementing the `AdPlatform` capability.

pub mod rest_platform;

pub use rest_platform::RestPlatform;
