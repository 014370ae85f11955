pub mod cache;
pub mod metrics;
pub mod provisioning;
pub mod sections;
pub mod tenant;
