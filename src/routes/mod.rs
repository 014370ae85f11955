pub mod health;
pub mod metrics;
pub mod site;
pub mod websites;
