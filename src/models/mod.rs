pub mod auth;
pub mod content;
pub mod provision;
pub mod website;
