pub mod attendance;
pub mod bulk;
pub mod core;
pub mod dashboard;
pub mod families;
pub mod import_legacy;
pub mod reports;
pub mod students;
pub mod subscriptions;
pub mod volunteers;
pub mod women;
