pub mod classes;
pub mod core;
pub mod grading;
pub mod payments;
pub mod questions;
pub mod sessions;
pub mod students;
pub mod subscriptions;
