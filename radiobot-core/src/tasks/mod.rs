// File: radiobot-core/src/tasks/mod.rs

pub mod status_publisher;

pub use status_publisher::{spawn_status_publisher, StatusPublisher};
