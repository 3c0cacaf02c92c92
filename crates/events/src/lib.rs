pub mod config;
pub mod messages;
pub mod node_events;
pub mod rabbitmq;
