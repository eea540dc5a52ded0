pub mod cli;
pub mod clock;
pub mod config;
pub mod pipeline;
pub mod quota;
pub mod record;
pub mod service;
pub mod storage;
pub mod web;

pub use service::{QuotaStatus, Service, ServiceError, SinkErrors};
