pub mod api;
pub mod clock;
pub mod config;
pub mod fingerprint;
pub mod humanize;
pub mod library;
pub mod observability;
pub mod queue;
pub mod storage;
pub mod viewer;
pub mod worker;
