pub mod app;
pub mod config;
pub mod notify;
pub mod orchestration;
pub mod presentation;
pub mod provider;
pub mod shared;
pub mod store;
