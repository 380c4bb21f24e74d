pub mod app;
pub mod availability;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod import;
pub mod journal;
pub mod limits;
pub mod mail;
pub mod model;
pub mod observability;
pub mod payment;
pub mod request;
pub mod reservation;
pub mod store;
pub mod sweeper;
pub mod vehicle;
