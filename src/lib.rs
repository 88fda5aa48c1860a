pub mod api;
pub mod browser;
pub mod certs;
pub mod channels;
pub mod config;
pub mod error;
pub mod files;
pub mod pages;
pub mod report;
pub mod runner;
pub mod scenario;
pub mod ssh;
pub mod validator;
