//! # Publisher
//!
//! Connects users' social accounts through OAuth, stores their credentials
//! encrypted, and publishes videos to Instagram, TikTok and YouTube.

pub mod auth;
pub mod config;
pub mod credentials;
pub mod crypto;
pub mod db;
pub mod error;
pub mod handlers;
pub mod maintenance;
pub mod models;
pub mod oauth;
pub mod platforms;
pub mod publish;
pub mod repositories;
pub mod server;
pub mod sink;
pub mod telemetry;
pub use migration;
