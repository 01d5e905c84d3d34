//! Shortener - URL shortener with accounts and cookie sessions
//!
//! This library provides the core functionality behind the `shortener` binary.

pub mod api;
pub mod config;
pub mod db;
pub mod models;
pub mod services;
