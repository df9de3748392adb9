//! Client-side content cache and prefetch runtime for the page renderer.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
