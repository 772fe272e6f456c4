//! Canopy: canonical hierarchical paths for a flat CMS, served through a
//! caching reverse proxy.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
