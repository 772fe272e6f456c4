//! Application services: path resolution, proxying, sitemap rewriting and
//! rebuild orchestration over the capability ports.

pub mod error;
pub mod hierarchy;
pub mod ports;
pub mod proxy;
pub mod rebuild;
pub mod sitemap;
