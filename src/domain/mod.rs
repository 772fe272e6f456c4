//! Domain types shared by the resolver, the caches and the HTTP surface.

pub mod items;
pub mod maps;
