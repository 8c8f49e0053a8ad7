//! This crate contains YAML helpers shared by the deployer library and the overlay CLI.

pub mod crd;
pub mod yaml;
