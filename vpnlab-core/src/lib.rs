//! vpnlab Core
//!
//! Core library for provisioning a site-to-site VPN lab from a .tf declaration:
//! parsing, static checks, planning and plan execution

pub mod differ;
pub mod effect;
pub mod graph;
pub mod interpreter;
pub mod parser;
pub mod patch;
pub mod plan;
pub mod provider;
pub mod resource;
pub mod schema;
pub mod validation;
