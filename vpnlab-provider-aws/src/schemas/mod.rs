//! AWS resource schema definitions

pub mod types;
pub mod vpc;
pub mod vpn;

use vpnlab_core::schema::ResourceSchema;

/// Returns all AWS schemas
pub fn all_schemas() -> Vec<ResourceSchema> {
    vec![
        vpc::vpc_schema(),
        vpn::customer_gateway_schema(),
        vpn::transit_gateway_schema(),
        vpn::vpn_connection_schema(),
    ]
}
