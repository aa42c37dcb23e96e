//! vpnlab AWS Provider
//!
//! Manages the resources of a site-to-site VPN topology through the EC2 API:
//! VPC, customer gateway, transit gateway and VPN connection.
//!
//! Every resource created here carries a `vpnlab:address` tag. Reads without
//! a recorded identifier fall back to that tag, so losing the state file does
//! not lead to duplicate infrastructure.

pub mod schemas;
mod utils;
pub mod validation;

use std::collections::HashMap;
use std::time::Duration;

use aws_config::{BehaviorVersion, Region};
use aws_sdk_ec2::Client as Ec2Client;
use aws_sdk_ec2::types::{
    AttributeBooleanValue, AutoAcceptSharedAttachmentsValue, CustomerGateway,
    DefaultRouteTableAssociationValue, DefaultRouteTablePropagationValue, DnsSupportValue, Filter,
    GatewayType, ModifyTransitGatewayOptions, ModifyVpnTunnelOptionsSpecification,
    MulticastSupportValue, ResourceType as Ec2ResourceType, Tag, Tenancy, TransitGateway,
    TransitGatewayRequestOptions, Vpc, VpcAttributeName, VpnConnection,
    VpnConnectionOptionsSpecification, VpnEcmpSupportValue, VpnTunnelOptionsSpecification,
};
use log::{debug, warn};
use vpnlab_core::provider::{
    BoxFuture, Provider, ProviderError, ProviderResult, ResourceType,
};
use vpnlab_core::resource::{Resource, ResourceId, State, Value};
use vpnlab_core::schema::ResourceSchema;

pub use utils::ADDRESS_TAG;
use utils::{
    address_filter, api_error, declared_tags, is_gone, is_not_found, parse_asn, required_str,
    tag_changes, tag_specification, tags_to_value,
};

/// VPC resource type
pub struct VpcType;

impl ResourceType for VpcType {
    fn name(&self) -> &'static str {
        "aws_vpc"
    }

    fn schema(&self) -> ResourceSchema {
        schemas::vpc::vpc_schema()
    }
}

/// Customer Gateway resource type
pub struct CustomerGatewayType;

impl ResourceType for CustomerGatewayType {
    fn name(&self) -> &'static str {
        "aws_customer_gateway"
    }

    fn schema(&self) -> ResourceSchema {
        schemas::vpn::customer_gateway_schema()
    }
}

/// Transit Gateway resource type
pub struct TransitGatewayType;

impl ResourceType for TransitGatewayType {
    fn name(&self) -> &'static str {
        "aws_ec2_transit_gateway"
    }

    fn schema(&self) -> ResourceSchema {
        schemas::vpn::transit_gateway_schema()
    }
}

/// VPN Connection resource type
pub struct VpnConnectionType;

impl ResourceType for VpnConnectionType {
    fn name(&self) -> &'static str {
        "aws_vpn_connection"
    }

    fn schema(&self) -> ResourceSchema {
        schemas::vpn::vpn_connection_schema()
    }
}

/// Polling settings used while a resource changes state
#[derive(Debug, Clone)]
pub struct WaitConfig {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for WaitConfig {
    fn default() -> Self {
        // Transit gateways and VPN connections take several minutes
        Self {
            max_attempts: 120,
            delay: Duration::from_secs(10),
        }
    }
}

/// Transit gateway option flags that can be changed in place
const TGW_MUTABLE_FLAGS: &[&str] = &[
    "auto_accept_shared_attachments",
    "default_route_table_association",
    "default_route_table_propagation",
    "dns_support",
    "vpn_ecmp_support",
];

const TUNNEL_STARTUP_ACTIONS: [&str; 2] = ["tunnel1_startup_action", "tunnel2_startup_action"];

/// AWS Provider
pub struct AwsProvider {
    ec2_client: Ec2Client,
    region: String,
    wait: WaitConfig,
}

impl AwsProvider {
    /// Create a new AWS Provider
    ///
    /// Without a region the default chain (AWS_REGION, profile) decides.
    pub async fn new(region: Option<&str>) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(Region::new(region.to_string()));
        }
        let config = loader.load().await;
        let region = config
            .region()
            .map(|r| r.to_string())
            .unwrap_or_default();

        Self {
            ec2_client: Ec2Client::new(&config),
            region,
            wait: WaitConfig::default(),
        }
    }

    /// Create with a specific client (for testing)
    pub fn with_client(ec2_client: Ec2Client, region: String) -> Self {
        Self {
            ec2_client,
            region,
            wait: WaitConfig::default(),
        }
    }

    pub fn with_wait_config(mut self, wait: WaitConfig) -> Self {
        self.wait = wait;
        self
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    // ========== Waiting ==========

    /// Current lifecycle state of a resource, `None` once it is gone
    async fn status_of(&self, id: &ResourceId, identifier: &str) -> ProviderResult<Option<String>> {
        let status = match id.resource_type.as_str() {
            "aws_vpc" => self
                .describe_vpc(id, Some(identifier))
                .await?
                .and_then(|vpc| vpc.state().map(|s| s.as_str().to_string())),
            "aws_customer_gateway" => self
                .describe_customer_gateway(id, Some(identifier))
                .await?
                .and_then(|cgw| cgw.state().map(str::to_string)),
            "aws_ec2_transit_gateway" => self
                .describe_transit_gateway(id, Some(identifier))
                .await?
                .and_then(|tgw| tgw.state().map(|s| s.as_str().to_string())),
            "aws_vpn_connection" => self
                .describe_vpn_connection(id, Some(identifier))
                .await?
                .and_then(|vpn| vpn.state().map(|s| s.as_str().to_string())),
            other => {
                return Err(ProviderError::new(format!("Unknown resource type: {}", other))
                    .for_resource(id.clone()));
            }
        };
        Ok(status)
    }

    /// Poll until the resource reports `available`
    async fn wait_until_available(&self, id: &ResourceId, identifier: &str) -> ProviderResult<()> {
        for _ in 0..self.wait.max_attempts {
            match self.status_of(id, identifier).await?.as_deref() {
                Some("available") => return Ok(()),
                Some(state @ ("failed" | "rejected")) => {
                    return Err(ProviderError::new(format!(
                        "{} entered state '{}'",
                        identifier, state
                    ))
                    .for_resource(id.clone()));
                }
                None => {
                    return Err(ProviderError::new(format!(
                        "{} disappeared while waiting for it to become available",
                        identifier
                    ))
                    .for_resource(id.clone()));
                }
                Some(state) => {
                    debug!("{} ({}) is {}, waiting", id, identifier, state);
                    tokio::time::sleep(self.wait.delay).await;
                }
            }
        }

        Err(ProviderError::new(format!("Timed out waiting for {} to become available", identifier))
            .for_resource(id.clone()))
    }

    /// Poll until the resource is deleted
    async fn wait_until_deleted(&self, id: &ResourceId, identifier: &str) -> ProviderResult<()> {
        for _ in 0..self.wait.max_attempts {
            match self.status_of(id, identifier).await? {
                None => return Ok(()),
                Some(state) => {
                    debug!("{} ({}) is {}, waiting for deletion", id, identifier, state);
                    tokio::time::sleep(self.wait.delay).await;
                }
            }
        }

        Err(ProviderError::new(format!("Timed out waiting for {} to be deleted", identifier))
            .for_resource(id.clone()))
    }

    // ========== Tags ==========

    /// Bring user tags in line with the declaration
    ///
    /// Undeclared `tags` leave whatever is on the resource alone.
    async fn reconcile_tags(
        &self,
        id: &ResourceId,
        identifier: &str,
        from: &State,
        to: &Resource,
    ) -> ProviderResult<()> {
        let Some(desired) = declared_tags(&to.attributes) else {
            return Ok(());
        };
        let current = declared_tags(&from.attributes).unwrap_or_default();
        let (to_set, to_remove) = tag_changes(&current, &desired);

        if !to_set.is_empty() {
            let mut request = self.ec2_client.create_tags().resources(identifier);
            for (key, value) in &to_set {
                request = request.tags(Tag::builder().key(key).value(value).build());
            }
            request
                .send()
                .await
                .map_err(|e| api_error("Failed to tag resource", &e).for_resource(id.clone()))?;
        }

        if !to_remove.is_empty() {
            let mut request = self.ec2_client.delete_tags().resources(identifier);
            for key in &to_remove {
                request = request.tags(Tag::builder().key(key).build());
            }
            request
                .send()
                .await
                .map_err(|e| api_error("Failed to untag resource", &e).for_resource(id.clone()))?;
        }

        Ok(())
    }

    // ========== EC2 VPC Operations ==========

    async fn describe_vpc(
        &self,
        id: &ResourceId,
        identifier: Option<&str>,
    ) -> ProviderResult<Option<Vpc>> {
        let request = match identifier {
            Some(vpc_id) => self.ec2_client.describe_vpcs().vpc_ids(vpc_id),
            None => self.ec2_client.describe_vpcs().filters(address_filter(id)),
        };

        match request.send().await {
            Ok(output) => Ok(output.vpcs().first().cloned()),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(api_error("Failed to describe VPCs", &e).for_resource(id.clone())),
        }
    }

    async fn vpc_attribute(
        &self,
        id: &ResourceId,
        vpc_id: &str,
        attribute: VpcAttributeName,
    ) -> ProviderResult<Option<bool>> {
        let output = self
            .ec2_client
            .describe_vpc_attribute()
            .vpc_id(vpc_id)
            .attribute(attribute.clone())
            .send()
            .await
            .map_err(|e| api_error("Failed to describe VPC attribute", &e).for_resource(id.clone()))?;

        let value = match attribute {
            VpcAttributeName::EnableDnsHostnames => output.enable_dns_hostnames(),
            _ => output.enable_dns_support(),
        };
        Ok(value.and_then(|v| v.value()))
    }

    /// Read an EC2 VPC
    async fn read_vpc(&self, id: &ResourceId, identifier: Option<&str>) -> ProviderResult<State> {
        let Some(vpc) = self.describe_vpc(id, identifier).await? else {
            return Ok(State::not_found(id.clone()));
        };
        let Some(vpc_id) = vpc.vpc_id() else {
            return Ok(State::not_found(id.clone()));
        };

        let mut attributes = HashMap::new();
        if let Some(cidr) = vpc.cidr_block() {
            attributes.insert("cidr_block".to_string(), Value::String(cidr.to_string()));
        }
        if let Some(tenancy) = vpc.instance_tenancy() {
            attributes.insert(
                "instance_tenancy".to_string(),
                Value::String(tenancy.as_str().to_string()),
            );
        }
        if let Some(owner_id) = vpc.owner_id() {
            attributes.insert("owner_id".to_string(), Value::String(owner_id.to_string()));
        }
        attributes.insert("tags".to_string(), tags_to_value(vpc.tags()));

        if let Some(enabled) = self
            .vpc_attribute(id, vpc_id, VpcAttributeName::EnableDnsSupport)
            .await?
        {
            attributes.insert("enable_dns_support".to_string(), Value::Bool(enabled));
        }
        if let Some(enabled) = self
            .vpc_attribute(id, vpc_id, VpcAttributeName::EnableDnsHostnames)
            .await?
        {
            attributes.insert("enable_dns_hostnames".to_string(), Value::Bool(enabled));
        }

        Ok(State::existing(id.clone(), attributes).with_identifier(vpc_id))
    }

    /// Set the DNS attributes that differ from `current`
    ///
    /// EC2 accepts one attribute per call; support goes first because
    /// hostnames require it.
    async fn set_vpc_dns(
        &self,
        id: &ResourceId,
        vpc_id: &str,
        current: &HashMap<String, Value>,
        desired: &Resource,
    ) -> ProviderResult<()> {
        for name in ["enable_dns_support", "enable_dns_hostnames"] {
            let Some(Value::Bool(enabled)) = desired.attributes.get(name) else {
                continue;
            };
            if current.get(name) == Some(&Value::Bool(*enabled)) {
                continue;
            }

            let value = AttributeBooleanValue::builder().value(*enabled).build();
            let request = self.ec2_client.modify_vpc_attribute().vpc_id(vpc_id);
            let request = if name == "enable_dns_support" {
                request.enable_dns_support(value)
            } else {
                request.enable_dns_hostnames(value)
            };
            request.send().await.map_err(|e| {
                api_error(&format!("Failed to set {}", name), &e).for_resource(id.clone())
            })?;
        }
        Ok(())
    }

    /// Create an EC2 VPC
    async fn create_vpc(&self, resource: &Resource) -> ProviderResult<State> {
        let id = &resource.id;
        let cidr_block = required_str(resource, "cidr_block")?;

        let mut request = self
            .ec2_client
            .create_vpc()
            .cidr_block(cidr_block)
            .tag_specifications(tag_specification(Ec2ResourceType::Vpc, resource));
        if let Some(tenancy) = resource.get_str("instance_tenancy") {
            request = request.instance_tenancy(Tenancy::from(tenancy));
        }

        let output = request
            .send()
            .await
            .map_err(|e| api_error("Failed to create VPC", &e).for_resource(id.clone()))?;
        let vpc_id = output
            .vpc()
            .and_then(|v| v.vpc_id())
            .ok_or_else(|| ProviderError::new("VPC created but no ID returned").for_resource(id.clone()))?
            .to_string();
        debug!("created VPC {}", vpc_id);

        self.wait_until_available(id, &vpc_id).await?;

        // New VPCs start with DNS support on and hostnames off
        let defaults = HashMap::from([
            ("enable_dns_support".to_string(), Value::Bool(true)),
            ("enable_dns_hostnames".to_string(), Value::Bool(false)),
        ]);
        self.set_vpc_dns(id, &vpc_id, &defaults, resource).await?;

        self.read_vpc(id, Some(&vpc_id)).await
    }

    /// Update an EC2 VPC
    async fn update_vpc(
        &self,
        id: &ResourceId,
        vpc_id: &str,
        from: &State,
        to: &Resource,
    ) -> ProviderResult<State> {
        self.set_vpc_dns(id, vpc_id, &from.attributes, to).await?;
        self.reconcile_tags(id, vpc_id, from, to).await?;
        self.read_vpc(id, Some(vpc_id)).await
    }

    /// Delete an EC2 VPC
    async fn delete_vpc(&self, id: &ResourceId, vpc_id: &str) -> ProviderResult<()> {
        match self.ec2_client.delete_vpc().vpc_id(vpc_id).send().await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => {
                debug!("VPC {} already gone", vpc_id);
                Ok(())
            }
            Err(e) => Err(api_error("Failed to delete VPC", &e).for_resource(id.clone())),
        }
    }

    // ========== EC2 Customer Gateway Operations ==========

    async fn describe_customer_gateway(
        &self,
        id: &ResourceId,
        identifier: Option<&str>,
    ) -> ProviderResult<Option<CustomerGateway>> {
        let request = match identifier {
            Some(cgw_id) => self
                .ec2_client
                .describe_customer_gateways()
                .customer_gateway_ids(cgw_id),
            None => self
                .ec2_client
                .describe_customer_gateways()
                .filters(address_filter(id)),
        };

        match request.send().await {
            Ok(output) => Ok(output
                .customer_gateways()
                .iter()
                .find(|cgw| !cgw.state().is_some_and(is_gone))
                .cloned()),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => {
                Err(api_error("Failed to describe customer gateways", &e).for_resource(id.clone()))
            }
        }
    }

    /// Read an EC2 Customer Gateway
    async fn read_customer_gateway(
        &self,
        id: &ResourceId,
        identifier: Option<&str>,
    ) -> ProviderResult<State> {
        let Some(cgw) = self.describe_customer_gateway(id, identifier).await? else {
            return Ok(State::not_found(id.clone()));
        };
        let Some(cgw_id) = cgw.customer_gateway_id() else {
            return Ok(State::not_found(id.clone()));
        };

        let mut attributes = HashMap::new();
        // 32-bit ASNs are only reported in the extended field
        if let Some(asn) = parse_asn(cgw.bgp_asn_extended()).or_else(|| parse_asn(cgw.bgp_asn())) {
            attributes.insert("bgp_asn".to_string(), Value::Int(asn));
        }
        if let Some(ip) = cgw.ip_address() {
            attributes.insert("ip_address".to_string(), Value::String(ip.to_string()));
        }
        if let Some(gateway_type) = cgw.r#type() {
            attributes.insert("type".to_string(), Value::String(gateway_type.to_string()));
        }
        if let Some(device_name) = cgw.device_name() {
            attributes.insert(
                "device_name".to_string(),
                Value::String(device_name.to_string()),
            );
        }
        attributes.insert("tags".to_string(), tags_to_value(cgw.tags()));

        Ok(State::existing(id.clone(), attributes).with_identifier(cgw_id))
    }

    /// Create an EC2 Customer Gateway
    async fn create_customer_gateway(&self, resource: &Resource) -> ProviderResult<State> {
        let id = &resource.id;
        let asn = resource
            .attributes
            .get("bgp_asn")
            .and_then(Value::as_int)
            .ok_or_else(|| ProviderError::new("bgp_asn is required").for_resource(id.clone()))?;
        let ip_address = required_str(resource, "ip_address")?;
        let gateway_type = required_str(resource, "type")?;

        let mut request = self
            .ec2_client
            .create_customer_gateway()
            .r#type(GatewayType::from(gateway_type))
            .ip_address(ip_address)
            .tag_specifications(tag_specification(Ec2ResourceType::CustomerGateway, resource));
        request = match i32::try_from(asn) {
            Ok(asn) => request.bgp_asn(asn),
            Err(_) => request.bgp_asn_extended(asn),
        };
        if let Some(device_name) = resource.get_str("device_name") {
            request = request.device_name(device_name);
        }

        let output = request.send().await.map_err(|e| {
            api_error("Failed to create customer gateway", &e).for_resource(id.clone())
        })?;
        let cgw_id = output
            .customer_gateway()
            .and_then(|cgw| cgw.customer_gateway_id())
            .ok_or_else(|| {
                ProviderError::new("Customer gateway created but no ID returned")
                    .for_resource(id.clone())
            })?
            .to_string();
        debug!("created customer gateway {}", cgw_id);

        self.wait_until_available(id, &cgw_id).await?;
        self.read_customer_gateway(id, Some(&cgw_id)).await
    }

    /// Update an EC2 Customer Gateway (everything but tags forces replacement)
    async fn update_customer_gateway(
        &self,
        id: &ResourceId,
        cgw_id: &str,
        from: &State,
        to: &Resource,
    ) -> ProviderResult<State> {
        self.reconcile_tags(id, cgw_id, from, to).await?;
        self.read_customer_gateway(id, Some(cgw_id)).await
    }

    /// Delete an EC2 Customer Gateway
    async fn delete_customer_gateway(&self, id: &ResourceId, cgw_id: &str) -> ProviderResult<()> {
        match self
            .ec2_client
            .delete_customer_gateway()
            .customer_gateway_id(cgw_id)
            .send()
            .await
        {
            Ok(_) => self.wait_until_deleted(id, cgw_id).await,
            Err(e) if is_not_found(&e) => {
                debug!("customer gateway {} already gone", cgw_id);
                Ok(())
            }
            Err(e) => Err(api_error("Failed to delete customer gateway", &e).for_resource(id.clone())),
        }
    }

    // ========== EC2 Transit Gateway Operations ==========

    async fn describe_transit_gateway(
        &self,
        id: &ResourceId,
        identifier: Option<&str>,
    ) -> ProviderResult<Option<TransitGateway>> {
        let request = match identifier {
            Some(tgw_id) => self
                .ec2_client
                .describe_transit_gateways()
                .transit_gateway_ids(tgw_id),
            None => self
                .ec2_client
                .describe_transit_gateways()
                .filters(address_filter(id)),
        };

        match request.send().await {
            Ok(output) => Ok(output
                .transit_gateways()
                .iter()
                .find(|tgw| !tgw.state().is_some_and(|s| is_gone(s.as_str())))
                .cloned()),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => {
                Err(api_error("Failed to describe transit gateways", &e).for_resource(id.clone()))
            }
        }
    }

    /// Read an EC2 Transit Gateway
    async fn read_transit_gateway(
        &self,
        id: &ResourceId,
        identifier: Option<&str>,
    ) -> ProviderResult<State> {
        let Some(tgw) = self.describe_transit_gateway(id, identifier).await? else {
            return Ok(State::not_found(id.clone()));
        };
        let Some(tgw_id) = tgw.transit_gateway_id() else {
            return Ok(State::not_found(id.clone()));
        };

        Ok(State::existing(id.clone(), transit_gateway_attributes(&tgw)).with_identifier(tgw_id))
    }

    /// Create an EC2 Transit Gateway and wait until it is available
    async fn create_transit_gateway(&self, resource: &Resource) -> ProviderResult<State> {
        let id = &resource.id;

        let mut options = TransitGatewayRequestOptions::builder();
        if let Some(asn) = resource.attributes.get("amazon_side_asn").and_then(Value::as_int) {
            options = options.amazon_side_asn(asn);
        }
        if let Some(v) = resource.get_str("auto_accept_shared_attachments") {
            options = options.auto_accept_shared_attachments(AutoAcceptSharedAttachmentsValue::from(v));
        }
        if let Some(v) = resource.get_str("default_route_table_association") {
            options = options.default_route_table_association(DefaultRouteTableAssociationValue::from(v));
        }
        if let Some(v) = resource.get_str("default_route_table_propagation") {
            options = options.default_route_table_propagation(DefaultRouteTablePropagationValue::from(v));
        }
        if let Some(v) = resource.get_str("dns_support") {
            options = options.dns_support(DnsSupportValue::from(v));
        }
        if let Some(v) = resource.get_str("vpn_ecmp_support") {
            options = options.vpn_ecmp_support(VpnEcmpSupportValue::from(v));
        }
        if let Some(v) = resource.get_str("multicast_support") {
            options = options.multicast_support(MulticastSupportValue::from(v));
        }

        let mut request = self
            .ec2_client
            .create_transit_gateway()
            .options(options.build())
            .tag_specifications(tag_specification(Ec2ResourceType::TransitGateway, resource));
        if let Some(description) = resource.get_str("description") {
            request = request.description(description);
        }

        let output = request.send().await.map_err(|e| {
            api_error("Failed to create transit gateway", &e).for_resource(id.clone())
        })?;
        let tgw_id = output
            .transit_gateway()
            .and_then(|tgw| tgw.transit_gateway_id())
            .ok_or_else(|| {
                ProviderError::new("Transit gateway created but no ID returned")
                    .for_resource(id.clone())
            })?
            .to_string();
        debug!("created transit gateway {}, waiting for it", tgw_id);

        self.wait_until_available(id, &tgw_id).await?;
        self.read_transit_gateway(id, Some(&tgw_id)).await
    }

    /// Update an EC2 Transit Gateway in place (option flags and description)
    async fn update_transit_gateway(
        &self,
        id: &ResourceId,
        tgw_id: &str,
        from: &State,
        to: &Resource,
    ) -> ProviderResult<State> {
        let differs = |name: &str| {
            to.attributes
                .get(name)
                .is_some_and(|v| from.attributes.get(name) != Some(v))
        };

        let mut options = ModifyTransitGatewayOptions::builder();
        let mut modified = false;
        for name in TGW_MUTABLE_FLAGS.iter().copied().filter(|&name| differs(name)) {
            let Some(v) = to.get_str(name) else {
                continue;
            };
            options = match name {
                "auto_accept_shared_attachments" => {
                    options.auto_accept_shared_attachments(AutoAcceptSharedAttachmentsValue::from(v))
                }
                "default_route_table_association" => options
                    .default_route_table_association(DefaultRouteTableAssociationValue::from(v)),
                "default_route_table_propagation" => options
                    .default_route_table_propagation(DefaultRouteTablePropagationValue::from(v)),
                "dns_support" => options.dns_support(DnsSupportValue::from(v)),
                _ => options.vpn_ecmp_support(VpnEcmpSupportValue::from(v)),
            };
            modified = true;
        }

        let mut request = self
            .ec2_client
            .modify_transit_gateway()
            .transit_gateway_id(tgw_id)
            .options(options.build());
        if differs("description")
            && let Some(description) = to.get_str("description")
        {
            request = request.description(description);
            modified = true;
        }

        if modified {
            request.send().await.map_err(|e| {
                api_error("Failed to modify transit gateway", &e).for_resource(id.clone())
            })?;
            self.wait_until_available(id, tgw_id).await?;
        }

        self.reconcile_tags(id, tgw_id, from, to).await?;
        self.read_transit_gateway(id, Some(tgw_id)).await
    }

    /// Delete an EC2 Transit Gateway and wait until it is gone
    async fn delete_transit_gateway(&self, id: &ResourceId, tgw_id: &str) -> ProviderResult<()> {
        match self
            .ec2_client
            .delete_transit_gateway()
            .transit_gateway_id(tgw_id)
            .send()
            .await
        {
            Ok(_) => self.wait_until_deleted(id, tgw_id).await,
            Err(e) if is_not_found(&e) => {
                debug!("transit gateway {} already gone", tgw_id);
                Ok(())
            }
            Err(e) => Err(api_error("Failed to delete transit gateway", &e).for_resource(id.clone())),
        }
    }

    // ========== EC2 VPN Connection Operations ==========

    async fn describe_vpn_connection(
        &self,
        id: &ResourceId,
        identifier: Option<&str>,
    ) -> ProviderResult<Option<VpnConnection>> {
        let request = match identifier {
            Some(vpn_id) => self
                .ec2_client
                .describe_vpn_connections()
                .vpn_connection_ids(vpn_id),
            None => self
                .ec2_client
                .describe_vpn_connections()
                .filters(address_filter(id)),
        };

        match request.send().await {
            Ok(output) => {
                let mut live = output
                    .vpn_connections()
                    .iter()
                    .filter(|vpn| !vpn.state().is_some_and(|s| is_gone(s.as_str())));
                let found = live.next().cloned();
                if identifier.is_none() && live.next().is_some() {
                    warn!("more than one VPN connection is tagged {}", id);
                }
                Ok(found)
            }
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => {
                Err(api_error("Failed to describe VPN connections", &e).for_resource(id.clone()))
            }
        }
    }

    async fn transit_gateway_attachment_id(
        &self,
        id: &ResourceId,
        vpn_id: &str,
    ) -> ProviderResult<Option<String>> {
        let filter = Filter::builder().name("resource-id").values(vpn_id).build();
        let output = self
            .ec2_client
            .describe_transit_gateway_attachments()
            .filters(filter)
            .send()
            .await
            .map_err(|e| {
                api_error("Failed to describe transit gateway attachments", &e)
                    .for_resource(id.clone())
            })?;

        Ok(output
            .transit_gateway_attachments()
            .iter()
            .find_map(|a| a.transit_gateway_attachment_id().map(String::from)))
    }

    /// Read an EC2 VPN Connection
    async fn read_vpn_connection(
        &self,
        id: &ResourceId,
        identifier: Option<&str>,
    ) -> ProviderResult<State> {
        let Some(vpn) = self.describe_vpn_connection(id, identifier).await? else {
            return Ok(State::not_found(id.clone()));
        };
        let Some(vpn_id) = vpn.vpn_connection_id() else {
            return Ok(State::not_found(id.clone()));
        };

        let mut attributes = HashMap::new();
        if let Some(cgw_id) = vpn.customer_gateway_id() {
            attributes.insert(
                "customer_gateway_id".to_string(),
                Value::String(cgw_id.to_string()),
            );
        }
        if let Some(tgw_id) = vpn.transit_gateway_id() {
            attributes.insert(
                "transit_gateway_id".to_string(),
                Value::String(tgw_id.to_string()),
            );
            if let Some(attachment_id) = self.transit_gateway_attachment_id(id, vpn_id).await? {
                attributes.insert(
                    "transit_gateway_attachment_id".to_string(),
                    Value::String(attachment_id),
                );
            }
        }
        if let Some(vgw_id) = vpn.vpn_gateway_id() {
            attributes.insert("vpn_gateway_id".to_string(), Value::String(vgw_id.to_string()));
        }
        if let Some(gateway_type) = vpn.r#type() {
            attributes.insert(
                "type".to_string(),
                Value::String(gateway_type.as_str().to_string()),
            );
        }
        if let Some(options) = vpn.options() {
            if let Some(static_only) = options.static_routes_only() {
                attributes.insert("static_routes_only".to_string(), Value::Bool(static_only));
            }
            for (i, tunnel) in options.tunnel_options().iter().take(2).enumerate() {
                if let Some(address) = tunnel.outside_ip_address() {
                    attributes.insert(
                        format!("tunnel{}_address", i + 1),
                        Value::String(address.to_string()),
                    );
                }
                // AWS leaves the action unset until it is changed from the default
                let action = tunnel.startup_action().unwrap_or("add");
                attributes.insert(TUNNEL_STARTUP_ACTIONS[i].to_string(), Value::String(action.to_string()));
            }
        }
        attributes.insert("tags".to_string(), tags_to_value(vpn.tags()));

        Ok(State::existing(id.clone(), attributes).with_identifier(vpn_id))
    }

    /// Create an EC2 VPN Connection and wait until it is available
    async fn create_vpn_connection(&self, resource: &Resource) -> ProviderResult<State> {
        let id = &resource.id;
        let cgw_id = required_str(resource, "customer_gateway_id")?;
        let vpn_type = required_str(resource, "type")?;

        let mut options = VpnConnectionOptionsSpecification::builder();
        if let Some(Value::Bool(static_only)) = resource.attributes.get("static_routes_only") {
            options = options.static_routes_only(*static_only);
        }
        for name in TUNNEL_STARTUP_ACTIONS {
            let action = resource.get_str(name).unwrap_or("add");
            options = options.tunnel_options(
                VpnTunnelOptionsSpecification::builder()
                    .startup_action(action)
                    .build(),
            );
        }

        let mut request = self
            .ec2_client
            .create_vpn_connection()
            .customer_gateway_id(cgw_id)
            .r#type(vpn_type)
            .options(options.build())
            .tag_specifications(tag_specification(Ec2ResourceType::VpnConnection, resource));
        if let Some(tgw_id) = resource.get_str("transit_gateway_id") {
            request = request.transit_gateway_id(tgw_id);
        }
        if let Some(vgw_id) = resource.get_str("vpn_gateway_id") {
            request = request.vpn_gateway_id(vgw_id);
        }

        let output = request.send().await.map_err(|e| {
            api_error("Failed to create VPN connection", &e).for_resource(id.clone())
        })?;
        let vpn_id = output
            .vpn_connection()
            .and_then(|vpn| vpn.vpn_connection_id())
            .ok_or_else(|| {
                ProviderError::new("VPN connection created but no ID returned")
                    .for_resource(id.clone())
            })?
            .to_string();
        debug!("created VPN connection {}, waiting for it", vpn_id);

        self.wait_until_available(id, &vpn_id).await?;
        self.read_vpn_connection(id, Some(&vpn_id)).await
    }

    /// Update tunnel startup actions in place
    ///
    /// Tunnels are addressed by their outside IP; one tunnel is modified at a
    /// time and the connection must be available again before the next.
    async fn update_vpn_connection(
        &self,
        id: &ResourceId,
        vpn_id: &str,
        from: &State,
        to: &Resource,
    ) -> ProviderResult<State> {
        let current = self.read_vpn_connection(id, Some(vpn_id)).await?;
        if !current.exists {
            return Err(ProviderError::new(format!("VPN connection {} not found", vpn_id))
                .for_resource(id.clone()));
        }

        for (i, name) in TUNNEL_STARTUP_ACTIONS.iter().enumerate() {
            let Some(action) = to.get_str(name) else {
                continue;
            };
            if current.attributes.get(*name).and_then(Value::as_str) == Some(action) {
                continue;
            }
            let address_key = format!("tunnel{}_address", i + 1);
            let outside_ip = current
                .attributes
                .get(&address_key)
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    ProviderError::new(format!("{} has no tunnel {} address", vpn_id, i + 1))
                        .for_resource(id.clone())
                })?;

            debug!("setting {} of {} to {}", name, vpn_id, action);
            self.ec2_client
                .modify_vpn_tunnel_options()
                .vpn_connection_id(vpn_id)
                .vpn_tunnel_outside_ip_address(outside_ip)
                .tunnel_options(
                    ModifyVpnTunnelOptionsSpecification::builder()
                        .startup_action(action)
                        .build(),
                )
                .send()
                .await
                .map_err(|e| {
                    api_error("Failed to modify VPN tunnel options", &e).for_resource(id.clone())
                })?;
            self.wait_until_available(id, vpn_id).await?;
        }

        self.reconcile_tags(id, vpn_id, from, to).await?;
        self.read_vpn_connection(id, Some(vpn_id)).await
    }

    /// Delete an EC2 VPN Connection and wait until it is gone
    async fn delete_vpn_connection(&self, id: &ResourceId, vpn_id: &str) -> ProviderResult<()> {
        match self
            .ec2_client
            .delete_vpn_connection()
            .vpn_connection_id(vpn_id)
            .send()
            .await
        {
            Ok(_) => self.wait_until_deleted(id, vpn_id).await,
            Err(e) if is_not_found(&e) => {
                debug!("VPN connection {} already gone", vpn_id);
                Ok(())
            }
            Err(e) => Err(api_error("Failed to delete VPN connection", &e).for_resource(id.clone())),
        }
    }
}

/// Attributes of a transit gateway as recorded in state
fn transit_gateway_attributes(tgw: &TransitGateway) -> HashMap<String, Value> {
    let mut attributes = HashMap::new();
    // An unset description reads back as "", matching `description = ""`
    attributes.insert(
        "description".to_string(),
        Value::String(tgw.description().unwrap_or_default().to_string()),
    );
    let mut insert_str = |name: &str, value: Option<&str>| {
        if let Some(value) = value.filter(|v| !v.is_empty()) {
            attributes.insert(name.to_string(), Value::String(value.to_string()));
        }
    };

    insert_str("arn", tgw.transit_gateway_arn());
    insert_str("owner_id", tgw.owner_id());
    if let Some(options) = tgw.options() {
        insert_str(
            "auto_accept_shared_attachments",
            options.auto_accept_shared_attachments().map(|v| v.as_str()),
        );
        insert_str(
            "default_route_table_association",
            options.default_route_table_association().map(|v| v.as_str()),
        );
        insert_str(
            "default_route_table_propagation",
            options.default_route_table_propagation().map(|v| v.as_str()),
        );
        insert_str("dns_support", options.dns_support().map(|v| v.as_str()));
        insert_str("vpn_ecmp_support", options.vpn_ecmp_support().map(|v| v.as_str()));
        insert_str("multicast_support", options.multicast_support().map(|v| v.as_str()));
        insert_str(
            "association_default_route_table_id",
            options.association_default_route_table_id(),
        );
        insert_str(
            "propagation_default_route_table_id",
            options.propagation_default_route_table_id(),
        );
        if let Some(asn) = options.amazon_side_asn() {
            attributes.insert("amazon_side_asn".to_string(), Value::Int(asn));
        }
    }
    attributes.insert("tags".to_string(), tags_to_value(tgw.tags()));

    attributes
}

fn unknown_type(id: &ResourceId) -> ProviderError {
    ProviderError::new(format!("Unknown resource type: {}", id.resource_type)).for_resource(id.clone())
}

impl Provider for AwsProvider {
    fn name(&self) -> &'static str {
        "aws"
    }

    fn resource_types(&self) -> Vec<Box<dyn ResourceType>> {
        vec![
            Box::new(VpcType),
            Box::new(CustomerGatewayType),
            Box::new(TransitGatewayType),
            Box::new(VpnConnectionType),
        ]
    }

    fn read(
        &self,
        id: &ResourceId,
        identifier: Option<&str>,
    ) -> BoxFuture<'_, ProviderResult<State>> {
        let id = id.clone();
        let identifier = identifier.map(String::from);
        Box::pin(async move {
            let identifier = identifier.as_deref();
            match id.resource_type.as_str() {
                "aws_vpc" => self.read_vpc(&id, identifier).await,
                "aws_customer_gateway" => self.read_customer_gateway(&id, identifier).await,
                "aws_ec2_transit_gateway" => self.read_transit_gateway(&id, identifier).await,
                "aws_vpn_connection" => self.read_vpn_connection(&id, identifier).await,
                _ => Err(unknown_type(&id)),
            }
        })
    }

    fn create(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
        let resource = resource.clone();
        Box::pin(async move {
            match resource.id.resource_type.as_str() {
                "aws_vpc" => self.create_vpc(&resource).await,
                "aws_customer_gateway" => self.create_customer_gateway(&resource).await,
                "aws_ec2_transit_gateway" => self.create_transit_gateway(&resource).await,
                "aws_vpn_connection" => self.create_vpn_connection(&resource).await,
                _ => Err(unknown_type(&resource.id)),
            }
        })
    }

    fn update(
        &self,
        id: &ResourceId,
        identifier: &str,
        from: &State,
        to: &Resource,
    ) -> BoxFuture<'_, ProviderResult<State>> {
        let id = id.clone();
        let identifier = identifier.to_string();
        let from = from.clone();
        let to = to.clone();
        Box::pin(async move {
            match id.resource_type.as_str() {
                "aws_vpc" => self.update_vpc(&id, &identifier, &from, &to).await,
                "aws_customer_gateway" => {
                    self.update_customer_gateway(&id, &identifier, &from, &to)
                        .await
                }
                "aws_ec2_transit_gateway" => {
                    self.update_transit_gateway(&id, &identifier, &from, &to)
                        .await
                }
                "aws_vpn_connection" => {
                    self.update_vpn_connection(&id, &identifier, &from, &to)
                        .await
                }
                _ => Err(unknown_type(&id)),
            }
        })
    }

    fn delete(&self, id: &ResourceId, identifier: &str) -> BoxFuture<'_, ProviderResult<()>> {
        let id = id.clone();
        let identifier = identifier.to_string();
        Box::pin(async move {
            match id.resource_type.as_str() {
                "aws_vpc" => self.delete_vpc(&id, &identifier).await,
                "aws_customer_gateway" => self.delete_customer_gateway(&id, &identifier).await,
                "aws_ec2_transit_gateway" => self.delete_transit_gateway(&id, &identifier).await,
                "aws_vpn_connection" => self.delete_vpn_connection(&id, &identifier).await,
                _ => Err(unknown_type(&id)),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vpnlab_core::provider::schemas_of;

    fn offline_provider() -> AwsProvider {
        let config = aws_sdk_ec2::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("ap-northeast-1"))
            .build();
        AwsProvider::with_client(Ec2Client::from_conf(config), "ap-northeast-1".to_string())
    }

    #[test]
    fn test_resource_type_names() {
        let provider = offline_provider();
        let names: Vec<&str> = provider.resource_types().iter().map(|t| t.name()).collect();
        assert_eq!(
            names,
            vec![
                "aws_vpc",
                "aws_customer_gateway",
                "aws_ec2_transit_gateway",
                "aws_vpn_connection"
            ]
        );
        assert_eq!(provider.region(), "ap-northeast-1");
    }

    #[test]
    fn test_schemas_match_type_names() {
        let schemas = schemas_of(&offline_provider());
        assert_eq!(schemas.len(), 4);
        for (name, schema) in &schemas {
            assert_eq!(name, &schema.resource_type);
            assert!(schema.attributes.contains_key("id"), "{} lacks id", name);
        }
    }

    #[tokio::test]
    async fn test_unknown_resource_type() {
        let provider = offline_provider();
        let id = ResourceId::new("aws_s3_bucket", "logs");

        let err = provider.read(&id, None).await.unwrap_err();
        assert_eq!(err.to_string(), "[aws_s3_bucket.logs] Unknown resource type: aws_s3_bucket");

        let err = provider.delete(&id, "logs").await.unwrap_err();
        assert_eq!(err.resource_id, Some(id));
    }

    #[test]
    fn test_wait_config_default() {
        let wait = WaitConfig::default();
        assert_eq!(wait.max_attempts, 120);
        assert_eq!(wait.delay, Duration::from_secs(10));

        let provider = offline_provider().with_wait_config(WaitConfig {
            max_attempts: 1,
            delay: Duration::from_millis(1),
        });
        assert_eq!(provider.wait.max_attempts, 1);
    }

    #[test]
    fn test_empty_transit_gateway_description_is_stable() {
        use aws_sdk_ec2::types::TransitGatewayOptions;
        use vpnlab_core::differ::{Diff, diff};

        let id = ResourceId::new("aws_ec2_transit_gateway", "hub");
        let desired = Resource::new("aws_ec2_transit_gateway", "hub")
            .with_attribute("description", Value::String(String::new()))
            .with_attribute("vpn_ecmp_support", Value::String("enable".to_string()));

        // EC2 returns either an empty string or nothing for an unset description
        for returned in [Some(""), None] {
            let tgw = TransitGateway::builder()
                .transit_gateway_id("tgw-0abc")
                .set_description(returned.map(str::to_string))
                .options(
                    TransitGatewayOptions::builder()
                        .amazon_side_asn(64512)
                        .vpn_ecmp_support(VpnEcmpSupportValue::Enable)
                        .build(),
                )
                .build();
            let attributes = transit_gateway_attributes(&tgw);
            assert_eq!(
                attributes.get("description"),
                Some(&Value::String(String::new()))
            );
            assert_eq!(attributes.get("amazon_side_asn"), Some(&Value::Int(64512)));

            let current = State::existing(id.clone(), attributes).with_identifier("tgw-0abc");
            let schema = schemas::vpn::transit_gateway_schema();
            assert_eq!(
                diff(&desired, &current, Some(&schema)),
                Diff::NoChange(id.clone())
            );
        }
    }
}
