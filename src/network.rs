//! Network primitives for VPCs
//!
//! Provides:
//! - Link operations via iproute2
//! - VPC bridge management
//! - Veth pairs for subnets and peering
//! - Subnet namespace configuration
//! - Address allocation

pub mod bridge;
pub mod ip;
pub mod link;
pub mod netns;
pub mod veth;

pub use bridge::Bridge;
pub use ip::SubnetAddressing;
pub use netns::Namespace;
pub use veth::VethPair;
