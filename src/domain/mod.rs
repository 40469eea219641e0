//! Domain models for the capture pipeline.
//!
//! These types are independent of capture backends and output formats.

mod dhcp;
mod event;
mod flow;
mod link;
mod packet;

pub use dhcp::{hardware_type_name, option_name, DhcpMessageType, DhcpOption, DhcpPacket};
pub use event::{Endpoint, ProtocolEvent, Role, Status};
pub use flow::{Direction, FlowKey};
pub use link::LinkType;
pub use packet::{ip_protocols, IpFamily, IpPortTuple, Packet, TcpFlags, Transport};
