//! pnet-based live capture.

use std::io::ErrorKind;
use std::time::Duration;

use chrono::Utc;
use pnet::datalink::{self, Channel, Config, DataLinkReceiver, NetworkInterface};

use super::{CaptureSource, Frame, ReadOutcome};
use crate::domain::LinkType;
use crate::error::CaptureError;

/// Read timeout of the datalink channel; bounds how long a stop request waits.
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Live capture on one interface through a pnet Ethernet channel.
pub struct PnetCapture {
    interface: NetworkInterface,
    rx: Box<dyn DataLinkReceiver>,
    snaplen: usize,
}

impl PnetCapture {
    /// Open a capture channel on the named interface.
    pub fn open(
        interface_name: &str,
        snaplen: usize,
        buffer_size: usize,
    ) -> Result<Self, CaptureError> {
        let interface = datalink::interfaces()
            .into_iter()
            .find(|iface| iface.name == interface_name)
            .ok_or_else(|| CaptureError::InterfaceNotFound(interface_name.to_string()))?;

        let config = Config {
            read_timeout: Some(READ_TIMEOUT),
            read_buffer_size: buffer_size,
            promiscuous: true,
            ..Config::default()
        };

        let rx = match datalink::channel(&interface, config) {
            Ok(Channel::Ethernet(_tx, rx)) => rx,
            Ok(_) => {
                return Err(CaptureError::ChannelCreation(
                    "unsupported channel type".to_string(),
                ))
            }
            Err(e) => {
                let msg = e.to_string();
                if e.kind() == ErrorKind::PermissionDenied
                    || msg.contains("permission")
                    || msg.contains("Operation not permitted")
                {
                    return Err(CaptureError::InsufficientPermissions);
                }
                return Err(CaptureError::ChannelCreation(msg));
            }
        };

        tracing::info!("Capturing on {}", interface.name);

        Ok(Self {
            interface,
            rx,
            snaplen,
        })
    }

    /// List all available network interfaces.
    pub fn list_interfaces() -> Vec<String> {
        datalink::interfaces()
            .into_iter()
            .map(|iface| {
                let status = if iface.is_up() { "UP" } else { "DOWN" };
                let ips: Vec<_> = iface.ips.iter().map(|ip| ip.to_string()).collect();
                format!(
                    "{}: {} [{}]",
                    iface.name,
                    status,
                    if ips.is_empty() {
                        "no IP".to_string()
                    } else {
                        ips.join(", ")
                    }
                )
            })
            .collect()
    }
}

impl CaptureSource for PnetCapture {
    fn name(&self) -> &str {
        &self.interface.name
    }

    fn link_type(&self) -> LinkType {
        LinkType::Ethernet
    }

    fn next_frame(&mut self) -> Result<ReadOutcome, CaptureError> {
        match self.rx.next() {
            Ok(data) => {
                let len = data.len().min(self.snaplen);
                Ok(ReadOutcome::Frame(Frame::new(Utc::now(), data[..len].to_vec())))
            }
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                Ok(ReadOutcome::Timeout)
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => Ok(ReadOutcome::Timeout),
            Err(e) => Err(CaptureError::Read(e.to_string())),
        }
    }
}
