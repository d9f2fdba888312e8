use pcap::{Active, Capture, Device};

use super::{CaptureBackend, CaptureError, CaptureHandle, DeviceInfo, FilterSpec, StopSignal};
use crate::config::CaptureConfig;
use crate::packet::{LinkKind, Packet};

/// Live capture through libpcap.
#[derive(Debug, Clone, Copy, Default)]
pub struct PcapBackend;

impl CaptureBackend for PcapBackend {
    fn open(
        &self,
        device: &str,
        config: &CaptureConfig,
    ) -> Result<Box<dyn CaptureHandle>, CaptureError> {
        let open_error = |e: pcap::Error| CaptureError::Open {
            device: device.to_string(),
            message: e.to_string(),
        };
        let capture = Capture::from_device(Device::from(device))
            .map_err(open_error)?
            .promisc(config.promiscuous)
            .snaplen(config.snaplen)
            .timeout(config.timeout_ms)
            .immediate_mode(true)
            .open()
            .map_err(open_error)?;
        let link = LinkKind::from_code(capture.get_datalink().0);
        log::info!("capture opened on {device} ({link:?})");
        Ok(Box::new(LiveHandle { capture, link }))
    }
}

struct LiveHandle {
    capture: Capture<Active>,
    link: LinkKind,
}

impl CaptureHandle for LiveHandle {
    fn apply_filter(&mut self, filter: &FilterSpec) -> Result<(), CaptureError> {
        if let Some(netmask) = filter.netmask {
            log::debug!("netmask {netmask} recorded; libpcap uses the device netmask");
        }
        self.capture
            .filter(&filter.expression, true)
            .map_err(|e| CaptureError::Filter {
                expression: filter.expression.clone(),
                message: e.to_string(),
            })?;
        log::debug!("applied filter: {}", filter.expression);
        Ok(())
    }

    fn run_loop(
        &mut self,
        stop: &StopSignal,
        deliver: &mut dyn FnMut(Packet),
    ) -> Result<(), CaptureError> {
        while !stop.is_stopped() {
            match self.capture.next_packet() {
                Ok(packet) => {
                    let ts = packet.header.ts.tv_sec as f64 + packet.header.ts.tv_usec as f64 * 1e-6;
                    let packet = Packet::from_frame(self.link, Some(ts), packet.data.to_vec());
                    deliver(packet);
                }
                Err(pcap::Error::TimeoutExpired) => continue,
                Err(pcap::Error::NoMorePackets) => return Ok(()),
                Err(e) => return Err(CaptureError::Loop(e.to_string())),
            }
        }
        Ok(())
    }
}

/// Enumerate capture devices.
pub fn list_devices() -> Result<Vec<DeviceInfo>, CaptureError> {
    let devices = Device::list().map_err(|e| CaptureError::Devices(e.to_string()))?;
    Ok(devices
        .into_iter()
        .map(|dev| DeviceInfo {
            loopback: dev.flags.is_loopback(),
            addresses: dev.addresses.iter().map(|address| address.addr).collect(),
            name: dev.name,
            description: dev.desc,
        })
        .collect())
}
