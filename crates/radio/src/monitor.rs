//! Monitor-mode capture via libpcap.
//!
//! One capture handle per adapter, filtered in the kernel down to the
//! three frame shapes we inject plus the one-byte port match, so the
//! process never sees unrelated wifi traffic. A set of monitors is
//! multiplexed with `poll(2)`; capture errors disable the adapter the
//! same way injection errors do.

use std::os::fd::{AsRawFd, RawFd};
use std::time::Duration;

use pcap::{Active, Capture, Linktype};
use rovercast_core::headers::{antenna_signal_dbm, parse_header};
use rovercast_core::{encode_port, Chipset, MAX_MTU};

use crate::discovery;
use crate::rx::RxFrame;
use crate::RadioError;

fn port_filter(port: u8) -> String {
    // short data, full data, or the R/C RTS variant, all with our
    // encoded port as the first RA byte
    format!(
        "(ether[0x00:2] == 0x0801 || ether[0x00:2] == 0x0802 || ether[0x00:4] == 0xb4010000) \
         && ether[0x04:1] == {:#04x}",
        encode_port(port)
    )
}

pub struct Monitor {
    cap: Capture<Active>,
    fd: RawFd,
    ifname: String,
    chipset: Chipset,
    healthy: bool,
    bad_frame_cnt: u32,
}

impl Monitor {
    pub fn open(ifname: &str, port: u8) -> Result<Self, RadioError> {
        let chipset = discovery::classify(ifname)?;
        let cap = Capture::from_device(ifname)?
            .snaplen(MAX_MTU as i32)
            .timeout(-1)
            .open()?;
        if cap.get_datalink() != Linktype::IEEE802_11_RADIOTAP {
            return Err(RadioError::NotMonitorMode(ifname.to_string()));
        }
        let mut cap = cap.setnonblock()?;
        cap.filter(&port_filter(port), true)?;
        let fd = cap.as_raw_fd();

        log::info!("listening on {ifname} ({chipset:?}), port {port}");
        Ok(Self {
            cap,
            fd,
            ifname: ifname.to_string(),
            chipset,
            healthy: true,
            bad_frame_cnt: 0,
        })
    }

    pub fn ifname(&self) -> &str {
        &self.ifname
    }

    pub fn chipset(&self) -> Chipset {
        self.chipset
    }

    /// Frames dropped because their headers would not parse.
    pub fn bad_frame_cnt(&self) -> u32 {
        self.bad_frame_cnt
    }

    /// Reads and parses one frame, if the handle has one buffered.
    fn read_one(&mut self, adapter: usize) -> Result<Option<RxFrame>, RadioError> {
        let data = match self.cap.next_packet() {
            Ok(packet) => packet.data.to_vec(),
            Err(pcap::Error::TimeoutExpired) | Err(pcap::Error::NoMorePackets) => return Ok(None),
            Err(e) => {
                log::error!("capture on {} failed, disabling it: {e}", self.ifname);
                self.healthy = false;
                return Ok(None);
            }
        };

        let parsed = match parse_header(&data) {
            Ok(parsed) => parsed,
            Err(e) => {
                log::debug!("dropping unparseable frame on {}: {e}", self.ifname);
                self.bad_frame_cnt = self.bad_frame_cnt.wrapping_add(1);
                return Ok(None);
            }
        };
        let dbm = antenna_signal_dbm(&data);
        Ok(Some(RxFrame {
            payload: data[parsed.header_len..].to_vec(),
            dbm,
            adapter,
        }))
    }
}

pub struct MonitorSet {
    monitors: Vec<Monitor>,
}

impl MonitorSet {
    /// Opens every wireless interface on the system.
    pub fn open_all(port: u8) -> Result<Self, RadioError> {
        let names = discovery::list_wireless_interfaces()?;
        if names.is_empty() {
            return Err(RadioError::NoInterfaces);
        }
        Self::open_named(&names, port)
    }

    pub fn open_named(names: &[String], port: u8) -> Result<Self, RadioError> {
        let mut monitors = Vec::with_capacity(names.len());
        for name in names {
            monitors.push(Monitor::open(name, port)?);
        }
        if monitors.is_empty() {
            return Err(RadioError::NoInterfaces);
        }
        Ok(Self { monitors })
    }

    pub fn monitors(&self) -> &[Monitor] {
        &self.monitors
    }

    /// Waits up to `timeout` for any adapter to become readable and
    /// returns the first frame found. `Ok(None)` means the timeout
    /// passed quietly, which is the moment for the caller to tick its
    /// status windows.
    pub fn poll(&mut self, timeout: Duration) -> Result<Option<RxFrame>, RadioError> {
        let live: Vec<usize> = (0..self.monitors.len())
            .filter(|&i| self.monitors[i].healthy)
            .collect();
        if live.is_empty() {
            return Err(RadioError::AllInterfacesDown);
        }

        let mut fds: Vec<libc::pollfd> = live
            .iter()
            .map(|&i| libc::pollfd {
                fd: self.monitors[i].fd,
                events: libc::POLLIN,
                revents: 0,
            })
            .collect();

        let rc = unsafe {
            libc::poll(
                fds.as_mut_ptr(),
                fds.len() as libc::nfds_t,
                timeout.as_millis() as libc::c_int,
            )
        };
        if rc < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                return Ok(None);
            }
            return Err(err.into());
        }
        if rc == 0 {
            return Ok(None);
        }

        for (slot, &adapter) in fds.iter().zip(&live) {
            if slot.revents & libc::POLLIN != 0 {
                if let Some(frame) = self.monitors[adapter].read_one(adapter)? {
                    return Ok(Some(frame));
                }
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_matches_encoded_port() {
        let f = port_filter(30);
        assert!(f.contains("ether[0x04:1] == 0x3d")); // (30*2)+1 = 61
        assert!(f.contains("0xb4010000"));
    }
}
