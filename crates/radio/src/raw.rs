//! Frame injection over `AF_PACKET` raw sockets.
//!
//! One socket per monitor-mode adapter, bound to the interface by
//! index and hardware address. The send timeout is short on purpose: a
//! wedged driver must stall the link loop for milliseconds, not
//! forever. An interface whose send fails is disabled for the life of
//! the process; diversity transmit keeps going on the rest.

use std::ffi::CString;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

use bytes::{BufMut, BytesMut};
use rovercast_core::headers::{build_header, frame_kind_for, min_payload, PAD_BYTE};
use rovercast_core::{Chipset, HeaderOptions};

use crate::discovery;
use crate::tx::FrameSink;
use crate::RadioError;

const SEND_TIMEOUT_US: libc::suseconds_t = 8000;
const SEND_BUFFER_BYTES: libc::c_int = 128 * 1024;

pub struct Injector {
    fd: OwnedFd,
    ifname: String,
    chipset: Chipset,
    preamble: Vec<u8>,
    min_payload: usize,
    healthy: bool,
}

impl Injector {
    /// Opens a raw socket on one adapter and precomputes the preamble
    /// for the given stream port.
    pub fn open(ifname: &str, port: u8, opts: &HeaderOptions) -> Result<Self, RadioError> {
        let chipset = discovery::classify(ifname)?;
        let kind = frame_kind_for(chipset, opts.use_cts);
        let preamble = build_header(chipset, kind, port, opts)?;

        let c_ifname = CString::new(ifname)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "bad interface name"))?;

        let fd = unsafe {
            let raw = libc::socket(libc::AF_PACKET, libc::SOCK_RAW, 0);
            if raw < 0 {
                return Err(io::Error::last_os_error().into());
            }
            OwnedFd::from_raw_fd(raw)
        };

        unsafe {
            let ifindex = libc::if_nametoindex(c_ifname.as_ptr());
            if ifindex == 0 {
                return Err(io::Error::last_os_error().into());
            }

            let mut ifr: libc::ifreq = std::mem::zeroed();
            for (dst, src) in ifr.ifr_name.iter_mut().zip(c_ifname.as_bytes_with_nul()) {
                *dst = *src as libc::c_char;
            }
            if libc::ioctl(fd.as_raw_fd(), libc::SIOCGIFHWADDR, &mut ifr) < 0 {
                return Err(io::Error::last_os_error().into());
            }

            let mut addr: libc::sockaddr_ll = std::mem::zeroed();
            addr.sll_family = libc::AF_PACKET as libc::sa_family_t;
            addr.sll_ifindex = ifindex as libc::c_int;
            addr.sll_halen = 6;
            for i in 0..6 {
                addr.sll_addr[i] = ifr.ifr_ifru.ifru_hwaddr.sa_data[i] as u8;
            }
            let rc = libc::bind(
                fd.as_raw_fd(),
                std::ptr::addr_of!(addr).cast(),
                std::mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            );
            if rc < 0 {
                return Err(io::Error::last_os_error().into());
            }

            let timeout = libc::timeval {
                tv_sec: 0,
                tv_usec: SEND_TIMEOUT_US,
            };
            if libc::setsockopt(
                fd.as_raw_fd(),
                libc::SOL_SOCKET,
                libc::SO_SNDTIMEO,
                std::ptr::addr_of!(timeout).cast(),
                std::mem::size_of::<libc::timeval>() as libc::socklen_t,
            ) < 0
            {
                return Err(io::Error::last_os_error().into());
            }
            let sndbuf = SEND_BUFFER_BYTES;
            if libc::setsockopt(
                fd.as_raw_fd(),
                libc::SOL_SOCKET,
                libc::SO_SNDBUF,
                std::ptr::addr_of!(sndbuf).cast(),
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            ) < 0
            {
                return Err(io::Error::last_os_error().into());
            }
        }

        log::info!("injecting on {ifname} ({chipset:?})");
        Ok(Self {
            fd,
            ifname: ifname.to_string(),
            chipset,
            min_payload: min_payload(chipset),
            preamble,
            healthy: true,
        })
    }

    pub fn ifname(&self) -> &str {
        &self.ifname
    }

    pub fn chipset(&self) -> Chipset {
        self.chipset
    }

    fn send(&mut self, frame: &[u8]) -> io::Result<()> {
        let rc = unsafe { libc::send(self.fd.as_raw_fd(), frame.as_ptr().cast(), frame.len(), 0) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

/// Diversity transmit across every opened adapter.
pub struct InjectorSet {
    injectors: Vec<Injector>,
    scratch: BytesMut,
}

impl InjectorSet {
    /// Opens every wireless interface on the system.
    pub fn open_all(port: u8, opts: &HeaderOptions) -> Result<Self, RadioError> {
        let names = discovery::list_wireless_interfaces()?;
        if names.is_empty() {
            return Err(RadioError::NoInterfaces);
        }
        Self::open_named(&names, port, opts)
    }

    pub fn open_named(names: &[String], port: u8, opts: &HeaderOptions) -> Result<Self, RadioError> {
        let mut injectors = Vec::with_capacity(names.len());
        for name in names {
            injectors.push(Injector::open(name, port, opts)?);
        }
        if injectors.is_empty() {
            return Err(RadioError::NoInterfaces);
        }
        Ok(Self {
            injectors,
            scratch: BytesMut::with_capacity(2048),
        })
    }

    pub fn healthy_count(&self) -> usize {
        self.injectors.iter().filter(|i| i.healthy).count()
    }
}

impl FrameSink for InjectorSet {
    fn send_frame(&mut self, payload: &[u8]) -> Result<(), RadioError> {
        let Self { injectors, scratch } = self;
        let mut sent = 0usize;
        for injector in injectors.iter_mut().filter(|i| i.healthy) {
            scratch.clear();
            scratch.put_slice(&injector.preamble);
            scratch.put_slice(payload);
            for _ in payload.len()..injector.min_payload {
                scratch.put_u8(PAD_BYTE);
            }
            match injector.send(scratch) {
                Ok(()) => sent += 1,
                Err(e) => {
                    log::error!("send on {} failed, disabling it: {e}", injector.ifname);
                    injector.healthy = false;
                }
            }
        }
        if sent == 0 {
            return Err(RadioError::AllInterfacesDown);
        }
        Ok(())
    }
}
