//! Linux packet capture using a raw `AF_PACKET` socket.
//!
//! The socket is bound to a single interface and receives every frame in
//! both directions. `MSG_TRUNC` makes `recv` report the full frame length
//! even when the frame is larger than the buffer, so accounting never
//! undercounts. Opening requires `CAP_NET_RAW` (or root).

use std::ffi::CString;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::time::Duration;

use anyhow::{Context, Result};

use crate::capture::{CaptureBackend, PacketSource};
use crate::config::{CAPTURE_BUFFER_LEN, CAPTURE_READ_TIMEOUT_MS};

const SYS_CLASS_NET: &str = "/sys/class/net";

/// Enumerates interfaces from sysfs and opens packet sockets on them.
pub struct PacketSocketBackend {
    read_timeout: Duration,
}

impl Default for PacketSocketBackend {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_millis(CAPTURE_READ_TIMEOUT_MS),
        }
    }
}

impl CaptureBackend for PacketSocketBackend {
    fn name(&self) -> &'static str {
        "af_packet"
    }

    fn list_interfaces(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(SYS_CLASS_NET)
            .with_context(|| format!("Couldn't create device list from {SYS_CLASS_NET}"))?
        {
            let entry = entry?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    fn open(&self, interface: &str) -> Result<Box<dyn PacketSource>> {
        let socket = PacketSocket::open(interface, self.read_timeout)?;
        Ok(Box::new(socket))
    }
}

/// A raw socket bound to one interface.
pub struct PacketSocket {
    fd: OwnedFd,
    buf: Vec<u8>,
}

impl PacketSocket {
    pub fn open(interface: &str, read_timeout: Duration) -> Result<Self> {
        let c_name = CString::new(interface).context("interface name contains a NUL byte")?;
        // SAFETY: c_name is a valid NUL-terminated string for the duration of the call.
        let ifindex = unsafe { libc::if_nametoindex(c_name.as_ptr()) };
        if ifindex == 0 {
            return Err(io::Error::last_os_error())
                .with_context(|| format!("Couldn't open device {interface}"));
        }

        let protocol = (libc::ETH_P_ALL as u16).to_be();

        // SAFETY: plain socket(2) call; the result is checked before use.
        let raw = unsafe {
            libc::socket(
                libc::AF_PACKET,
                libc::SOCK_RAW | libc::SOCK_CLOEXEC,
                libc::c_int::from(protocol),
            )
        };
        if raw < 0 {
            return Err(io::Error::last_os_error()).with_context(|| {
                format!("Couldn't open device {interface}: raw capture needs CAP_NET_RAW")
            });
        }
        // SAFETY: raw is a freshly created, owned file descriptor.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        // SAFETY: sockaddr_ll is plain old data; all-zero is a valid starting value.
        let mut addr: libc::sockaddr_ll = unsafe { std::mem::zeroed() };
        addr.sll_family = libc::AF_PACKET as libc::c_ushort;
        addr.sll_protocol = protocol;
        addr.sll_ifindex = ifindex as libc::c_int;

        // SAFETY: addr outlives the call and the length matches its type.
        let rc = unsafe {
            libc::bind(
                fd.as_raw_fd(),
                &addr as *const libc::sockaddr_ll as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error())
                .with_context(|| format!("Couldn't bind capture socket to {interface}"));
        }

        let timeout = libc::timeval {
            tv_sec: read_timeout.as_secs() as libc::time_t,
            tv_usec: read_timeout.subsec_micros() as libc::suseconds_t,
        };
        // SAFETY: timeout outlives the call and the length matches its type.
        let rc = unsafe {
            libc::setsockopt(
                fd.as_raw_fd(),
                libc::SOL_SOCKET,
                libc::SO_RCVTIMEO,
                &timeout as *const libc::timeval as *const libc::c_void,
                std::mem::size_of::<libc::timeval>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error()).context("Couldn't set capture read timeout");
        }

        tracing::info!("Packet socket opened on {interface} (ifindex {ifindex})");
        Ok(Self {
            fd,
            buf: vec![0u8; CAPTURE_BUFFER_LEN],
        })
    }
}

impl PacketSource for PacketSocket {
    fn next_packet(&mut self) -> Result<Option<u32>> {
        // SAFETY: buf is a live, writable allocation of buf.len() bytes.
        let n = unsafe {
            libc::recv(
                self.fd.as_raw_fd(),
                self.buf.as_mut_ptr() as *mut libc::c_void,
                self.buf.len(),
                libc::MSG_TRUNC,
            )
        };
        if n >= 0 {
            return Ok(Some(u32::try_from(n).unwrap_or(u32::MAX)));
        }

        let err = io::Error::last_os_error();
        match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted => {
                Ok(None)
            }
            _ => Err(err).context("recv on packet socket failed"),
        }
    }
}
