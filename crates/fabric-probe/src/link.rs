//! Link-state prober
//!
//! Reads interface flags with `SIOCGIFFLAGS`. An interface counts as
//! reachable only when it is administratively up (`IFF_UP`) and has carrier
//! (`IFF_RUNNING`).

use crate::netns::run_blocking;
use crate::Prober;
use async_trait::async_trait;
use fabric_core_liveness::{CheckSpec, ProbeResult};
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::time::Instant;
use tracing::debug;

/// Interface operational-state backend
#[derive(Debug, Clone, Default)]
pub struct LinkStateProber;

impl LinkStateProber {
    /// Create a link-state prober
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Prober for LinkStateProber {
    async fn probe(&self, spec: &CheckSpec) -> ProbeResult {
        let interface = spec.target.clone();
        let started = Instant::now();
        let outcome = run_blocking(spec.namespace(), move || interface_flags(&interface)).await;

        match outcome {
            Ok(flags) if is_link_up(flags) => ProbeResult::reachable(
                &spec.entity_id,
                started.elapsed().as_secs_f64() * 1000.0,
            ),
            Ok(flags) => {
                debug!(
                    "{}: interface {} not up (flags {:#x})",
                    spec.entity_id, spec.target, flags
                );
                ProbeResult::unreachable(&spec.entity_id)
            }
            Err(e) => {
                debug!(
                    "{}: cannot read interface {}: {}",
                    spec.entity_id, spec.target, e
                );
                ProbeResult::unreachable(&spec.entity_id)
            }
        }
    }
}

/// Both administratively and operationally up
pub fn is_link_up(flags: i32) -> bool {
    flags & libc::IFF_UP != 0 && flags & libc::IFF_RUNNING != 0
}

/// Interface flags of `name` in the calling thread's namespace
pub fn interface_flags(name: &str) -> io::Result<i32> {
    if name.is_empty() || name.len() >= libc::IFNAMSIZ || name.contains('\0') {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid interface name: {:?}", name),
        ));
    }

    // SAFETY: plain socket(2) call; the descriptor is checked before use.
    let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM | libc::SOCK_CLOEXEC, 0) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: `fd` is a freshly opened descriptor nobody else owns.
    let socket = unsafe { OwnedFd::from_raw_fd(fd) };

    // SAFETY: an all-zero ifreq is a valid value.
    let mut request: libc::ifreq = unsafe { mem::zeroed() };
    for (slot, byte) in request.ifr_name.iter_mut().zip(name.bytes()) {
        *slot = byte as libc::c_char;
    }

    // SAFETY: `request` is a valid ifreq with a NUL-terminated name.
    let rc = unsafe {
        libc::ioctl(
            socket.as_raw_fd(),
            libc::SIOCGIFFLAGS as _,
            &mut request as *mut libc::ifreq,
        )
    };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }

    // SAFETY: SIOCGIFFLAGS fills the flags member of the union.
    Ok(unsafe { request.ifr_ifru.ifru_flags } as i32)
}
