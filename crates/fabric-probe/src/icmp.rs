//! ICMP echo prober
//!
//! Sends one echo request over a raw IPv4 socket and waits for the matching
//! reply until the timeout. Anything else that arrives on the socket
//! (replies to other probes, unrelated ICMP, truncated packets) is skipped.

use crate::netns::run_blocking;
use crate::Prober;
use async_trait::async_trait;
use fabric_core_liveness::{CheckSpec, ProbeKind, ProbeResult, ICMP_TIMEOUT_MS};
use std::io;
use std::mem;
use std::net::Ipv4Addr;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

const ICMP_ECHO_REQUEST: u8 = 8;
const ICMP_ECHO_REPLY: u8 = 0;
const ICMP_HEADER_LEN: usize = 8;
const IPV4_MIN_HEADER_LEN: usize = 20;
const PAYLOAD: &[u8] = b"fabric-liveness-probe";

static SEQUENCE: AtomicU16 = AtomicU16::new(0);

/// Raw-socket ICMP echo backend
#[derive(Debug, Clone)]
pub struct IcmpProber {
    identifier: u16,
    timeout: Duration,
}

impl IcmpProber {
    /// Prober with the standard 1000 ms reply timeout
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_millis(ICMP_TIMEOUT_MS))
    }

    /// Prober waiting at most `timeout` for each reply
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            identifier: rand::random(),
            timeout,
        }
    }
}

impl Default for IcmpProber {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Prober for IcmpProber {
    async fn probe(&self, spec: &CheckSpec) -> ProbeResult {
        let Ok(target) = spec.target.parse::<Ipv4Addr>() else {
            debug!("{}: invalid ICMP target {:?}", spec.entity_id, spec.target);
            return ProbeResult::unreachable(&spec.entity_id);
        };
        let source = if spec.source.is_empty() {
            None
        } else {
            match spec.source.parse::<Ipv4Addr>() {
                Ok(source) => Some(source),
                Err(_) => {
                    debug!("{}: invalid ICMP source {:?}", spec.entity_id, spec.source);
                    return ProbeResult::unreachable(&spec.entity_id);
                }
            }
        };
        let namespace = match spec.probe {
            ProbeKind::IcmpInNamespace => spec.namespace(),
            _ => None,
        };

        let identifier = self.identifier;
        let sequence = SEQUENCE.fetch_add(1, Ordering::Relaxed);
        let timeout = self.timeout;
        let outcome = run_blocking(namespace, move || {
            echo(source, target, identifier, sequence, timeout)
        })
        .await;

        match outcome {
            Ok(rtt) => ProbeResult::reachable(&spec.entity_id, rtt.as_secs_f64() * 1000.0),
            Err(e) => {
                debug!("{}: ping {} failed: {}", spec.entity_id, target, e);
                ProbeResult::unreachable(&spec.entity_id)
            }
        }
    }
}

fn echo(
    source: Option<Ipv4Addr>,
    target: Ipv4Addr,
    identifier: u16,
    sequence: u16,
    timeout: Duration,
) -> io::Result<Duration> {
    let socket = RawIcmpSocket::open()?;
    if let Some(source) = source {
        socket.bind(source)?;
    }

    let request = build_echo_request(identifier, sequence, PAYLOAD);
    let started = Instant::now();
    socket.send_to(&request, target)?;

    await_reply(
        |buf, wait| {
            socket.set_read_timeout(wait)?;
            socket.recv_from(buf)
        },
        target,
        identifier,
        sequence,
        started + timeout,
    )?;
    Ok(started.elapsed())
}

/// Read packets through `recv` until the echo reply from `target` arrives
///
/// `recv` gets the buffer and the time left before `deadline`. Packets from
/// other hosts, other probes or in any malformed shape are skipped, as are
/// timeouts and interrupts short of the deadline. Other receive errors end
/// the wait.
fn await_reply<R>(
    mut recv: R,
    target: Ipv4Addr,
    identifier: u16,
    sequence: u16,
    deadline: Instant,
) -> io::Result<()>
where
    R: FnMut(&mut [u8], Duration) -> io::Result<(usize, Ipv4Addr)>,
{
    let mut buf = [0u8; 1500];
    loop {
        let now = Instant::now();
        if now >= deadline {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no echo reply"));
        }

        let (len, from) = match recv(&mut buf, deadline - now) {
            Ok(received) => received,
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) =>
            {
                continue
            }
            Err(e) => return Err(e),
        };

        if from == target && parse_echo_reply(&buf[..len], identifier, sequence) {
            return Ok(());
        }
    }
}

/// RFC 1071 internet checksum
pub fn checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = data
        .chunks(2)
        .map(|pair| match pair {
            [hi, lo] => u16::from_be_bytes([*hi, *lo]) as u32,
            [hi] => u16::from_be_bytes([*hi, 0]) as u32,
            _ => 0,
        })
        .sum();
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

/// Build an ICMP echo request (type 8) with a valid checksum
pub fn build_echo_request(identifier: u16, sequence: u16, payload: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(ICMP_HEADER_LEN + payload.len());
    packet.extend_from_slice(&[ICMP_ECHO_REQUEST, 0, 0, 0]);
    packet.extend_from_slice(&identifier.to_be_bytes());
    packet.extend_from_slice(&sequence.to_be_bytes());
    packet.extend_from_slice(payload);

    let sum = checksum(&packet);
    packet[2..4].copy_from_slice(&sum.to_be_bytes());
    packet
}

/// Whether `packet` (IPv4 header included) is the echo reply we wait for
///
/// Malformed input of any shape returns `false`.
pub fn parse_echo_reply(packet: &[u8], identifier: u16, sequence: u16) -> bool {
    if packet.len() < IPV4_MIN_HEADER_LEN || packet[0] >> 4 != 4 {
        return false;
    }
    let header_len = (packet[0] & 0x0f) as usize * 4;
    if header_len < IPV4_MIN_HEADER_LEN || packet.len() < header_len + ICMP_HEADER_LEN {
        return false;
    }
    if packet[9] != libc::IPPROTO_ICMP as u8 {
        return false;
    }

    let icmp = &packet[header_len..];
    icmp[0] == ICMP_ECHO_REPLY
        && icmp[1] == 0
        && checksum(icmp) == 0
        && u16::from_be_bytes([icmp[4], icmp[5]]) == identifier
        && u16::from_be_bytes([icmp[6], icmp[7]]) == sequence
}

struct RawIcmpSocket {
    fd: OwnedFd,
}

impl RawIcmpSocket {
    fn open() -> io::Result<Self> {
        // SAFETY: plain socket(2) call; the descriptor is checked before use.
        let fd = unsafe {
            libc::socket(
                libc::AF_INET,
                libc::SOCK_RAW | libc::SOCK_CLOEXEC,
                libc::IPPROTO_ICMP,
            )
        };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: `fd` is a freshly opened descriptor nobody else owns.
        Ok(Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }

    fn bind(&self, address: Ipv4Addr) -> io::Result<()> {
        let sockaddr = sockaddr_in(address);
        // SAFETY: `sockaddr` is a valid sockaddr_in for the duration of the call.
        let rc = unsafe {
            libc::bind(
                self.fd.as_raw_fd(),
                &sockaddr as *const libc::sockaddr_in as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
            )
        };
        check(rc)
    }

    fn send_to(&self, packet: &[u8], target: Ipv4Addr) -> io::Result<()> {
        let sockaddr = sockaddr_in(target);
        // SAFETY: buffer and address are valid for the duration of the call.
        let sent = unsafe {
            libc::sendto(
                self.fd.as_raw_fd(),
                packet.as_ptr() as *const libc::c_void,
                packet.len(),
                0,
                &sockaddr as *const libc::sockaddr_in as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
            )
        };
        if sent < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn set_read_timeout(&self, timeout: Duration) -> io::Result<()> {
        // A zero timeval would block forever
        let timeout = timeout.max(Duration::from_micros(1));
        let timeval = libc::timeval {
            tv_sec: timeout.as_secs() as libc::time_t,
            tv_usec: timeout.subsec_micros() as libc::suseconds_t,
        };
        // SAFETY: `timeval` outlives the call and its size is passed along.
        let rc = unsafe {
            libc::setsockopt(
                self.fd.as_raw_fd(),
                libc::SOL_SOCKET,
                libc::SO_RCVTIMEO,
                &timeval as *const libc::timeval as *const libc::c_void,
                mem::size_of::<libc::timeval>() as libc::socklen_t,
            )
        };
        check(rc)
    }

    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, Ipv4Addr)> {
        // SAFETY: an all-zero sockaddr_in is a valid value.
        let mut from: libc::sockaddr_in = unsafe { mem::zeroed() };
        let mut from_len = mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
        // SAFETY: buffer and address storage are valid and sized correctly.
        let received = unsafe {
            libc::recvfrom(
                self.fd.as_raw_fd(),
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
                0,
                &mut from as *mut libc::sockaddr_in as *mut libc::sockaddr,
                &mut from_len,
            )
        };
        if received < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok((
            received as usize,
            Ipv4Addr::from(u32::from_be(from.sin_addr.s_addr)),
        ))
    }
}

fn sockaddr_in(address: Ipv4Addr) -> libc::sockaddr_in {
    // SAFETY: an all-zero sockaddr_in is a valid value.
    let mut sockaddr: libc::sockaddr_in = unsafe { mem::zeroed() };
    sockaddr.sin_family = libc::AF_INET as libc::sa_family_t;
    sockaddr.sin_addr = libc::in_addr {
        s_addr: u32::from(address).to_be(),
    };
    sockaddr
}

fn check(rc: libc::c_int) -> io::Result<()> {
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}
