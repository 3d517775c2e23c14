//! ICMP echo probe with native sockets and a `ping` command fallback.
//!
//! Native probes use a non-blocking socket registered with the tokio reactor,
//! so an in-flight probe holds no thread and dropping it closes the socket.

use std::io::{self, ErrorKind, Read};
use std::net::{IpAddr, SocketAddr};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use regex::Regex;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::process::Command;

use super::ProbeError;

const ICMP_ECHO_REPLY: u8 = 0;
const ICMP_DEST_UNREACHABLE: u8 = 3;
const ICMP_ECHO_REQUEST: u8 = 8;
const ICMPV6_DEST_UNREACHABLE: u8 = 1;
const ICMPV6_ECHO_REQUEST: u8 = 128;
const ICMPV6_ECHO_REPLY: u8 = 129;

/// ICMP capability of the current process, detected once.
#[derive(Debug, Clone, Copy, PartialEq)]
enum IcmpCapability {
    Native,
    CommandOnly,
}

static ICMP_CAPABILITY: OnceLock<IcmpCapability> = OnceLock::new();

static PING_SEQUENCE: AtomicU16 = AtomicU16::new(0);

static PERMISSION_WARNED: AtomicBool = AtomicBool::new(false);

/// Identifier and sequence for one echo request. Concurrent probes to the same
/// destination stay distinguishable.
fn generate_ping_id() -> (u16, u16) {
    let identifier: u16 = rand::random();
    let sequence = PING_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    (identifier, sequence)
}

#[cfg(unix)]
fn detect_icmp_capability() -> IcmpCapability {
    if Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4)).is_ok() {
        tracing::info!("ping: using native ICMP (raw socket)");
        return IcmpCapability::Native;
    }

    // Unprivileged ICMP on Linux with ping_group_range set, and on macOS.
    if Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::ICMPV4)).is_ok() {
        tracing::info!("ping: using native ICMP (datagram socket)");
        return IcmpCapability::Native;
    }

    tracing::info!("ping: native ICMP unavailable, using the ping command");
    IcmpCapability::CommandOnly
}

#[cfg(not(unix))]
fn detect_icmp_capability() -> IcmpCapability {
    tracing::info!("ping: using the ping command");
    IcmpCapability::CommandOnly
}

/// Whether probes go over native ICMP sockets rather than the `ping` command.
pub fn native_icmp_available() -> bool {
    *ICMP_CAPABILITY.get_or_init(detect_icmp_capability) == IcmpCapability::Native
}

/// Ping `address` once and return the round-trip time.
pub async fn run_ping_probe(address: &str, timeout: Duration) -> Result<Duration, ProbeError> {
    if !native_icmp_available() {
        return run_ping_command(address, timeout).await;
    }

    let ip = resolve_address(address).await?;
    let result = match tokio::time::timeout(timeout, run_native_ping(ip, timeout)).await {
        Ok(result) => result,
        Err(_) => Err(ProbeError::Timeout(timeout)),
    };

    match result {
        Err(ProbeError::Network(msg)) if is_permission_error(&msg) => {
            if !PERMISSION_WARNED.swap(true, Ordering::Relaxed) {
                tracing::warn!(
                    "native ping to {} not permitted, falling back to command: {}",
                    address,
                    msg
                );
            }
            run_ping_command(address, timeout).await
        }
        other => other,
    }
}

fn is_permission_error(msg: &str) -> bool {
    msg.contains("Permission") || msg.contains("Operation not permitted") || msg.contains("denied")
}

async fn resolve_address(address: &str) -> Result<IpAddr, ProbeError> {
    if let Ok(ip) = address.parse::<IpAddr>() {
        return Ok(ip);
    }

    tokio::net::lookup_host((address, 0))
        .await
        .map_err(|e| ProbeError::Resolve(format!("{}: {}", address, e)))?
        .map(|sa| sa.ip())
        .next()
        .ok_or_else(|| ProbeError::Resolve(format!("no addresses found for {}", address)))
}

/// Non-blocking ICMP socket connected to `ip`. The flag tells whether it is a
/// raw socket, whose replies carry our identifier unchanged.
fn open_icmp_socket(ip: IpAddr) -> Result<(Socket, bool), ProbeError> {
    let (domain, protocol) = match ip {
        IpAddr::V4(_) => (Domain::IPV4, Protocol::ICMPV4),
        IpAddr::V6(_) => (Domain::IPV6, Protocol::ICMPV6),
    };

    let (socket, raw) = match Socket::new(domain, Type::RAW, Some(protocol)) {
        Ok(socket) => (socket, true),
        Err(_) => (
            Socket::new(domain, Type::DGRAM, Some(protocol))
                .map_err(|e| ProbeError::Network(format!("failed to create ICMP socket: {}", e)))?,
            false,
        ),
    };

    socket
        .set_nonblocking(true)
        .map_err(|e| ProbeError::Network(format!("failed to set non-blocking: {}", e)))?;
    socket
        .connect(&SocketAddr::new(ip, 0).into())
        .map_err(|e| ProbeError::Network(format!("failed to connect: {}", e)))?;
    Ok((socket, raw))
}

fn send_error(e: io::Error) -> ProbeError {
    if e.kind() == ErrorKind::PermissionDenied {
        ProbeError::Network(format!("Permission denied: {}", e))
    } else {
        ProbeError::Network(format!("failed to send: {}", e))
    }
}

/// One echo exchange. Waiting for the reply parks on the reactor, so the
/// caller's timeout cancels it outright.
#[cfg(unix)]
async fn run_native_ping(ip: IpAddr, timeout: Duration) -> Result<Duration, ProbeError> {
    use tokio::io::unix::AsyncFd;

    let (socket, raw) = open_icmp_socket(ip)?;
    let socket = AsyncFd::new(socket)
        .map_err(|e| ProbeError::Network(format!("failed to register ICMP socket: {}", e)))?;

    let (identifier, sequence) = generate_ping_id();
    let packet = match ip {
        IpAddr::V4(_) => build_icmp_echo_request(identifier, sequence),
        IpAddr::V6(_) => build_icmpv6_echo_request(identifier, sequence),
    };

    let start = Instant::now();
    loop {
        let mut guard = socket.writable().await.map_err(send_error)?;
        match guard.try_io(|inner| inner.get_ref().send(&packet)) {
            Ok(sent) => {
                sent.map_err(send_error)?;
                break;
            }
            Err(_would_block) => continue,
        }
    }

    // Datagram sockets get their identifier rewritten by the kernel, which
    // also filters replies per socket; only the sequence is comparable.
    let expected = EchoMatch {
        identifier: raw.then_some(identifier),
        sequence,
    };

    let mut buf = [0u8; 1500];
    loop {
        let mut guard = socket
            .readable()
            .await
            .map_err(|e| ProbeError::Network(format!("failed to receive: {}", e)))?;
        let len = match guard.try_io(|inner| inner.get_ref().read(&mut buf)) {
            Ok(read) => read.map_err(|e| ProbeError::Network(format!("failed to receive: {}", e)))?,
            Err(_would_block) => continue,
        };
        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return Err(ProbeError::Timeout(timeout));
        }

        let reply = match ip {
            IpAddr::V4(_) => classify_icmp_reply(&buf[..len], &expected),
            IpAddr::V6(_) => classify_icmpv6_reply(&buf[..len], &expected),
        };
        match reply {
            Reply::Echo => return Ok(elapsed),
            Reply::Unreachable(code) => {
                return Err(ProbeError::Unreachable(format!("{} (code {})", ip, code)))
            }
            Reply::Unrelated => continue,
        }
    }
}

#[cfg(not(unix))]
async fn run_native_ping(ip: IpAddr, timeout: Duration) -> Result<Duration, ProbeError> {
    run_ping_command(&ip.to_string(), timeout).await
}

struct EchoMatch {
    identifier: Option<u16>,
    sequence: u16,
}

impl EchoMatch {
    fn matches(&self, header: &[u8]) -> bool {
        if header.len() < 8 {
            return false;
        }
        let id = u16::from_be_bytes([header[4], header[5]]);
        let seq = u16::from_be_bytes([header[6], header[7]]);
        seq == self.sequence && self.identifier.map_or(true, |expected| expected == id)
    }
}

#[derive(Debug, PartialEq)]
enum Reply {
    Echo,
    Unreachable(u8),
    Unrelated,
}

/// Length of the IPv4 header at the start of `buf`, if there is one. Raw
/// sockets deliver it, datagram sockets do not.
fn ipv4_header_len(buf: &[u8]) -> usize {
    match buf.first() {
        Some(b) if b >> 4 == 4 => usize::from(b & 0x0F) * 4,
        _ => 0,
    }
}

fn classify_icmp_reply(buf: &[u8], expected: &EchoMatch) -> Reply {
    let icmp = &buf[ipv4_header_len(buf).min(buf.len())..];
    if icmp.len() < 8 {
        return Reply::Unrelated;
    }

    match icmp[0] {
        ICMP_ECHO_REPLY if expected.matches(icmp) => Reply::Echo,
        ICMP_DEST_UNREACHABLE => {
            // The error quotes the offending IP header and the first 8 bytes
            // of our echo request.
            let quoted = &icmp[8..];
            let inner = &quoted[ipv4_header_len(quoted).min(quoted.len())..];
            if inner.first() == Some(&ICMP_ECHO_REQUEST) && expected.matches(inner) {
                Reply::Unreachable(icmp[1])
            } else {
                Reply::Unrelated
            }
        }
        _ => Reply::Unrelated,
    }
}

fn classify_icmpv6_reply(buf: &[u8], expected: &EchoMatch) -> Reply {
    if buf.len() < 8 {
        return Reply::Unrelated;
    }

    match buf[0] {
        ICMPV6_ECHO_REPLY if expected.matches(buf) => Reply::Echo,
        // 8 byte ICMPv6 header, 40 byte quoted IPv6 header, then our request.
        ICMPV6_DEST_UNREACHABLE if buf.len() >= 56 => {
            let inner = &buf[48..];
            if inner[0] == ICMPV6_ECHO_REQUEST && expected.matches(inner) {
                Reply::Unreachable(buf[1])
            } else {
                Reply::Unrelated
            }
        }
        _ => Reply::Unrelated,
    }
}

/// ICMP Echo Request (type 8, code 0) with a 56 byte payload.
fn build_icmp_echo_request(identifier: u16, sequence: u16) -> Vec<u8> {
    let mut packet = build_echo(ICMP_ECHO_REQUEST, identifier, sequence);
    let checksum = icmp_checksum(&packet);
    packet[2..4].copy_from_slice(&checksum.to_be_bytes());
    packet
}

/// ICMPv6 Echo Request (type 128, code 0). The kernel fills in the checksum.
fn build_icmpv6_echo_request(identifier: u16, sequence: u16) -> Vec<u8> {
    build_echo(ICMPV6_ECHO_REQUEST, identifier, sequence)
}

fn build_echo(kind: u8, identifier: u16, sequence: u16) -> Vec<u8> {
    let mut packet = vec![0u8; 64];
    packet[0] = kind;
    packet[4..6].copy_from_slice(&identifier.to_be_bytes());
    packet[6..8].copy_from_slice(&sequence.to_be_bytes());

    let stamp = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default() as u64;
    packet[8..16].copy_from_slice(&stamp.to_be_bytes());
    packet
}

/// Internet checksum (RFC 1071).
fn icmp_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = data
        .chunks(2)
        .map(|pair| match pair {
            [hi, lo] => u32::from(u16::from_be_bytes([*hi, *lo])),
            [hi] => u32::from(*hi) << 8,
            _ => 0,
        })
        .sum();

    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    !(sum as u16)
}

/// Ping through the system `ping` binary.
async fn run_ping_command(address: &str, timeout: Duration) -> Result<Duration, ProbeError> {
    let mut command = Command::new("ping");
    if cfg!(windows) {
        let wait_ms = timeout.as_millis().max(1).to_string();
        command.args(["-n", "1", "-w", &wait_ms, address]);
    } else {
        let wait_secs = timeout.as_secs().max(1).to_string();
        command.args(["-c", "1", "-W", &wait_secs, address]);
    }

    let output = command
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| ProbeError::Command(format!("failed to execute ping: {}", e)))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    if !output.status.success() {
        return Err(classify_command_failure(&stdout, &stderr, timeout));
    }

    parse_ping_output(&stdout)
}

fn classify_command_failure(stdout: &str, stderr: &str, timeout: Duration) -> ProbeError {
    let combined = format!("{}{}", stdout, stderr);
    let lower = combined.to_lowercase();

    if lower.contains("unknown host")
        || lower.contains("name or service not known")
        || lower.contains("could not find host")
        || lower.contains("cannot resolve")
        || lower.contains("temporary failure in name resolution")
    {
        return ProbeError::Resolve(combined.trim().to_string());
    }
    if lower.contains("unreachable") {
        return ProbeError::Unreachable(combined.trim().to_string());
    }
    if lower.contains("timeout")
        || lower.contains("timed out")
        || lower.contains("100% packet loss")
        || lower.contains("100.0% packet loss")
    {
        return ProbeError::Timeout(timeout);
    }
    ProbeError::Command(format!("ping failed: {}", combined.trim()))
}

/// Extract the round-trip time from `ping` output.
fn parse_ping_output(output: &str) -> Result<Duration, ProbeError> {
    // Per-packet "time=12.3 ms" (Linux, macOS) or "time<1ms" (Windows).
    static PER_PACKET: OnceLock<Regex> = OnceLock::new();
    let per_packet = PER_PACKET
        .get_or_init(|| Regex::new(r"time[=<]\s*(?P<val>[0-9.]+)\s*ms").expect("valid regex"));

    // Summary "rtt min/avg/max/mdev" (Linux) or "round-trip min/avg/max/stddev" (macOS).
    static SUMMARY: OnceLock<Regex> = OnceLock::new();
    let summary = SUMMARY.get_or_init(|| {
        Regex::new(r"(?:rtt|round-trip)\s+min/avg/max/(?:mdev|stddev)\s*=\s*[0-9.]+/(?P<val>[0-9.]+)/")
            .expect("valid regex")
    });

    [per_packet, summary]
        .into_iter()
        .find_map(|re| re.captures(output)?.name("val")?.as_str().parse::<f64>().ok())
        .filter(|ms| ms.is_finite() && *ms >= 0.0)
        .map(|ms| Duration::from_secs_f64(ms / 1000.0))
        .ok_or_else(|| ProbeError::Command(format!("failed to parse ping output: {}", output)))
}
