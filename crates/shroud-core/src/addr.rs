//! Socket address values and address-string normalization.
//!
//! A [`SockAddr`] is an immutable, resolver-produced endpoint: an address
//! family, a socket type, and the raw platform `sockaddr` bytes. The state
//! machine only carries these values around; it never interprets them.
//!
//! The serialized form is machine and operating system dependent and is
//! used only for local IPC:
//!
//! `[family: c_int, native endian] + [socktype: c_int] + [namelen: socklen_t]
//!  + [name: namelen bytes]`
//!
//! with no padding or framing between fields.

use std::fmt;
use std::mem;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::AddrError;

/// A shared, immutable list of candidate target addresses.
///
/// The connection state machine and an in-flight dial task each hold a
/// reference; the list is released when the last reference is dropped.
pub type AddrList = Arc<[SockAddr]>;

const INT_LEN: usize = mem::size_of::<libc::c_int>();
const LEN_LEN: usize = mem::size_of::<libc::socklen_t>();
const HEADER_LEN: usize = 2 * INT_LEN + LEN_LEN;

/// Capacity of `sun_path` in a `sockaddr_un`, including the terminating NUL.
const SUN_PATH_LEN: usize = mem::size_of::<libc::sockaddr_un>() - mem::size_of::<libc::sa_family_t>();

/// A resolved socket address.
///
/// Equality is byte-wise over all three fields. Values are cheap to clone;
/// the name bytes are shared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SockAddr {
    /// Address family (`AF_INET`, `AF_INET6`, `AF_UNIX`, ...)
    pub family: libc::c_int,
    /// Socket type (`SOCK_STREAM` for everything the tunnel dials)
    pub socktype: libc::c_int,
    /// Raw platform `sockaddr` bytes
    pub name: Bytes,
}

impl SockAddr {
    /// Build an IPv4 stream address.
    pub fn inet(addr: Ipv4Addr, port: u16) -> Self {
        let mut name = vec![0u8; mem::size_of::<libc::sockaddr_in>()];
        name[0..2].copy_from_slice(&(libc::AF_INET as libc::sa_family_t).to_ne_bytes());
        name[2..4].copy_from_slice(&port.to_be_bytes());
        name[4..8].copy_from_slice(&addr.octets());
        Self { family: libc::AF_INET, socktype: libc::SOCK_STREAM, name: name.into() }
    }

    /// Build an IPv6 stream address (flow info and scope id zero).
    pub fn inet6(addr: Ipv6Addr, port: u16) -> Self {
        let mut name = vec![0u8; mem::size_of::<libc::sockaddr_in6>()];
        name[0..2].copy_from_slice(&(libc::AF_INET6 as libc::sa_family_t).to_ne_bytes());
        name[2..4].copy_from_slice(&port.to_be_bytes());
        name[8..24].copy_from_slice(&addr.octets());
        Self { family: libc::AF_INET6, socktype: libc::SOCK_STREAM, name: name.into() }
    }

    /// Build a UNIX-domain stream address from a filesystem path.
    ///
    /// # Errors
    ///
    /// Returns [`AddrError::PathTooLong`] if the path (plus its terminating
    /// NUL) does not fit in a `sockaddr_un`.
    pub fn unix(path: &str) -> Result<Self, AddrError> {
        if path.len() >= SUN_PATH_LEN {
            return Err(AddrError::PathTooLong { len: path.len(), max: SUN_PATH_LEN - 1 });
        }
        let mut name = Vec::with_capacity(2 + path.len() + 1);
        name.extend_from_slice(&(libc::AF_UNIX as libc::sa_family_t).to_ne_bytes());
        name.extend_from_slice(path.as_bytes());
        name.push(0);
        Ok(Self { family: libc::AF_UNIX, socktype: libc::SOCK_STREAM, name: name.into() })
    }

    /// Serialize into a buffer.
    ///
    /// The layout is machine-dependent (native-endian platform integers);
    /// see the module documentation.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_slice(&self.family.to_ne_bytes());
        dst.put_slice(&self.socktype.to_ne_bytes());
        dst.put_slice(&(self.name.len() as libc::socklen_t).to_ne_bytes());
        dst.put_slice(&self.name);
    }

    /// Serialize into a freshly allocated buffer.
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.name.len());
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Deserialize a previously serialized address.
    ///
    /// All length validation happens before any bytes are copied. The
    /// buffer must contain exactly one serialized address; trailing bytes
    /// are an error.
    ///
    /// # Errors
    ///
    /// Returns [`AddrError::Truncated`] if the fixed header is incomplete,
    /// or [`AddrError::LengthMismatch`] if the buffer length disagrees with
    /// the recorded name length.
    pub fn decode(bytes: &[u8]) -> Result<Self, AddrError> {
        if bytes.len() < HEADER_LEN {
            return Err(AddrError::Truncated { expected: HEADER_LEN, actual: bytes.len() });
        }

        let family = int_from_ne(&bytes[0..INT_LEN]);
        let socktype = int_from_ne(&bytes[INT_LEN..2 * INT_LEN]);
        let namelen = len_from_ne(&bytes[2 * INT_LEN..HEADER_LEN]) as usize;

        let total = HEADER_LEN + namelen;
        if bytes.len() != total {
            return Err(AddrError::LengthMismatch { expected: total, actual: bytes.len() });
        }

        let name = Bytes::copy_from_slice(&bytes[HEADER_LEN..total]);
        Ok(Self { family, socktype, name })
    }
}

fn int_from_ne(bytes: &[u8]) -> libc::c_int {
    let mut raw = [0u8; INT_LEN];
    raw.copy_from_slice(bytes);
    libc::c_int::from_ne_bytes(raw)
}

fn len_from_ne(bytes: &[u8]) -> libc::socklen_t {
    let mut raw = [0u8; LEN_LEN];
    raw.copy_from_slice(bytes);
    libc::socklen_t::from_ne_bytes(raw)
}

impl fmt::Display for SockAddr {
    /// Pretty-print in one of the forms
    /// `/path/to/unix/socket`, `[ip.v4.ad.dr]:port`, `[ipv6:add::ress]:port`.
    ///
    /// Unknown families, and known families whose name bytes have the wrong
    /// length, print as the literal `Unknown address`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.family {
            libc::AF_INET if self.name.len() == mem::size_of::<libc::sockaddr_in>() => {
                let port = u16::from_be_bytes([self.name[2], self.name[3]]);
                let ip =
                    Ipv4Addr::new(self.name[4], self.name[5], self.name[6], self.name[7]);
                write!(f, "[{}]:{}", ip, port)
            }
            libc::AF_INET6 if self.name.len() == mem::size_of::<libc::sockaddr_in6>() => {
                let port = u16::from_be_bytes([self.name[2], self.name[3]]);
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&self.name[8..24]);
                write!(f, "[{}]:{}", Ipv6Addr::from(octets), port)
            }
            libc::AF_UNIX if self.name.len() >= 2 => {
                let path = &self.name[2..];
                let path = match path.iter().position(|&b| b == 0) {
                    Some(nul) => &path[..nul],
                    None => path,
                };
                write!(f, "{}", String::from_utf8_lossy(path))
            }
            _ => write!(f, "Unknown address"),
        }
    }
}

/// Normalize a user-supplied address string for the resolver.
///
/// If the input already names a port (or is a UNIX socket path), it is
/// returned unchanged; otherwise `:0` is appended, bracketing raw IPv6
/// addresses as needed. The classification is purely lexical; nothing is
/// validated.
///
/// ```
/// use shroud_core::addr::ensure_port;
///
/// assert_eq!(ensure_port("1.2.3.4"), "1.2.3.4:0");
/// assert_eq!(ensure_port("::1"), "[::1]:0");
/// assert_eq!(ensure_port("[::1]:443"), "[::1]:443");
/// ```
#[must_use]
pub fn ensure_port(addr: &str) -> String {
    // UNIX socket paths pass through untouched.
    if addr.starts_with('/') {
        return addr.to_owned();
    }

    let first = addr.find(':');
    let last = addr.rfind(':');

    match first {
        // No colon at all: bare IPv4-shaped host.
        None => format!("{addr}:0"),
        // A single colon: IPv4 host with a port already.
        Some(a) if Some(a) == last => addr.to_owned(),
        // Two or more colons: IPv6-shaped.
        Some(_) => match addr.rfind(']') {
            None => format!("[{addr}]:0"),
            Some(r) if r == addr.len() - 1 => format!("{addr}:0"),
            Some(_) => addr.to_owned(),
        },
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    impl Arbitrary for SockAddr {
        type Parameters = ();
        type Strategy = BoxedStrategy<Self>;

        fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
            (any::<libc::c_int>(), any::<libc::c_int>(), prop::collection::vec(any::<u8>(), 0..64))
                .prop_map(|(family, socktype, name)| SockAddr {
                    family,
                    socktype,
                    name: name.into(),
                })
                .boxed()
        }
    }

    proptest! {
        #[test]
        fn addr_round_trip(addr in any::<SockAddr>()) {
            let wire = addr.to_bytes();
            let parsed = SockAddr::decode(&wire).expect("should decode");
            prop_assert_eq!(addr, parsed);
        }

        #[test]
        fn ensure_port_appends_at_most_brackets_and_port(input in "[a-f0-9:.\\[\\]]{0,20}") {
            let out = ensure_port(&input);
            prop_assert!(
                out == input
                    || out == format!("{input}:0")
                    || out == format!("[{input}]:0"),
                "unexpected normalization: {:?} -> {:?}", input, out
            );
        }
    }

    #[test]
    fn equality_is_bytewise() {
        let a = SockAddr::inet(Ipv4Addr::new(10, 0, 0, 1), 8025);
        let b = SockAddr::inet(Ipv4Addr::new(10, 0, 0, 1), 8025);
        assert_eq!(a, b);

        let c = SockAddr::inet(Ipv4Addr::new(10, 0, 0, 1), 8026);
        assert_ne!(a, c);

        let mut d = b.clone();
        d.socktype = libc::SOCK_DGRAM;
        assert_ne!(a, d);
    }

    #[test]
    fn display_inet() {
        let a = SockAddr::inet(Ipv4Addr::new(192, 0, 2, 7), 443);
        assert_eq!(a.to_string(), "[192.0.2.7]:443");
    }

    #[test]
    fn display_inet6() {
        let a = SockAddr::inet6("2001:db8::1".parse().unwrap(), 8025);
        assert_eq!(a.to_string(), "[2001:db8::1]:8025");
    }

    #[test]
    fn display_unix() {
        let a = SockAddr::unix("/tmp/s.sock").unwrap();
        assert_eq!(a.to_string(), "/tmp/s.sock");
    }

    #[test]
    fn display_unknown_family() {
        let a = SockAddr { family: 255, socktype: libc::SOCK_STREAM, name: Bytes::new() };
        assert_eq!(a.to_string(), "Unknown address");
    }

    #[test]
    fn display_malformed_name() {
        // Right family, wrong name length.
        let a = SockAddr {
            family: libc::AF_INET,
            socktype: libc::SOCK_STREAM,
            name: Bytes::from_static(&[0u8; 4]),
        };
        assert_eq!(a.to_string(), "Unknown address");
    }

    #[test]
    fn unix_path_too_long() {
        let long = "/".repeat(SUN_PATH_LEN + 8);
        assert!(matches!(SockAddr::unix(&long), Err(AddrError::PathTooLong { .. })));
    }

    #[test]
    fn reject_truncated_header() {
        let result = SockAddr::decode(&[0u8; 3]);
        assert!(matches!(result, Err(AddrError::Truncated { .. })));
    }

    #[test]
    fn reject_trailing_bytes() {
        let mut wire = SockAddr::inet(Ipv4Addr::LOCALHOST, 80).to_bytes().to_vec();
        wire.push(0);
        assert!(matches!(SockAddr::decode(&wire), Err(AddrError::LengthMismatch { .. })));
    }

    #[test]
    fn ensure_port_table() {
        assert_eq!(ensure_port("/tmp/s.sock"), "/tmp/s.sock");
        assert_eq!(ensure_port("1.2.3.4"), "1.2.3.4:0");
        assert_eq!(ensure_port("1.2.3.4:80"), "1.2.3.4:80");
        assert_eq!(ensure_port("::1"), "[::1]:0");
        assert_eq!(ensure_port("[::1]"), "[::1]:0");
        assert_eq!(ensure_port("[::1]:443"), "[::1]:443");
    }

    #[test]
    fn ensure_port_hostnames() {
        assert_eq!(ensure_port("example.net"), "example.net:0");
        assert_eq!(ensure_port("example.net:8025"), "example.net:8025");
        assert_eq!(ensure_port(""), ":0");
    }
}
