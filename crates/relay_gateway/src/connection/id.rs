//! Public connection identifier strings.
//!
//! Upper layers (status pages, admin endpoints) refer to connections as
//! `SN_<peer>_<handle>`, both parts unsigned decimal. Parsing is strict and
//! never panics: anything off-grammar is simply "not found". Checking the
//! peer against the registry happens in
//! [`ConnectionRegistry::resolve`](super::ConnectionRegistry::resolve).

use crate::types::{ConnectionHandle, PeerIdentity};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const PREFIX: &str = "SN_";

/// A connection's public identity: the peer plus the transport handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId {
    pub peer: PeerIdentity,
    pub handle: ConnectionHandle,
}

/// Returned for any string that is not a well-formed connection identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("connection not found")]
pub struct ParseConnectionIdError;

impl ConnectionId {
    pub fn new(peer: PeerIdentity, handle: ConnectionHandle) -> Self {
        Self { peer, handle }
    }

    /// Parses `SN_<peer>_<handle>`; `None` when the grammar does not match.
    pub fn parse(s: &str) -> Option<Self> {
        let rest = s.strip_prefix(PREFIX)?;
        let (peer, handle) = rest.split_once('_')?;
        Some(Self {
            peer: PeerIdentity(parse_decimal(peer)?),
            handle: ConnectionHandle(parse_decimal(handle)?),
        })
    }
}

/// Unsigned decimal only: no sign, no whitespace, no empty string.
fn parse_decimal<T: FromStr>(s: &str) -> Option<T> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}_{}", PREFIX, self.peer.0, self.handle.0)
    }
}

impl FromStr for ConnectionId {
    type Err = ParseConnectionIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or(ParseConnectionIdError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format() {
        let id = ConnectionId::new(PeerIdentity(76561198000000001), ConnectionHandle(42));
        assert_eq!(id.to_string(), "SN_76561198000000001_42");
    }

    #[test]
    fn test_round_trip_extremes() {
        for (peer, handle) in [(0u64, 0u32), (u64::MAX, u32::MAX), (1, 2)] {
            let id = ConnectionId::new(PeerIdentity(peer), ConnectionHandle(handle));
            assert_eq!(ConnectionId::parse(&id.to_string()), Some(id));
            assert_eq!(id.to_string().parse::<ConnectionId>(), Ok(id));
        }
    }

    #[test]
    fn test_rejects_malformed() {
        let bad = [
            "",
            "SN_",
            "SN__",
            "SN_1",
            "SN_1_",
            "SN__1",
            "sn_1_2",
            "XX_1_2",
            "SN_a_2",
            "SN_1_b",
            "SN_-1_2",
            "SN_+1_2",
            "SN_1_ 2",
            "SN_1_2_3",
            "SN_18446744073709551616_1",
            "SN_1_4294967296",
            "SN_１_2",
        ];
        for s in bad {
            assert_eq!(ConnectionId::parse(s), None, "{s:?} should not parse");
            assert_eq!(s.parse::<ConnectionId>(), Err(ParseConnectionIdError));
        }
    }
}
