//! CCTP domain identifiers
//!
//! Circle's Cross-Chain Transfer Protocol assigns each participating network
//! a small unsigned integer called a domain. The relayer keys its registry,
//! route table and sequence map by domain. Unlike the contract addresses,
//! the set of domains is open-ended (new networks are onboarded by Circle),
//! so the identifier is a transparent newtype rather than a closed enum.

use std::fmt;

use serde::{Deserialize, Serialize};

/// CCTP domain identifier for a blockchain network
///
/// # Example
///
/// ```rust
/// use cctp_relayer::Domain;
///
/// let ethereum = Domain::ETHEREUM;
/// assert_eq!(ethereum.as_u32(), 0);
/// assert_eq!(Domain::NOBLE, Domain(4));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Domain(pub u32);

impl Domain {
    /// Ethereum mainnet and Sepolia testnet
    pub const ETHEREUM: Domain = Domain(0);
    /// Noble (Cosmos app-chain)
    pub const NOBLE: Domain = Domain(4);

    /// Returns the numeric domain value
    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl From<u32> for Domain {
    #[inline]
    fn from(value: u32) -> Self {
        Domain(value)
    }
}

impl From<Domain> for u32 {
    #[inline]
    fn from(domain: Domain) -> Self {
        domain.0
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_domains() {
        assert_eq!(Domain::ETHEREUM.as_u32(), 0);
        assert_eq!(Domain::NOBLE.as_u32(), 4);
    }

    #[test]
    fn test_conversion_roundtrip() {
        for value in [0u32, 1, 4, 7, 999] {
            let domain = Domain::from(value);
            assert_eq!(u32::from(domain), value);
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", Domain::ETHEREUM), "0");
        assert_eq!(format!("{}", Domain(42)), "42");
    }

    #[test]
    fn test_serde_transparent() {
        let json = serde_json::to_string(&Domain::NOBLE).unwrap();
        assert_eq!(json, "4");
        let parsed: Domain = serde_json::from_str("4").unwrap();
        assert_eq!(parsed, Domain::NOBLE);
    }
}
