//! Capability sets and server-authoritative intersection.
//!
//! Negotiation is one round: the client advertises capabilities in `Hello`
//! and the bridge replies with the intersection of that set and its own
//! configured set. The bridge never grants a capability the client did not
//! advertise, and clients must not assume capabilities beyond the reply.

use std::collections::BTreeSet;
use std::fmt;

use serde::Deserialize;

use crate::envelope::Capability;

/// An ordered set of protocol capabilities.
///
/// Unknown wire values are dropped on ingest so the set only ever holds
/// capabilities this build understands. Ordering is stable (enum order),
/// which keeps the encoded reply deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "Vec<String>")]
pub struct CapabilitySet(BTreeSet<Capability>);

impl CapabilitySet {
    /// Empty set.
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeSet::new())
    }

    /// Every capability this build can negotiate.
    #[must_use]
    pub fn all_negotiable() -> Self {
        [
            Capability::TelemetryV1,
            Capability::TimesyncV1,
            Capability::HelloAckV1,
            Capability::ActionV1,
        ]
        .into_iter()
        .collect()
    }

    /// Builds a set from raw wire values, dropping unknown or unspecified
    /// entries.
    #[must_use]
    pub fn from_wire(raw: &[i32]) -> Self {
        raw.iter()
            .filter_map(|value| Capability::try_from(*value).ok())
            .filter(|cap| *cap != Capability::Unspecified)
            .collect()
    }

    /// Encodes the set for the wire, in stable order.
    #[must_use]
    pub fn to_wire(&self) -> Vec<i32> {
        self.0.iter().map(|cap| *cap as i32).collect()
    }

    /// Set intersection. The handshake reply carries
    /// `client.capabilities ∩ server.capabilities`.
    #[must_use]
    pub fn intersect(&self, other: &Self) -> Self {
        Self(self.0.intersection(&other.0).copied().collect())
    }

    /// Whether `cap` is present.
    #[must_use]
    pub fn contains(&self, cap: Capability) -> bool {
        self.0.contains(&cap)
    }

    /// Whether every capability in `self` is also in `other`.
    #[must_use]
    pub fn is_subset(&self, other: &Self) -> bool {
        self.0.is_subset(&other.0)
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of capabilities in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterates the capabilities in stable order.
    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for cap in &self.0 {
            if !first {
                write!(f, ",")?;
            }
            write!(f, "{}", cap.as_str_name())?;
            first = false;
        }
        Ok(())
    }
}

/// Error parsing a capability name from configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown capability name: {name}")]
pub struct UnknownCapability {
    /// The name that failed to parse.
    pub name: String,
}

impl TryFrom<Vec<String>> for CapabilitySet {
    type Error = UnknownCapability;

    fn try_from(names: Vec<String>) -> Result<Self, Self::Error> {
        names
            .iter()
            .map(|name| {
                Capability::from_str_name(name).ok_or_else(|| UnknownCapability {
                    name: name.clone(),
                })
            })
            .collect()
    }
}
