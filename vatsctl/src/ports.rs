//! Port assignment for PBX instances.
//!
//! Every instance owns exactly two network ports: a SIP control port and an HTTP
//! management port. New instances get `http_port = sip_port + http_offset`; updates may
//! move either port freely as long as the result stays inside the configured range and
//! does not collide with any other instance.
//!
//! The allocator is pure: it decides over a snapshot of [`PortClaim`]s handed in by the
//! caller and never retries or searches for a free port. Serializing the
//! snapshot-then-reserve sequence is the caller's job (see [`crate::manager`]).

use crate::types::{InstanceId, abbrev_uuid};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// The two ports owned by one instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct PortPair {
    pub sip_port: u16,
    pub http_port: u16,
}

impl PortPair {
    pub fn new(sip_port: u16, http_port: u16) -> Self {
        Self { sip_port, http_port }
    }

    pub fn ports(&self) -> [u16; 2] {
        [self.sip_port, self.http_port]
    }

    pub fn contains(&self, port: u16) -> bool {
        self.sip_port == port || self.http_port == port
    }
}

/// A port pair currently held by a live instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortClaim {
    pub instance_id: InstanceId,
    pub ports: PortPair,
}

/// Range and convention used to hand out ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct PortPolicy {
    /// Lowest port an instance may use (inclusive)
    pub min_port: u16,
    /// Highest port an instance may use (inclusive)
    pub max_port: u16,
    /// Distance between the SIP port and the HTTP port of a new instance
    pub http_offset: u16,
}

impl Default for PortPolicy {
    fn default() -> Self {
        Self {
            min_port: 1024,
            max_port: 65535,
            http_offset: 1000,
        }
    }
}

impl PortPolicy {
    /// Highest SIP port that still leaves room for the HTTP port.
    pub fn max_sip_port(&self) -> u16 {
        self.max_port.saturating_sub(self.http_offset)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PortError {
    /// Port outside the allowed range, or a pair that reuses one port twice
    #[error("{message}")]
    Invalid { port: i64, message: String },

    /// Port already held by another live instance
    #[error("Port {port} is already in use by instance {}", abbrev_uuid(.instance_id))]
    Conflict { port: u16, instance_id: InstanceId },
}

/// Decides and validates port pairs under a [`PortPolicy`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PortAllocator {
    policy: PortPolicy,
}

impl PortAllocator {
    pub fn new(policy: PortPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &PortPolicy {
        &self.policy
    }

    /// Pick the pair for a new instance: the requested SIP port plus the HTTP port at the
    /// configured offset. Fails if the SIP port leaves the HTTP port out of range or if
    /// either port is already claimed.
    pub fn allocate(&self, requested_sip_port: i64, in_use: &[PortClaim]) -> Result<PortPair, PortError> {
        let min = i64::from(self.policy.min_port);
        let max_sip = i64::from(self.policy.max_sip_port());
        if requested_sip_port < min || requested_sip_port > max_sip {
            return Err(PortError::Invalid {
                port: requested_sip_port,
                message: format!("SIP port {requested_sip_port} must be between {min} and {max_sip}"),
            });
        }

        // Both casts are in range: requested_sip_port <= max_port - http_offset
        let sip_port = requested_sip_port as u16;
        let pair = PortPair::new(sip_port, sip_port + self.policy.http_offset);

        match find_conflict(&pair, in_use, None) {
            Some(conflict) => Err(conflict),
            None => Ok(pair),
        }
    }

    /// Check a pair supplied on update. Claims held by `excluding` (the instance being
    /// updated) are ignored so an instance never conflicts with itself.
    pub fn validate(
        &self,
        sip_port: i64,
        http_port: i64,
        in_use: &[PortClaim],
        excluding: Option<InstanceId>,
    ) -> Result<PortPair, PortError> {
        let sip_port = self.check_in_range(sip_port, "SIP")?;
        let http_port = self.check_in_range(http_port, "HTTP")?;

        if sip_port == http_port {
            return Err(PortError::Invalid {
                port: i64::from(sip_port),
                message: format!("SIP and HTTP ports must differ (both are {sip_port})"),
            });
        }

        let pair = PortPair::new(sip_port, http_port);
        match find_conflict(&pair, in_use, excluding) {
            Some(conflict) => Err(conflict),
            None => Ok(pair),
        }
    }

    fn check_in_range(&self, port: i64, label: &str) -> Result<u16, PortError> {
        let (min, max) = (self.policy.min_port, self.policy.max_port);
        if port < i64::from(min) || port > i64::from(max) {
            return Err(PortError::Invalid {
                port,
                message: format!("{label} port {port} must be between {min} and {max}"),
            });
        }
        Ok(port as u16)
    }
}

fn find_conflict(pair: &PortPair, in_use: &[PortClaim], excluding: Option<InstanceId>) -> Option<PortError> {
    in_use
        .iter()
        .filter(|claim| Some(claim.instance_id) != excluding)
        .find_map(|claim| {
            pair.ports()
                .into_iter()
                .find(|port| claim.ports.contains(*port))
                .map(|port| PortError::Conflict {
                    port,
                    instance_id: claim.instance_id,
                })
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn claim(sip_port: u16, http_port: u16) -> PortClaim {
        PortClaim {
            instance_id: Uuid::new_v4(),
            ports: PortPair::new(sip_port, http_port),
        }
    }

    #[test]
    fn test_allocate_uses_http_offset() {
        let allocator = PortAllocator::default();
        let pair = allocator.allocate(5060, &[]).unwrap();
        assert_eq!(pair, PortPair::new(5060, 6060));
    }

    #[test]
    fn test_allocate_rejects_taken_sip_port() {
        let allocator = PortAllocator::default();
        let existing = claim(5060, 6060);

        let err = allocator.allocate(5060, &[existing]).unwrap_err();
        assert_eq!(
            err,
            PortError::Conflict {
                port: 5060,
                instance_id: existing.instance_id
            }
        );
    }

    #[test]
    fn test_allocate_detects_cross_role_collisions() {
        let allocator = PortAllocator::default();

        // Our HTTP port (6060) is somebody else's SIP port
        let existing = claim(6060, 7060);
        let err = allocator.allocate(5060, &[existing]).unwrap_err();
        assert!(matches!(err, PortError::Conflict { port: 6060, .. }));

        // Our SIP port (7060) is somebody else's HTTP port
        let err = allocator.allocate(7060, &[existing]).unwrap_err();
        assert!(matches!(err, PortError::Conflict { port: 7060, .. }));
    }

    #[test]
    fn test_allocate_range_boundaries() {
        let allocator = PortAllocator::default();

        assert!(matches!(allocator.allocate(0, &[]), Err(PortError::Invalid { port: 0, .. })));
        assert!(matches!(allocator.allocate(-5, &[]), Err(PortError::Invalid { .. })));
        assert!(matches!(allocator.allocate(1023, &[]), Err(PortError::Invalid { .. })));
        assert!(matches!(allocator.allocate(64536, &[]), Err(PortError::Invalid { .. })));

        assert_eq!(allocator.allocate(1024, &[]).unwrap(), PortPair::new(1024, 2024));
        assert_eq!(allocator.allocate(64535, &[]).unwrap(), PortPair::new(64535, 65535));
    }

    #[test]
    fn test_custom_policy() {
        let allocator = PortAllocator::new(PortPolicy {
            min_port: 10000,
            max_port: 20000,
            http_offset: 500,
        });

        assert_eq!(allocator.allocate(10000, &[]).unwrap(), PortPair::new(10000, 10500));
        assert!(allocator.allocate(19501, &[]).is_err());
        assert!(allocator.allocate(9999, &[]).is_err());
    }

    #[test]
    fn test_validate_excludes_own_ports() {
        let allocator = PortAllocator::default();
        let own = claim(5060, 6060);
        let other = claim(7000, 8000);
        let in_use = [own, other];

        // Swapping our own ports is not a conflict
        let pair = allocator.validate(6060, 5060, &in_use, Some(own.instance_id)).unwrap();
        assert_eq!(pair, PortPair::new(6060, 5060));

        // Without the exclusion we collide with ourselves
        assert!(matches!(
            allocator.validate(5060, 6060, &in_use, None),
            Err(PortError::Conflict { port: 5060, .. })
        ));

        // Somebody else's port is still a conflict
        let err = allocator.validate(5060, 8000, &in_use, Some(own.instance_id)).unwrap_err();
        assert_eq!(
            err,
            PortError::Conflict {
                port: 8000,
                instance_id: other.instance_id
            }
        );
    }

    #[test]
    fn test_validate_rejects_identical_ports() {
        let allocator = PortAllocator::default();
        let err = allocator.validate(5060, 5060, &[], None).unwrap_err();
        assert!(matches!(err, PortError::Invalid { port: 5060, .. }));
    }

    #[test]
    fn test_validate_checks_each_port_range() {
        let allocator = PortAllocator::default();
        assert!(matches!(
            allocator.validate(80, 6060, &[], None),
            Err(PortError::Invalid { port: 80, .. })
        ));
        assert!(matches!(
            allocator.validate(5060, 70000, &[], None),
            Err(PortError::Invalid { port: 70000, .. })
        ));
        // Update is not bound to the offset convention
        assert_eq!(allocator.validate(5060, 5061, &[], None).unwrap(), PortPair::new(5060, 5061));
    }
}
