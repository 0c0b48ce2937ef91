//! # Peer Protocol Shapes
//!
//! The wire vocabulary and its size discipline. Every inbound frame is
//! bounded BEFORE JSON parsing: the global cap first, then the per-kind
//! cap once the kind is known. Outbound `version` fields are bound-checked
//! symmetrically - the node never sends a field it would refuse to
//! receive.

use bc_10_light_server::HistoryRequest;
use serde::{Deserialize, Serialize};
use shared_types::{BallId, Joint, UnitId, MAX_UNIT_LENGTH};
use thiserror::Error;

/// Global inbound frame cap: nothing larger is even parsed.
pub const MAX_FRAME_BYTES: usize = MAX_UNIT_LENGTH + 64 * 1024;

/// Per-kind cap for `version` handshakes.
pub const MAX_VERSION_BYTES: usize = 1024 * 1024;

/// Cap on any single text field inside a `version` handshake.
pub const MAX_VERSION_FIELD_BYTES: usize = 256;

/// Wire-contract violations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// Frame exceeds its byte cap.
    #[error("frame of {got} bytes exceeds the cap of {cap}")]
    Oversize {
        /// Received size.
        got: usize,
        /// Applicable cap.
        cap: usize,
    },

    /// The frame is not valid JSON for any known message.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// Handshake carries an incompatible protocol version or network.
    #[error("incompatible peer: {0}")]
    Incompatible(String),
}

/// The `version` handshake body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionBody {
    /// Wire protocol version.
    pub protocol_version: String,
    /// Network discriminator; must match ours.
    pub alt: String,
    /// Client library name.
    pub library: String,
    /// Client library version.
    pub library_version: String,
    /// Program name.
    pub program: String,
    /// Program version.
    pub program_version: String,
}

impl VersionBody {
    /// Bound-check every field this node is about to send. A field the
    /// inbound path would refuse must never leave the outbound path.
    pub fn check_outbound(&self) -> Result<(), ProtocolError> {
        for (name, value) in [
            ("protocol_version", &self.protocol_version),
            ("alt", &self.alt),
            ("library", &self.library),
            ("library_version", &self.library_version),
            ("program", &self.program),
            ("program_version", &self.program_version),
        ] {
            if value.len() > MAX_VERSION_FIELD_BYTES {
                return Err(ProtocolError::Oversize {
                    got: value.len(),
                    cap: MAX_VERSION_FIELD_BYTES,
                });
            }
            if value.is_empty() {
                return Err(ProtocolError::Malformed(format!("empty field {name}")));
            }
        }
        Ok(())
    }
}

/// Every message a peer can send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "body", rename_all = "snake_case")]
pub enum PeerMessage {
    /// Handshake.
    Version(VersionBody),
    /// Push a joint.
    Joint {
        /// The joint.
        joint: Joint,
    },
    /// Pull a joint by id.
    GetJoint {
        /// Requested unit.
        unit: UnitId,
    },
    /// Bulk-sync request: balls from the peer's stable point forward.
    Catchup {
        /// Last stable MCI the requester has.
        last_stable_mci: u64,
        /// Last known MCI.
        last_known_mci: u64,
    },
    /// Hash-tree request over a ball range.
    GetHashTree {
        /// Range start ball.
        from_ball: BallId,
        /// Range end ball.
        to_ball: BallId,
    },
    /// Compose prerequisites for a new unit.
    GetParentsAndLastBallAndWitnessListUnit,
    /// Stable/free joints since an MCI.
    Refresh {
        /// Cursor.
        mci: u64,
    },
    /// Subscribe from an MCI cursor.
    Subscribe {
        /// Cursor.
        last_mci: u64,
    },
    /// Light: history for addresses.
    LightGetHistory(HistoryRequest),
    /// Light: current definition of an address.
    LightGetDefinition {
        /// Queried address.
        address: String,
    },
    /// Light: AA responses for an address.
    LightGetAaResponses {
        /// Queried agent address.
        aa_address: String,
    },
    /// Light: start watching an address.
    LightNewAddressToWatch {
        /// Watched address.
        address: String,
    },
    /// Light: start watching an agent.
    LightNewAaToWatch {
        /// Watched agent.
        aa_address: String,
    },
}

/// Parse one inbound frame with the size discipline applied before and
/// after kind discovery.
pub fn parse_frame(raw: &[u8]) -> Result<PeerMessage, ProtocolError> {
    if raw.len() > MAX_FRAME_BYTES {
        return Err(ProtocolError::Oversize {
            got: raw.len(),
            cap: MAX_FRAME_BYTES,
        });
    }
    let message: PeerMessage =
        serde_json::from_slice(raw).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
    if matches!(message, PeerMessage::Version(_)) && raw.len() > MAX_VERSION_BYTES {
        return Err(ProtocolError::Oversize {
            got: raw.len(),
            cap: MAX_VERSION_BYTES,
        });
    }
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oversize_frame_is_refused_before_parse() {
        let raw = vec![b'x'; MAX_FRAME_BYTES + 1];
        assert!(matches!(
            parse_frame(&raw),
            Err(ProtocolError::Oversize { .. })
        ));
    }

    #[test]
    fn version_roundtrip_and_outbound_check() {
        let body = VersionBody {
            protocol_version: "1.0".into(),
            alt: "1".into(),
            library: "braidchain-core".into(),
            library_version: "0.1.0".into(),
            program: "node-runtime".into(),
            program_version: "0.1.0".into(),
        };
        body.check_outbound().unwrap();
        let frame = serde_json::to_vec(&PeerMessage::Version(body.clone())).unwrap();
        let parsed = parse_frame(&frame).unwrap();
        assert_eq!(parsed, PeerMessage::Version(body));
    }

    #[test]
    fn oversize_version_field_fails_outbound_check() {
        let mut body = VersionBody {
            protocol_version: "1.0".into(),
            alt: "1".into(),
            library: "braidchain-core".into(),
            library_version: "0.1.0".into(),
            program: "node-runtime".into(),
            program_version: "0.1.0".into(),
        };
        body.program = "p".repeat(MAX_VERSION_FIELD_BYTES + 1);
        assert!(body.check_outbound().is_err());
    }

    #[test]
    fn refresh_message_parses() {
        let parsed = parse_frame(br#"{"type":"refresh","body":{"mci":42}}"#).unwrap();
        assert_eq!(parsed, PeerMessage::Refresh { mci: 42 });
    }
}
