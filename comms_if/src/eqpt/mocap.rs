//! # Motion Capture Interface
//!
//! Messages published by the motion-capture gateway. The gateway wraps the tracking system's
//! native client (NatNet) and republishes every rigid body in every frame it receives, plus an
//! occasional description of the server it is connected to.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// TYPES
// ------------------------------------------------------------------------------------------------

/// Identifier of a rigid body as configured in the tracking software.
pub type BodyId = i32;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// One observation of a rigid body.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct RigidBodyFrame {
    /// Rigid body id
    pub id: BodyId,

    /// Position in the tracking system frame.
    ///
    /// Units: meters
    pub position: [f64; 3],

    /// Orientation in the tracking system frame, ordered `[x, y, z, w]`.
    pub orientation: [f64; 4],
}

/// Identity of the tracking server, for diagnostics.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    /// Application name reported by the server (e.g. "Motive")
    pub name: String,

    /// NatNet protocol version of the server
    pub natnet_version: [u8; 4],
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Messages published by the mocap gateway.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum MocapMsg {
    ServerInfo(ServerInfo),
    RigidBody(RigidBodyFrame),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl std::fmt::Display for ServerInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let v = self.natnet_version;
        write!(f, "{} (NatNet {}.{}.{}.{})", self.name, v[0], v[1], v[2], v[3])
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_gateway_message() {
        let msg: MocapMsg = serde_json::from_str(
            r#"{"RigidBody":{"id":5,"position":[0.1,0.2,0.3],"orientation":[0.0,0.0,0.0,1.0]}}"#,
        )
        .unwrap();

        match msg {
            MocapMsg::RigidBody(f) => {
                assert_eq!(f.id, 5);
                assert_eq!(f.position, [0.1, 0.2, 0.3]);
                assert_eq!(f.orientation[3], 1.0);
            }
            m => panic!("Expected a rigid body, got {:?}", m),
        }
    }

    #[test]
    fn test_server_info_display() {
        let info = ServerInfo {
            name: "Motive".into(),
            natnet_version: [4, 0, 0, 0],
        };
        assert_eq!(info.to_string(), "Motive (NatNet 4.0.0.0)");
    }
}
