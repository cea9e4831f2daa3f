use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque handle the mesh transport assigns to a discovered peer.
///
/// Unique per active mesh session, not stable across sessions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerHandle(String);

impl PeerHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerHandle {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier the mesh transport assigns to the local process for the
/// lifetime of one connection. Only used for role election.
///
/// Ordering is plain lexicographic byte order of the underlying string, which
/// is what both peers rely on to agree on a winner.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointId(String);

impl EndpointId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EndpointId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Which side of the radio link this device ends up on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Makes itself discoverable and accepts the radio connection.
    Server,
    /// Scans for the server's radio identity and connects to it.
    Client,
}

impl Role {
    /// Elect the local role from the two endpoint ids.
    ///
    /// The side holding the lexicographically smaller id is the server. Both
    /// peers evaluate this with the arguments swapped and get complementary
    /// answers as long as the ids differ.
    pub fn elect(local: &EndpointId, peer: &EndpointId) -> Self {
        if local < peer {
            Role::Server
        } else {
            Role::Client
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Role::Server => Role::Client,
            Role::Client => Role::Server,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Server => "Server",
            Role::Client => "Client",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One gyroscope reading: angular velocity about the x, y and z axes.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MotionSample {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl MotionSample {
    pub const ZERO: MotionSample = MotionSample {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Raw (unnormalized) dot product with another sample.
    pub fn dot(&self, other: &MotionSample) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }
}

impl From<[f32; 3]> for MotionSample {
    fn from(v: [f32; 3]) -> Self {
        Self::new(v[0], v[1], v[2])
    }
}
