use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const HEAD_PATH: &str = "/user/head";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Eye {
    Left = 0,
    Right = 1,
}

impl Eye {
    pub const BOTH: [Eye; 2] = [Eye::Left, Eye::Right];

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Orientation and position in the device's local, floor-relative frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub orientation: Quat,
    pub position: Vec3,
}

impl Default for Pose {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Pose {
    pub const IDENTITY: Pose = Pose {
        orientation: Quat::IDENTITY,
        position: Vec3::ZERO,
    };

    pub fn new(orientation: Quat, position: Vec3) -> Self {
        Self {
            orientation: orientation.normalize(),
            position,
        }
    }
}

/// Half-angles of an eye's field of view, in radians.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Fov {
    pub left: f32,
    pub right: f32,
    pub up: f32,
    pub down: f32,
}

impl Fov {
    /// Converts lens angles reported as `[left, right, bottom, top]` (all
    /// positive) into signed half-angles.
    pub fn from_lens_angles(angles: [f32; 4]) -> Self {
        Self {
            left: -angles[0],
            right: angles[1],
            up: angles[3],
            down: -angles[2],
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ViewParams {
    pub pose: Pose,
    pub fov: Fov,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeviceMotion {
    pub device_id: u64,
    pub pose: Pose,
}

impl DeviceMotion {
    pub fn head(pose: Pose) -> Self {
        Self {
            device_id: head_id(),
            pose,
        }
    }
}

/// Stable identifier for a device path, shared with the streaming peer.
pub fn path_string_to_id(path: &str) -> u64 {
    let digest = Sha256::digest(path.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

pub fn head_id() -> u64 {
    static HEAD_ID: std::sync::OnceLock<u64> = std::sync::OnceLock::new();
    *HEAD_ID.get_or_init(|| path_string_to_id(HEAD_PATH))
}
