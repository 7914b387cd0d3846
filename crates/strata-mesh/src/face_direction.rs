//! The six voxel face directions in emission order, with their quad corners
//! and texture mapping.

use glam::{IVec3, Vec2, Vec3};

/// One of the six cardinal directions a voxel face can point.
///
/// The discriminant is the face index written into vertex colours.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FaceDirection {
    /// +Z direction.
    Up = 0,
    /// -Z direction.
    Down = 1,
    /// +Y direction.
    Right = 2,
    /// -Y direction.
    Left = 3,
    /// +X direction.
    Front = 4,
    /// -X direction.
    Back = 5,
}

impl FaceDirection {
    /// All six directions in emission order.
    pub const ALL: [FaceDirection; 6] = [
        Self::Up,
        Self::Down,
        Self::Right,
        Self::Left,
        Self::Front,
        Self::Back,
    ];

    /// Integer offset to the neighbouring voxel.
    pub fn offset(self) -> IVec3 {
        match self {
            Self::Up => IVec3::new(0, 0, 1),
            Self::Down => IVec3::new(0, 0, -1),
            Self::Right => IVec3::new(0, 1, 0),
            Self::Left => IVec3::new(0, -1, 0),
            Self::Front => IVec3::new(1, 0, 0),
            Self::Back => IVec3::new(-1, 0, 0),
        }
    }

    /// Unit normal.
    pub fn normal(self) -> Vec3 {
        self.offset().as_vec3()
    }

    /// Tangent perpendicular to the normal.
    pub fn tangent(self) -> Vec3 {
        let n = self.normal();
        let reference = if n.x.abs() < f32::EPSILON && n.z.abs() < f32::EPSILON {
            Vec3::X
        } else {
            Vec3::Y
        };
        n.cross(reference).normalize_or_zero()
    }

    /// Returns the opposite face direction.
    pub fn opposite(self) -> Self {
        match self {
            Self::Up => Self::Down,
            Self::Down => Self::Up,
            Self::Right => Self::Left,
            Self::Left => Self::Right,
            Self::Front => Self::Back,
            Self::Back => Self::Front,
        }
    }

    /// Returns the direction index (0-5).
    pub fn index(self) -> usize {
        self as usize
    }

    /// Quad corners on a unit voxel centred at the origin.
    pub fn corners(self) -> [Vec3; 4] {
        const H: f32 = 0.5;
        match self {
            Self::Up => [
                Vec3::new(-H, H, H),
                Vec3::new(-H, -H, H),
                Vec3::new(H, -H, H),
                Vec3::new(H, H, H),
            ],
            Self::Down => [
                Vec3::new(H, -H, -H),
                Vec3::new(-H, -H, -H),
                Vec3::new(-H, H, -H),
                Vec3::new(H, H, -H),
            ],
            Self::Right => [
                Vec3::new(H, H, H),
                Vec3::new(H, H, -H),
                Vec3::new(-H, H, -H),
                Vec3::new(-H, H, H),
            ],
            Self::Left => [
                Vec3::new(-H, -H, H),
                Vec3::new(-H, -H, -H),
                Vec3::new(H, -H, -H),
                Vec3::new(H, -H, H),
            ],
            Self::Front => [
                Vec3::new(H, -H, H),
                Vec3::new(H, -H, -H),
                Vec3::new(H, H, -H),
                Vec3::new(H, H, H),
            ],
            Self::Back => [
                Vec3::new(-H, H, H),
                Vec3::new(-H, H, -H),
                Vec3::new(-H, -H, -H),
                Vec3::new(-H, -H, H),
            ],
        }
    }

    /// Texture coordinate of corner `corner` (0-3).
    ///
    /// Each face projects its corners onto the two axes spanning it, then
    /// the result is recentred into `[0, 1]` and flipped.
    pub fn uv(self, corner: usize) -> Vec2 {
        let c = self.corners()[corner & 3];
        let projected = match self {
            Self::Up => Vec2::new(c.x, c.y),
            Self::Down => Vec2::new(c.x, -c.y),
            Self::Right => Vec2::new(c.x, c.z),
            Self::Left => Vec2::new(-c.x, c.z),
            Self::Front => Vec2::new(c.y, c.z),
            Self::Back => Vec2::new(-c.y, c.z),
        };
        -(projected - Vec2::splat(0.5))
    }
}
