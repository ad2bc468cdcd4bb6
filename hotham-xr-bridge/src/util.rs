use glam::{Affine3A, Mat3, Mat4, Quat, Vec3};
use openxr::sys::{Fovf, Posef, SpaceLocationFlags, ViewStateFlags};

/// The graphics API the projection matrices are built for.
///
/// This only influences the clip space conventions: OpenGL style APIs use a [-1, 1] depth range,
/// everyone else uses [0, 1], and Vulkan additionally has its Y axis pointing down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum GraphicsApi {
    /// Vulkan
    Vulkan,
    /// Desktop OpenGL
    #[default]
    OpenGL,
    /// OpenGL ES
    OpenGLES,
    /// Direct3D
    D3D,
    /// Metal
    Metal,
}

impl GraphicsApi {
    fn has_negative_one_to_one_depth(&self) -> bool {
        matches!(self, GraphicsApi::OpenGL | GraphicsApi::OpenGLES)
    }
}

#[inline]
/// Convert a `Posef` from OpenXR into an [`Affine3A`], scaling the translation by `world_scale`.
///
/// A zero quaternion is how runtimes report "no tracking data", so that returns `None` rather than
/// a degenerate transform.
pub fn transform_from_pose(pose: &Posef, world_scale: f32) -> Option<Affine3A> {
    let o = pose.orientation;
    if o.x == 0. && o.y == 0. && o.z == 0. && o.w == 0. {
        return None;
    }

    let rotation = Quat::from_xyzw(o.x, o.y, o.z, o.w);
    if !rotation.is_finite() {
        return None;
    }

    let translation: Vec3 = mint::Vector3::from(pose.position).into();
    Some(Affine3A::from_rotation_translation(
        rotation.normalize(),
        translation * world_scale,
    ))
}

#[inline]
/// Convert a view matrix (as 16 floats, one row of `m[4][4]` per four floats) into an [`Affine3A`].
///
/// The translation is negated: the input is a view matrix, not a pose.
pub fn transform_from_matrix(matrix: &[f32; 16], world_scale: f32) -> Affine3A {
    let m = |row: usize, col: usize| matrix[row * 4 + col];

    let basis = Mat3::from_cols_array_2d(&[
        [m(0, 0), m(0, 1), m(0, 2)],
        [m(1, 0), m(1, 1), m(1, 2)],
        [m(2, 0), m(2, 1), m(2, 2)],
    ])
    .transpose();
    let origin = Vec3::new(-m(3, 0), -m(3, 1), -m(3, 2)) * world_scale;

    Affine3A::from_mat3_translation(basis, origin)
}

/// Build an off-center perspective projection from the four field of view angles (in radians).
///
/// If `far <= near` the far plane is placed at infinity. The result is column major, ie. `m[12..15]`
/// is the last column.
pub fn create_projection_fov(graphics_api: GraphicsApi, fov: &Fovf, near: f32, far: f32) -> [f32; 16] {
    let tan_left = fov.angle_left.tan();
    let tan_right = fov.angle_right.tan();
    let tan_down = fov.angle_down.tan();
    let tan_up = fov.angle_up.tan();

    let tan_width = tan_right - tan_left;
    let tan_height = if graphics_api == GraphicsApi::Vulkan {
        tan_down - tan_up
    } else {
        tan_up - tan_down
    };
    let offset_z = if graphics_api.has_negative_one_to_one_depth() {
        near
    } else {
        0.
    };

    let mut m = [0.; 16];
    m[0] = 2. / tan_width;
    m[5] = 2. / tan_height;
    m[8] = (tan_right + tan_left) / tan_width;
    m[9] = (tan_up + tan_down) / tan_height;
    m[11] = -1.;

    if far <= near {
        m[10] = -1.;
        m[14] = -(near + offset_z);
    } else {
        m[10] = -(far + offset_z) / (far - near);
        m[14] = -(far * (near + offset_z)) / (far - near);
    }

    m
}

/// Symmetric perspective, used when there's no runtime to ask for a field of view
pub fn fallback_projection(fov_y_degrees: f32, aspect: f32, near: f32, far: f32) -> [f32; 16] {
    Mat4::perspective_rh_gl(fov_y_degrees.to_radians(), aspect, near, far).to_cols_array()
}

/// Check to see if a located space has both a valid position and orientation
pub fn is_space_valid(flags: SpaceLocationFlags) -> bool {
    flags.contains(SpaceLocationFlags::POSITION_VALID)
        && flags.contains(SpaceLocationFlags::ORIENTATION_VALID)
}

/// Check to see if the current Xr View is valid
pub fn is_view_valid(view_flags: ViewStateFlags) -> bool {
    view_flags.contains(ViewStateFlags::POSITION_VALID)
        && view_flags.contains(ViewStateFlags::ORIENTATION_VALID)
}
