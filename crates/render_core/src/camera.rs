//! View camera: view/projection matrices and frustum culling.
//!
//! Right-handed, column-vector matrices with a [0, 1] depth range
//! (`Mat4::perspective_rh` / `Mat4::orthographic_rh`).

use bevy::math::{Mat4, Vec3, Vec4};

/// Projection kind and parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Projection {
    Perspective {
        /// Vertical field of view in degrees.
        fov_y_degrees: f32,
        aspect: f32,
        near: f32,
        far: f32,
    },
    Orthographic {
        left: f32,
        right: f32,
        bottom: f32,
        top: f32,
        near: f32,
        far: f32,
    },
}

/// A camera with cached matrices and frustum planes.
#[derive(Clone, Debug, PartialEq)]
pub struct Camera {
    eye: Vec3,
    center: Vec3,
    up: Vec3,
    projection: Projection,
    view: Mat4,
    projection_matrix: Mat4,
    view_projection: Mat4,
    /// Left, right, bottom, top, near, far. Inside when `dot(p, xyz) + w >= 0`.
    planes: [Vec4; 6],
}

impl Default for Camera {
    fn default() -> Self {
        let mut camera = Self {
            eye: Vec3::new(0.0, 0.0, 1.0),
            center: Vec3::ZERO,
            up: Vec3::Y,
            projection: Projection::Perspective {
                fov_y_degrees: 45.0,
                aspect: 1.0,
                near: 0.1,
                far: 1000.0,
            },
            view: Mat4::IDENTITY,
            projection_matrix: Mat4::IDENTITY,
            view_projection: Mat4::IDENTITY,
            planes: [Vec4::ZERO; 6],
        };
        camera.update();
        camera
    }
}

impl Camera {
    /// Perspective camera looking from `eye` at `center`.
    pub fn perspective(
        eye: Vec3,
        center: Vec3,
        fov_y_degrees: f32,
        aspect: f32,
        near: f32,
        far: f32,
    ) -> Self {
        let mut camera = Self::default();
        camera.set_perspective(fov_y_degrees, aspect, near, far);
        camera.look_at(eye, center, Vec3::Y);
        camera
    }

    pub fn look_at(&mut self, eye: Vec3, center: Vec3, up: Vec3) {
        self.eye = eye;
        self.center = center;
        self.up = stable_up(center - eye, up);
        self.update();
    }

    pub fn set_perspective(&mut self, fov_y_degrees: f32, aspect: f32, near: f32, far: f32) {
        self.projection = Projection::Perspective {
            fov_y_degrees,
            aspect,
            near,
            far,
        };
        self.update();
    }

    pub fn set_orthographic(
        &mut self,
        left: f32,
        right: f32,
        bottom: f32,
        top: f32,
        near: f32,
        far: f32,
    ) {
        self.projection = Projection::Orthographic {
            left,
            right,
            bottom,
            top,
            near,
            far,
        };
        self.update();
    }

    pub fn eye(&self) -> Vec3 {
        self.eye
    }

    pub fn center(&self) -> Vec3 {
        self.center
    }

    pub fn up(&self) -> Vec3 {
        self.up
    }

    pub fn projection(&self) -> Projection {
        self.projection
    }

    pub fn view_matrix(&self) -> Mat4 {
        self.view
    }

    pub fn projection_matrix(&self) -> Mat4 {
        self.projection_matrix
    }

    pub fn view_projection(&self) -> Mat4 {
        self.view_projection
    }

    pub fn inverse_view_projection(&self) -> Mat4 {
        self.view_projection.inverse()
    }

    pub fn near_plane(&self) -> f32 {
        match self.projection {
            Projection::Perspective { near, .. } | Projection::Orthographic { near, .. } => near,
        }
    }

    pub fn far_plane(&self) -> f32 {
        match self.projection {
            Projection::Perspective { far, .. } | Projection::Orthographic { far, .. } => far,
        }
    }

    /// Conservative box-vs-frustum test. Returns `false` only when the box is
    /// entirely outside at least one plane.
    pub fn test_box_in_frustum(&self, center: Vec3, half_extents: Vec3) -> bool {
        self.planes.iter().all(|plane| {
            let normal = plane.truncate();
            let radius = normal.abs().dot(half_extents.abs());
            normal.dot(center) + plane.w >= -radius
        })
    }

    fn update(&mut self) {
        self.view = Mat4::look_at_rh(self.eye, self.center, self.up);
        self.projection_matrix = match self.projection {
            Projection::Perspective {
                fov_y_degrees,
                aspect,
                near,
                far,
            } => Mat4::perspective_rh(fov_y_degrees.to_radians(), aspect, near, far),
            Projection::Orthographic {
                left,
                right,
                bottom,
                top,
                near,
                far,
            } => Mat4::orthographic_rh(left, right, bottom, top, near, far),
        };
        self.view_projection = self.projection_matrix * self.view;
        self.planes = frustum_planes(&self.view_projection);
    }
}

/// Gribb/Hartmann plane extraction for a [0, 1] depth range.
fn frustum_planes(m: &Mat4) -> [Vec4; 6] {
    let r0 = m.row(0);
    let r1 = m.row(1);
    let r2 = m.row(2);
    let r3 = m.row(3);
    [r3 + r0, r3 - r0, r3 + r1, r3 - r1, r2, r3 - r2]
}

/// Swap the up vector when it is parallel to the view direction.
fn stable_up(forward: Vec3, up: Vec3) -> Vec3 {
    if forward.normalize_or_zero().cross(up.normalize_or_zero()).length_squared() < 1e-8 {
        if up.normalize_or_zero().dot(Vec3::Z).abs() > 0.9 {
            Vec3::Y
        } else {
            Vec3::Z
        }
    } else {
        up
    }
}
