use bytemuck::{Pod, Zeroable};
pub use ultraviolet as uv;
pub use uv::Lerp;

pub type Vec2 = uv::Vec2;
pub type Vec3 = uv::Vec3;
pub type Vec4 = uv::Vec4;

pub type Mat3 = uv::Mat3;
pub type Mat4 = uv::Mat4;

pub type Rotor3 = uv::Rotor3;
pub type Bivec3 = uv::Bivec3;

/// Affine transform stored as 3 rows of 4, the layout used by ray tracing instances.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Zeroable, Pod)]
pub struct TransposedTransform3([f32; 12]);

impl TransposedTransform3 {
    pub fn identity() -> Self {
        Self::from_mat4(&Mat4::identity())
    }

    /// Drops the projective row of a column-major matrix.
    pub fn from_mat4(m: &Mat4) -> Self {
        let c = &m.cols;
        Self([
            c[0].x, c[1].x, c[2].x, c[3].x, //
            c[0].y, c[1].y, c[2].y, c[3].y, //
            c[0].z, c[1].z, c[2].z, c[3].z,
        ])
    }

    pub fn into_mat4(self) -> Mat4 {
        let r = &self.0;
        Mat4::new(
            Vec4::new(r[0], r[4], r[8], 0.0),
            Vec4::new(r[1], r[5], r[9], 0.0),
            Vec4::new(r[2], r[6], r[10], 0.0),
            Vec4::new(r[3], r[7], r[11], 1.0),
        )
    }

    pub fn rows(&self) -> &[f32; 12] {
        &self.0
    }
}

impl From<Mat4> for TransposedTransform3 {
    fn from(m: Mat4) -> Self {
        Self::from_mat4(&m)
    }
}

pub trait Mat4Ext {
    fn from_translation_rotation_scale(translation: Vec3, rotation: Rotor3, scale: Vec3) -> Self;
}

impl Mat4Ext for Mat4 {
    fn from_translation_rotation_scale(translation: Vec3, rotation: Rotor3, scale: Vec3) -> Self {
        let r = rotation.into_matrix();
        Mat4::new(
            (r.cols[0] * scale.x).into_homogeneous_vector(),
            (r.cols[1] * scale.y).into_homogeneous_vector(),
            (r.cols[2] * scale.z).into_homogeneous_vector(),
            translation.into_homogeneous_point(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn transposed_transform_keeps_translation_in_last_column() {
        let m = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));
        let t = TransposedTransform3::from_mat4(&m);
        assert_eq!(
            t.rows(),
            &[1.0, 0.0, 0.0, 1.0, 0.0, 1.0, 0.0, 2.0, 0.0, 0.0, 1.0, 3.0]
        );
        assert_eq!(t.into_mat4(), m);
    }

    #[test]
    fn trs_applies_scale_then_rotation_then_translation() {
        let m = Mat4::from_translation_rotation_scale(
            Vec3::new(0.0, 0.0, 5.0),
            Rotor3::from_rotation_xy(std::f32::consts::FRAC_PI_2),
            Vec3::broadcast(2.0),
        );
        let p = m.transform_point3(Vec3::unit_x());
        assert_relative_eq!(p.x, 0.0, epsilon = 1.0e-5);
        assert_relative_eq!(p.y, 2.0, epsilon = 1.0e-5);
        assert_relative_eq!(p.z, 5.0, epsilon = 1.0e-5);
    }
}
