//! Client view transformation

use nalgebra::{Matrix4, Point3, Vector3};

/// Camera orientation requested by a client.
///
/// On the wire the matrix travels as 16 `f32` values in row-major order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewTransform {
    matrix: Matrix4<f32>,
}

impl Default for ViewTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl ViewTransform {
    pub fn identity() -> Self {
        Self {
            matrix: Matrix4::identity(),
        }
    }

    pub fn from_row_major(values: &[f32; 16]) -> Self {
        Self {
            matrix: Matrix4::from_row_slice(values),
        }
    }

    pub fn to_row_major(&self) -> [f32; 16] {
        let mut out = [0.0f32; 16];
        for row in 0..4 {
            for col in 0..4 {
                out[row * 4 + col] = self.matrix[(row, col)];
            }
        }
        out
    }

    /// Rotation of `angle` radians about `axis`
    pub fn rotation(axis: Vector3<f32>, angle: f32) -> Self {
        Self {
            matrix: Matrix4::new_rotation(axis.normalize() * angle),
        }
    }

    pub fn with_translation(mut self, offset: Vector3<f32>) -> Self {
        self.matrix = Matrix4::new_translation(&offset) * self.matrix;
        self
    }

    pub fn transform_point(&self, p: [f32; 3]) -> [f32; 3] {
        let q = self.matrix.transform_point(&Point3::new(p[0], p[1], p[2]));
        [q.x, q.y, q.z]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_major_layout() {
        let mut values = [0.0f32; 16];
        values[0] = 1.0;
        values[5] = 1.0;
        values[10] = 1.0;
        values[15] = 1.0;
        values[3] = 7.0; // x translation in row-major form

        let view = ViewTransform::from_row_major(&values);
        assert_eq!(view.transform_point([0.0, 0.0, 0.0]), [7.0, 0.0, 0.0]);
        assert_eq!(view.to_row_major(), values);
    }

    #[test]
    fn half_turn_about_y_flips_depth() {
        let view = ViewTransform::rotation(Vector3::y(), std::f32::consts::PI);
        let p = view.transform_point([0.0, 0.0, 1.0]);
        assert!((p[2] + 1.0).abs() < 1e-5);
    }
}
