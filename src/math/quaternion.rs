use log::debug;
use nalgebra::{Matrix4, Quaternion, Unit, UnitQuaternion, Vector3, Vector4};
use thiserror::Error;

/// Below this dot product two directions are treated as antiparallel
const ANTIPARALLEL_DOT: f64 = -0.999999;

/// Minimum norm for a vector to define a direction
const MIN_AXIS_NORM: f64 = 1e-6;

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum MathError {
    #[error("Cannot average an empty set of quaternions")]
    InsufficientData,

    #[error("Vector has zero length and does not define a direction")]
    ZeroVector,
}

/// Mean orientation of a set of unit quaternions.
///
/// Builds `M = 1/n * sum(q q^T)` and returns the eigenvector of its largest
/// eigenvalue. `q` and `-q` contribute the same outer product, so the result
/// does not depend on which hemisphere each sample was reported in. The sign
/// of the result is fixed so that `w >= 0`.
pub fn average(samples: &[UnitQuaternion<f64>]) -> Result<UnitQuaternion<f64>, MathError> {
    if samples.is_empty() {
        return Err(MathError::InsufficientData);
    }

    let m: Matrix4<f64> = samples
        .iter()
        .map(|q| q.coords * q.coords.transpose())
        .sum::<Matrix4<f64>>()
        / samples.len() as f64;

    let eigen = m.symmetric_eigen();
    let principal: Vector4<f64> = eigen
        .eigenvectors
        .column(eigen.eigenvalues.imax())
        .clone_owned();

    Ok(canonical(UnitQuaternion::from_quaternion(
        Quaternion::from_vector(principal),
    )))
}

/// Shortest rotation mapping the direction of `v0` onto the direction of `v1`.
///
/// Antiparallel inputs have no unique shortest arc. In that case the result is
/// a 180° rotation about an axis orthogonal to `v0`, built from world X (or
/// world Y when `v0` is colinear with X).
pub fn rotation_between(
    v0: &Vector3<f64>,
    v1: &Vector3<f64>,
) -> Result<UnitQuaternion<f64>, MathError> {
    let v0 = Unit::try_new(*v0, MIN_AXIS_NORM)
        .ok_or(MathError::ZeroVector)?
        .into_inner();
    let v1 = Unit::try_new(*v1, MIN_AXIS_NORM)
        .ok_or(MathError::ZeroVector)?
        .into_inner();

    let d = v0.dot(&v1);

    if d < ANTIPARALLEL_DOT {
        debug!("rotation_between: antiparallel vectors (dot = {d:.8}), using orthogonal axis");

        let axis = Unit::try_new(Vector3::x().cross(&v0), MIN_AXIS_NORM)
            .or_else(|| Unit::try_new(Vector3::y().cross(&v0), MIN_AXIS_NORM))
            .ok_or(MathError::ZeroVector)?;

        return Ok(UnitQuaternion::from_axis_angle(&axis, std::f64::consts::PI));
    }

    let axis = v0.cross(&v1);
    Ok(UnitQuaternion::from_quaternion(Quaternion::new(
        1.0 + d,
        axis.x,
        axis.y,
        axis.z,
    )))
}

/// Rotation vector (axis * angle) of `dq`, or `None` when the rotation is too
/// small for its axis to be meaningful.
pub fn rotation_vector(dq: &UnitQuaternion<f64>) -> Option<Vector3<f64>> {
    let v = dq.imag();
    let norm = v.norm();

    if norm > MIN_AXIS_NORM {
        let angle = 2.0 * norm.atan2(dq.scalar());
        Some(v / norm * angle)
    } else {
        None
    }
}

/// Roll, pitch and yaw in radians (rotation order Z-Y-X, roll about X)
pub fn roll_pitch_yaw(q: &UnitQuaternion<f64>) -> (f64, f64, f64) {
    q.euler_angles()
}

/// Flips `q` into the `w >= 0` hemisphere. Same rotation, stable sign.
pub fn canonical(q: UnitQuaternion<f64>) -> UnitQuaternion<f64> {
    if q.scalar() < 0.0 {
        UnitQuaternion::new_unchecked(-q.into_inner())
    } else {
        q
    }
}

/// Row-major rotation matrix of `q`
pub fn rotation_matrix(q: &UnitQuaternion<f64>) -> [[f64; 3]; 3] {
    let m = q.to_rotation_matrix().into_inner();
    [
        [m[(0, 0)], m[(0, 1)], m[(0, 2)]],
        [m[(1, 0)], m[(1, 1)], m[(1, 2)]],
        [m[(2, 0)], m[(2, 1)], m[(2, 2)]],
    ]
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use rand::{Rng, SeedableRng};
    use rand_xoshiro::Xoshiro256StarStar;

    use super::*;

    fn random_unit_vector(rng: &mut impl Rng) -> Vector3<f64> {
        loop {
            let v = Vector3::new(
                rng.random_range(-1.0..1.0),
                rng.random_range(-1.0..1.0),
                rng.random_range(-1.0..1.0),
            );
            if v.norm() > 0.1 {
                return v.normalize();
            }
        }
    }

    fn random_quaternion(rng: &mut impl Rng) -> UnitQuaternion<f64> {
        UnitQuaternion::from_euler_angles(
            rng.random_range(-3.0..3.0),
            rng.random_range(-1.5..1.5),
            rng.random_range(-3.0..3.0),
        )
    }

    #[test]
    fn test_average_empty() {
        assert_eq!(average(&[]), Err(MathError::InsufficientData));
    }

    #[test]
    fn test_average_identical() {
        let mut rng = Xoshiro256StarStar::seed_from_u64(17);

        for n in [1, 3, 10] {
            let q = random_quaternion(&mut rng);
            let avg = average(&vec![q; n]).unwrap();

            assert!(avg.angle_to(&q) < 1e-6);
            assert_relative_eq!(avg.norm(), 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_average_double_cover() {
        let q = UnitQuaternion::from_euler_angles(0.2, -0.4, 1.1);
        let neg = UnitQuaternion::new_unchecked(-q.into_inner());

        let avg = average(&[q, neg, q, neg]).unwrap();

        assert!(avg.angle_to(&q) < 1e-6);
    }

    #[test]
    fn test_average_order_invariant() {
        let mut rng = Xoshiro256StarStar::seed_from_u64(3);
        let center = random_quaternion(&mut rng);

        let mut samples: Vec<_> = (0..20)
            .map(|_| {
                let jitter = UnitQuaternion::from_scaled_axis(random_unit_vector(&mut rng) * 0.05);
                jitter * center
            })
            .collect();

        let a = average(&samples).unwrap();
        samples.reverse();
        samples.rotate_left(7);
        let b = average(&samples).unwrap();

        assert!(a.angle_to(&b) < 1e-6);
        assert!(a.angle_to(&center) < 0.05);
    }

    #[test]
    fn test_average_symmetric_spread() {
        let center = UnitQuaternion::from_euler_angles(0.1, 0.2, 0.3);
        let a = UnitQuaternion::from_euler_angles(0.1, 0.0, 0.0) * center;
        let b = UnitQuaternion::from_euler_angles(-0.1, 0.0, 0.0) * center;

        let avg = average(&[a, b]).unwrap();

        assert!(avg.angle_to(&center) < 1e-6);
    }

    #[test]
    fn test_rotation_between_random() {
        let mut rng = Xoshiro256StarStar::seed_from_u64(42);

        for _ in 0..200 {
            let v0 = random_unit_vector(&mut rng);
            let v1 = random_unit_vector(&mut rng);

            let q = rotation_between(&(v0 * 3.0), &v1).unwrap();

            assert_relative_eq!(q * v0, v1, epsilon = 1e-6);
            assert_relative_eq!(q.norm(), 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_rotation_between_antiparallel() {
        let mut rng = Xoshiro256StarStar::seed_from_u64(5);
        let mut inputs: Vec<Vector3<f64>> = (0..50).map(|_| random_unit_vector(&mut rng)).collect();
        inputs.push(Vector3::x());
        inputs.push(-Vector3::x());

        for v0 in inputs {
            let q = rotation_between(&v0, &-v0).unwrap();

            assert_relative_eq!(q.angle(), std::f64::consts::PI, epsilon = 1e-9);
            assert_relative_eq!(q * v0, -v0, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_rotation_between_parallel() {
        let v = Vector3::new(0.3, -0.2, 0.9);
        let q = rotation_between(&v, &(v * 2.0)).unwrap();

        assert!(q.angle() < 1e-6);
    }

    #[test]
    fn test_rotation_between_zero() {
        assert_eq!(
            rotation_between(&Vector3::zeros(), &Vector3::x()),
            Err(MathError::ZeroVector)
        );
        assert_eq!(
            rotation_between(&Vector3::x(), &Vector3::zeros()),
            Err(MathError::ZeroVector)
        );
    }

    #[test]
    fn test_rotation_vector() {
        let axis = Vector3::new(0.0, 0.6, 0.8);
        let dq = UnitQuaternion::from_scaled_axis(axis * 0.3);

        assert_relative_eq!(rotation_vector(&dq).unwrap(), axis * 0.3, epsilon = 1e-12);
        assert_eq!(rotation_vector(&UnitQuaternion::identity()), None);
    }

    #[test]
    fn test_roll_pitch_yaw() {
        let q = UnitQuaternion::from_euler_angles(0.4, -0.3, 1.2);
        let (roll, pitch, yaw) = roll_pitch_yaw(&q);

        assert_relative_eq!(roll, 0.4, epsilon = 1e-12);
        assert_relative_eq!(pitch, -0.3, epsilon = 1e-12);
        assert_relative_eq!(yaw, 1.2, epsilon = 1e-12);
    }

    #[test]
    fn test_rotation_matrix_rows() {
        let q = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), std::f64::consts::FRAC_PI_2);
        let m = rotation_matrix(&q);

        assert_relative_eq!(m[0][1], -1.0, epsilon = 1e-12);
        assert_relative_eq!(m[1][0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(m[2][2], 1.0, epsilon = 1e-12);
    }
}
