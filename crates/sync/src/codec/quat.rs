//! Smallest-three compression for unit quaternions: one byte naming
//! the largest-magnitude component, then the other three as scaled
//! i16s. On a unit quaternion the non-largest components fit in
//! ±1/sqrt(2), so the scale stretches that range over the full i16.

use super::CodecError;

pub const ENCODED_LEN: usize = 7;

const COMPONENT_SCALE: f32 = 32767.0 * std::f32::consts::SQRT_2;

pub fn encode(quat: [f32; 4]) -> [u8; ENCODED_LEN] {
    let mut largest = 0usize;
    for i in 1..4 {
        if quat[i].abs() > quat[largest].abs() {
            largest = i;
        }
    }

    // q and -q are the same rotation; keep the dropped component
    // non-negative so decode can reconstruct it with a plain sqrt.
    let mut q = quat;
    if q[largest] < 0.0 {
        for c in &mut q {
            *c = -*c;
        }
    }

    let mut out = [0u8; ENCODED_LEN];
    out[0] = largest as u8;

    let mut cursor = 1;
    for (i, &c) in q.iter().enumerate() {
        if i == largest {
            continue;
        }
        let scaled = (c * COMPONENT_SCALE)
            .round()
            .clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        out[cursor..cursor + 2].copy_from_slice(&scaled.to_le_bytes());
        cursor += 2;
    }

    out
}

pub fn decode(bytes: &[u8; ENCODED_LEN]) -> Result<[f32; 4], CodecError> {
    let largest = bytes[0] as usize;
    if largest > 3 {
        return Err(CodecError::InvalidQuaternionIndex(bytes[0]));
    }

    let mut components = [0.0f32; 3];
    for (i, c) in components.iter_mut().enumerate() {
        let offset = 1 + i * 2;
        let raw = i16::from_le_bytes([bytes[offset], bytes[offset + 1]]);
        *c = raw as f32 / COMPONENT_SCALE;
    }

    let sum_sq: f32 = components.iter().map(|c| c * c).sum();
    let reconstructed = (1.0 - sum_sq).max(0.0).sqrt();

    let mut quat = [0.0f32; 4];
    let mut cursor = 0;
    for (i, slot) in quat.iter_mut().enumerate() {
        if i == largest {
            *slot = reconstructed;
        } else {
            *slot = components[cursor];
            cursor += 1;
        }
    }

    Ok(quat)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn norm(q: [f32; 4]) -> f32 {
        q.iter().map(|c| c * c).sum::<f32>().sqrt()
    }

    fn max_component_error(a: [f32; 4], b: [f32; 4]) -> f32 {
        // Compare up to global sign: q and -q are the same rotation.
        let direct = a
            .iter()
            .zip(&b)
            .map(|(x, y)| (x - y).abs())
            .fold(0.0f32, f32::max);
        let flipped = a
            .iter()
            .zip(&b)
            .map(|(x, y)| (x + y).abs())
            .fold(0.0f32, f32::max);
        direct.min(flipped)
    }

    #[test]
    fn ninety_degrees_about_y_roundtrips() {
        let half = std::f32::consts::FRAC_PI_4;
        let q = [0.0, half.sin(), 0.0, half.cos()];

        let decoded = decode(&encode(q)).unwrap();

        assert!(max_component_error(q, decoded) < 1e-3);
        assert!((norm(decoded) - 1.0).abs() < 1e-3);
    }

    #[test]
    fn negative_largest_component_roundtrips() {
        // Same rotation as +w but stored with the sign flipped.
        let angle = 0.3f32;
        let q = [
            -(angle.sin()) * 0.6,
            -(angle.sin()) * 0.8,
            0.0,
            -(angle.cos()),
        ];
        let n = norm(q);
        let q = [q[0] / n, q[1] / n, q[2] / n, q[3] / n];

        let decoded = decode(&encode(q)).unwrap();
        assert!(max_component_error(q, decoded) < 1e-3);
    }

    #[test]
    fn component_error_bound_over_sweep() {
        for i in 0..64 {
            let yaw = i as f32 * 0.17;
            let pitch = (i as f32 * 0.31).sin();
            let q = glam::Quat::from_euler(glam::EulerRot::YXZ, yaw, pitch, yaw * 0.5);
            let q = [q.x, q.y, q.z, q.w];

            let decoded = decode(&encode(q)).unwrap();
            assert!(
                max_component_error(q, decoded) < 1e-3,
                "error too large for {q:?}"
            );
            assert!((norm(decoded) - 1.0).abs() < 1e-3);
        }
    }

    #[test]
    fn bad_index_is_rejected() {
        let mut bytes = encode([0.0, 0.0, 0.0, 1.0]);
        bytes[0] = 9;
        assert!(matches!(
            decode(&bytes),
            Err(CodecError::InvalidQuaternionIndex(9))
        ));
    }
}
