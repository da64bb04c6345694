use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::models::ElementType;
use crate::runtime::{HostTensor, TensorData};

/// Builds a random tensor of the given shape and element type.
///
/// Floats are uniform in [0, 1), 8-bit integers cover their full range and
/// int32 values stay in [0, 255] like pixel data. Returns `None` for element
/// types the runtimes cannot bind.
pub fn synthetic_input(shape: &[usize], element_type: &ElementType, seed: u64) -> Option<HostTensor> {
    let len: usize = shape.iter().product();
    let mut rng = StdRng::seed_from_u64(seed);

    let data = match element_type {
        ElementType::Float32 => TensorData::F32((0..len).map(|_| rng.random::<f32>()).collect()),
        ElementType::UInt8 => TensorData::U8((0..len).map(|_| rng.random::<u8>()).collect()),
        ElementType::Int8 => TensorData::I8((0..len).map(|_| rng.random::<i8>()).collect()),
        ElementType::Int32 => {
            TensorData::I32((0..len).map(|_| rng.random_range(0..=255)).collect())
        }
        ElementType::Other(_) => return None,
    };

    Some(HostTensor {
        shape: shape.to_vec(),
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_input_is_in_unit_interval() {
        let t = synthetic_input(&[1, 8, 8, 3], &ElementType::Float32, 42).unwrap();
        assert_eq!(t.shape, vec![1, 8, 8, 3]);
        assert_eq!(t.len(), 192);
        let TensorData::F32(values) = &t.data else {
            panic!("expected f32 data");
        };
        assert!(values.iter().all(|v| (0.0..1.0).contains(v)));
    }

    #[test]
    fn same_seed_gives_same_tensor() {
        let a = synthetic_input(&[2, 3], &ElementType::UInt8, 7).unwrap();
        let b = synthetic_input(&[2, 3], &ElementType::UInt8, 7).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn int32_input_stays_in_pixel_range() {
        let t = synthetic_input(&[64], &ElementType::Int32, 1).unwrap();
        let TensorData::I32(values) = &t.data else {
            panic!("expected i32 data");
        };
        assert!(values.iter().all(|v| (0..=255).contains(v)));
    }

    #[test]
    fn unknown_element_type_is_rejected() {
        assert!(synthetic_input(&[1], &ElementType::Other("bool".to_string()), 0).is_none());
    }

    #[test]
    fn zero_sized_dimension_gives_empty_tensor() {
        let t = synthetic_input(&[1, 0, 3], &ElementType::Int8, 0).unwrap();
        assert!(t.is_empty());
    }
}
