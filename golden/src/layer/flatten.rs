use crate::tensor::Tensor3;

/// Linearizes a map channel-major, then row, then column.
///
/// Element `[c][y][x]` lands at `c * rows * cols + y * cols + x`; the fc1
/// weight file is laid out against this order.
pub fn flatten<T: Copy>(input: Tensor3<T>) -> Vec<T> {
    input.into_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::FeatureMap;

    #[test]
    fn channel_major_order() {
        let map = FeatureMap::from_vec(2, 1, 2, vec![1, 2, 3, 4]).unwrap();
        assert_eq!(flatten(map), vec![1, 2, 3, 4]);
    }

    #[test]
    fn matches_index_formula() {
        let mut map = FeatureMap::zeros(3, 2, 4);
        map.set(2, 1, 3, 42);
        map.set(1, 0, 2, -7);
        let flat = flatten(map);
        assert_eq!(flat[2 * 2 * 4 + 4 + 3], 42);
        assert_eq!(flat[2 * 4 + 2], -7);
        assert_eq!(flat.len(), 24);
    }
}
