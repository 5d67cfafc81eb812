/// Little-endian bits of the lowest `width` bits of `value`
pub fn u64_to_bits(value: u64, width: usize) -> impl Iterator<Item = bool> {
    (0..width).map(move |i| i < 64 && (value >> i) & 1 == 1)
}

/// Inverse of [`u64_to_bits`]
pub fn bits_to_u64(bits: impl IntoIterator<Item = bool>) -> u64 {
    bits.into_iter()
        .enumerate()
        .fold(0, |acc, (i, bit)| if bit { acc | (1u64 << i) } else { acc })
}

/// Number of bits needed to represent values below `modulus`
pub fn bit_width(modulus: u64) -> u32 {
    64 - modulus.saturating_sub(1).leading_zeros()
}

/// Flattens per-element batches into row-major `{batch_size, element_count}` order
pub fn flatten_batch(elements: &[Vec<u64>]) -> Vec<u64> {
    let element_count = elements.len();
    let batch_size = elements.first().map_or(0, Vec::len);
    let mut flat = vec![0; batch_size * element_count];
    for (i, element) in elements.iter().enumerate() {
        for (b, &value) in element.iter().enumerate() {
            flat[b * element_count + i] = value;
        }
    }
    flat
}

/// Inverse of [`flatten_batch`]
pub fn scatter_batch(flat: &[u64], element_count: usize) -> Vec<Vec<u64>> {
    if element_count == 0 {
        return Vec::new();
    }
    let batch_size = flat.len() / element_count;
    (0..element_count)
        .map(|i| (0..batch_size).map(|b| flat[b * element_count + i]).collect())
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use itertools::Itertools;

    #[test]
    fn test_bits() {
        let bits = u64_to_bits(0b1011, 6).collect_vec();
        assert_eq!(bits, [true, true, false, true, false, false]);
        assert_eq!(bits_to_u64(bits), 0b1011);

        // truncated to width
        assert_eq!(bits_to_u64(u64_to_bits(0xff, 4)), 0xf);
        assert_eq!(bits_to_u64(u64_to_bits(u64::MAX, 64)), u64::MAX);
    }

    #[test]
    fn test_bit_width() {
        assert_eq!(bit_width(2), 1);
        assert_eq!(bit_width(13), 4);
        assert_eq!(bit_width(16), 4);
        assert_eq!(bit_width(17), 5);
        assert_eq!(bit_width(2_147_483_647), 31);
    }

    #[test]
    fn test_flatten_scatter() {
        let elements = vec![vec![1, 2], vec![3, 4], vec![5, 6]];
        let flat = flatten_batch(&elements);
        assert_eq!(flat, [1, 3, 5, 2, 4, 6]);
        assert_eq!(scatter_batch(&flat, 3), elements);

        assert!(flatten_batch(&[]).is_empty());
        assert!(scatter_batch(&[], 0).is_empty());
    }
}
