/// Seed of the hash used to assign partition keys to partitions.
///
/// Changing it reassigns keys to different partitions.
pub const PARTITION_SEED: u32 = 0;

/// MurmurHash3, x86 32-bit variant.
pub fn murmur3_32(data: &[u8], seed: u32) -> u32 {
    const C1: u32 = 0xcc9e_2d51;
    const C2: u32 = 0x1b87_3593;

    let mut hash: u32 = seed;
    let mut chunks = data.chunks_exact(4);

    for chunk in &mut chunks {
        let k: u32 = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        hash ^= scramble(k, C1, C2);
        hash = hash.rotate_left(13).wrapping_mul(5).wrapping_add(0xe654_6b64);
    }

    let tail: &[u8] = chunks.remainder();
    if !tail.is_empty() {
        let k: u32 = tail
            .iter()
            .enumerate()
            .fold(0, |k, (index, byte)| k | (u32::from(*byte) << (8 * index)));
        hash ^= scramble(k, C1, C2);
    }

    hash ^= data.len() as u32;
    hash ^= hash >> 16;
    hash = hash.wrapping_mul(0x85eb_ca6b);
    hash ^= hash >> 13;
    hash = hash.wrapping_mul(0xc2b2_ae35);
    hash ^= hash >> 16;
    hash
}

fn scramble(k: u32, c1: u32, c2: u32) -> u32 {
    k.wrapping_mul(c1).rotate_left(15).wrapping_mul(c2)
}

/// Partition, out of `partitions`, the given key is assigned to.
pub fn partition_for(key: &str, partitions: usize) -> usize {
    if partitions <= 1 {
        return 0;
    }
    murmur3_32(key.as_bytes(), PARTITION_SEED) as usize % partitions
}
