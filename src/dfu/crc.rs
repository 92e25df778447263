//! CRC16 used by Nordic bootloaders to authenticate the firmware image.

/// Seed the bootloader uses for the image checksum.
pub const CRC16_SEED: u16 = 0xFFFF;

/// Calculate CRC16 using Nordic's byte-wise algorithm.
///
/// Arithmetic stays in `u16`, so bits shifted past bit 15 are dropped the
/// same way the bootloader's own implementation drops them.
pub fn calc_crc16(data: &[u8], initial: u16) -> u16 {
    let mut crc = initial;

    for &byte in data {
        crc = (crc >> 8) | (crc << 8);
        crc ^= u16::from(byte);
        crc ^= (crc & 0xFF) >> 4;
        crc ^= (crc << 8) << 4;
        crc ^= ((crc & 0xFF) << 4) << 1;
    }

    crc
}

/// CRC16 of a whole firmware image with the standard seed.
pub fn image_crc16(data: &[u8]) -> u16 {
    calc_crc16(data, CRC16_SEED)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_buffer_returns_seed() {
        assert_eq!(image_crc16(&[]), 0xFFFF);
        assert_eq!(calc_crc16(&[], 0x1234), 0x1234);
    }

    #[test]
    fn test_golden_vectors() {
        assert_eq!(image_crc16(&[0x00]), 0xE1F0);
        assert_eq!(image_crc16(&[0x01, 0x02, 0x03, 0x04]), 0x89C3);
        assert_eq!(image_crc16(b"123456789"), 0x29B1);
        assert_eq!(calc_crc16(&[0x00], 0x0000), 0x0000);
    }

    #[test]
    fn test_deterministic() {
        let data: Vec<u8> = (0..=255).collect();
        assert_eq!(image_crc16(&data), image_crc16(&data));
    }

    #[test]
    fn test_incremental_matches_whole_buffer() {
        let data: Vec<u8> = (0u8..45).collect();
        let (head, tail) = data.split_at(20);
        assert_eq!(calc_crc16(tail, image_crc16(head)), image_crc16(&data));
    }

    #[test]
    fn test_matches_ccitt_false() {
        let data: Vec<u8> = (0..1000u32).map(|i| (i * 31 % 251) as u8).collect();
        assert_eq!(
            image_crc16(&data),
            crc16::State::<crc16::CCITT_FALSE>::calculate(&data)
        );
    }
}
