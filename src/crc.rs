//! CRC-16/Modbus as appended to every RTU frame.
//!
//! Initial value `0xFFFF`, reflected polynomial `0xA001`. The checksum is
//! transmitted low byte first.

/// The reflected Modbus polynomial.
pub const POLYNOMIAL: u16 = 0xA001;
/// Accumulator start value.
pub const INITIAL_VALUE: u16 = 0xFFFF;

/// Computes the Modbus CRC-16 over `data`.
///
/// # Examples
///
/// ```
/// use mbterm_lib::crc::crc16;
///
/// assert_eq!(crc16(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x0A]), 0xCDC5);
/// ```
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc = INITIAL_VALUE;
    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ POLYNOMIAL;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// Returns the CRC of `data` in wire order (low byte first).
pub fn crc16_bytes(data: &[u8]) -> [u8; 2] {
    crc16(data).to_le_bytes()
}

/// Checks the trailing two CRC bytes of a complete frame.
///
/// Frames shorter than three bytes can never carry a valid checksum.
pub fn check_crc(frame: &[u8]) -> bool {
    if frame.len() < 3 {
        return false;
    }
    let (body, tail) = frame.split_at(frame.len() - 2);
    crc16(body) == u16::from_le_bytes([tail[0], tail[1]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_is_initial_value() {
        assert_eq!(crc16(&[]), 0xFFFF);
    }

    #[test]
    fn reference_vectors() {
        // Read 10 holding registers from slave 1.
        assert_eq!(crc16(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x0A]), 0xCDC5);
        assert_eq!(
            crc16_bytes(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x0A]),
            [0xC5, 0xCD]
        );
        // Illegal data address exception for function 0x03.
        assert_eq!(crc16_bytes(&[0x01, 0x83, 0x02]), [0xC0, 0xF1]);
    }

    #[test]
    fn check_crc_accepts_valid_frame() {
        assert!(check_crc(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x0A, 0xC5, 0xCD]));
        assert!(check_crc(&[0x01, 0x83, 0x02, 0xC0, 0xF1]));
    }

    #[test]
    fn check_crc_rejects_short_frames() {
        assert!(!check_crc(&[]));
        assert!(!check_crc(&[0xFF, 0xFF]));
    }

    #[test]
    fn every_single_bit_flip_is_detected() {
        let frame = [0x01, 0x03, 0x00, 0x00, 0x00, 0x0A, 0xC5, 0xCD];
        for byte in 0..frame.len() {
            for bit in 0..8 {
                let mut corrupted = frame;
                corrupted[byte] ^= 1 << bit;
                assert!(
                    !check_crc(&corrupted),
                    "flip of bit {bit} in byte {byte} went undetected"
                );
            }
        }
    }
}
