//! Anatomical tooth numbering (FDI two-digit notation).
//!
//! A treatment record whose tooth number falls outside every quadrant range
//! is corrupt. The live store rejects such numbers on create; existing bad
//! rows are a maintenance concern, not silently dropped at read time.

/// Permanent dentition quadrant ranges.
pub const PERMANENT_RANGES: [(u8, u8); 4] = [(11, 18), (21, 28), (31, 38), (41, 48)];

/// Primary (deciduous) dentition quadrant ranges.
pub const PRIMARY_RANGES: [(u8, u8); 4] = [(51, 55), (61, 65), (71, 75), (81, 85)];

pub fn is_permanent_tooth(number: u8) -> bool {
    PERMANENT_RANGES
        .iter()
        .any(|&(lo, hi)| (lo..=hi).contains(&number))
}

pub fn is_primary_tooth(number: u8) -> bool {
    PRIMARY_RANGES
        .iter()
        .any(|&(lo, hi)| (lo..=hi).contains(&number))
}

pub fn is_valid_tooth_number(number: u8) -> bool {
    is_permanent_tooth(number) || is_primary_tooth(number)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permanent_range_boundaries() {
        assert!(is_valid_tooth_number(11));
        assert!(is_valid_tooth_number(18));
        assert!(is_valid_tooth_number(48));
        assert!(!is_valid_tooth_number(19));
        assert!(!is_valid_tooth_number(10));
        assert!(!is_valid_tooth_number(49));
    }

    #[test]
    fn primary_range_boundaries() {
        assert!(is_valid_tooth_number(55));
        assert!(is_valid_tooth_number(51));
        assert!(is_valid_tooth_number(85));
        assert!(!is_valid_tooth_number(56));
        assert!(!is_valid_tooth_number(86));
        assert!(!is_valid_tooth_number(50));
    }

    #[test]
    fn primary_and_permanent_do_not_overlap() {
        for n in 0..=u8::MAX {
            assert!(
                !(is_permanent_tooth(n) && is_primary_tooth(n)),
                "tooth {n} classified as both dentitions"
            );
        }
    }

    #[test]
    fn zero_and_out_of_band_numbers_invalid() {
        for n in [0, 1, 9, 29, 30, 39, 40, 66, 70, 76, 80, 99, 255] {
            assert!(!is_valid_tooth_number(n), "tooth {n} should be invalid");
        }
    }
}
