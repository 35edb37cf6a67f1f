/// The number of characters of a CNP.
pub const CNP_LENGTH: usize = 13;

/// The positional weights applied to the first twelve digits, also known as the control key `279146358279`.
pub const CONTROL_WEIGHTS: [u32; 12] = [2, 7, 9, 1, 4, 6, 3, 5, 8, 2, 7, 9];

/// Decide whether the given string is a structurally valid CNP.
///
/// The input must consist of exactly 13 ASCII digits, and its last digit must be equal to
/// the check digit computed from the other twelve (see `check_digit`).
pub fn validate(cnp: &str) -> bool {
    let bytes = cnp.as_bytes();
    if bytes.len() != CNP_LENGTH || !bytes.iter().all(u8::is_ascii_digit) {
        return false;
    }

    let mut digits = [0u32; CNP_LENGTH];
    for (digit, byte) in digits.iter_mut().zip(bytes) {
        *digit = u32::from(byte - b'0');
    }

    let mut first_twelve = [0u32; 12];
    first_twelve.copy_from_slice(&digits[..12]);

    check_digit(&first_twelve) == digits[12]
}

/// Compute the expected check digit from the first twelve digits of a CNP.
///
/// The weighted sum is reduced modulo 11, and a remainder of 10 maps to 1.
pub fn check_digit(first_twelve: &[u32; 12]) -> u32 {
    let sum: u32 = first_twelve
        .iter()
        .zip(CONTROL_WEIGHTS.iter())
        .map(|(digit, weight)| digit * weight)
        .sum();

    match sum % 11 {
        10 => 1,
        remainder => remainder,
    }
}

/// Parse the first twelve digits of a CNP prefix and compute its check digit, returning `None`
/// if the prefix is not made of exactly twelve ASCII digits.
pub fn check_digit_for_prefix(prefix: &str) -> Option<u32> {
    let bytes = prefix.as_bytes();
    if bytes.len() != 12 || !bytes.iter().all(u8::is_ascii_digit) {
        return None;
    }

    let mut first_twelve = [0u32; 12];
    for (digit, byte) in first_twelve.iter_mut().zip(bytes) {
        *digit = u32::from(byte - b'0');
    }

    Some(check_digit(&first_twelve))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng as _;

    /// An independent rendition of the checksum which works on the control key as a string.
    fn reference_validate(cnp: &str) -> bool {
        if cnp.len() != 13 || !cnp.chars().all(|character| character.is_ascii_digit()) {
            return false;
        }
        let digits: Vec<u32> = cnp.chars().filter_map(|c| c.to_digit(10)).collect();
        let control_key: Vec<u32> = "279146358279"
            .chars()
            .filter_map(|c| c.to_digit(10))
            .collect();
        let sum: u32 = (0..12).map(|index| digits[index] * control_key[index]).sum();
        let control = sum % 11;
        (if control < 10 { control } else { 1 }) == digits[12]
    }

    #[test]
    fn all_zero_cnp_is_valid() {
        assert!(validate("0000000000000"));
    }

    #[test]
    fn known_vectors() {
        // 1*2 + 8*7 + 0 + 0 + 1*4 + 0 + 1*3 + 2*5 + 2*8 + 1*2 + 1*7 + 4*9 = 136, 136 mod 11 = 4
        assert!(validate("1800101221144"));
        assert!(!validate("1800101221145"));
        assert!(!validate("1800101221140"));
    }

    #[test]
    fn remainder_ten_maps_to_one() {
        // 5*2 = 10, so the remainder is 10 and the expected check digit is 1
        assert_eq!(check_digit_for_prefix("500000000000"), Some(1));
        assert!(validate("5000000000001"));
        assert!(!validate("5000000000000"));
    }

    #[test]
    fn rejects_malformed_input() {
        for input in [
            "",
            "000000000000",
            "00000000000000",
            "180010122114a",
            " 1800101221144",
            "1800101221144 ",
            "18001012211-4",
            "１８００１０１２２１１４４",
        ] {
            assert!(!validate(input), "{:?} should be rejected", input);
        }
    }

    #[test]
    fn prefix_must_be_twelve_digits() {
        assert_eq!(check_digit_for_prefix("18001012211"), None);
        assert_eq!(check_digit_for_prefix("18001012211x"), None);
        assert_eq!(check_digit_for_prefix("180010122114"), Some(4));
    }

    #[test]
    fn matches_reference_on_random_candidates() {
        let mut rng = rand::thread_rng();
        for _ in 0..5000 {
            let candidate: String = (0..13)
                .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
                .collect();
            assert_eq!(
                validate(&candidate),
                reference_validate(&candidate),
                "{}",
                candidate
            );
            // Validation must also be deterministic
            assert_eq!(validate(&candidate), validate(&candidate));
        }
    }

    #[test]
    fn completing_a_prefix_always_yields_a_valid_cnp() {
        let mut rng = rand::thread_rng();
        for _ in 0..500 {
            let prefix: String = (0..12)
                .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
                .collect();
            let digit = check_digit_for_prefix(&prefix).unwrap();
            assert!(validate(&format!("{}{}", prefix, digit)));
        }
    }
}
