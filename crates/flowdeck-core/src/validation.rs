//! Input rules for credentials and account fields.

use lazy_static::lazy_static;
use rand::{seq::SliceRandom, Rng};
use regex::Regex;

use crate::error::{FlowDeckError, Result};

pub const PASSWORD_MIN_LEN: usize = 8;
pub const PASSWORD_MAX_LEN: usize = 128;
pub const SPECIAL_CHARACTERS: &str = "!@#$%^&*(),.?\":{}|<>_-+=[]\\/;'`~";

const COMMON_PASSWORDS: &[&str] = &[
    "password", "password123", "12345678", "123456789", "1234567890", "qwerty", "abc123",
    "monkey", "1234567", "123456", "111111", "123123", "password1", "qwerty123", "welcome",
    "admin", "letmein", "login", "passw0rd", "pass1234", "dragon", "master", "hello",
    "sunshine", "princess", "football", "iloveyou", "welcome1", "admin123", "root",
    "12341234", "password!", "qwertyuiop", "asdfghjkl", "zxcvbnm", "00000000", "11111111",
    "22222222", "88888888", "99999999", "abc12345", "password12", "test123", "user1234",
    "demo1234",
];

lazy_static! {
    static ref EMAIL_RE: Regex =
        Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").expect("valid email regex");
    static ref HEX_COLOR_RE: Regex = Regex::new(r"^#[0-9a-fA-F]{6}$").expect("valid colour regex");
}

pub fn validate_password_strength(password: &str) -> Result<()> {
    let fail = |msg: &str| Err(FlowDeckError::validation(msg));
    let len = password.chars().count();

    if password.is_empty() {
        return fail("Password is required.");
    }
    if len < PASSWORD_MIN_LEN {
        return fail("Password must be at least 8 characters long.");
    }
    if len > PASSWORD_MAX_LEN {
        return fail("Password must not exceed 128 characters.");
    }
    if !password.chars().any(|c| c.is_ascii_uppercase()) {
        return fail("Password must contain at least one uppercase letter.");
    }
    if !password.chars().any(|c| c.is_ascii_lowercase()) {
        return fail("Password must contain at least one lowercase letter.");
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return fail("Password must contain at least one number.");
    }
    if !password.chars().any(|c| SPECIAL_CHARACTERS.contains(c)) {
        return fail("Password must contain at least one special character.");
    }
    if COMMON_PASSWORDS.contains(&password.to_lowercase().as_str()) {
        return fail("This password is too common. Please choose a more secure password.");
    }
    if has_sequential_pattern(password, 4) {
        return fail("Password contains sequential patterns. Please choose a more complex password.");
    }
    if has_repeated_characters(password, 3) {
        return fail("Password contains too many repeated characters. Please choose a more varied password.");
    }
    Ok(())
}

/// Detects runs like `1234`, `4321`, `abcd` or `DCBA` of at least `min_len` characters.
pub fn has_sequential_pattern(password: &str, min_len: usize) -> bool {
    let chars: Vec<char> = password.to_lowercase().chars().collect();
    if chars.len() < min_len {
        return false;
    }
    chars.windows(min_len).any(|w| {
        let all_digits = w.iter().all(|c| c.is_ascii_digit());
        let all_letters = w.iter().all(|c| c.is_ascii_alphabetic());
        if !all_digits && !all_letters {
            return false;
        }
        let codes: Vec<i32> = w.iter().map(|&c| c as i32).collect();
        let ascending = codes.windows(2).all(|p| p[0] + 1 == p[1]);
        let descending = codes.windows(2).all(|p| p[0] - 1 == p[1]);
        ascending || descending
    })
}

pub fn has_repeated_characters(password: &str, max_repeats: usize) -> bool {
    let mut run = 0;
    let mut prev = None;
    for c in password.chars() {
        if Some(c) == prev {
            run += 1;
        } else {
            run = 1;
            prev = Some(c);
        }
        if run > max_repeats {
            return true;
        }
    }
    false
}

pub fn validate_email(email: &str) -> Result<()> {
    if email.is_empty() {
        return Err(FlowDeckError::validation("Email is required."));
    }
    if !EMAIL_RE.is_match(email) {
        return Err(FlowDeckError::validation("Invalid email format."));
    }
    if email.len() > 254 {
        return Err(FlowDeckError::validation("Email address is too long."));
    }
    Ok(())
}

/// `#rrggbb`, as stored for tags.
pub fn validate_hex_color(color: &str) -> Result<()> {
    if !HEX_COLOR_RE.is_match(color) {
        return Err(FlowDeckError::validation("Colour must look like #1a2b3c."));
    }
    Ok(())
}

/// Trims and requires a non-empty value.
pub fn required<'a>(field: &str, value: &'a str) -> Result<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(FlowDeckError::validation(format!("{field} is required")));
    }
    Ok(trimmed)
}

/// Generates a password that passes [`validate_password_strength`].
pub fn generate_random_password(len: usize) -> String {
    const UPPER: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ";
    const LOWER: &[u8] = b"abcdefghijkmnopqrstuvwxyz";
    const DIGITS: &[u8] = b"23456789";
    const SPECIAL: &[u8] = b"!@#$%^&*-_+=";

    let len = len.clamp(12, PASSWORD_MAX_LEN);
    let mut rng = rand::rng();
    let pools = [UPPER, LOWER, DIGITS, SPECIAL];
    loop {
        let mut bytes: Vec<u8> = pools
            .iter()
            .map(|pool| pool[rng.random_range(0..pool.len())])
            .collect();
        while bytes.len() < len {
            let pool = pools[rng.random_range(0..pools.len())];
            bytes.push(pool[rng.random_range(0..pool.len())]);
        }
        bytes.shuffle(&mut rng);
        let candidate: String = bytes.into_iter().map(char::from).collect();
        if validate_password_strength(&candidate).is_ok() {
            return candidate;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strong_password_passes() {
        assert!(validate_password_strength("Tr0ub4dor&Zeb").is_ok());
    }

    #[test]
    fn each_rule_rejects() {
        for bad in [
            "",
            "Ab1!",
            "alllower1!",
            "ALLUPPER1!",
            "NoDigits!!",
            "NoSpecial12",
            "Passw0rd!x1234",
            "Zyx!abcd9Q",
            "Baaaa1!cQz",
        ] {
            assert!(validate_password_strength(bad).is_err(), "{bad} should fail");
        }
    }

    #[test]
    fn common_passwords_are_rejected() {
        assert!(validate_password_strength("Pass1234").is_err());
        assert!(COMMON_PASSWORDS.contains(&"pass1234"));
    }

    #[test]
    fn sequences_detect_reverse_runs() {
        assert!(has_sequential_pattern("x9876y", 4));
        assert!(has_sequential_pattern("qDCBAq", 4));
        assert!(!has_sequential_pattern("a1b2c3d4", 4));
    }

    #[test]
    fn repeats_allow_three() {
        assert!(!has_repeated_characters("aaab", 3));
        assert!(has_repeated_characters("aaaab", 3));
    }

    #[test]
    fn email_rules() {
        assert!(validate_email("jane.doe+tag@example.co").is_ok());
        assert!(validate_email("not-an-email").is_err());
        let long = format!("{}@example.com", "a".repeat(250));
        assert!(validate_email(&long).is_err());
    }

    #[test]
    fn hex_colours() {
        assert!(validate_hex_color("#6c757D").is_ok());
        assert!(validate_hex_color("6c757d").is_err());
        assert!(validate_hex_color("#fff").is_err());
    }

    #[test]
    fn generated_passwords_are_strong() {
        for _ in 0..50 {
            let pw = generate_random_password(12);
            assert_eq!(pw.len(), 12);
            assert!(validate_password_strength(&pw).is_ok(), "{pw}");
        }
    }
}
