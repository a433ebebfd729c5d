use crate::ProfileError;

const KIB: u64 = 1024;
const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * 1024 * 1024;

/// Parse a size-with-unit string into bytes.
///
/// Accepts a bare integer (bytes) or an integer with a `k`/`K`, `m`/`M`,
/// `g`/`G` suffix (powers of 1024). Zero and unparseable values are rejected;
/// `field` names the offending profile field in the error.
pub fn parse_size(field: &str, value: &str) -> Result<u64, ProfileError> {
    let trimmed = value.trim();
    let invalid = || ProfileError::InvalidSize {
        field: field.to_owned(),
        value: value.to_owned(),
    };

    if trimmed.is_empty() {
        return Err(invalid());
    }

    let (digits, multiplier) = match trimmed.as_bytes()[trimmed.len() - 1] {
        b'k' | b'K' => (&trimmed[..trimmed.len() - 1], KIB),
        b'm' | b'M' => (&trimmed[..trimmed.len() - 1], MIB),
        b'g' | b'G' => (&trimmed[..trimmed.len() - 1], GIB),
        _ => (trimmed, 1),
    };

    let base: u64 = digits.parse().map_err(|_| invalid())?;
    let bytes = base.checked_mul(multiplier).ok_or_else(invalid)?;
    if bytes == 0 {
        return Err(invalid());
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_bytes() {
        assert_eq!(parse_size("heap_max", "4096").unwrap(), 4096);
    }

    #[test]
    fn parses_unit_suffixes() {
        assert_eq!(parse_size("heap_max", "512k").unwrap(), 512 * 1024);
        assert_eq!(parse_size("heap_max", "512M").unwrap(), 512 * 1024 * 1024);
        assert_eq!(parse_size("heap_max", "1G").unwrap(), 1_073_741_824);
        assert_eq!(parse_size("heap_max", "2G").unwrap(), 2_147_483_648);
    }

    #[test]
    fn rejects_zero() {
        assert!(parse_size("heap_max", "0").is_err());
        assert!(parse_size("heap_max", "0G").is_err());
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_size("heap_max", "").is_err());
        assert!(parse_size("heap_max", "lots").is_err());
        assert!(parse_size("heap_max", "1.5G").is_err());
        assert!(parse_size("heap_max", "G").is_err());
        assert!(parse_size("heap_max", "-1G").is_err());
    }

    #[test]
    fn rejects_overflow() {
        assert!(parse_size("heap_max", "99999999999999999999G").is_err());
        assert!(parse_size("heap_max", "18446744073709551615G").is_err());
    }

    #[test]
    fn error_names_the_field() {
        let err = parse_size("page_cache", "bad").unwrap_err();
        assert!(err.to_string().contains("page_cache"));
    }
}
