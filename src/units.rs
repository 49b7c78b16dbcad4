/// Size-token normalization for `docker stats` memory columns.
///
/// `docker stats` prints memory as binary-prefixed sizes (`2.723MiB`,
/// `1.953GiB`, `0B`). Every record stores both usage and limit in MiB.
use std::fmt;

const BYTES_PER_MIB: f64 = 1024.0 * 1024.0;
const MIB_PER_GIB: f64 = 1024.0;

/// Errors produced while normalizing a size token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitError {
    /// The numeric part is missing or not a plain decimal number.
    MalformedQuantity { token: String },
    /// The unit suffix is not one of `B`, `MiB`, `GiB`.
    UnrecognizedUnit { token: String, unit: String },
}

impl fmt::Display for UnitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitError::MalformedQuantity { token } => {
                write!(f, "malformed quantity {token:?}")
            }
            UnitError::UnrecognizedUnit { token, unit } => {
                write!(f, "unrecognized unit {unit:?} in {token:?}")
            }
        }
    }
}

impl std::error::Error for UnitError {}

/// Convert a size token like `47.65MiB` into MiB.
///
/// Only `B`, `MiB` and `GiB` are accepted (case-sensitive). Anything else
/// means the upstream output format changed and is reported as an error
/// instead of being guessed at.
pub fn to_mib(token: &str) -> Result<f64, UnitError> {
    let number = token.trim_end_matches(|c: char| c.is_ascii_alphabetic());
    let unit = &token[number.len()..];

    if unit.is_empty() || !is_plain_decimal(number) {
        return Err(UnitError::MalformedQuantity {
            token: token.to_string(),
        });
    }

    let value: f64 = number.parse().map_err(|_| UnitError::MalformedQuantity {
        token: token.to_string(),
    })?;

    match unit {
        "MiB" => Ok(value),
        // 0 stays exactly 0 rather than going through the division
        "B" if value == 0.0 => Ok(0.0),
        "B" => Ok(value / BYTES_PER_MIB),
        "GiB" => Ok(value * MIB_PER_GIB),
        other => Err(UnitError::UnrecognizedUnit {
            token: token.to_string(),
            unit: other.to_string(),
        }),
    }
}

/// Digits and dots only.
pub(crate) fn is_plain_decimal(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit() || c == '.')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn zero_bytes_is_zero() {
        assert_eq!(to_mib("0B").unwrap(), 0.0);
    }

    #[test]
    fn mib_is_unchanged() {
        assert_eq!(to_mib("1024MiB").unwrap(), 1024.0);
        assert_eq!(to_mib("2.723MiB").unwrap(), 2.723);
    }

    #[test]
    fn gib_is_multiplied() {
        assert_eq!(to_mib("1GiB").unwrap(), 1024.0);
        assert!(approx(to_mib("1.953GiB").unwrap(), 1999.872));
    }

    #[test]
    fn bytes_are_divided() {
        let v = to_mib("2048B").unwrap();
        assert!((v - 0.00195).abs() < 1e-5, "got {v}");
        assert!(approx(to_mib("1048576B").unwrap(), 1.0));
    }

    #[test]
    fn kib_is_rejected() {
        let err = to_mib("5KiB").unwrap_err();
        assert_eq!(
            err,
            UnitError::UnrecognizedUnit {
                token: "5KiB".to_string(),
                unit: "KiB".to_string(),
            }
        );
    }

    #[test]
    fn units_are_case_sensitive() {
        assert!(matches!(
            to_mib("5mib"),
            Err(UnitError::UnrecognizedUnit { .. })
        ));
        assert!(matches!(
            to_mib("5kB"),
            Err(UnitError::UnrecognizedUnit { .. })
        ));
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        for token in ["1.2.3MiB", "MiB", "-5MiB", "1e3MiB", "", "12", "--"] {
            assert!(
                matches!(to_mib(token), Err(UnitError::MalformedQuantity { .. })),
                "{token:?} should be malformed"
            );
        }
    }

    #[test]
    fn error_message_names_token() {
        let err = to_mib("5KiB").unwrap_err();
        assert_eq!(err.to_string(), r#"unrecognized unit "KiB" in "5KiB""#);
    }
}
