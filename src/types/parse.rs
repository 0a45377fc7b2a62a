//! `parse_value`: type-directed literal parsing. Lives in the type system rather than the tree/parser layer
//! because what counts as valid text depends on the type being parsed into
//! (an enum's ordinal table, a physical type's unit table).

use crate::diagnostics::Error;

#[derive(Clone, PartialEq, Debug)]
pub enum ParsedValue {
    Integer(i64),
    Real(f64),
    /// Ordinal into the enum literal list.
    Enum(usize),
    /// Femtoseconds.
    Time(i64),
    /// One bit per entry, most significant first.
    BitVector(Vec<u8>),
}

/// Strips VHDL-style digit-group underscores (`1_2_3` -> `123`); a bare
/// leading/trailing underscore or a doubled underscore is rejected.
fn strip_underscores(s: &str) -> Result<String, Error> {
    if s.starts_with('_') || s.ends_with('_') || s.contains("__") {
        return Err(Error::UserSource(format!("malformed digit grouping in '{}'", s)));
    }
    Ok(s.chars().filter(|&c| c != '_').collect())
}

pub fn parse_integer(text: &str) -> Result<i64, Error> {
    let trimmed = text.trim();
    let cleaned = strip_underscores(trimmed)?;
    cleaned
        .parse::<i64>()
        .map_err(|_| Error::UserSource(format!("'{}' is not a valid integer literal", text)))
}

pub fn parse_real(text: &str) -> Result<f64, Error> {
    let trimmed = text.trim();
    let cleaned = strip_underscores(trimmed)?;
    cleaned
        .parse::<f64>()
        .map_err(|_| Error::UserSource(format!("'{}' is not a valid real literal", text)))
}

/// `literals` lists an enum type's declared literal names in declaration
/// order; the result is the matching literal's ordinal.
pub fn parse_enum(literals: &[&str], text: &str) -> Result<usize, Error> {
    let trimmed = text.trim();
    literals
        .iter()
        .position(|lit| lit.eq_ignore_ascii_case(trimmed))
        .ok_or_else(|| Error::UserSource(format!("'{}' is not a literal of this enumeration", trimmed)))
}

/// Femtoseconds per unit, in declaration order from the smallest.
const TIME_UNITS: &[(&str, i64)] = &[
    ("fs", 1),
    ("ps", 1_000),
    ("ns", 1_000_000),
    ("us", 1_000_000_000),
    ("ms", 1_000_000_000_000),
    ("sec", 1_000_000_000_000_000),
];

/// A time literal always carries an explicit unit; `parse_value(time, "5")`
/// fails for exactly that reason.
pub fn parse_time(text: &str) -> Result<i64, Error> {
    let trimmed = text.trim();
    let split_at = trimmed
        .find(|c: char| c.is_ascii_alphabetic())
        .ok_or_else(|| Error::UserSource(format!("time literal '{}' is missing a unit", text)))?;

    let (number_part, unit_part) = trimmed.split_at(split_at);
    let number_part = number_part.trim();
    let unit_part = unit_part.trim();

    let (_, fs_per_unit) = TIME_UNITS
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(unit_part))
        .ok_or_else(|| Error::UserSource(format!("unknown time unit '{}'", unit_part)))?;

    let value: f64 = number_part
        .parse()
        .map_err(|_| Error::UserSource(format!("'{}' is not a valid time literal", text)))?;

    Ok((value * *fs_per_unit as f64).round() as i64)
}

fn hex_digit_to_bits(c: char) -> Result<[u8; 4], Error> {
    let v = c
        .to_digit(16)
        .ok_or_else(|| Error::UserSource(format!("'{}' is not a hex digit", c)))?;
    Ok([
        ((v >> 3) & 1) as u8,
        ((v >> 2) & 1) as u8,
        ((v >> 1) & 1) as u8,
        (v & 1) as u8,
    ])
}

fn octal_digit_to_bits(c: char) -> Result<[u8; 3], Error> {
    let v = c
        .to_digit(8)
        .ok_or_else(|| Error::UserSource(format!("'{}' is not an octal digit", c)))?;
    Ok([((v >> 2) & 1) as u8, ((v >> 1) & 1) as u8, (v & 1) as u8])
}

/// Parses a VHDL bit-string literal: `B"..."`, `O"..."` or `X"..."`.
/// Unrecognized characters inside the quotes are a hard error, per the
/// spec's `X"10101h"` boundary case.
pub fn parse_bit_vector(text: &str) -> Result<Vec<u8>, Error> {
    let trimmed = text.trim();
    if trimmed.len() < 3 {
        return Err(Error::UserSource(format!("'{}' is not a bit-string literal", text)));
    }
    let base = trimmed.chars().next().unwrap().to_ascii_uppercase();
    let rest = &trimmed[1..];
    if !rest.starts_with('"') || !rest.ends_with('"') {
        return Err(Error::UserSource(format!("'{}' is not a bit-string literal", text)));
    }
    let body = &rest[1..rest.len() - 1];

    let mut bits = Vec::new();
    match base {
        'B' => {
            for c in body.chars() {
                match c {
                    '0' => bits.push(0),
                    '1' => bits.push(1),
                    _ => return Err(Error::UserSource(format!("'{}' is not a binary digit", c))),
                }
            }
        }
        'O' => {
            for c in body.chars() {
                bits.extend_from_slice(&octal_digit_to_bits(c)?);
            }
        }
        'X' => {
            for c in body.chars() {
                bits.extend_from_slice(&hex_digit_to_bits(c)?);
            }
        }
        _ => return Err(Error::UserSource(format!("'{}' is not a bit-string base", base))),
    }
    Ok(bits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_boundary_and_digit_grouping() {
        assert_eq!(parse_integer("-2147483648").unwrap(), -2147483648);
        assert_eq!(parse_integer("1_2_3").unwrap(), 123);
    }

    #[test]
    fn enum_literal_accepts_surrounding_whitespace() {
        assert_eq!(parse_enum(&["A", "B", "C"], " C  ").unwrap(), 2);
    }

    #[test]
    fn time_literal_requires_a_unit() {
        assert_eq!(parse_time("2.5 ns").unwrap(), 2_500_000);
        assert!(parse_time("5").is_err());
    }

    #[test]
    fn bit_vector_hex_literal_and_invalid_digit() {
        assert_eq!(
            parse_bit_vector("X\"4A\"").unwrap(),
            vec![0, 1, 0, 0, 1, 0, 1, 0]
        );
        assert!(parse_bit_vector("X\"10101h\"").is_err());
    }
}
