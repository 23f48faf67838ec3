//! Kubernetes quantity parsing
//!
//! Volume group and logical volume sizes travel as quantity strings
//! ("10Gi", "500M", "1073741824"). Only the forms the LVM controllers emit
//! are accepted: plain numbers, binary suffixes and decimal suffixes.

use crate::error::{Error, Result};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

const KI: u64 = 1024;
const K: u64 = 1000;

/// Parse a quantity string into bytes
pub fn parse_quantity(s: &str) -> Result<u64> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::QuantityParse("empty quantity string".into()));
    }

    // Find where the number ends and unit begins
    let num_end = s
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit() && *c != '.')
        .map(|(i, _)| i)
        .unwrap_or(s.len());

    let num_str = &s[..num_end];
    let unit_str = &s[num_end..];

    let multiplier: u64 = match unit_str {
        "" => 1,
        "Ki" => KI,
        "Mi" => KI.pow(2),
        "Gi" => KI.pow(3),
        "Ti" => KI.pow(4),
        "Pi" => KI.pow(5),
        "Ei" => KI.pow(6),
        "k" => K,
        "M" => K.pow(2),
        "G" => K.pow(3),
        "T" => K.pow(4),
        "P" => K.pow(5),
        "E" => K.pow(6),
        _ => {
            return Err(Error::QuantityParse(format!(
                "unknown unit in {:?}: {}",
                s, unit_str
            )))
        }
    };

    if let Ok(whole) = num_str.parse::<u64>() {
        return whole
            .checked_mul(multiplier)
            .ok_or_else(|| Error::QuantityParse(format!("quantity overflows: {}", s)));
    }

    let num: f64 = num_str
        .parse()
        .map_err(|_| Error::QuantityParse(format!("invalid number: {:?}", num_str)))?;
    if !num.is_finite() || num < 0.0 {
        return Err(Error::QuantityParse(format!("invalid number: {:?}", num_str)));
    }

    Ok((num * multiplier as f64).ceil() as u64)
}

/// Parse an optional [`Quantity`], treating absence as zero
pub fn quantity_bytes(quantity: Option<&Quantity>) -> Result<u64> {
    match quantity {
        Some(q) => parse_quantity(&q.0),
        None => Ok(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity("100").unwrap(), 100);
        assert_eq!(parse_quantity("1Ki").unwrap(), 1024);
        assert_eq!(parse_quantity("32Mi").unwrap(), 32 * 1024 * 1024);
        assert_eq!(parse_quantity("100Gi").unwrap(), 100 * 1024 * 1024 * 1024);
        assert_eq!(parse_quantity("1k").unwrap(), 1000);
        assert_eq!(parse_quantity("2G").unwrap(), 2_000_000_000);
        assert_eq!(parse_quantity("1.5Gi").unwrap(), 1_610_612_736);
        assert_eq!(parse_quantity(" 7Ti ").unwrap(), 7 * 1024_u64.pow(4));
    }

    #[test]
    fn test_parse_quantity_rejects_garbage() {
        assert_matches!(parse_quantity(""), Err(Error::QuantityParse(_)));
        assert_matches!(parse_quantity("abc"), Err(Error::QuantityParse(_)));
        assert_matches!(parse_quantity("10X"), Err(Error::QuantityParse(_)));
        assert_matches!(parse_quantity("10GB"), Err(Error::QuantityParse(_)));
        assert_matches!(parse_quantity("99999999999Ei"), Err(Error::QuantityParse(_)));
    }

    #[test]
    fn test_quantity_bytes_absent_is_zero() {
        assert_eq!(quantity_bytes(None).unwrap(), 0);
        assert_eq!(
            quantity_bytes(Some(&Quantity("1Mi".into()))).unwrap(),
            1024 * 1024
        );
    }
}
