use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use regex::Regex;
use std::{num::ParseFloatError, sync::OnceLock};

/// Adapted from https://github.com/sombralibre/k8s-quantity-parser
/// MIT licensed, Copyright (c) 2022 Alejandro Llanes

#[allow(non_camel_case_types)]
enum QuantitySuffix {
    Ki,
    Mi,
    Gi,
    Ti,
    Pi,
    Ei,
    m,
    k,
    M,
    G,
    T,
    P,
    E,
    None,
}

impl QuantitySuffix {
    fn new(unit: &str) -> Option<Self> {
        Some(match unit {
            "Ki" => Self::Ki,
            "Mi" => Self::Mi,
            "Gi" => Self::Gi,
            "Ti" => Self::Ti,
            "Pi" => Self::Pi,
            "Ei" => Self::Ei,
            "m" => Self::m,
            "k" => Self::k,
            "M" => Self::M,
            "G" => Self::G,
            "T" => Self::T,
            "P" => Self::P,
            "E" => Self::E,
            "" => Self::None,
            _ => return None,
        })
    }

    fn multiplier(&self) -> f64 {
        match self {
            Self::Ki => 1024_f64,
            Self::Mi => 1024_f64.powi(2),
            Self::Gi => 1024_f64.powi(3),
            Self::Ti => 1024_f64.powi(4),
            Self::Pi => 1024_f64.powi(5),
            Self::Ei => 1024_f64.powi(6),
            Self::m => 1e-3,
            Self::k => 1e3,
            Self::M => 1e6,
            Self::G => 1e9,
            Self::T => 1e12,
            Self::P => 1e15,
            Self::E => 1e18,
            Self::None => 1.,
        }
    }
}

/// Parses Kubernetes resource quantities (`500m`, `1Gi`, `2`, `1e3`) into a plain number
/// so that CPU and memory values written with different suffixes can be compared.
pub trait QuantityParser {
    /// ```rust
    /// # use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    /// # use common_service_operator::engine::quantity_parser::QuantityParser;
    /// let mib = Quantity("1Mi".into());
    /// assert_eq!(mib.to_f64().unwrap(), 1048576.0);
    /// ```
    fn to_f64(&self) -> Result<f64, ParseError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error(transparent)]
    ParseFloatError(#[from] ParseFloatError),
    #[error("Invalid quantity format")]
    InvalidFormat,
    #[error("Invalid quantity unit")]
    InvalidUnit,
}

impl QuantityParser for Quantity {
    fn to_f64(&self) -> Result<f64, ParseError> {
        static REGEX: OnceLock<Regex> = OnceLock::new();
        let cap = REGEX
            .get_or_init(|| {
                Regex::new(r"^([+-]?(?:[0-9]+\.?[0-9]*|\.[0-9]+)(?:[eE][+-]?[0-9]+)?)([[:alpha:]]*)$")
                    .unwrap()
            })
            .captures(self.0.trim())
            .ok_or(ParseError::InvalidFormat)?;

        let amount = cap
            .get(1)
            .ok_or(ParseError::InvalidFormat)?
            .as_str()
            .parse::<f64>()?;
        let suffix = cap.get(2).map(|m| m.as_str()).unwrap_or_default();

        match QuantitySuffix::new(suffix) {
            Some(suffix) => Ok(amount * suffix.multiplier()),
            None => Err(ParseError::InvalidUnit),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_number_parses() {
        assert_eq!(Quantity("12345".into()).to_f64().unwrap(), 12345.0)
    }

    #[test]
    fn invalid_unit_fails() {
        assert!(matches!(
            Quantity("12345r".into()).to_f64(),
            Err(ParseError::InvalidUnit)
        ))
    }

    #[test]
    fn non_numeric_fails() {
        assert!(matches!(
            Quantity("medium".into()).to_f64(),
            Err(ParseError::InvalidFormat)
        ))
    }

    #[test]
    fn decimal_quantity_parses() {
        assert_eq!(Quantity("0.5".into()).to_f64().unwrap(), 0.5)
    }

    #[test]
    fn millicores_to_cores() {
        assert_eq!(Quantity("500m".into()).to_f64().unwrap(), 0.5)
    }

    #[test]
    fn pow2_mb() {
        assert_eq!(Quantity("1Mi".into()).to_f64().unwrap(), 1048576.0);
    }

    #[test]
    fn pow10_gb() {
        assert_eq!(Quantity("1G".into()).to_f64().unwrap(), 1e9);
    }

    #[test]
    fn exponent_notation() {
        assert_eq!(Quantity("1e3".into()).to_f64().unwrap(), 1000.0);
    }
}
