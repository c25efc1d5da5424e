use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const BINARY_SUFFIXES: [&str; 6] = ["Ki", "Mi", "Gi", "Ti", "Pi", "Ei"];
const DECIMAL_SUFFIXES: [&str; 9] = ["n", "u", "m", "k", "M", "G", "T", "P", "E"];

/// A resource quantity in Kubernetes notation (`"4"`, `"500m"`, `"8Gi"`, `"1e3"`).
///
/// The textual form is kept verbatim: values are copied from a Quota Limit into
/// a Hard Limit without unit conversion, so equality is textual.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "QuantityRepr", into = "String")]
pub struct Quantity(String);

impl Quantity {
    /// Parse and validate a quantity string.
    pub fn parse(s: &str) -> Result<Self> {
        let (mantissa, rest) = split_mantissa(s);
        if mantissa.is_empty() || !mantissa.chars().any(|c| c.is_ascii_digit()) {
            bail!("quantity '{}' has no numeric part", s);
        }
        if mantissa.matches('.').count() > 1 {
            bail!("quantity '{}' has more than one decimal point", s);
        }
        if !rest.is_empty() && !is_valid_suffix(rest) {
            bail!("quantity '{}' has unknown suffix '{}'", s, rest);
        }
        Ok(Self(s.to_string()))
    }

    /// The zero quantity, used to initialize freshly created Hard Limits.
    pub fn zero() -> Self {
        Self("0".to_string())
    }

    pub fn is_zero(&self) -> bool {
        let (mantissa, _) = split_mantissa(&self.0);
        mantissa
            .chars()
            .filter(|c| c.is_ascii_digit())
            .all(|c| c == '0')
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Split `s` into its signed decimal mantissa and whatever follows it.
fn split_mantissa(s: &str) -> (&str, &str) {
    let end = s
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || c == '.' || (i == 0 && (c == '+' || c == '-'))))
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    s.split_at(end)
}

fn is_valid_suffix(suffix: &str) -> bool {
    if BINARY_SUFFIXES.contains(&suffix) || DECIMAL_SUFFIXES.contains(&suffix) {
        return true;
    }
    // Decimal exponent: e3, E-2, e+6
    let Some(exp) = suffix.strip_prefix(['e', 'E']) else {
        return false;
    };
    let digits = exp.strip_prefix(['+', '-']).unwrap_or(exp);
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

impl FromStr for Quantity {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Wire form: manifests may write bare numbers (`cpu: 2`) as well as strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum QuantityRepr {
    Text(String),
    Int(i64),
    /// Integers above `i64::MAX`; must come before `Float` to keep every digit.
    Uint(u64),
    Float(f64),
}

impl TryFrom<QuantityRepr> for Quantity {
    type Error = anyhow::Error;

    fn try_from(repr: QuantityRepr) -> Result<Self> {
        match repr {
            QuantityRepr::Text(s) => Self::parse(&s),
            QuantityRepr::Int(n) => Self::parse(&n.to_string()),
            QuantityRepr::Uint(n) => Self::parse(&n.to_string()),
            QuantityRepr::Float(f) => Self::parse(&f.to_string()),
        }
    }
}

impl From<Quantity> for String {
    fn from(q: Quantity) -> Self {
        q.0
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
