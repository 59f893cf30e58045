//! Arena geometry.

use serde::{Deserialize, Deserializer, Serialize};
use validator::{self, Validate};

/// Byte size and alignment of the pool arena.
///
/// `pool_size` accepts either a plain number or a string with a binary
/// unit suffix (`"64KiB"`, `"16MiB"`).
#[derive(Debug, Serialize, Deserialize, Validate, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    #[validate(range(min = 64, max = 2147483647))]
    #[serde(default = "default_pool_size", deserialize_with = "deserialize_size")]
    pub pool_size: usize,

    /// Rounded up to a multiple of 8 by the pool itself.
    #[validate(range(min = 1, max = 4096))]
    #[serde(default = "default_granularity")]
    pub granularity: usize,
}

fn default_pool_size() -> usize {
    16 * 1024 * 1024
}

fn default_granularity() -> usize {
    8
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            granularity: default_granularity(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SizeValue {
    Num(usize),
    Str(String),
}

fn deserialize_size<'de, D>(deserializer: D) -> Result<usize, D::Error>
where
    D: Deserializer<'de>,
{
    match SizeValue::deserialize(deserializer)? {
        SizeValue::Num(n) => Ok(n),
        SizeValue::Str(s) => parse_size(&s).map_err(serde::de::Error::custom),
    }
}

fn parse_size(s: &str) -> Result<usize, String> {
    let s = s.trim();
    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (digits, unit) = s.split_at(split);
    let number: usize = digits
        .parse()
        .map_err(|_| format!("invalid size '{s}'"))?;
    let multiplier: usize = match unit.trim().to_lowercase().as_str() {
        "" | "b" => 1,
        "kb" | "kib" => 1 << 10,
        "mb" | "mib" => 1 << 20,
        "gb" | "gib" => 1 << 30,
        other => return Err(format!("unknown size unit '{other}'")),
    };
    number
        .checked_mul(multiplier)
        .ok_or_else(|| format!("size '{s}' overflows"))
}
