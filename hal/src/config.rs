//! Device settings read from the process environment.

use std::env;

use crate::{Error, Result};

pub const DEVICE_MAX_BYTES_ENV: &str = "RUSTCV_DEVICE_MAX_BYTES";
pub const CPU_THREADS_ENV: &str = "RUSTCV_CPU_THREADS";

/// Binary units accepted after a byte count, longest first.
const SIZE_UNITS: [(&str, usize); 4] = [("GB", 1 << 30), ("MB", 1 << 20), ("KB", 1 << 10), ("B", 1)];

/// Memory budget from `RUSTCV_DEVICE_MAX_BYTES`, e.g. `134217728`, `512MB` or `2GB`.
pub fn read_device_max_bytes_from_env() -> Result<Option<usize>> {
    read_var(DEVICE_MAX_BYTES_ENV, parse_byte_size)
}

/// Worker count from `RUSTCV_CPU_THREADS`.
pub fn read_cpu_threads_from_env() -> Result<Option<usize>> {
    read_var(CPU_THREADS_ENV, |raw| {
        raw.trim().parse::<usize>().map_err(|_| format!("expected a positive integer, got '{raw}'"))
    })
}

fn read_var(name: &str, parse: impl FnOnce(&str) -> std::result::Result<usize, String>) -> Result<Option<usize>> {
    let raw = match env::var(name) {
        Ok(raw) => raw,
        Err(env::VarError::NotPresent) => return Ok(None),
        Err(e) => return Err(Error::InvalidInput(format!("{name}: {e}"))),
    };
    match parse(&raw) {
        Ok(0) => Err(Error::InvalidInput(format!("{name} must be >= 1"))),
        Ok(value) => Ok(Some(value)),
        Err(msg) => Err(Error::InvalidInput(format!("{name}: {msg}"))),
    }
}

fn parse_byte_size(raw: &str) -> std::result::Result<usize, String> {
    let compact: String = raw.chars().filter(|c| *c != '_' && !c.is_whitespace()).collect();
    let split = compact.find(|c: char| !c.is_ascii_digit()).unwrap_or(compact.len());
    let (digits, unit) = compact.split_at(split);

    let scale = if unit.is_empty() {
        1
    } else {
        SIZE_UNITS
            .iter()
            .find(|(name, _)| unit.eq_ignore_ascii_case(name))
            .map(|&(_, scale)| scale)
            .ok_or_else(|| format!("unknown size unit '{unit}' in '{raw}'"))?
    };
    let count: usize = digits.parse().map_err(|_| format!("expected a byte count like '512MB', got '{raw}'"))?;
    count.checked_mul(scale).ok_or_else(|| format!("'{raw}' does not fit in usize"))
}
