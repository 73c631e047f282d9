//! Binding of textual property values to typed fields.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

/// A property value that can't be converted to its field's type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("can't bind property {property} = \"{value}\": {reason}")]
pub struct TransformationError {
    pub property: String,
    pub value: String,
    pub reason: String,
}

pub trait PropertyTransformer {
    type Output;

    /// Convert `value` of `property`.
    fn transform(&self, property: &str, value: &str) -> Result<Self::Output, TransformationError>;
}

fn error(property: &str, value: &str, reason: impl ToString) -> TransformationError {
    TransformationError {
        property: property.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// Any `FromStr` type, parsed from the trimmed value.
pub struct ParseTransformer<T>(std::marker::PhantomData<T>);

impl<T> ParseTransformer<T> {
    pub const fn new() -> Self {
        Self(std::marker::PhantomData)
    }
}

impl<T> Default for ParseTransformer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PropertyTransformer for ParseTransformer<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    type Output = T;

    fn transform(&self, property: &str, value: &str) -> Result<T, TransformationError> {
        value.trim().parse().map_err(|e| error(property, value, e))
    }
}

/// `true`/`false`, `yes`/`no`, `on`/`off` or `1`/`0`, case insensitive.
pub struct BoolTransformer;

impl PropertyTransformer for BoolTransformer {
    type Output = bool;

    fn transform(&self, property: &str, value: &str) -> Result<bool, TransformationError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Ok(true),
            "false" | "no" | "off" | "0" => Ok(false),
            _ => Err(error(property, value, "not a boolean")),
        }
    }
}

/// Plain milliseconds, or a number with an `ms`, `s` or `m` suffix.
pub struct DurationTransformer;

impl PropertyTransformer for DurationTransformer {
    type Output = Duration;

    fn transform(&self, property: &str, value: &str) -> Result<Duration, TransformationError> {
        let trimmed = value.trim();
        let (number, unit_ms) = if let Some(n) = trimmed.strip_suffix("ms") {
            (n, 1)
        } else if let Some(n) = trimmed.strip_suffix('s') {
            (n, 1_000)
        } else if let Some(n) = trimmed.strip_suffix('m') {
            (n, 60_000)
        } else {
            (trimmed, 1)
        };
        let n: u64 = number.trim().parse().map_err(|e| error(property, value, e))?;
        n.checked_mul(unit_ms)
            .map(Duration::from_millis)
            .ok_or_else(|| error(property, value, "duration overflow"))
    }
}

/// Non-empty path.
pub struct PathTransformer;

impl PropertyTransformer for PathTransformer {
    type Output = PathBuf;

    fn transform(&self, property: &str, value: &str) -> Result<PathBuf, TransformationError> {
        match value.trim() {
            "" => Err(error(property, value, "empty path")),
            path => Ok(PathBuf::from(path)),
        }
    }
}
