//! Built-in pipes.
//!
//! A pipe receives the current value of one argument and returns the value
//! the next pipe (and finally the handler) sees. Pipes bound to the same
//! argument chain: the first one reads the raw path, query or body value, the
//! following ones read the previous output.
//!
//! | pipe | accepts | produces |
//! |---|---|---|
//! | [`ValidationPipe`] | anything present | the input |
//! | [`ParseIntPipe`] | anything adaptable to `i64` | `i64` |
//! | [`ParseBoolPipe`] | `true/1/yes`, `false/0/no` | `bool` |
//! | [`TrimPipe`] | `String`, or absent | trimmed `String` |
//! | [`DefaultPipe`] | anything | the input, or the default when absent |
//! | [`RangePipe`] | numbers, or values adaptable to `f64` | the input |
//! | [`LengthPipe`] | `String` | the input |
//! | [`RegexPipe`] | `String` | the input |
//! | [`CustomPipe`] | anything the closure accepts | the input |
//! | [`JsonPipe`] | JSON, or a JSON string | `T` |
//!
//! Failures are `ValidationFailure` or `AdaptationFailure` and surface as
//! 400 responses.

use std::any::Any;
use std::marker::PhantomData;

use regex::Regex;
use serde::de::DeserializeOwned;

use super::{Pipe, PipeContext};
use crate::error::KernelError;
use crate::value::Value;

fn text(value: &Value) -> Option<&str> {
    if let Some(s) = value.downcast_ref::<String>() {
        return Some(s);
    }
    value.downcast_ref::<serde_json::Value>().and_then(serde_json::Value::as_str)
}

fn required(value: &Value, cx: &PipeContext<'_>) -> Result<(), KernelError> {
    if value.is_null() {
        return Err(KernelError::validation(format!("`{}` is required", cx.argument())));
    }
    Ok(())
}

/// Rejects absent values.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidationPipe;

impl Pipe for ValidationPipe {
    fn transform(&self, value: Value, cx: &PipeContext<'_>) -> Result<Value, KernelError> {
        required(&value, cx)?;
        Ok(value)
    }
}

/// Coerces to `i64` through the adapter registry.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParseIntPipe;

impl Pipe for ParseIntPipe {
    fn transform(&self, value: Value, cx: &PipeContext<'_>) -> Result<Value, KernelError> {
        required(&value, cx)?;
        let n = cx.adapters().adapt_to::<i64>(value)?;
        Ok(Value::from(n))
    }
}

/// Coerces to `bool` through the adapter registry.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParseBoolPipe;

impl Pipe for ParseBoolPipe {
    fn transform(&self, value: Value, cx: &PipeContext<'_>) -> Result<Value, KernelError> {
        required(&value, cx)?;
        let b = cx.adapters().adapt_to::<bool>(value)?;
        Ok(Value::from(b))
    }
}

/// Trims surrounding whitespace. Absent values pass through.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrimPipe;

impl Pipe for TrimPipe {
    fn transform(&self, value: Value, cx: &PipeContext<'_>) -> Result<Value, KernelError> {
        if value.is_null() {
            return Ok(value);
        }
        text(&value)
            .map(|s| Value::from(s.trim()))
            .ok_or_else(|| KernelError::validation(format!("`{}` must be a string", cx.argument())))
    }
}

/// Substitutes a default for an absent value.
#[derive(Debug, Clone)]
pub struct DefaultPipe<T> {
    default: T,
}

impl<T> DefaultPipe<T> {
    pub fn new(default: T) -> Self {
        Self { default }
    }
}

impl<T: Any + Send + Sync + Clone> Pipe for DefaultPipe<T> {
    fn transform(&self, value: Value, _cx: &PipeContext<'_>) -> Result<Value, KernelError> {
        if value.is_null() {
            return Ok(Value::new(self.default.clone()));
        }
        Ok(value)
    }
}

/// Checks that a numeric value lies in `[min, max]`. The value itself is
/// passed on unchanged.
#[derive(Debug, Clone, Copy)]
pub struct RangePipe {
    min: f64,
    max: f64,
}

impl RangePipe {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }
}

impl Pipe for RangePipe {
    fn transform(&self, value: Value, cx: &PipeContext<'_>) -> Result<Value, KernelError> {
        required(&value, cx)?;
        let n = match value.downcast_ref::<serde_json::Value>() {
            Some(json) => json
                .as_f64()
                .ok_or_else(|| KernelError::validation(format!("`{}` must be a number", cx.argument())))?,
            None => cx.adapters().adapt_to::<f64>(value.clone())?,
        };
        if n < self.min || n > self.max {
            return Err(KernelError::validation(format!(
                "`{}` must be between {} and {}",
                cx.argument(),
                self.min,
                self.max
            )));
        }
        Ok(value)
    }
}

/// Checks the length of a string (in characters) or of a JSON array.
#[derive(Debug, Clone, Copy)]
pub struct LengthPipe {
    min: usize,
    max: usize,
}

impl LengthPipe {
    pub fn new(min: usize, max: usize) -> Self {
        Self { min, max }
    }
}

impl Pipe for LengthPipe {
    fn transform(&self, value: Value, cx: &PipeContext<'_>) -> Result<Value, KernelError> {
        required(&value, cx)?;
        let len = match (text(&value), value.downcast_ref::<serde_json::Value>()) {
            (Some(s), _) => s.chars().count(),
            (None, Some(serde_json::Value::Array(items))) => items.len(),
            _ => {
                return Err(KernelError::validation(format!(
                    "`{}` has no length",
                    cx.argument()
                )));
            }
        };
        if len < self.min || len > self.max {
            return Err(KernelError::validation(format!(
                "`{}` length must be between {} and {}",
                cx.argument(),
                self.min,
                self.max
            )));
        }
        Ok(value)
    }
}

/// Requires a string matching a pattern.
#[derive(Debug, Clone)]
pub struct RegexPipe {
    pattern: Regex,
}

impl RegexPipe {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
        })
    }
}

impl Pipe for RegexPipe {
    fn transform(&self, value: Value, cx: &PipeContext<'_>) -> Result<Value, KernelError> {
        required(&value, cx)?;
        let s = text(&value)
            .ok_or_else(|| KernelError::validation(format!("`{}` must be a string", cx.argument())))?;
        if !self.pattern.is_match(s) {
            return Err(KernelError::validation(format!(
                "`{}` does not match {}",
                cx.argument(),
                self.pattern.as_str()
            )));
        }
        Ok(value)
    }
}

/// Validation by closure; the error string becomes the failure reason.
pub struct CustomPipe<F> {
    check: F,
}

impl<F> CustomPipe<F>
where
    F: Fn(&Value) -> Result<(), String> + Send + Sync,
{
    pub fn new(check: F) -> Self {
        Self { check }
    }
}

impl<F> Pipe for CustomPipe<F>
where
    F: Fn(&Value) -> Result<(), String> + Send + Sync,
{
    fn transform(&self, value: Value, cx: &PipeContext<'_>) -> Result<Value, KernelError> {
        (self.check)(&value).map_err(|reason| KernelError::validation(format!("`{}`: {reason}", cx.argument())))?;
        Ok(value)
    }
}

/// Decodes a JSON argument into `T`.
pub struct JsonPipe<T> {
    _target: PhantomData<fn() -> T>,
}

impl<T> JsonPipe<T> {
    pub fn new() -> Self {
        Self { _target: PhantomData }
    }
}

impl<T> Default for JsonPipe<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Pipe for JsonPipe<T>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    fn transform(&self, value: Value, cx: &PipeContext<'_>) -> Result<Value, KernelError> {
        required(&value, cx)?;
        let json = match value.downcast_ref::<serde_json::Value>() {
            Some(json) => json.clone(),
            None => match value.downcast_ref::<String>() {
                Some(raw) => serde_json::from_str(raw)
                    .map_err(|e| KernelError::validation(format!("`{}` is not valid JSON: {e}", cx.argument())))?,
                None => {
                    return Err(KernelError::validation(format!(
                        "`{}` is not JSON",
                        cx.argument()
                    )));
                }
            },
        };
        let decoded: T = serde_json::from_value(json)
            .map_err(|e| KernelError::validation(format!("invalid `{}`: {e}", cx.argument())))?;
        Ok(Value::new(decoded))
    }
}
