//! Field value transforms
//!
//! Each extracted field may declare one transform (strip, regex, cast)
//! plus a default that always runs last. A transform that fails yields an
//! absent value and a warning, never a run error. Regexes compile once
//! per field at spec-load time, not per page.

use crate::config::{CastKind, FieldSpec, TransformKind};
use crate::ConfigError;
use regex::Regex;

/// Per-field transform chain, compiled from a [`FieldSpec`]
#[derive(Debug, Clone)]
pub struct FieldPipeline {
    transform: Option<TransformKind>,
    regex: Option<Regex>,
    cast: Option<CastKind>,
    default: Option<String>,
}

impl FieldPipeline {
    pub fn compile(field: &FieldSpec) -> Result<Self, ConfigError> {
        let regex = match (&field.transform, &field.pattern) {
            (Some(TransformKind::Regex), Some(pattern)) => Some(
                Regex::new(pattern).map_err(|e| {
                    ConfigError::Validation(format!("invalid pattern '{}': {}", pattern, e))
                })?,
            ),
            _ => None,
        };

        Ok(Self {
            transform: field.transform,
            regex,
            cast: field.cast,
            default: field.default.clone(),
        })
    }

    /// Applies the configured transform, then the default
    pub fn apply(&self, value: Option<String>) -> Option<String> {
        let transformed = match self.transform {
            None => value,
            Some(TransformKind::Strip) => value.map(|v| v.trim().to_string()),
            Some(TransformKind::Regex) => value.and_then(|v| self.apply_regex(&v)),
            Some(TransformKind::Cast) => value.and_then(|v| self.apply_cast(&v)),
        };

        match transformed {
            Some(v) if !v.is_empty() => Some(v),
            other => self.default.clone().or(other),
        }
    }

    fn apply_regex(&self, value: &str) -> Option<String> {
        let regex = self.regex.as_ref()?;
        let captures = match regex.captures(value) {
            Some(captures) => captures,
            None => {
                tracing::debug!("Pattern {:?} did not match value {:?}", regex.as_str(), value);
                return None;
            }
        };

        // First capture group when one exists, else the whole match
        captures
            .get(1)
            .or_else(|| captures.get(0))
            .map(|m| m.as_str().to_string())
    }

    fn apply_cast(&self, value: &str) -> Option<String> {
        let cast = self.cast?;
        let trimmed = value.trim();

        let result = match cast {
            CastKind::Int => trimmed.parse::<i64>().map(|n| n.to_string()).ok(),
            CastKind::Float => trimmed.parse::<f64>().map(|n| n.to_string()).ok(),
            CastKind::Bool => match trimmed.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Some("true".to_string()),
                "false" | "0" | "no" | "off" | "" => Some("false".to_string()),
                _ => None,
            },
            CastKind::String => Some(trimmed.to_string()),
        };

        if result.is_none() {
            tracing::warn!("Failed to cast value {:?} to {:?}", value, cast);
        }
        result
    }
}
