use crate::config::types::{
    FieldSpec, PaginationKind, PaginationSpec, RateLimitSpec, Renderer, RetrySpec, SelectorKind,
    SelectorSpec, SiteSpec, TransformKind,
};
use crate::ConfigError;
use url::Url;

/// Validates an entire site spec.
///
/// Every rejection happens here, before a run starts; a spec that passes
/// validation never produces a configuration error mid-run.
pub fn validate(spec: &SiteSpec) -> Result<(), ConfigError> {
    validate_site_name(&spec.site_name)?;
    validate_base_url(spec)?;
    validate_pagination(&spec.pagination, spec.renderer)?;
    validate_selectors(&spec.selectors)?;
    validate_rate_limit(&spec.rate_limit)?;
    validate_retry(&spec.retry)?;

    if spec.fetch.timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "fetch timeout-ms must be greater than zero".to_string(),
        ));
    }

    for (name, value) in &spec.fetch.headers {
        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ConfigError::Validation(format!(
                "invalid header name '{}'",
                name
            )));
        }
        if value.chars().any(|c| c.is_control()) {
            return Err(ConfigError::Validation(format!(
                "header '{}' value contains control characters",
                name
            )));
        }
    }

    if spec.output.destination.is_empty() {
        return Err(ConfigError::Validation(
            "output destination cannot be empty".to_string(),
        ));
    }

    if let Some(webhook) = &spec.webhook {
        Url::parse(&webhook.url)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid webhook url: {}", e)))?;
    }

    Ok(())
}

/// Site names become table names and dedupe keys, so keep them tame
fn validate_site_name(name: &str) -> Result<(), ConfigError> {
    if name.is_empty() {
        return Err(ConfigError::Validation(
            "site-name cannot be empty".to_string(),
        ));
    }

    if !name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ConfigError::Validation(format!(
            "site-name must contain only alphanumeric characters, hyphens and underscores, got '{}'",
            name
        )));
    }

    Ok(())
}

fn validate_base_url(spec: &SiteSpec) -> Result<(), ConfigError> {
    let placeholder = format!("{{{}}}", spec.pagination.param);

    if spec.pagination.kind == PaginationKind::UrlPattern
        && !spec.base_url.contains(&placeholder)
    {
        return Err(ConfigError::Validation(format!(
            "url-pattern pagination requires the '{}' placeholder in base-url",
            placeholder
        )));
    }

    // Substitute the start page so templates parse like any other URL
    let resolved = spec
        .base_url
        .replace(&placeholder, &spec.pagination.start.to_string());

    let url = Url::parse(&resolved)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid base-url '{}': {}", spec.base_url, e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "base-url must use http or https, got '{}'",
            url.scheme()
        )));
    }

    Ok(())
}

fn validate_pagination(pagination: &PaginationSpec, renderer: Renderer) -> Result<(), ConfigError> {
    if pagination.max_pages < 1 {
        return Err(ConfigError::Validation(
            "pagination max-pages must be >= 1".to_string(),
        ));
    }

    match pagination.kind {
        PaginationKind::NextButton => {
            let selector = pagination.selector.as_deref().unwrap_or("");
            if selector.is_empty() {
                return Err(ConfigError::Validation(
                    "next-button pagination requires a selector".to_string(),
                ));
            }
            compile_css(selector)?;
        }
        PaginationKind::InfiniteScroll => {
            if renderer != Renderer::Browser {
                return Err(ConfigError::Validation(
                    "infinite-scroll pagination requires renderer = \"browser\"".to_string(),
                ));
            }
        }
        PaginationKind::UrlPattern | PaginationKind::None => {}
    }

    Ok(())
}

fn validate_selectors(selectors: &SelectorSpec) -> Result<(), ConfigError> {
    compile_css(&selectors.container)?;

    if selectors.fields.is_empty() {
        return Err(ConfigError::Validation(
            "selectors must define at least one field".to_string(),
        ));
    }

    for (name, field) in &selectors.fields {
        validate_field_name(name)?;
        validate_field(name, field)?;
    }

    Ok(())
}

/// Field names become output columns, so they must be plain identifiers
fn validate_field_name(name: &str) -> Result<(), ConfigError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };

    if !valid {
        return Err(ConfigError::Validation(format!(
            "field name '{}' must be a plain identifier (letters, digits, underscores)",
            name
        )));
    }

    Ok(())
}

fn validate_field(name: &str, field: &FieldSpec) -> Result<(), ConfigError> {
    match field.kind {
        SelectorKind::Css => {
            compile_css(&field.selector)?;
        }
        SelectorKind::Xpath => {
            return Err(ConfigError::Validation(format!(
                "field '{}': xpath selectors are not supported by this engine",
                name
            )));
        }
    }

    if let Some(attr) = &field.attr {
        if attr.is_empty() {
            return Err(ConfigError::Validation(format!(
                "field '{}': attr cannot be empty",
                name
            )));
        }
    }

    match field.transform {
        Some(TransformKind::Regex) => {
            let pattern = field.pattern.as_deref().ok_or_else(|| {
                ConfigError::Validation(format!(
                    "field '{}': regex transform requires a pattern",
                    name
                ))
            })?;
            regex::Regex::new(pattern).map_err(|e| {
                ConfigError::Validation(format!("field '{}': invalid pattern: {}", name, e))
            })?;
        }
        Some(TransformKind::Cast) => {
            if field.cast.is_none() {
                return Err(ConfigError::Validation(format!(
                    "field '{}': cast transform requires a cast type",
                    name
                )));
            }
        }
        Some(TransformKind::Strip) | None => {}
    }

    Ok(())
}

fn validate_rate_limit(rate_limit: &RateLimitSpec) -> Result<(), ConfigError> {
    if rate_limit.max_concurrent < 1 || rate_limit.max_concurrent > 64 {
        return Err(ConfigError::Validation(format!(
            "rate-limit max-concurrent must be between 1 and 64, got {}",
            rate_limit.max_concurrent
        )));
    }
    Ok(())
}

fn validate_retry(retry: &RetrySpec) -> Result<(), ConfigError> {
    if retry.max_attempts < 1 || retry.max_attempts > 10 {
        return Err(ConfigError::Validation(format!(
            "retry max-attempts must be between 1 and 10, got {}",
            retry.max_attempts
        )));
    }

    if retry.factor < 1.0 {
        return Err(ConfigError::Validation(format!(
            "retry factor must be >= 1.0, got {}",
            retry.factor
        )));
    }

    if !(0.0..=1.0).contains(&retry.jitter) {
        return Err(ConfigError::Validation(format!(
            "retry jitter must be between 0.0 and 1.0, got {}",
            retry.jitter
        )));
    }

    if retry.max_delay_ms < retry.base_delay_ms {
        return Err(ConfigError::Validation(format!(
            "retry max-delay-ms ({}) must be >= base-delay-ms ({})",
            retry.max_delay_ms, retry.base_delay_ms
        )));
    }

    Ok(())
}

fn compile_css(selector: &str) -> Result<(), ConfigError> {
    scraper::Selector::parse(selector).map_err(|e| ConfigError::InvalidSelector {
        selector: selector.to_string(),
        message: e.to_string(),
    })?;
    Ok(())
}
