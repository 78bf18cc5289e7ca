//! Site spec loading, validation and engine configuration
//!
//! One TOML file per site describes what to scrape and how politely to do
//! it. Specs are parsed and validated up front; a spec that survives
//! loading never changes for the rest of the run.

pub mod parser;
pub mod types;
pub mod validation;

pub use parser::{compute_spec_hash, load_spec, load_spec_with_hash, scan_spec_dir, LoadedSpec};
pub use types::{
    BrowserSpec, CastKind, EngineConfig, FetchSpec, FieldSpec, OutputMode, OutputSpec,
    PaginationKind, PaginationSpec, RateLimitSpec, ReadyWhen, Renderer, RetrySpec, SelectorKind,
    SelectorSpec, SiteSpec, TransformKind, WebhookSpec,
};
pub use validation::validate;

#[cfg(test)]
pub mod test_support {
    use super::types::*;
    use std::collections::BTreeMap;

    /// Minimal valid spec shared by unit tests across the crate
    pub fn create_test_spec() -> SiteSpec {
        let mut fields = BTreeMap::new();
        fields.insert(
            "title".to_string(),
            FieldSpec {
                selector: "h2 a".to_string(),
                kind: SelectorKind::Css,
                attr: None,
                required: false,
                transform: None,
                pattern: None,
                cast: None,
                default: None,
            },
        );

        SiteSpec {
            site_name: "test-site".to_string(),
            base_url: "https://example.com/list".to_string(),
            renderer: Renderer::Http,
            pagination: PaginationSpec::default(),
            selectors: SelectorSpec {
                container: "div.item".to_string(),
                fields,
            },
            rate_limit: RateLimitSpec::default(),
            retry: RetrySpec::default(),
            fetch: FetchSpec::default(),
            browser: BrowserSpec::default(),
            output: OutputSpec::default(),
            webhook: None,
        }
    }
}
