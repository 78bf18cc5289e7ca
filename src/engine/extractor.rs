//! Field extraction and pagination signal evaluation
//!
//! Selectors are compiled once per site at spec-load time and reused for
//! every page. Extraction walks the configured container nodes, captures
//! each field as text or a named attribute, runs the field's transform
//! pipeline, and finally evaluates the pagination kind against the same
//! document to produce the next-page signal.

use crate::config::{PaginationKind, SiteSpec};
use crate::engine::transforms::FieldPipeline;
use crate::state::{ExtractedItem, NextSignal, PageDescriptor, PageOutcome, Provenance};
use crate::ConfigError;
use chrono::Utc;
use scraper::{ElementRef, Html, Selector};
use url::Url;

struct CompiledField {
    name: String,
    selector: Selector,
    attr: Option<String>,
    required: bool,
    pipeline: FieldPipeline,
}

/// Per-site extractor with all selectors resolved up front
pub struct Extractor {
    site_name: String,
    container: Selector,
    fields: Vec<CompiledField>,
    next_selector: Option<Selector>,
}

impl Extractor {
    /// Compiles every selector a spec declares.
    ///
    /// Validation has already vetted the spec, so failures here indicate a
    /// spec that bypassed validation and are reported as config errors.
    pub fn compile(spec: &SiteSpec) -> Result<Self, ConfigError> {
        let container = compile_selector(&spec.selectors.container)?;

        let mut fields = Vec::with_capacity(spec.selectors.fields.len());
        for (name, field) in &spec.selectors.fields {
            fields.push(CompiledField {
                name: name.clone(),
                selector: compile_selector(&field.selector)?,
                attr: field.attr.clone(),
                required: field.required,
                pipeline: FieldPipeline::compile(field)?,
            });
        }

        let next_selector = match (&spec.pagination.kind, &spec.pagination.selector) {
            (PaginationKind::NextButton, Some(selector)) => Some(compile_selector(selector)?),
            _ => None,
        };

        Ok(Self {
            site_name: spec.site_name.clone(),
            container,
            fields,
            next_selector,
        })
    }

    /// Extracts items from a fetched page and evaluates the next-page
    /// signal.
    ///
    /// `prior_items` is the driver's running item count for the site,
    /// used by infinite scroll to detect that a scroll round produced
    /// nothing new.
    pub fn extract(
        &self,
        body: &str,
        descriptor: &PageDescriptor,
        final_url: &Url,
        spec: &SiteSpec,
        prior_items: usize,
    ) -> PageOutcome {
        let document = Html::parse_document(body);

        let mut items = Vec::new();
        let mut dropped = 0u32;
        let fetched_at = Utc::now();

        for container in document.select(&self.container) {
            match self.extract_item(container) {
                Some(fields) => items.push(ExtractedItem {
                    fields,
                    provenance: Provenance {
                        site_name: self.site_name.clone(),
                        source_url: final_url.to_string(),
                        page: descriptor.to_string(),
                        fetched_at,
                    },
                }),
                None => dropped += 1,
            }
        }

        if dropped > 0 {
            tracing::warn!(
                "Dropped {} item(s) missing required fields on {} ({})",
                dropped,
                final_url,
                self.site_name
            );
        }

        // A page whose every item lacked a required field is an extraction
        // failure, not an empty page: misconfigured selectors must not
        // silently exhaust a source.
        if items.is_empty() && dropped > 0 {
            return PageOutcome {
                items,
                dropped,
                next: NextSignal::Error(format!(
                    "required field missing on all {} item(s)",
                    dropped
                )),
            };
        }

        let next = self.next_signal(&document, descriptor, final_url, spec, items.len(), prior_items);

        PageOutcome { items, dropped, next }
    }

    /// Extracts one item relative to its container node; None when a
    /// required field is missing
    fn extract_item(
        &self,
        container: ElementRef<'_>,
    ) -> Option<std::collections::BTreeMap<String, String>> {
        let mut fields = std::collections::BTreeMap::new();

        for field in &self.fields {
            let raw = container
                .select(&field.selector)
                .next()
                .and_then(|el| match &field.attr {
                    Some(attr) => el.value().attr(attr).map(str::to_string),
                    None => Some(el.text().collect::<String>().trim().to_string()),
                });

            match field.pipeline.apply(raw) {
                Some(value) => {
                    fields.insert(field.name.clone(), value);
                }
                None if field.required => return None,
                None => {}
            }
        }

        Some(fields)
    }

    fn next_signal(
        &self,
        document: &Html,
        descriptor: &PageDescriptor,
        final_url: &Url,
        spec: &SiteSpec,
        item_count: usize,
        prior_items: usize,
    ) -> NextSignal {
        match spec.pagination.kind {
            PaginationKind::None => NextSignal::NoMore,

            PaginationKind::UrlPattern => {
                let page = match descriptor {
                    PageDescriptor::Template { page } => *page,
                    _ => return NextSignal::NoMore,
                };

                // An empty page means the source ran out before max-pages
                if item_count == 0 {
                    return NextSignal::NoMore;
                }

                let next_page = page + 1;
                if next_page >= spec.pagination.start + spec.pagination.max_pages {
                    NextSignal::NoMore
                } else {
                    NextSignal::Next(PageDescriptor::Template { page: next_page })
                }
            }

            PaginationKind::NextButton => {
                let selector = match &self.next_selector {
                    Some(selector) => selector,
                    None => return NextSignal::NoMore,
                };

                let href = document
                    .select(selector)
                    .next()
                    .and_then(|el| el.value().attr("href"));

                match href {
                    Some(href) => match final_url.join(href) {
                        Ok(next_url) => NextSignal::Next(PageDescriptor::Url(next_url)),
                        Err(e) => NextSignal::Error(format!(
                            "next link '{}' does not resolve against {}: {}",
                            href, final_url, e
                        )),
                    },
                    None => NextSignal::NoMore,
                }
            }

            PaginationKind::InfiniteScroll => {
                let round = match descriptor {
                    PageDescriptor::Scroll { round } => *round,
                    _ => return NextSignal::NoMore,
                };

                // Stop once a scroll round grew nothing; re-extracted
                // earlier items are absorbed by the sink's idempotent key.
                if item_count <= prior_items {
                    return NextSignal::NoMore;
                }

                if round + 1 >= spec.pagination.max_pages {
                    NextSignal::NoMore
                } else {
                    NextSignal::Next(PageDescriptor::Scroll { round: round + 1 })
                }
            }
        }
    }
}

fn compile_selector(selector: &str) -> Result<Selector, ConfigError> {
    Selector::parse(selector).map_err(|e| ConfigError::InvalidSelector {
        selector: selector.to_string(),
        message: e.to_string(),
    })
}
