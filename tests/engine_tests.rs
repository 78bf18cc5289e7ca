//! End-to-end engine tests
//!
//! These tests run the full orchestrator against wiremock servers:
//! real HTTP, real pagination, real retry timing (kept small).

use siterake::config::{EngineConfig, LoadedSpec};
use siterake::events::{CollectingEvents, EngineEvent, EventSink};
use siterake::sink::MemorySink;
use siterake::state::TerminalReason;
use siterake::Orchestrator;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Builds one listing page: one `div.item` per title, optionally a next
/// link
fn page_html(titles: &[&str], next: Option<&str>) -> String {
    let items: String = titles
        .iter()
        .map(|t| format!(r#"<div class="item"><h2><a>{}</a></h2></div>"#, t))
        .collect();
    let pager = next
        .map(|href| format!(r#"<ul><li class="next"><a href="{}">next</a></li></ul>"#, href))
        .unwrap_or_default();
    format!("<html><body>{}{}</body></html>", items, pager)
}

fn html_response(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/html")
        .set_body_string(body)
}

/// Parses a spec from TOML the way the loader does, skipping the disk
fn load_spec_from(toml: &str) -> LoadedSpec {
    let spec: siterake::config::SiteSpec = toml::from_str(toml).expect("test spec must parse");
    siterake::config::validate(&spec).expect("test spec must validate");
    LoadedSpec {
        spec,
        hash: "test-hash".to_string(),
        path: PathBuf::from("test.toml"),
    }
}

struct Harness {
    summary: siterake::state::RunSummary,
    sink: MemorySink,
    events: Vec<EngineEvent>,
}

/// Runs the orchestrator over the given specs with a memory sink
async fn run_engine(specs: Vec<LoadedSpec>, history_db: &std::path::Path) -> Harness {
    let sink = MemorySink::new();
    let events = Arc::new(CollectingEvents::new());

    let config = EngineConfig {
        specs_dir: PathBuf::from("unused"),
        workers: 2,
        global_concurrency: 8,
        history_db: history_db.to_path_buf(),
    };

    let orchestrator = Orchestrator::new(config, specs, Box::new(sink.clone()))
        .with_event_sink(Arc::clone(&events) as Arc<dyn EventSink>);
    let summary = orchestrator.run().await.expect("run must complete");

    Harness {
        summary,
        sink,
        events: events.snapshot(),
    }
}

fn terminal_reason(harness: &Harness, site: &str) -> TerminalReason {
    harness
        .summary
        .outcomes
        .iter()
        .find(|o| o.site_name == site)
        .unwrap_or_else(|| panic!("no outcome for {}", site))
        .terminal
}

#[tokio::test]
async fn url_pattern_run_honors_max_pages() {
    let server = MockServer::start().await;

    // Every page reports two items; the source would paginate forever
    for page in 1..=4 {
        Mock::given(method("GET"))
            .and(path("/catalogue"))
            .and(query_param("page", page.to_string()))
            .respond_with(html_response(page_html(
                &[&format!("a{}", page), &format!("b{}", page)],
                None,
            )))
            .expect(if page <= 3 { 1 } else { 0 })
            .mount(&server)
            .await;
    }

    let spec = load_spec_from(&format!(
        r#"
site-name = "books"
base-url = "{}/catalogue?page={{page}}"

[pagination]
kind = "url-pattern"
max-pages = 3

[selectors]
container = "div.item"

[selectors.fields.title]
selector = "h2 a"
required = true

[rate-limit]
delay-ms = 0
max-concurrent = 2
"#,
        server.uri()
    ));

    let dir = tempfile::tempdir().unwrap();
    let harness = run_engine(vec![spec], &dir.path().join("meta.db")).await;

    // 3 pages x 2 items, terminal max_pages, page 4 never requested
    assert_eq!(terminal_reason(&harness, "books"), TerminalReason::MaxPages);
    assert_eq!(harness.sink.count("books"), 6);
    assert_eq!(harness.summary.total_items, 6);
    assert_eq!(harness.summary.sites_failed, 0);
    server.verify().await;

    let extracted: Vec<_> = harness
        .events
        .iter()
        .filter(|e| matches!(e, EngineEvent::PageExtracted { .. }))
        .collect();
    assert_eq!(extracted.len(), 3);
}

#[tokio::test]
async fn next_button_run_stops_when_link_disappears() {
    let server = MockServer::start().await;
    let uri = server.uri();

    Mock::given(method("GET"))
        .and(path("/list"))
        .respond_with(html_response(page_html(&["one"], Some(&format!("{}/list/2", uri)))))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/list/2"))
        .respond_with(html_response(page_html(&["two"], Some("/list/3"))))
        .expect(1)
        .mount(&server)
        .await;
    // Page 3 has items but no next link
    Mock::given(method("GET"))
        .and(path("/list/3"))
        .respond_with(html_response(page_html(&["three"], None)))
        .expect(1)
        .mount(&server)
        .await;

    let spec = load_spec_from(&format!(
        r#"
site-name = "news"
base-url = "{}/list"

[pagination]
kind = "next-button"
selector = "li.next > a"
max-pages = 10

[selectors]
container = "div.item"

[selectors.fields.title]
selector = "h2 a"

[rate-limit]
delay-ms = 0
"#,
        uri
    ));

    let dir = tempfile::tempdir().unwrap();
    let harness = run_engine(vec![spec], &dir.path().join("meta.db")).await;

    assert_eq!(terminal_reason(&harness, "news"), TerminalReason::Exhausted);
    assert_eq!(harness.sink.count("news"), 3);
    server.verify().await;
}

#[tokio::test]
async fn transient_failures_retry_then_succeed() {
    let server = MockServer::start().await;

    // First two attempts fail with 503; mounted first so they match
    // until exhausted, then the success mock takes over
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(html_response(page_html(&["finally"], None)))
        .expect(1)
        .mount(&server)
        .await;

    let spec = load_spec_from(&format!(
        r#"
site-name = "flaky"
base-url = "{}/flaky"

[selectors]
container = "div.item"

[selectors.fields.title]
selector = "h2 a"

[rate-limit]
delay-ms = 0

[retry]
max-attempts = 3
base-delay-ms = 5
max-delay-ms = 50
jitter = 0.0
"#,
        server.uri()
    ));

    let dir = tempfile::tempdir().unwrap();
    let harness = run_engine(vec![spec], &dir.path().join("meta.db")).await;

    // Exactly three fetch calls, then a successful extraction
    assert_eq!(terminal_reason(&harness, "flaky"), TerminalReason::Exhausted);
    assert_eq!(harness.sink.count("flaky"), 1);
    assert_eq!(harness.summary.sites_failed, 0);
    server.verify().await;

    let retries: Vec<_> = harness
        .events
        .iter()
        .filter_map(|e| match e {
            EngineEvent::JobRetried { attempt, .. } => Some(*attempt),
            _ => None,
        })
        .collect();
    assert_eq!(retries, vec![1, 2]);
}

#[tokio::test]
async fn fatal_failure_ends_site_without_retry() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let spec = load_spec_from(&format!(
        r#"
site-name = "gone"
base-url = "{}/gone"

[selectors]
container = "div.item"

[selectors.fields.title]
selector = "h2 a"

[rate-limit]
delay-ms = 0

[retry]
max-attempts = 3
base-delay-ms = 2000
max-delay-ms = 10000
"#,
        server.uri()
    ));

    let dir = tempfile::tempdir().unwrap();
    let start = Instant::now();
    let harness = run_engine(vec![spec], &dir.path().join("meta.db")).await;

    // One request, no items, and no retry delay elapsed (the configured
    // base delay of 2s would be visible in the wall clock)
    assert_eq!(terminal_reason(&harness, "gone"), TerminalReason::PageFailed);
    assert_eq!(harness.sink.count("gone"), 0);
    assert_eq!(harness.summary.sites_failed, 1);
    assert!(start.elapsed() < Duration::from_millis(1500));
    server.verify().await;

    assert!(harness
        .events
        .iter()
        .any(|e| matches!(e, EngineEvent::JobFailed { kind, .. } if kind == "not_found")));
}

#[tokio::test]
async fn repeating_next_link_is_cut_as_cycle() {
    let server = MockServer::start().await;
    let uri = server.uri();

    // The "next" link points straight back at the entry page
    Mock::given(method("GET"))
        .and(path("/loop"))
        .respond_with(html_response(page_html(
            &["only"],
            Some(&format!("{}/loop", uri)),
        )))
        .expect(1)
        .mount(&server)
        .await;

    let spec = load_spec_from(&format!(
        r#"
site-name = "loopy"
base-url = "{}/loop"

[pagination]
kind = "next-button"
selector = "li.next > a"
max-pages = 100

[selectors]
container = "div.item"

[selectors.fields.title]
selector = "h2 a"

[rate-limit]
delay-ms = 0
"#,
        uri
    ));

    let dir = tempfile::tempdir().unwrap();
    let harness = run_engine(vec![spec], &dir.path().join("meta.db")).await;

    // The repeated descriptor is never fetched a second time
    assert_eq!(
        terminal_reason(&harness, "loopy"),
        TerminalReason::CycleDetected
    );
    assert_eq!(harness.sink.count("loopy"), 1);
    server.verify().await;
}

#[tokio::test]
async fn one_failing_site_does_not_abort_the_others() {
    let server = MockServer::start().await;
    let uri = server.uri();

    Mock::given(method("GET"))
        .and(path("/healthy"))
        .respond_with(html_response(page_html(&["ok1", "ok2"], None)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let healthy = load_spec_from(&format!(
        r#"
site-name = "healthy"
base-url = "{}/healthy"

[selectors]
container = "div.item"

[selectors.fields.title]
selector = "h2 a"

[rate-limit]
delay-ms = 0
"#,
        uri
    ));
    let broken = load_spec_from(&format!(
        r#"
site-name = "broken"
base-url = "{}/broken"

[selectors]
container = "div.item"

[selectors.fields.title]
selector = "h2 a"

[rate-limit]
delay-ms = 0
"#,
        uri
    ));

    let dir = tempfile::tempdir().unwrap();
    let harness = run_engine(vec![healthy, broken], &dir.path().join("meta.db")).await;

    assert_eq!(harness.summary.total_sites, 2);
    assert_eq!(harness.summary.sites_failed, 1);
    assert_eq!(terminal_reason(&harness, "broken"), TerminalReason::PageFailed);
    assert_eq!(terminal_reason(&harness, "healthy"), TerminalReason::Exhausted);
    assert_eq!(harness.sink.count("healthy"), 2);
}

#[tokio::test]
async fn required_field_missing_everywhere_is_extraction_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/thin"))
        .respond_with(html_response(page_html(&["present"], None)))
        .mount(&server)
        .await;

    // `sku` is required but the page never carries it
    let spec = load_spec_from(&format!(
        r#"
site-name = "thin"
base-url = "{}/thin"

[selectors]
container = "div.item"

[selectors.fields.title]
selector = "h2 a"

[selectors.fields.sku]
selector = "span.sku"
required = true

[rate-limit]
delay-ms = 0
"#,
        server.uri()
    ));

    let dir = tempfile::tempdir().unwrap();
    let harness = run_engine(vec![spec], &dir.path().join("meta.db")).await;

    assert_eq!(
        terminal_reason(&harness, "thin"),
        TerminalReason::ExtractionError
    );
    assert_eq!(harness.sink.count("thin"), 0);
}

#[tokio::test]
async fn cancellation_stops_new_fetches_and_keeps_partial_results() {
    let server = MockServer::start().await;

    // Every page has an item, so the source would paginate until the
    // 1000-page ceiling if nothing stopped it
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(html_response(page_html(&["item"], None)))
        .mount(&server)
        .await;

    let spec = load_spec_from(&format!(
        r#"
site-name = "slow"
base-url = "{}/slow?page={{page}}"

[pagination]
kind = "url-pattern"
max-pages = 1000

[selectors]
container = "div.item"

[selectors.fields.title]
selector = "h2 a"

[rate-limit]
delay-ms = 150
"#,
        server.uri()
    ));

    let dir = tempfile::tempdir().unwrap();
    let sink = MemorySink::new();
    let config = EngineConfig {
        specs_dir: PathBuf::from("unused"),
        workers: 2,
        global_concurrency: 8,
        history_db: dir.path().join("meta.db"),
    };

    let orchestrator = Orchestrator::new(config, vec![spec], Box::new(sink.clone()));
    let cancel = orchestrator.cancel_handle();

    let runner = tokio::spawn(orchestrator.run());
    tokio::time::sleep(Duration::from_millis(400)).await;
    cancel.cancel();

    let summary = tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .expect("run must end promptly after cancellation")
        .expect("runner task must not panic")
        .expect("run must not error");

    let outcome = &summary.outcomes[0];
    assert_eq!(outcome.terminal, TerminalReason::Cancelled);

    // Items extracted before the signal stay in the sink
    assert!(sink.count("slow") >= 1);
    assert!(outcome.pages_fetched < 100);
}

#[tokio::test]
async fn run_history_records_each_site_terminal() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/once"))
        .respond_with(html_response(page_html(&["solo"], None)))
        .mount(&server)
        .await;

    let spec = load_spec_from(&format!(
        r#"
site-name = "once"
base-url = "{}/once"

[selectors]
container = "div.item"

[selectors.fields.title]
selector = "h2 a"

[rate-limit]
delay-ms = 0
"#,
        server.uri()
    ));

    let dir = tempfile::tempdir().unwrap();
    let history_db = dir.path().join("meta.db");
    let harness = run_engine(vec![spec], &history_db).await;
    assert_eq!(harness.summary.sites_failed, 0);

    let store = siterake::history::RunHistoryStore::new(&history_db).unwrap();
    let runs = store.last_runs().unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].site_name, "once");
    assert_eq!(runs[0].items_extracted, 1);
    assert_eq!(runs[0].terminal, TerminalReason::Exhausted);
    assert_eq!(runs[0].spec_hash, "test-hash");
}
