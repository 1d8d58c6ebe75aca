//! Crawler tests against a stub OAI-PMH endpoint.

use std::sync::Arc;

use nauka_oai::{
    CatalogCrawler, CatalogEntry, CrawlSummary, CrawlerConfig, RepositoryOutcome,
};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn record(lang: &str, title_pl: Option<&str>, title_any: &str, pdf: Option<&str>) -> String {
    let pl = title_pl
        .map(|t| format!(r#"<datacite:title xml:lang="pl">{t}</datacite:title>"#))
        .unwrap_or_default();
    let file = pdf
        .map(|u| format!(r#"<oaire:file mimeType="application/pdf">{u}</oaire:file>"#))
        .unwrap_or_default();
    format!(
        r#"<record><header><identifier>oai:{title_any}</identifier></header><metadata>
<oaire:resource xmlns:oaire="http://namespace.openaire.eu/schema/oaire/" xmlns:datacite="http://datacite.org/schema/kernel-4" xmlns:dc="http://purl.org/dc/elements/1.1/">
<datacite:titles><datacite:title xml:lang="en">{title_any}</datacite:title>{pl}</datacite:titles>
<dc:language>{lang}</dc:language>{file}
</oaire:resource></metadata></record>"#
    )
}

fn page(records: &[String], token: Option<&str>) -> String {
    let token = match token {
        Some(t) => format!(r#"<resumptionToken cursor="0">{t}</resumptionToken>"#),
        None => r#"<resumptionToken cursor="0"/>"#.to_string(),
    };
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<OAI-PMH xmlns="http://www.openarchives.org/OAI/2.0/"><ListRecords>{}{}</ListRecords></OAI-PMH>"#,
        records.join("\n"),
        token
    )
}

fn crawler(server: &MockServer) -> CatalogCrawler {
    CatalogCrawler::new(CrawlerConfig {
        base_url: server.uri(),
        ..CrawlerConfig::default()
    })
    .unwrap()
}

async fn mount_first_page(server: &MockServer, repo: &str, body: String) {
    Mock::given(method("GET"))
        .and(path(format!("/api/oai/{repo}")))
        .and(query_param("verb", "ListRecords"))
        .and(query_param("metadataPrefix", "oai_openaire"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .expect(1)
        .mount(server)
        .await;
}

async fn mount_token_page(server: &MockServer, repo: &str, token: &str, body: String) {
    Mock::given(method("GET"))
        .and(path(format!("/api/oai/{repo}")))
        .and(query_param("resumptionToken", token))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .expect(1)
        .mount(server)
        .await;
}

async fn collect(crawler: CatalogCrawler, repos: &[&str]) -> (Vec<CatalogEntry>, CrawlSummary) {
    let stream = crawler.spawn(
        repos.iter().map(|r| r.to_string()).collect(),
        2,
        CancellationToken::new(),
    );
    let mut entries = Vec::new();
    while let Ok(entry) = stream.entries.recv().await {
        entries.push(entry);
    }
    let summary = stream.handle.await.unwrap();
    (entries, summary)
}

#[tokio::test]
async fn follows_tokens_across_repositories() {
    let server = MockServer::start().await;

    mount_first_page(
        &server,
        "books",
        page(
            &[
                record("pol", Some("Pierwsza"), "First", Some("https://h/1.pdf")),
                record("eng", None, "English only", Some("https://h/x.pdf")),
                record("pol", None, "No pdf", None),
                record("pol", Some("Druga"), "Second", Some("https://h/2.pdf")),
            ],
            Some("books-1"),
        ),
    )
    .await;
    mount_token_page(
        &server,
        "books",
        "books-1",
        page(
            &[record("pol", None, "Third", Some("https://h/3.pdf"))],
            None,
        ),
    )
    .await;
    mount_first_page(
        &server,
        "articles",
        page(
            &[record("pol", Some("Czwarta"), "Fourth", Some("https://h/4.pdf"))],
            None,
        ),
    )
    .await;

    let (entries, summary) = collect(crawler(&server), &["books", "articles"]).await;

    assert_eq!(
        entries,
        vec![
            CatalogEntry::new("https://h/1.pdf", "Pierwsza"),
            CatalogEntry::new("https://h/2.pdf", "Druga"),
            CatalogEntry::new("https://h/3.pdf", "Third"),
            CatalogEntry::new("https://h/4.pdf", "Czwarta"),
        ]
    );
    assert_eq!(summary.entries(), 4);
    assert_eq!(summary.pages(), 3);
    assert_eq!(summary.repositories[0].records, 5);
    assert!(
        summary
            .repositories
            .iter()
            .all(|r| r.outcome == RepositoryOutcome::Exhausted)
    );
}

#[tokio::test]
async fn failed_repository_is_skipped() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/oai/books"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;
    mount_first_page(
        &server,
        "articles",
        page(
            &[record("pol", None, "Only", Some("https://h/only.pdf"))],
            None,
        ),
    )
    .await;

    let (entries, summary) = collect(crawler(&server), &["books", "articles"]).await;

    assert_eq!(entries, vec![CatalogEntry::new("https://h/only.pdf", "Only")]);
    assert!(matches!(
        summary.repositories[0].outcome,
        RepositoryOutcome::Abandoned(_)
    ));
    assert_eq!(summary.repositories[0].pages, 0);
    assert_eq!(summary.repositories[1].outcome, RepositoryOutcome::Exhausted);
}

#[tokio::test]
async fn malformed_page_abandons_repository() {
    let server = MockServer::start().await;

    mount_first_page(
        &server,
        "books",
        "<OAI-PMH><ListRecords><record></header></ListRecords>".to_string(),
    )
    .await;

    let (entries, summary) = collect(crawler(&server), &["books"]).await;

    assert!(entries.is_empty());
    match &summary.repositories[0].outcome {
        RepositoryOutcome::Abandoned(reason) => assert!(reason.starts_with("parse error")),
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn repeated_token_is_requested_once() {
    let server = MockServer::start().await;

    mount_first_page(
        &server,
        "books",
        page(&[record("pol", None, "A", Some("https://h/a.pdf"))], Some("loop")),
    )
    .await;
    mount_token_page(
        &server,
        "books",
        "loop",
        page(&[record("pol", None, "B", Some("https://h/b.pdf"))], Some("loop")),
    )
    .await;

    let (entries, summary) = collect(crawler(&server), &["books"]).await;

    assert_eq!(entries.len(), 2);
    assert_eq!(summary.repositories[0].pages, 2);
    assert_eq!(
        summary.repositories[0].outcome,
        RepositoryOutcome::Abandoned("repeated resumption token".into())
    );
}

#[tokio::test]
async fn no_records_match_is_an_empty_listing() {
    let server = MockServer::start().await;

    mount_first_page(
        &server,
        "books",
        r#"<OAI-PMH xmlns="http://www.openarchives.org/OAI/2.0/"><error code="noRecordsMatch">No matching records</error></OAI-PMH>"#
            .to_string(),
    )
    .await;

    let (entries, summary) = collect(crawler(&server), &["books"]).await;

    assert!(entries.is_empty());
    assert_eq!(summary.repositories[0].outcome, RepositoryOutcome::Exhausted);
}

#[tokio::test]
async fn protocol_error_abandons_repository() {
    let server = MockServer::start().await;

    mount_first_page(
        &server,
        "books",
        r#"<OAI-PMH><error code="cannotDisseminateFormat">Unknown format</error></OAI-PMH>"#
            .to_string(),
    )
    .await;

    let (_, summary) = collect(crawler(&server), &["books"]).await;

    assert_eq!(
        summary.repositories[0].outcome,
        RepositoryOutcome::Abandoned("OAI-PMH error cannotDisseminateFormat: Unknown format".into())
    );
}

#[tokio::test]
async fn gate_blocks_catalog_requests() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(page(&[], None)))
        .expect(0)
        .mount(&server)
        .await;

    let crawler = crawler(&server).with_gate(Arc::new(|_url: &str| false));
    let (entries, summary) = collect(crawler, &["books", "articles"]).await;

    assert!(entries.is_empty());
    assert_eq!(summary.repositories.len(), 2);
    assert!(
        summary
            .repositories
            .iter()
            .all(|r| r.outcome == RepositoryOutcome::Disallowed)
    );
}

#[tokio::test]
async fn cancelled_crawl_stops_before_requesting() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(page(&[], None)))
        .expect(0)
        .mount(&server)
        .await;

    let cancel = CancellationToken::new();
    cancel.cancel();
    let stream = crawler(&server).spawn(vec!["books".into(), "articles".into()], 1, cancel);

    assert!(stream.entries.recv().await.is_err());
    let summary = stream.handle.await.unwrap();
    assert_eq!(summary.repositories.len(), 1);
    assert_eq!(summary.repositories[0].outcome, RepositoryOutcome::Cancelled);
}
