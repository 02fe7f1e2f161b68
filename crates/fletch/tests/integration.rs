//! Integration tests for fletch using wiremock

use fletch::{
    CacheMethods, Client, FetchError, Method, RequestOptions, RetryPolicy, DEFAULT_USER_AGENT,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};
use tracing_subscriber::EnvFilter;
use wiremock::matchers::{body_json, body_string, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client() -> Client {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    Client::builder().testing().build()
}

fn fast_retry(retries: u32) -> RetryPolicy {
    RetryPolicy::new(retries)
        .with_min_timeout(Duration::from_millis(1))
        .with_randomize(false)
}

#[tokio::test]
async fn test_simple_get() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/"))
        .and(header("referer", mock_server.uri().as_str()))
        .and(header("user-agent", DEFAULT_USER_AGENT))
        .respond_with(ResponseTemplate::new(200).set_body_string("Hello, World!"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let text = client()
        .text(&format!("{}/", mock_server.uri()), &RequestOptions::new())
        .await
        .unwrap();
    assert_eq!(text, "Hello, World!");
}

#[tokio::test]
async fn test_free_function() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/free"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&mock_server)
        .await;

    let text = fletch::text(
        &format!("{}/free", mock_server.uri()),
        &RequestOptions::new().delay(Duration::ZERO),
    )
    .await
    .unwrap();
    assert_eq!(text, "ok");
}

#[tokio::test]
async fn test_head_request() {
    let mock_server = MockServer::start().await;

    Mock::given(method("HEAD"))
        .and(path("/file.pdf"))
        .respond_with(ResponseTemplate::new(200).insert_header("content-type", "application/pdf"))
        .mount(&mock_server)
        .await;

    let resp = client()
        .fetch(
            &format!("{}/file.pdf", mock_server.uri()),
            &RequestOptions::new().method(Method::Head),
        )
        .await
        .unwrap();
    assert_eq!(resp.status, 200);
    assert_eq!(resp.header("content-type"), Some("application/pdf"));
    assert_eq!(resp.text(), "");
}

#[tokio::test]
async fn test_form_data_post() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/form"))
        .and(header("content-type", "application/x-www-form-urlencoded"))
        .and(body_string("name=fletch+rs"))
        .respond_with(ResponseTemplate::new(200).set_body_string("posted"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let text = client()
        .text(
            &format!("{}/form", mock_server.uri()),
            &RequestOptions::new().form_data([("name", "fletch rs")]),
        )
        .await
        .unwrap();
    assert_eq!(text, "posted");
}

#[tokio::test]
async fn test_json_data_post() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api"))
        .and(header("content-type", "application/json"))
        .and(body_json(json!({"query": "dracula", "page": 1})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"results": [1, 2]})))
        .mount(&mock_server)
        .await;

    let value: Value = client()
        .json(
            &format!("{}/api", mock_server.uri()),
            &RequestOptions::new().json_data(json!({"query": "dracula", "page": 1})),
        )
        .await
        .unwrap();
    assert_eq!(value, json!({"results": [1, 2]}));
}

#[tokio::test]
async fn test_typed_json() {
    #[derive(Debug, Deserialize)]
    struct Movie {
        title: String,
        year: u16,
    }

    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/movie"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"title": "Nosferatu", "year": 1922})),
        )
        .mount(&mock_server)
        .await;

    let movie: Movie = client()
        .json(&format!("{}/movie", mock_server.uri()), &RequestOptions::new())
        .await
        .unwrap();
    assert_eq!(movie.title, "Nosferatu");
    assert_eq!(movie.year, 1922);
}

#[tokio::test]
async fn test_url_search_params() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("q", "rust lang"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_string("results"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let text = client()
        .text(
            &format!("{}/search?stale=1", mock_server.uri()),
            &RequestOptions::new().query("q", "rust lang").query("page", 2),
        )
        .await
        .unwrap();
    assert_eq!(text, "results");
}

#[tokio::test]
async fn test_5xx_without_retry() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/error"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&mock_server)
        .await;

    let url = format!("{}/error", mock_server.uri());
    let err = client()
        .text(&url, &RequestOptions::new().no_retry())
        .await
        .unwrap_err();

    assert_eq!(err.status(), Some(500));
    assert_eq!(
        err.to_string(),
        format!("500: Request failed with status code 500 - {}", url)
    );
}

#[tokio::test]
async fn test_retry_then_success() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(200).set_body_string("recovered"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let attempts = Arc::new(Mutex::new(Vec::new()));
    let seen = attempts.clone();
    let policy = fast_retry(3).on_retry(move |_err, attempt| seen.lock().unwrap().push(attempt));

    let text = client()
        .text(
            &format!("{}/flaky", mock_server.uri()),
            &RequestOptions::new().retry(policy),
        )
        .await
        .unwrap();

    assert_eq!(text, "recovered");
    assert_eq!(*attempts.lock().unwrap(), vec![1, 2]);
}

#[tokio::test]
async fn test_retry_count_exhausted() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/down"))
        .respond_with(ResponseTemplate::new(502))
        .expect(3)
        .mount(&mock_server)
        .await;

    let err = client()
        .text(
            &format!("{}/down", mock_server.uri()),
            &RequestOptions::new().retry(2u32),
        )
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(502));
}

#[tokio::test]
async fn test_abort_on_status() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(410))
        .expect(1)
        .mount(&mock_server)
        .await;

    let err = client()
        .text(
            &format!("{}/gone", mock_server.uri()),
            &RequestOptions::new().retry(fast_retry(5).abort_on_status([410])),
        )
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(410));
}

#[tokio::test]
async fn test_custom_status_validator() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_string("not here"))
        .mount(&mock_server)
        .await;

    let text = client()
        .text(
            &format!("{}/missing", mock_server.uri()),
            &RequestOptions::new().validate_status(|status| status == 404),
        )
        .await
        .unwrap();
    assert_eq!(text, "not here");
}

#[tokio::test]
async fn test_cache_hit_skips_request() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/cached"))
        .respond_with(ResponseTemplate::new(200).set_body_string("once"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client();
    let url = format!("{}/cached", mock_server.uri());
    let options = RequestOptions::new().cache(true);

    let first = assert_ok!(client.text(&url, &options).await);
    let second = assert_ok!(client.text(&url, &options).await);
    assert_eq!(first, "once");
    assert_eq!(second, first);
}

#[tokio::test]
async fn test_cache_disabled_by_default() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/uncached"))
        .respond_with(ResponseTemplate::new(200).set_body_string("every time"))
        .expect(2)
        .mount(&mock_server)
        .await;

    let client = client();
    let url = format!("{}/uncached", mock_server.uri());
    client.text(&url, &RequestOptions::new()).await.unwrap();
    client.text(&url, &RequestOptions::new()).await.unwrap();
    assert!(client.cache().is_empty());
}

#[tokio::test]
async fn test_cache_miss_per_form_data() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/form"))
        .respond_with(ResponseTemplate::new(200).set_body_string("posted"))
        .expect(2)
        .mount(&mock_server)
        .await;

    let client = client();
    let url = format!("{}/form", mock_server.uri());
    let first = RequestOptions::new().cache(true).form_data([("id", 1)]);
    let second = RequestOptions::new().cache(true).form_data([("id", 2)]);

    client.text(&url, &first).await.unwrap();
    client.text(&url, &second).await.unwrap();
    client.text(&url, &first).await.unwrap();
    assert_eq!(client.cache().len(), 2);
}

#[tokio::test]
async fn test_custom_cache_methods() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/external"))
        .respond_with(ResponseTemplate::new(200).set_body_string("stored"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let store: Arc<Mutex<HashMap<String, String>>> = Arc::default();
    let reads = store.clone();
    let writes = store.clone();
    let methods = CacheMethods::new()
        .key(|params| format!("{}:{}", params.format, params.url))
        .hit(move |key| reads.lock().unwrap().get(key).cloned())
        .write(move |key, payload| {
            writes.lock().unwrap().insert(key.to_string(), payload.to_string());
        });

    let client = client();
    let url = format!("{}/external", mock_server.uri());
    let options = RequestOptions::new().cache(true).cache_methods(methods);

    assert_eq!(client.text(&url, &options).await.unwrap(), "stored");
    assert_eq!(client.text(&url, &options).await.unwrap(), "stored");
    assert_eq!(
        store.lock().unwrap().get(&format!("text:{}", url)).map(String::as_str),
        Some("stored")
    );
    assert!(client.cache().is_empty());
}

#[tokio::test]
async fn test_redirects() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/old"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/new"))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/new"))
        .respond_with(ResponseTemplate::new(200).set_body_string("moved"))
        .mount(&mock_server)
        .await;

    let client = client();
    let url = format!("{}/old", mock_server.uri());

    assert_eq!(client.text(&url, &RequestOptions::new()).await.unwrap(), "moved");

    let resp = client
        .fetch(&url, &RequestOptions::new().max_redirections(0))
        .await
        .unwrap();
    assert_eq!(resp.status, 302);
    assert_eq!(resp.header("location"), Some("/new"));
}

#[tokio::test]
async fn test_timeout_is_transport_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&mock_server)
        .await;

    let url = format!("{}/slow", mock_server.uri());
    let err = client()
        .text(
            &url,
            &RequestOptions::new()
                .timeout(Duration::from_millis(100))
                .no_retry(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::Transport(_)));
    assert!(err.to_string().ends_with(&format!(" - {}", url)));
}

#[tokio::test]
async fn test_response_encoding() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/latin1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(vec![0x63, 0x61, 0x66, 0xe9], "text/plain"),
        )
        .mount(&mock_server)
        .await;

    let text = client()
        .text(
            &format!("{}/latin1", mock_server.uri()),
            &RequestOptions::new().encoding("latin1"),
        )
        .await
        .unwrap();
    assert_eq!(text, "café");
}

#[tokio::test]
async fn test_html() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw("<html><head><title>Fletch</title></head></html>", "text/html"),
        )
        .mount(&mock_server)
        .await;

    let document = client()
        .html(&format!("{}/page", mock_server.uri()), &RequestOptions::new())
        .await
        .unwrap();
    let selector = scraper::Selector::parse("title").unwrap();
    let title: String = document.select(&selector).next().unwrap().text().collect();
    assert_eq!(title, "Fletch");
}

#[tokio::test]
async fn test_script_by_id() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/script"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            "<html><body><script id=\"id\">var foo='bar'</script></body></html>",
            "text/html",
        ))
        .mount(&mock_server)
        .await;

    let data: Value = client()
        .script(
            &format!("{}/script", mock_server.uri()),
            &RequestOptions::new().script_path("#id"),
        )
        .await
        .unwrap();
    assert_eq!(data, json!({"foo": "bar"}));
}

#[tokio::test]
async fn test_script_by_predicate_with_sandbox() {
    let mock_server = MockServer::start().await;

    let html = r#"<html><body>
        <script src="/app.js"></script>
        <script>window.__STATE__ = { user: "mina", items: [1, 2, 3] };</script>
    </body></html>"#;

    Mock::given(method("GET"))
        .and(path("/state"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(html, "text/html"))
        .mount(&mock_server)
        .await;

    let data: Value = client()
        .script(
            &format!("{}/state", mock_server.uri()),
            &RequestOptions::new()
                .script_find_fn(|el| el.text().any(|t| t.contains("__STATE__")))
                .script_sandbox([("window", json!({}))]),
        )
        .await
        .unwrap();
    assert_eq!(
        data["window"]["__STATE__"],
        json!({"user": "mina", "items": [1, 2, 3]})
    );
}

#[tokio::test]
async fn test_script_without_locator_makes_no_request() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let err = client()
        .script::<Value>(&format!("{}/", mock_server.uri()), &RequestOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Configuration(_)));
    assert_eq!(
        err.to_string(),
        "fletch.script: scriptPath or scriptFindFn are required"
    );
}

#[tokio::test]
async fn test_script_not_found() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("<html></html>", "text/html"))
        .mount(&mock_server)
        .await;

    let err = client()
        .script::<Value>(
            &format!("{}/", mock_server.uri()),
            &RequestOptions::new().script_path("#missing"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::NotFound(_)));
}

#[tokio::test]
async fn test_jsonld_with_malformed_block() {
    let mock_server = MockServer::start().await;

    let html = r#"<html><head>
        <script type="application/ld+json">{"@context": "https://schema.org", "@type": "Movie"}</script>
        <script type="application/ld+json">{ not json }</script>
    </head></html>"#;

    Mock::given(method("GET"))
        .and(path("/movie"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(html, "text/html"))
        .mount(&mock_server)
        .await;

    let blocks = client()
        .jsonld(&format!("{}/movie", mock_server.uri()), &RequestOptions::new())
        .await
        .unwrap();
    assert_eq!(blocks.len(), 2);
    assert_eq!(
        blocks[0],
        json!({"@context": "https://schema.org", "@type": "Movie"})
    );
    assert_eq!(blocks[1], json!({}));
}

#[tokio::test]
async fn test_html_cache_shared_by_extractors() {
    let mock_server = MockServer::start().await;

    let html = r#"<html><head>
        <script type="application/ld+json">{"@type": "WebSite"}</script>
        <script id="__NEXT_DATA__" type="application/json">{"page": "/"}</script>
    </head></html>"#;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(html, "text/html"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client();
    let url = format!("{}/", mock_server.uri());
    let options = RequestOptions::new()
        .cache(true)
        .embedded_json_selector("#__NEXT_DATA__");

    let blocks = client.jsonld(&url, &options).await.unwrap();
    let data: Value = client.embedded_json(&url, &options).await.unwrap();
    assert_eq!(blocks, vec![json!({"@type": "WebSite"})]);
    assert_eq!(data, json!({"page": "/"}));
}

#[tokio::test]
async fn test_embedded_json_parse_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            "<script id=\"data\" type=\"application/json\">{broken</script>",
            "text/html",
        ))
        .mount(&mock_server)
        .await;

    let err = client()
        .embedded_json::<Value>(
            &format!("{}/", mock_server.uri()),
            &RequestOptions::new().embedded_json_selector("#data"),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Parse(_)));
    assert!(err.to_string().starts_with("fletch.embeddedJson: "));
}

#[tokio::test]
async fn test_headers_and_cookies() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/login"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-request-id", "abc")
                .append_header("set-cookie", "session=s1; Path=/; HttpOnly")
                .append_header("set-cookie", "theme=dark"),
        )
        .mount(&mock_server)
        .await;

    let client = client();
    let url = format!("{}/login", mock_server.uri());

    let headers = client.headers(&url, &RequestOptions::new()).await.unwrap();
    assert_eq!(headers.get("x-request-id").unwrap(), "abc");

    let jar = client.cookies(&url, &RequestOptions::new()).await.unwrap();
    assert_eq!(jar.len(), 2);
    assert_eq!(jar.cookie_string(), "session=s1; theme=dark");
}

#[tokio::test]
async fn test_create_applies_defaults() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/private"))
        .and(header("authorization", "Bearer token"))
        .and(header("user-agent", "Fletch-Test/1.0"))
        .and(header("x-call", "yes"))
        .respond_with(ResponseTemplate::new(200).set_body_string("secret"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let api = client().create(
        RequestOptions::new()
            .header("Authorization", "Bearer token")
            .user_agent("Fletch-Test/1.0"),
    );
    let text = api
        .text(
            &format!("{}/private", mock_server.uri()),
            &RequestOptions::new().header("x-call", "yes"),
        )
        .await
        .unwrap();
    assert_eq!(text, "secret");
}

#[tokio::test]
async fn test_concurrent_calls() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&mock_server)
        .await;

    let client = client();
    let counter = Arc::new(AtomicUsize::new(0));
    let calls = (0..5).map(|i| {
        let client = client.clone();
        let counter = counter.clone();
        let url = format!("{}/item/{}", mock_server.uri(), i);
        async move {
            let text = client.text(&url, &RequestOptions::new()).await.unwrap();
            counter.fetch_add(text.len(), Ordering::SeqCst);
        }
    });
    futures::future::join_all(calls).await;
    assert_eq!(counter.load(Ordering::SeqCst), 10);
}

#[tokio::test]
async fn test_connection_refused() {
    let err = assert_err!(
        client()
            .text("http://127.0.0.1:1/", &RequestOptions::new().no_retry())
            .await
    );
    assert!(matches!(err, FetchError::Transport(_)));
    assert!(err.is_transient());
}
