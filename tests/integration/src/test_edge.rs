//! Edge cache behaviour in front of a live origin.

#[cfg(test)]
mod tests {
    use bucketfront_core::FileInfo;
    use bucketfront_core::sidecar::FILE_INFO_HEADER;
    use bucketfront_http::FrontBody;
    use http::{HeaderValue, Response, StatusCode as HttpStatus};
    use reqwest::StatusCode;
    use reqwest::header;

    use crate::{
        TENANT_PREFIX, client, dev_config, eventually, seed_store, spawn_edge, spawn_fake,
        spawn_fake_store, spawn_origin,
    };

    const STORE_HOST: &str = "https://storage.googleapis.com";

    #[tokio::test]
    async fn test_should_normalize_html_headers() {
        let (origin, _) = spawn_origin(&dev_config(STORE_HOST), seed_store()).await;
        let (edge, _) = spawn_edge(&origin).await;
        let path = format!("{TENANT_PREFIX}/a-directory/page");

        let direct = client().get(origin.url(&path)).send().await.expect("origin");
        let resp = client().get(edge.url(&path)).send().await.expect("edge");

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers()[header::CACHE_CONTROL],
            "private, max-age=60, stale-while-revalidate=30"
        );
        assert_eq!(resp.headers()[header::ETAG], direct.headers()[header::ETAG]);
        assert_eq!(
            resp.headers()[header::LAST_MODIFIED],
            direct.headers()[header::LAST_MODIFIED]
        );
        assert_eq!(resp.headers()[header::VARY], "Accept-Encoding");
        assert!(!resp.headers().contains_key("x-file-info"));
        assert!(!resp.headers().contains_key("x-cache-status"));
        assert_eq!(resp.text().await.expect("body"), "<h1>a page</h1>");
    }

    #[tokio::test]
    async fn test_should_cache_large_binaries() {
        let mut config = dev_config(STORE_HOST);
        config.inline_extensions.push("wasm".to_owned());
        let (origin, _) = spawn_origin(&config, seed_store()).await;
        let (edge, edge_service) = spawn_edge(&origin).await;
        let url = edge.url(&format!("{TENANT_PREFIX}/app.wasm"));

        let first = client().get(&url).send().await.expect("first");
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(first.headers()["x-cache-status"], "MISS");
        assert_eq!(
            first.headers()[header::CACHE_CONTROL],
            "public, max-age=31536000, immutable"
        );
        let etag = first.headers()[header::ETAG].clone();
        let body = first.bytes().await.expect("body");

        assert!(eventually(|| edge_service.cache().len() == 1).await);

        let second = client().get(&url).send().await.expect("second");
        assert_eq!(second.status(), StatusCode::OK);
        assert_eq!(second.headers()["x-cache-status"], "HIT");
        assert_eq!(second.headers()[header::ETAG], etag);
        assert_eq!(second.bytes().await.expect("body"), body);

        let snapshot = edge_service.metrics().snapshot();
        assert_eq!(snapshot.edge_hits, 1);
        assert_eq!(snapshot.edge_misses, 1);
    }

    #[tokio::test]
    async fn test_should_fetch_and_cache_redirected_binaries() {
        let (store, store_hits) = spawn_fake_store(b"binary payload").await;
        let (origin, _) = spawn_origin(&dev_config(&store.url("")), seed_store()).await;
        let (edge, edge_service) = spawn_edge(&origin).await;
        let path = format!("{TENANT_PREFIX}/big.data");

        let direct = client().get(origin.url(&path)).send().await.expect("origin");
        assert_eq!(direct.status(), StatusCode::FOUND);
        // A signed redirect carries the object's validators in the sidecar.
        assert!(!direct.headers().contains_key(header::ETAG));
        let sidecar = direct.headers()[FILE_INFO_HEADER]
            .to_str()
            .expect("ascii sidecar");
        let origin_etag = FileInfo::parse(sidecar)
            .expect("valid sidecar")
            .etag
            .expect("etag in sidecar");

        let first = client().get(edge.url(&path)).send().await.expect("first");
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(first.headers()["x-cache-status"], "MISS");
        assert_eq!(first.headers()[header::ETAG], origin_etag.as_str());
        assert_eq!(
            first.headers()[header::CACHE_CONTROL],
            "public, max-age=31536000, immutable"
        );
        assert_eq!(first.bytes().await.expect("body").as_ref(), b"binary payload");

        assert!(eventually(|| edge_service.cache().len() == 1).await);

        let second = client().get(edge.url(&path)).send().await.expect("second");
        assert_eq!(second.headers()["x-cache-status"], "HIT");
        assert_eq!(second.bytes().await.expect("body").as_ref(), b"binary payload");
        assert_eq!(store_hits.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_should_pass_auth_requests_through_untouched() {
        let (origin, _) = spawn_origin(&dev_config(STORE_HOST), seed_store()).await;
        let (edge, edge_service) = spawn_edge(&origin).await;

        let resp = client()
            .get(edge.url(&format!("{TENANT_PREFIX}/?gcp-iap-mode=AUTHENTICATING")))
            .send()
            .await
            .expect("request");
        assert_eq!(resp.status(), StatusCode::OK);
        // Origin headers survive, including the sidecar the edge would strip.
        assert!(resp.headers().contains_key("x-file-info"));
        assert!(!resp.headers().contains_key("x-cache-status"));
        assert!(edge_service.cache().is_empty());
        assert_eq!(edge_service.metrics().snapshot().auth_bypasses, 1);
    }

    #[tokio::test]
    async fn test_should_pass_identity_provider_redirects_through() {
        let (upstream, _) = spawn_fake(|_| {
            let mut response = Response::new(FrontBody::empty());
            *response.status_mut() = HttpStatus::FOUND;
            let headers = response.headers_mut();
            headers.insert(
                http::header::LOCATION,
                HeaderValue::from_static("https://iap.googleapis.com/v1/authenticate?x=1"),
            );
            headers.insert(http::header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
            headers.insert("x-file-info", HeaderValue::from_static(r#"{"v":1}"#));
            response
        })
        .await;
        let (edge, edge_service) = spawn_edge(&upstream).await;

        let resp = client()
            .get(edge.url("/app.wasm"))
            .send()
            .await
            .expect("request");
        assert_eq!(resp.status(), StatusCode::FOUND);
        assert_eq!(
            resp.headers()[header::LOCATION],
            "https://iap.googleapis.com/v1/authenticate?x=1"
        );
        assert_eq!(resp.headers()[header::CACHE_CONTROL], "no-store");
        assert!(resp.headers().contains_key("x-file-info"));
        assert!(edge_service.cache().is_empty());
    }

    #[tokio::test]
    async fn test_should_pass_marked_auth_responses_through() {
        let (upstream, _) = spawn_fake(|_| {
            let mut response = Response::new(FrontBody::from_string("sign in"));
            *response.status_mut() = HttpStatus::OK;
            let headers = response.headers_mut();
            headers.insert(
                "x-goog-iap-generated-response",
                HeaderValue::from_static("true"),
            );
            headers.insert(http::header::CACHE_CONTROL, HeaderValue::from_static("private"));
            response
        })
        .await;
        let (edge, edge_service) = spawn_edge(&upstream).await;

        let resp = client()
            .get(edge.url("/app.wasm"))
            .send()
            .await
            .expect("request");
        assert_eq!(resp.headers()[header::CACHE_CONTROL], "private");
        assert_eq!(resp.text().await.expect("body"), "sign in");
        assert!(edge_service.cache().is_empty());
        assert_eq!(edge_service.metrics().snapshot().auth_bypasses, 1);
    }

    #[tokio::test]
    async fn test_should_mark_upstream_errors_no_store() {
        let (upstream, _) = spawn_fake(|_| {
            let mut response = Response::new(FrontBody::from_string("unavailable"));
            *response.status_mut() = HttpStatus::SERVICE_UNAVAILABLE;
            response.headers_mut().insert(
                http::header::CONTENT_TYPE,
                HeaderValue::from_static("text/css"),
            );
            response
        })
        .await;
        let (edge, _) = spawn_edge(&upstream).await;

        let resp = client()
            .get(edge.url("/style.css"))
            .send()
            .await
            .expect("request");
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(resp.headers()[header::CACHE_CONTROL], "no-store");
    }
}
