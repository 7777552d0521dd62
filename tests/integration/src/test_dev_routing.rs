//! End-to-end dev-mode routing against the origin.

#[cfg(test)]
mod tests {
    use reqwest::StatusCode;
    use reqwest::header;

    use crate::{TENANT_PREFIX, client, dev_config, following_client, seed_store, spawn_origin};

    const STORE_HOST: &str = "https://storage.googleapis.com";

    #[tokio::test]
    async fn test_should_serve_tenant_index() {
        let (origin, _) = spawn_origin(&dev_config(STORE_HOST), seed_store()).await;

        let resp = client()
            .get(origin.url(&format!("{TENANT_PREFIX}/")))
            .send()
            .await
            .expect("request");
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "text/html");
        assert_eq!(resp.text().await.expect("body"), "<h1>local test</h1>");
    }

    #[tokio::test]
    async fn test_should_serve_tenant_root_without_trailing_slash() {
        let (origin, _) = spawn_origin(&dev_config(STORE_HOST), seed_store()).await;

        let resp = client()
            .get(origin.url(TENANT_PREFIX))
            .send()
            .await
            .expect("request");
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.text().await.expect("body"), "<h1>local test</h1>");
    }

    #[tokio::test]
    async fn test_should_redirect_directory_and_serve_its_index() {
        let (origin, _) = spawn_origin(&dev_config(STORE_HOST), seed_store()).await;

        let resp = client()
            .get(origin.url(&format!("{TENANT_PREFIX}/a-directory")))
            .send()
            .await
            .expect("request");
        assert_eq!(resp.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(
            resp.headers()[header::LOCATION],
            "/gen.dev/local-test/a-directory/"
        );

        let resp = following_client()
            .get(origin.url(&format!("{TENANT_PREFIX}/a-directory")))
            .send()
            .await
            .expect("request");
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.text().await.expect("body"), "<h1>a directory</h1>");
    }

    #[tokio::test]
    async fn test_should_serve_pages_with_and_without_extension() {
        let (origin, _) = spawn_origin(&dev_config(STORE_HOST), seed_store()).await;

        for path in ["a-directory/page.html", "a-directory/page"] {
            let resp = client()
                .get(origin.url(&format!("{TENANT_PREFIX}/{path}")))
                .send()
                .await
                .expect("request");
            assert_eq!(resp.status(), StatusCode::OK, "{path}");
            assert_eq!(resp.text().await.expect("body"), "<h1>a page</h1>", "{path}");
        }

        let resp = client()
            .get(origin.url(&format!("{TENANT_PREFIX}/a-directory/page/")))
            .send()
            .await
            .expect("request");
        assert_eq!(resp.text().await.expect("body"), "<h1>a page directory</h1>");
    }

    #[tokio::test]
    async fn test_should_return_not_found_for_missing_html() {
        let (origin, service) = spawn_origin(&dev_config(STORE_HOST), seed_store()).await;

        let resp = client()
            .get(origin.url(&format!("{TENANT_PREFIX}/non-existent.html")))
            .send()
            .await
            .expect("request");
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(resp.text().await.expect("body"), "File not found");
        assert_eq!(service.metrics().snapshot().resolution_misses, 1);
    }

    #[tokio::test]
    async fn test_should_redirect_image_to_signed_store_url() {
        let (origin, _) = spawn_origin(&dev_config(STORE_HOST), seed_store()).await;

        let resp = client()
            .get(origin.url(&format!("{TENANT_PREFIX}/some-image.png")))
            .send()
            .await
            .expect("request");
        assert_eq!(resp.status(), StatusCode::FOUND);
        let location = resp.headers()[header::LOCATION]
            .to_str()
            .expect("ascii location");
        assert!(
            location.starts_with("https://storage.googleapis.com/static-sites/gen.dev/local-test/some-image.png?"),
            "{location}"
        );
        assert!(location.contains("X-Amz-Signature="), "{location}");
    }

    #[tokio::test]
    async fn test_should_reject_traversal_and_other_methods() {
        let (origin, _) = spawn_origin(&dev_config(STORE_HOST), seed_store()).await;

        let resp = client()
            .get(origin.url(&format!("{TENANT_PREFIX}/a-directory/%2e%2e/%2e%2e/secret.txt")))
            .send()
            .await
            .expect("request");
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = client()
            .post(origin.url(&format!("{TENANT_PREFIX}/")))
            .send()
            .await
            .expect("request");
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
