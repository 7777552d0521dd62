//! Conditional request handling.

#[cfg(test)]
mod tests {
    use reqwest::StatusCode;
    use reqwest::header;

    use crate::{TENANT_PREFIX, client, dev_config, seed_store, spawn_origin};

    #[tokio::test]
    async fn test_should_answer_not_modified_for_current_etag() {
        let (origin, _) =
            spawn_origin(&dev_config("https://storage.googleapis.com"), seed_store()).await;
        let url = origin.url(&format!("{TENANT_PREFIX}/a-directory/page"));

        let first = client().get(&url).send().await.expect("request");
        assert_eq!(first.status(), StatusCode::OK);
        let etag = first.headers()[header::ETAG].clone();
        let last_modified = first.headers()[header::LAST_MODIFIED].clone();

        let resp = client()
            .get(&url)
            .header(header::IF_NONE_MATCH, etag.clone())
            .send()
            .await
            .expect("request");
        assert_eq!(resp.status(), StatusCode::NOT_MODIFIED);
        assert_eq!(resp.headers()[header::ETAG], etag);
        assert!(resp.bytes().await.expect("body").is_empty());

        let resp = client()
            .get(&url)
            .header(header::IF_MODIFIED_SINCE, last_modified)
            .send()
            .await
            .expect("request");
        assert_eq!(resp.status(), StatusCode::NOT_MODIFIED);
    }

    #[tokio::test]
    async fn test_should_serve_full_body_for_stale_etag() {
        let (origin, _) =
            spawn_origin(&dev_config("https://storage.googleapis.com"), seed_store()).await;

        let resp = client()
            .get(origin.url(&format!("{TENANT_PREFIX}/a-directory/page")))
            .header(header::IF_NONE_MATCH, "\"not-the-etag\"")
            .send()
            .await
            .expect("request");
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.text().await.expect("body"), "<h1>a page</h1>");
    }
}
