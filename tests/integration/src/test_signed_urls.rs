//! Signed URL redirects and their caching.

#[cfg(test)]
mod tests {
    use futures::future::join_all;
    use reqwest::StatusCode;
    use reqwest::header;

    use crate::{TENANT_PREFIX, client, dev_config, seed_store, spawn_origin};

    const STORE_HOST: &str = "https://storage.googleapis.com";

    fn max_age(cache_control: &str) -> u64 {
        cache_control
            .split(',')
            .find_map(|directive| directive.trim().strip_prefix("max-age="))
            .and_then(|v| v.parse().ok())
            .expect("max-age directive")
    }

    #[tokio::test]
    async fn test_should_bound_redirect_lifetime_by_signature() {
        let (origin, _) = spawn_origin(&dev_config(STORE_HOST), seed_store()).await;

        let resp = client()
            .get(origin.url(&format!("{TENANT_PREFIX}/some-image.png")))
            .send()
            .await
            .expect("request");
        assert_eq!(resp.status(), StatusCode::FOUND);

        let cache_control = resp.headers()[header::CACHE_CONTROL]
            .to_str()
            .expect("ascii");
        assert!(cache_control.starts_with("public, "), "{cache_control}");
        let age = max_age(cache_control);
        assert!(age > 0 && age <= 3_600, "max-age {age}");
        assert!(resp.headers().contains_key(header::EXPIRES));

        let location = resp.headers()[header::LOCATION].to_str().expect("ascii");
        assert!(location.contains("X-Amz-Expires=3600"), "{location}");
    }

    #[tokio::test]
    async fn test_should_sign_once_for_concurrent_requests() {
        let (origin, service) = spawn_origin(&dev_config(STORE_HOST), seed_store()).await;
        let url = origin.url(&format!("{TENANT_PREFIX}/some-image.png"));
        let http = client();

        let responses = join_all((0..10).map(|_| http.get(&url).send())).await;
        let locations: Vec<String> = responses
            .into_iter()
            .map(|resp| {
                let resp = resp.expect("request");
                resp.headers()[header::LOCATION]
                    .to_str()
                    .expect("ascii")
                    .to_owned()
            })
            .collect();

        assert!(locations.windows(2).all(|pair| pair[0] == pair[1]));
        let stats = service.signed_urls().stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits + stats.joined, 9);
    }

    #[tokio::test]
    async fn test_should_serve_bucket_route_privately() {
        let (origin, _) = spawn_origin(&dev_config(STORE_HOST), seed_store()).await;

        let resp = client()
            .get(origin.url("/bucket/other-bucket/reports/2024.pdf"))
            .send()
            .await
            .expect("request");
        assert_eq!(resp.status(), StatusCode::FOUND);
        let location = resp.headers()[header::LOCATION].to_str().expect("ascii");
        assert!(
            location.starts_with("https://storage.googleapis.com/other-bucket/reports/2024.pdf?"),
            "{location}"
        );
        let cache_control = resp.headers()[header::CACHE_CONTROL]
            .to_str()
            .expect("ascii");
        assert!(cache_control.starts_with("private, max-age="), "{cache_control}");
    }

    #[tokio::test]
    async fn test_should_expose_health_and_metrics() {
        let (origin, _) = spawn_origin(&dev_config(STORE_HOST), seed_store()).await;

        let resp = client()
            .get(origin.url("/_bucketfront/health"))
            .send()
            .await
            .expect("request");
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.text().await.expect("body").contains("\"status\":\"running\""));

        client()
            .get(origin.url(&format!("{TENANT_PREFIX}/some-image.png")))
            .send()
            .await
            .expect("request");
        let text = client()
            .get(origin.url("/_bucketfront/metrics"))
            .send()
            .await
            .expect("request")
            .text()
            .await
            .expect("body");
        assert!(text.contains("bucketfront_signed_redirects_total 1"), "{text}");
        assert!(text.contains("bucketfront_signed_url_cache_misses_total 1"), "{text}");
    }
}
