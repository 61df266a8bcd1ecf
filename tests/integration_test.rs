mod test_utils;

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use tower::util::ServiceExt;

    use crate::test_utils::{body_to_string, test_app};

    #[tokio::test]
    async fn it_serves_web_ui() {
        let app = test_app("http://127.0.0.1:9/v1", None);

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["cache-control"], "no-cache");

        let body = body_to_string(response.into_body()).await;
        assert!(body.contains("<title>Palaver</title>"));
    }

    #[tokio::test]
    async fn it_returns_404_for_unknown_files() {
        let app = test_app("http://127.0.0.1:9/v1", None);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/nope.js")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn it_allows_cross_origin_requests() {
        let app = test_app("http://127.0.0.1:9/v1", None);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/chat/transcript")
                    .header("origin", "http://example.com")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("access-control-allow-origin"));
    }
}
