mod common;

use common::TestApp;
use reqwest::StatusCode;
use uuid::Uuid;

#[tokio::test]
#[ignore = "requires live Postgres and Redis"]
async fn test_burst_exhaustion_returns_429() {
    let mut config = common::get_test_config();
    config.rate_limit.per_second = 1;
    config.rate_limit.burst = 2;
    let app = TestApp::spawn_with_config(config).await;

    let token = app.mint_token(Uuid::new_v4());

    let mut statuses = Vec::new();
    for _ in 0..4 {
        let resp = app
            .client
            .get(format!("{}/conversations", app.server_url))
            .bearer_auth(&token)
            .send()
            .await
            .unwrap();
        statuses.push(resp.status());
    }

    assert_eq!(statuses[0], StatusCode::OK);
    assert_eq!(statuses[1], StatusCode::OK);
    assert!(
        statuses.contains(&StatusCode::TOO_MANY_REQUESTS),
        "Expected at least one throttled request, got {statuses:?}"
    );
}

#[tokio::test]
#[ignore = "requires live Postgres and Redis"]
async fn test_generous_budget_never_throttles() {
    let app = TestApp::spawn().await;
    let token = app.mint_token(Uuid::new_v4());

    for _ in 0..20 {
        let resp = app
            .client
            .get(format!("{}/conversations", app.server_url))
            .bearer_auth(&token)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
