mod support;

use serde_json::Value;

#[tokio::test]
async fn when_nobody_has_joined_then_arena_reports_waiting() {
    let base_url = support::ensure_server();

    let res = reqwest::get(format!("{base_url}/arena"))
        .await
        .expect("request should succeed");
    assert_eq!(res.status(), reqwest::StatusCode::OK);

    let body: Value = res.json().await.expect("json body");
    assert_eq!(body["state"], "Waiting");
    assert_eq!(body["alive"], 0);
}
