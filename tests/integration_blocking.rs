mod common;

use common::TestApp;
use reqwest::StatusCode;
use uuid::Uuid;

#[tokio::test]
#[ignore = "requires live Postgres and Redis"]
async fn test_block_stops_sends_in_both_directions() {
    let app = TestApp::spawn().await;
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    let alice_token = app.mint_token(alice);
    let bob_token = app.mint_token(bob);

    let sent = app.send_text(&alice_token, bob, "before the block").await;
    let conversation_id = sent["conversationId"].as_str().unwrap().to_string();

    let resp = app
        .client
        .post(format!("{}/conversations/{}/block", app.server_url, conversation_id))
        .bearer_auth(&alice_token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    // Neither side can send while the pair is blocked.
    for token in [&alice_token, &bob_token] {
        let receiver = if token == &alice_token { bob } else { alice };
        let resp = app
            .client
            .post(format!("{}/messages", app.server_url))
            .bearer_auth(token)
            .json(&serde_json::json!({ "receiverId": receiver, "kind": "text", "text": "nope" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    // The listing reflects who blocked.
    let resp = app
        .client
        .get(format!("{}/conversations", app.server_url))
        .bearer_auth(&bob_token)
        .send()
        .await
        .unwrap();
    let page: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(page["conversations"][0]["isBlocked"], true);
    assert_eq!(page["conversations"][0]["blockedBy"], alice.to_string());
}

#[tokio::test]
#[ignore = "requires live Postgres and Redis"]
async fn test_either_participant_can_unblock() {
    let app = TestApp::spawn().await;
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    let alice_token = app.mint_token(alice);
    let bob_token = app.mint_token(bob);

    let sent = app.send_text(&alice_token, bob, "hi").await;
    let conversation_id = sent["conversationId"].as_str().unwrap().to_string();

    let resp = app
        .client
        .post(format!("{}/conversations/{}/block", app.server_url, conversation_id))
        .bearer_auth(&alice_token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    // Bob, not the blocker, lifts it.
    let resp = app
        .client
        .post(format!("{}/conversations/{}/unblock", app.server_url, conversation_id))
        .bearer_auth(&bob_token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    app.send_text(&bob_token, alice, "we are back").await;
}

#[tokio::test]
#[ignore = "requires live Postgres and Redis"]
async fn test_outsider_cannot_block() {
    let app = TestApp::spawn().await;
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    let mallory = Uuid::new_v4();
    let alice_token = app.mint_token(alice);
    let mallory_token = app.mint_token(mallory);

    let sent = app.send_text(&alice_token, bob, "private").await;
    let conversation_id = sent["conversationId"].as_str().unwrap().to_string();

    let resp = app
        .client
        .post(format!("{}/conversations/{}/block", app.server_url, conversation_id))
        .bearer_auth(&mallory_token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}
