mod support;

use axum::http::{Method, StatusCode};
use relay_shared::conversation::ConversationStore;
use relay_shared::models::Turn;
use serde_json::json;

use support::{error_message, request, send_json, test_app};

#[tokio::test]
async fn unknown_conversation_is_not_found() {
    let app = test_app();

    let response = send_json(
        &app.router,
        request(Method::GET, "/conversation/never-committed", None),
    )
    .await;

    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert_eq!(error_message(&response.body), Some("Conversation not found"));
}

#[tokio::test]
async fn stored_history_is_returned_in_order() {
    let app = test_app();
    app.store
        .replace(
            "c-read",
            vec![Turn::user("what is a slice?"), Turn::assistant("A view into memory.")],
        )
        .await
        .expect("seed store");

    let response = send_json(&app.router, request(Method::GET, "/conversation/c-read", None)).await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(
        response.body,
        json!({
            "history": [
                { "role": "user", "content": "what is a slice?" },
                { "role": "assistant", "content": "A view into memory." }
            ]
        })
    );
}

#[tokio::test]
async fn delete_is_idempotent() {
    let app = test_app();

    let missing = send_json(&app.router, request(Method::DELETE, "/conversation/xyz", None)).await;
    assert_eq!(missing.status, StatusCode::OK);
    assert_eq!(missing.body["message"], "Conversation deleted");

    app.store
        .replace("c-delete", vec![Turn::user("hi"), Turn::assistant("hello")])
        .await
        .expect("seed store");
    let deleted = send_json(
        &app.router,
        request(Method::DELETE, "/conversation/c-delete", None),
    )
    .await;
    assert_eq!(deleted.status, StatusCode::OK);

    let after = send_json(&app.router, request(Method::GET, "/conversation/c-delete", None)).await;
    assert_eq!(after.status, StatusCode::NOT_FOUND);
}
