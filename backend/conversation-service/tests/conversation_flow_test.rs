//! End-to-end HTTP flows against the in-memory store
//!
//! Each test builds the full route table, authenticates with real signed
//! session tokens and drives the service through its public endpoints.

mod common;

use actix_web::{http::StatusCode, test, App};
use common::TestContext;
use serde_json::{json, Value};
use uuid::Uuid;

fn id_of(body: &Value) -> Uuid {
    body["id"].as_str().and_then(|s| s.parse().ok()).expect("id in body")
}

fn uuids(value: &Value) -> Vec<Uuid> {
    value
        .as_array()
        .expect("array")
        .iter()
        .map(|v| v.as_str().unwrap().parse().unwrap())
        .collect()
}

/// Two users, one-on-one: send, count unread, read
#[actix_web::test]
async fn test_individual_conversation_flow() {
    let ctx = TestContext::new();
    let app = test::init_service(App::new().app_data(ctx.state.clone()).configure(ctx.routes())).await;
    let a = ctx.user("alice").await;
    let b = ctx.user("bob").await;

    let req = test::TestRequest::post()
        .uri("/conversations")
        .insert_header(ctx.bearer(a))
        .set_json(json!({ "type": "individual", "participant_ids": [b] }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let created: Value = test::read_body_json(resp).await;
    assert_eq!(created["conversation_type"], "individual");
    assert_eq!(uuids(&created["participants"]), vec![a, b]);
    let id = id_of(&created);

    // Same pair from the other side resolves to the same conversation
    let req = test::TestRequest::post()
        .uri("/conversations")
        .insert_header(ctx.bearer(b))
        .set_json(json!({ "type": "individual", "participant_ids": [a] }))
        .to_request();
    let again: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(id_of(&again), id);

    let req = test::TestRequest::post()
        .uri(&format!("/conversations/{id}/messages"))
        .insert_header(ctx.bearer(a))
        .set_json(json!({ "content": "hi" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let message: Value = test::read_body_json(resp).await;
    assert_eq!(message["content"], "hi");
    assert_eq!(message["receiver_id"], json!(b));
    assert_eq!(message["sender"]["username"], "alice");

    let req = test::TestRequest::get()
        .uri(&format!("/conversations/{id}"))
        .insert_header(ctx.bearer(b))
        .to_request();
    let summary: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(summary["unread_count"], 1);
    assert_eq!(summary["last_message_id"], message["id"]);
    assert_eq!(summary["last_message_at"], message["created_at"]);
    assert_eq!(summary["last_message"]["content"], "hi");

    let req = test::TestRequest::post()
        .uri(&format!("/conversations/{id}/read"))
        .insert_header(ctx.bearer(b))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body, json!({ "success": true }));

    let req = test::TestRequest::get()
        .uri("/conversations")
        .insert_header(ctx.bearer(b))
        .to_request();
    let listed: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(listed.as_array().unwrap().len(), 1);
    assert_eq!(listed[0]["unread_count"], 0);

    // Sender never sees their own message as unread
    let req = test::TestRequest::get()
        .uri(&format!("/conversations/{id}"))
        .insert_header(ctx.bearer(a))
        .to_request();
    let summary: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(summary["unread_count"], 0);
}

/// Group admin adds a member; a plain member cannot
#[actix_web::test]
async fn test_group_admin_adds_participants() {
    let ctx = TestContext::new();
    let app = test::init_service(App::new().app_data(ctx.state.clone()).configure(ctx.routes())).await;
    let a = ctx.user("alice").await;
    let b = ctx.user("bob").await;
    let c = ctx.user("carol").await;
    let d = ctx.user("dave").await;

    let req = test::TestRequest::post()
        .uri("/conversations")
        .insert_header(ctx.bearer(a))
        .set_json(json!({ "type": "group", "title": "Squad", "participant_ids": [b, c] }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let created: Value = test::read_body_json(resp).await;
    assert_eq!(created["title"], "Squad");
    let id = id_of(&created);

    let req = test::TestRequest::post()
        .uri(&format!("/conversations/{id}/participants"))
        .insert_header(ctx.bearer(a))
        .set_json(json!({ "user_ids": [d] }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let updated: Value = test::read_body_json(resp).await;
    assert_eq!(uuids(&updated["participants"]), vec![a, b, c, d]);

    let req = test::TestRequest::get()
        .uri(&format!("/conversations/{id}"))
        .insert_header(ctx.bearer(d))
        .to_request();
    let summary: Value = test::call_and_read_body_json(&app, req).await;
    let d_row = summary["participant_details"]
        .as_array()
        .unwrap()
        .iter()
        .find(|row| row["user_id"] == json!(d))
        .expect("row for d")
        .clone();
    assert_eq!(d_row["role"], "member");
    assert_eq!(d_row["user"]["username"], "dave");

    let req = test::TestRequest::post()
        .uri(&format!("/conversations/{id}/participants"))
        .insert_header(ctx.bearer(b))
        .set_json(json!({ "user_ids": [Uuid::new_v4()] }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["code"], "FORBIDDEN");
    assert_eq!(body["status"], 403);
}

/// Leaving removes the caller from the array and closes access
#[actix_web::test]
async fn test_leave_group() {
    let ctx = TestContext::new();
    let app = test::init_service(App::new().app_data(ctx.state.clone()).configure(ctx.routes())).await;
    let a = ctx.user("alice").await;
    let b = ctx.user("bob").await;

    let req = test::TestRequest::post()
        .uri("/conversations")
        .insert_header(ctx.bearer(a))
        .set_json(json!({ "type": "group", "title": "Squad", "participant_ids": [b] }))
        .to_request();
    let id = id_of(&test::call_and_read_body_json(&app, req).await);

    let req = test::TestRequest::post()
        .uri(&format!("/conversations/{id}/leave"))
        .insert_header(ctx.bearer(a))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let req = test::TestRequest::get()
        .uri(&format!("/conversations/{id}/messages"))
        .insert_header(ctx.bearer(a))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let req = test::TestRequest::get()
        .uri(&format!("/conversations/{id}"))
        .insert_header(ctx.bearer(b))
        .to_request();
    let summary: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(uuids(&summary["participants"]), vec![b]);
    let a_row = summary["participant_details"]
        .as_array()
        .unwrap()
        .iter()
        .find(|row| row["user_id"] == json!(a))
        .expect("row for a")
        .clone();
    assert!(!a_row["left_at"].is_null());
}

#[actix_web::test]
async fn test_message_history_pages() {
    let ctx = TestContext::new();
    let app = test::init_service(App::new().app_data(ctx.state.clone()).configure(ctx.routes())).await;
    let a = ctx.user("alice").await;
    let b = ctx.user("bob").await;

    let req = test::TestRequest::post()
        .uri("/conversations")
        .insert_header(ctx.bearer(a))
        .set_json(json!({ "type": "individual", "participant_ids": [b] }))
        .to_request();
    let id = id_of(&test::call_and_read_body_json(&app, req).await);

    for n in 0..5 {
        let req = test::TestRequest::post()
            .uri(&format!("/conversations/{id}/messages"))
            .insert_header(ctx.bearer(a))
            .set_json(json!({ "content": format!("m{n}") }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CREATED);
    }

    let contents = |page: &Value| -> Vec<String> {
        page.as_array()
            .unwrap()
            .iter()
            .map(|m| m["content"].as_str().unwrap().to_string())
            .collect()
    };

    let req = test::TestRequest::get()
        .uri(&format!("/conversations/{id}/messages?page=1&limit=2"))
        .insert_header(ctx.bearer(b))
        .to_request();
    let first: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(contents(&first), vec!["m3", "m4"]);

    let req = test::TestRequest::get()
        .uri(&format!("/conversations/{id}/messages?page=3&limit=2"))
        .insert_header(ctx.bearer(b))
        .to_request();
    let last: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(contents(&last), vec!["m0"]);

    let req = test::TestRequest::get()
        .uri(&format!("/conversations/{id}/messages"))
        .insert_header(ctx.bearer(b))
        .to_request();
    let all: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(contents(&all), vec!["m0", "m1", "m2", "m3", "m4"]);
}

#[actix_web::test]
async fn test_reply_edit_delete() {
    let ctx = TestContext::new();
    let app = test::init_service(App::new().app_data(ctx.state.clone()).configure(ctx.routes())).await;
    let a = ctx.user("alice").await;
    let b = ctx.user("bob").await;

    let req = test::TestRequest::post()
        .uri("/conversations")
        .insert_header(ctx.bearer(a))
        .set_json(json!({ "type": "individual", "participant_ids": [b] }))
        .to_request();
    let id = id_of(&test::call_and_read_body_json(&app, req).await);

    let req = test::TestRequest::post()
        .uri(&format!("/conversations/{id}/messages"))
        .insert_header(ctx.bearer(a))
        .set_json(json!({ "content": "lunch?", "message_type": "text" }))
        .to_request();
    let original = id_of(&test::call_and_read_body_json(&app, req).await);

    let req = test::TestRequest::post()
        .uri(&format!("/conversations/{id}/messages/{original}/reply"))
        .insert_header(ctx.bearer(b))
        .set_json(json!({ "content": "sure" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let reply: Value = test::read_body_json(resp).await;
    assert_eq!(reply["reply_to_id"], json!(original));

    let req = test::TestRequest::patch()
        .uri(&format!("/conversations/{id}/messages/{original}"))
        .insert_header(ctx.bearer(b))
        .set_json(json!({ "content": "not mine" }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);

    let req = test::TestRequest::patch()
        .uri(&format!("/conversations/{id}/messages/{original}"))
        .insert_header(ctx.bearer(a))
        .set_json(json!({ "content": "lunch at noon?" }))
        .to_request();
    let edited: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(edited["content"], "lunch at noon?");
    assert!(!edited["updated_at"].is_null());

    let req = test::TestRequest::delete()
        .uri(&format!("/conversations/{id}/messages/{original}"))
        .insert_header(ctx.bearer(a))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NO_CONTENT);

    let req = test::TestRequest::delete()
        .uri(&format!("/conversations/{id}/messages/{original}"))
        .insert_header(ctx.bearer(a))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
}
