//! API integration tests
//!
//! Exercises the full router in-process (tower `oneshot`) over an
//! in-memory store: login, card lifecycle, feed pagination, context
//! ledger, unread counts, and the polling fallback convergence.

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::sync::Arc;
use tezhub::api::HubState;
use tezhub::{AccountConfig, AuthConfig, Config, TeamConfig};
use tower::ServiceExt;

const ALICE: &str = "alice@example.com";
const BOB: &str = "bob@example.com";
const EVE: &str = "eve@example.com";
const PASSWORD: &str = "s3cret-pass";

async fn test_app() -> (Router, HubState) {
    let hash = bcrypt::hash(PASSWORD, 4).unwrap();
    let account = |email: &str, name: &str, teams: Vec<String>| AccountConfig {
        email: email.into(),
        name: name.into(),
        password_hash: hash.clone(),
        teams,
    };

    let config = Config {
        server_port: 0,
        database_path: None,
        auth_config: Some(AuthConfig {
            jwt_secret: "integration-test-secret-32-chars!!".into(),
            access_token_expiry_secs: 900,
            refresh_token_expiry_secs: 604800,
            accounts: vec![
                account(ALICE, "Alice", vec!["core".into()]),
                account(BOB, "Bob", vec!["core".into()]),
                account(EVE, "Eve", vec![]),
            ],
            teams: vec![TeamConfig {
                slug: "core".into(),
                name: "Core Team".into(),
            }],
        }),
    };

    let state = tezhub::build_state(&config).await.unwrap();
    (tezhub::api::create_router(state.clone()), state)
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    let request = match body {
        Some(value) => builder
            .header("content-type", "application/json")
            .body(Body::from(value.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

/// Log in and return the access token.
async fn login(app: &Router, email: &str) -> String {
    let (status, body) = send(
        app,
        "POST",
        "/auth/login",
        None,
        Some(json!({"email": email, "password": PASSWORD})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "login failed: {body}");
    body["data"]["access_token"].as_str().unwrap().to_string()
}

// ============================================================================
// Health & auth surface
// ============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let (app, _) = test_app().await;
    let (status, body) = send(&app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["store"], "connected");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_protected_route_requires_token() {
    let (app, _) = test_app().await;
    let (status, body) = send(&app, "GET", "/cards/feed", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "auth_error");
    assert!(body["error"]["message"].is_string());
}

// ============================================================================
// Card lifecycle
// ============================================================================

#[tokio::test]
async fn test_create_personal_card_and_detail() {
    let (app, _) = test_app().await;
    let token = login(&app, ALICE).await;

    let (status, body) = send(
        &app,
        "POST",
        "/cards/personal",
        Some(&token),
        Some(json!({"body": "remember the milk", "importance": "low"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let card = &body["data"];
    assert_eq!(card["status"], "pending");
    assert_eq!(card["importance"], "low");
    assert_eq!(card["visibility"], "private");
    let card_id = card["id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &app,
        "GET",
        &format!("/cards/{card_id}"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    // Auto-captured context layer is present and first
    let context = body["data"]["context"].as_array().unwrap();
    assert_eq!(context.len(), 1);
    assert_eq!(context[0]["kind"], "background");
    assert_eq!(context[0]["content"], "remember the milk");
}

#[tokio::test]
async fn test_empty_body_is_400_with_envelope() {
    let (app, _) = test_app().await;
    let token = login(&app, ALICE).await;

    let (status, body) = send(
        &app,
        "POST",
        "/cards/personal",
        Some(&token),
        Some(json!({"body": "   "})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "validation_error");
}

#[tokio::test]
async fn test_unparsable_due_date_is_400() {
    let (app, _) = test_app().await;
    let token = login(&app, ALICE).await;

    let (status, body) = send(
        &app,
        "POST",
        "/cards/personal",
        Some(&token),
        Some(json!({"body": "x", "due_at": "next tuesday"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "validation_error");
}

#[tokio::test]
async fn test_team_card_visible_to_member_not_stranger() {
    let (app, _) = test_app().await;
    let alice = login(&app, ALICE).await;
    let bob = login(&app, BOB).await;
    let eve = login(&app, EVE).await;

    let team_id = tezhub::team_id_for_slug("core");
    let (status, _) = send(
        &app,
        "POST",
        "/cards/team",
        Some(&alice),
        Some(json!({"body": "standup at 10", "team_id": team_id})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, bob_feed) = send(&app, "GET", "/cards/feed", Some(&bob), None).await;
    assert_eq!(bob_feed["data"].as_array().unwrap().len(), 1);

    let (_, eve_feed) = send(&app, "GET", "/cards/feed", Some(&eve), None).await;
    assert_eq!(eve_feed["data"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_acknowledge_flow_with_errors() {
    let (app, _) = test_app().await;
    let alice = login(&app, ALICE).await;
    let bob = login(&app, BOB).await;
    let eve = login(&app, EVE).await;

    let bob_id = tezhub::user_id_for_email(BOB);
    let (_, created) = send(
        &app,
        "POST",
        "/cards/team",
        Some(&alice),
        Some(json!({"body": "please review", "recipients": [bob_id]})),
    )
    .await;
    let card_id = created["data"]["id"].as_str().unwrap().to_string();

    // Recipient acknowledges
    let (status, body) = send(
        &app,
        "POST",
        &format!("/cards/{card_id}/acknowledge"),
        Some(&bob),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "acknowledged");

    // Second acknowledge is an idempotent no-op
    let (status, body) = send(
        &app,
        "POST",
        &format!("/cards/{card_id}/acknowledge"),
        Some(&bob),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "acknowledged");

    // Stranger is forbidden
    let (status, body) = send(
        &app,
        "POST",
        &format!("/cards/{card_id}/acknowledge"),
        Some(&eve),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "forbidden");

    // Unknown card is 404
    let (status, body) = send(
        &app,
        "POST",
        &format!("/cards/{}/acknowledge", uuid::Uuid::new_v4()),
        Some(&bob),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn test_both_participants_respond_in_order() {
    let (app, _) = test_app().await;
    let alice = login(&app, ALICE).await;
    let bob = login(&app, BOB).await;

    let bob_id = tezhub::user_id_for_email(BOB);
    let (_, created) = send(
        &app,
        "POST",
        "/cards/team",
        Some(&alice),
        Some(json!({"body": "thoughts?", "recipients": [bob_id]})),
    )
    .await;
    let card_id = created["data"]["id"].as_str().unwrap().to_string();

    let (status, _) = send(
        &app,
        "POST",
        &format!("/cards/{card_id}/respond"),
        Some(&alice),
        Some(json!({"body": "pinging you"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, _) = send(
        &app,
        "POST",
        &format!("/cards/{card_id}/respond"),
        Some(&bob),
        Some(json!({"body": "looks good"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, detail) = send(
        &app,
        "GET",
        &format!("/cards/{card_id}"),
        Some(&alice),
        None,
    )
    .await;
    let responses = detail["data"]["responses"].as_array().unwrap();
    assert_eq!(responses.len(), 2);
    assert_eq!(responses[0]["body"], "pinging you");
    assert_eq!(responses[1]["body"], "looks good");
}

#[tokio::test]
async fn test_status_update_and_terminal_rules() {
    let (app, _) = test_app().await;
    let alice = login(&app, ALICE).await;

    let (_, created) = send(
        &app,
        "POST",
        "/cards/personal",
        Some(&alice),
        Some(json!({"body": "task"})),
    )
    .await;
    let card_id = created["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &app,
        "PATCH",
        &format!("/cards/{card_id}"),
        Some(&alice),
        Some(json!({"status": "resolved"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "resolved");

    // Resolved is terminal: no further transitions
    let (status, body) = send(
        &app,
        "PATCH",
        &format!("/cards/{card_id}"),
        Some(&alice),
        Some(json!({"status": "archived"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "validation_error");

    // The resolved card is still queryable
    let (status, _) = send(
        &app,
        "GET",
        &format!("/cards/{card_id}"),
        Some(&alice),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_snooze_rejects_past_timestamp() {
    let (app, _) = test_app().await;
    let alice = login(&app, ALICE).await;

    let (_, created) = send(
        &app,
        "POST",
        "/cards/personal",
        Some(&alice),
        Some(json!({"body": "later"})),
    )
    .await;
    let card_id = created["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &app,
        "POST",
        &format!("/cards/{card_id}/snooze"),
        Some(&alice),
        Some(json!({"until": "2001-01-01T00:00:00Z"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "validation_error");

    let until = (chrono::Utc::now() + chrono::Duration::hours(2)).to_rfc3339();
    let (status, body) = send(
        &app,
        "POST",
        &format!("/cards/{card_id}/snooze"),
        Some(&alice),
        Some(json!({"until": until})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "pending");
    assert!(body["data"]["snoozed_until"].is_string());
}

// ============================================================================
// Feed pagination
// ============================================================================

#[tokio::test]
async fn test_feed_cursor_pagination() {
    let (app, _) = test_app().await;
    let alice = login(&app, ALICE).await;

    for i in 0..5 {
        let (status, _) = send(
            &app,
            "POST",
            "/cards/personal",
            Some(&alice),
            Some(json!({"body": format!("card {i}")})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (_, page1) = send(&app, "GET", "/cards/feed?limit=2", Some(&alice), None).await;
    assert_eq!(page1["data"].as_array().unwrap().len(), 2);
    assert_eq!(page1["meta"]["has_more"], true);
    let cursor = page1["meta"]["cursor"].as_str().unwrap();

    let (_, page2) = send(
        &app,
        "GET",
        &format!("/cards/feed?limit=10&cursor={cursor}"),
        Some(&alice),
        None,
    )
    .await;
    let rest = page2["data"].as_array().unwrap();
    assert_eq!(rest.len(), 3);
    assert_eq!(page2["meta"]["has_more"], false);
    assert!(page2["meta"]["cursor"].is_null());

    // No card appears on both pages
    let first_ids: Vec<&str> = page1["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["id"].as_str().unwrap())
        .collect();
    for card in rest {
        assert!(!first_ids.contains(&card["id"].as_str().unwrap()));
    }
}

#[tokio::test]
async fn test_feed_entries_carry_priority_score() {
    let (app, _) = test_app().await;
    let alice = login(&app, ALICE).await;

    let due = (chrono::Utc::now() + chrono::Duration::minutes(30)).to_rfc3339();
    send(
        &app,
        "POST",
        "/cards/personal",
        Some(&alice),
        Some(json!({"body": "urgent-ish", "importance": "medium", "due_at": due})),
    )
    .await;

    let (_, feed) = send(&app, "GET", "/cards/feed", Some(&alice), None).await;
    let entry = &feed["data"][0];
    // medium base 50 + <2h bonus 20
    assert_eq!(entry["score"], 70);
}

// ============================================================================
// Context ledger
// ============================================================================

#[tokio::test]
async fn test_context_append_and_list() {
    let (app, _) = test_app().await;
    let alice = login(&app, ALICE).await;

    let (_, created) = send(
        &app,
        "POST",
        "/cards/personal",
        Some(&alice),
        Some(json!({"body": "ground me"})),
    )
    .await;
    let card_id = created["data"]["id"].as_str().unwrap().to_string();

    let (status, _) = send(
        &app,
        "POST",
        &format!("/cards/{card_id}/context"),
        Some(&alice),
        Some(json!({"kind": "fact", "content": "deadline friday", "provenance": "verified"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    // Bad layer kind → 400
    let (status, _) = send(
        &app,
        "POST",
        &format!("/cards/{card_id}/context"),
        Some(&alice),
        Some(json!({"kind": "vibe", "content": "x"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        &app,
        "GET",
        &format!("/cards/{card_id}/context"),
        Some(&alice),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let layers = body["data"].as_array().unwrap();
    assert_eq!(layers.len(), 2);
    assert_eq!(layers[0]["kind"], "background");
    assert_eq!(layers[1]["kind"], "fact");

    // Explicit scope: only the most recent layer
    let (_, body) = send(
        &app,
        "GET",
        &format!("/cards/{card_id}/context?last=1"),
        Some(&alice),
        None,
    )
    .await;
    let layers = body["data"].as_array().unwrap();
    assert_eq!(layers.len(), 1);
    assert_eq!(layers[0]["kind"], "fact");
}

// ============================================================================
// Unread
// ============================================================================

#[tokio::test]
async fn test_unread_counts_and_mark_read() {
    let (app, _) = test_app().await;
    let alice = login(&app, ALICE).await;
    let bob = login(&app, BOB).await;
    let team_id = tezhub::team_id_for_slug("core");

    send(
        &app,
        "POST",
        "/cards/team",
        Some(&alice),
        Some(json!({"body": "news one", "team_id": team_id})),
    )
    .await;
    send(
        &app,
        "POST",
        "/cards/team",
        Some(&alice),
        Some(json!({"body": "news two", "team_id": team_id})),
    )
    .await;

    // Bob sees 2 unread; Alice (the sender) sees 0
    let (_, bob_unread) = send(&app, "GET", "/unread", Some(&bob), None).await;
    assert_eq!(bob_unread["data"]["total"], 2);
    let (_, alice_unread) = send(&app, "GET", "/unread", Some(&alice), None).await;
    assert_eq!(alice_unread["data"]["total"], 0);

    // Mark read: counts drop to zero
    let (status, body) = send(
        &app,
        "POST",
        "/unread/read",
        Some(&bob),
        Some(json!({"scope": {"kind": "team", "id": team_id}})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 0);

    // A new card counts again
    send(
        &app,
        "POST",
        "/cards/team",
        Some(&alice),
        Some(json!({"body": "news three", "team_id": team_id})),
    )
    .await;
    let (_, bob_unread) = send(&app, "GET", "/unread", Some(&bob), None).await;
    assert_eq!(bob_unread["data"]["total"], 1);
}

// ============================================================================
// Live events & polling fallback
// ============================================================================

#[tokio::test]
async fn test_mutations_fan_out_typed_events() {
    let (app, state) = test_app().await;
    let alice = login(&app, ALICE).await;
    let team_id = tezhub::team_id_for_slug("core");

    let mut rx = state.event_bus.subscribe();
    send(
        &app,
        "POST",
        "/cards/team",
        Some(&alice),
        Some(json!({"body": "broadcast", "team_id": team_id})),
    )
    .await;

    // new_card scoped to the team
    let event = rx.try_recv().unwrap();
    let value = serde_json::to_value(&event).unwrap();
    assert_eq!(value["type"], "new_card");
    assert_eq!(value["scope"]["kind"], "team");

    // followed by an unread_changed for Bob (the only other member)
    let event = rx.try_recv().unwrap();
    let value = serde_json::to_value(&event).unwrap();
    assert_eq!(value["type"], "unread_changed");
    assert_eq!(
        value["user_id"],
        tezhub::user_id_for_email(BOB).to_string()
    );
}

#[tokio::test(start_paused = true)]
async fn test_disconnected_client_converges_via_fine_poll() {
    let (app, state) = test_app().await;
    let alice = login(&app, ALICE).await;
    let team_id = tezhub::team_id_for_slug("core");
    let bob_id = tezhub::user_id_for_email(BOB);

    // Bob has no push connection. A card lands while he is "offline".
    send(
        &app,
        "POST",
        "/cards/team",
        Some(&alice),
        Some(json!({"body": "missed this", "team_id": team_id})),
    )
    .await;

    // Bob's client runs the degraded-cadence reconciling poll. Within one
    // fine-poll interval the fetched unread state converges to the server's.
    let seen = Arc::new(tokio::sync::Mutex::new(None::<usize>));
    let (health_tx, health_rx) = tokio::sync::watch::channel(false);

    let unread = state.unread.clone();
    let seen_clone = seen.clone();
    let poller = tezhub::live::ReconcilePoller::spawn(health_rx, move || {
        let unread = unread.clone();
        let seen = seen_clone.clone();
        async move {
            if let Ok(counts) = unread.counts(bob_id).await {
                *seen.lock().await = Some(counts.total);
            }
        }
    });

    // One fine-poll interval (10s of virtual time) bounds the staleness
    // window; time is paused, so the wait is virtual
    let mut converged = false;
    for _ in 0..60 {
        tokio::time::sleep(std::time::Duration::from_millis(250)).await;
        if let Some(total) = *seen.lock().await {
            assert_eq!(total, 1);
            converged = true;
            break;
        }
    }
    assert!(converged, "poll did not converge within the fine interval");

    drop(health_tx);
    poller.shutdown().await;
}
