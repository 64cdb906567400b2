//! Router-level tests for the auth and admin surfaces.

mod common;

use axum::http::{header, Method, StatusCode};
use osduth_gateway::auth::ProviderCredentials;
use osduth_gateway::server::build_router;
use serde_json::json;

use common::*;

// ============================================================================
// Session surface
// ============================================================================

#[tokio::test]
async fn me_requires_a_session() {
    let state = test_state().await;
    let app = build_router(state);

    let response = send(&app, get("/api/auth/me")).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn me_returns_the_session_user_with_group() {
    let state = test_state().await;
    state.identity.add_academic_domain("cs.duth.gr").await.unwrap();
    let user_id = seed_user(&state, "alice@cs.duth.gr", "academic").await;
    let cookie = session_cookie_for(&state, user_id).await;
    let app = build_router(state);

    let response = send(
        &app,
        request_with_headers(Method::GET, "/api/auth/me", &[("cookie", &cookie)], None),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    let user = &body["data"]["user"];
    assert_eq!(user["role"], "user");
    assert_eq!(user["status"], "active");
    assert_eq!(user["group"]["name"], "academic");
    // Envelope metadata is present with a fresh request id.
    assert_eq!(body["metadata"]["version"], "v0");
    assert!(body["metadata"]["requestId"].as_str().unwrap().len() == 36);
}

#[tokio::test]
async fn deleted_session_cookie_is_unauthenticated() {
    let state = test_state().await;
    let user_id = seed_user(&state, "bob@example.com", "regular").await;
    let session = state.sessions.create(user_id).await.unwrap();
    let cookie = format!("osduth_session={}", session.id);
    state.sessions.delete(&session.id).await.unwrap();
    let app = build_router(state);

    let response = send(
        &app,
        request_with_headers(Method::GET, "/api/auth/me", &[("cookie", &cookie)], None),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    // Rejection also clears the cookie.
    let set_cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .unwrap()
        .to_str()
        .unwrap();
    assert!(set_cookie.contains("osduth_session=;"));
    assert!(set_cookie.contains("Max-Age=-1"));
}

#[tokio::test]
async fn suspended_user_session_is_forbidden() {
    let state = test_state().await;
    let user_id = seed_user(&state, "sus@example.com", "regular").await;
    let cookie = session_cookie_for(&state, user_id).await;
    suspend(&state, user_id).await;
    let app = build_router(state);

    let response = send(
        &app,
        request_with_headers(Method::GET, "/api/auth/me", &[("cookie", &cookie)], None),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn logout_destroys_the_session() {
    let state = test_state().await;
    let user_id = seed_user(&state, "out@example.com", "regular").await;
    let cookie = session_cookie_for(&state, user_id).await;
    let app = build_router(state);

    let response = send(
        &app,
        request_with_headers(Method::GET, "/api/auth/logout", &[("cookie", &cookie)], None),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    // The cookie no longer authenticates.
    let response = send(
        &app,
        request_with_headers(Method::GET, "/api/auth/me", &[("cookie", &cookie)], None),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

// ============================================================================
// Login flow
// ============================================================================

#[tokio::test]
async fn login_rejects_unknown_and_unconfigured_providers() {
    let state = test_state().await;
    let app = build_router(state);

    let response = send(&app, get("/api/auth/login/gitlab")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Known provider, no credentials in the environment.
    let response = send(&app, get("/api/auth/login/google")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn login_redirects_with_state_cookie() {
    let state = test_state_with_providers(
        ProviderCredentials {
            client_id: "gid".to_string(),
            client_secret: "gsecret".to_string(),
        },
        ProviderCredentials::default(),
    )
    .await;
    let app = build_router(state);

    let response = send(&app, get("/api/auth/login/google")).await;
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);

    let location = response
        .headers()
        .get(header::LOCATION)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    let set_cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();

    // The cookie state and the redirect state are the same value.
    assert!(set_cookie.starts_with("osduth_oauth_state="));
    assert!(set_cookie.contains("HttpOnly"));
    assert!(set_cookie.contains("SameSite=Lax"));
    let cookie_state = set_cookie
        .split(';')
        .next()
        .unwrap()
        .trim_start_matches("osduth_oauth_state=");
    assert!(location.contains(&format!("state={cookie_state}")));
    assert!(location.starts_with("https://accounts.google.com/"));
}

#[tokio::test]
async fn callback_rejects_state_mismatch_and_replay() {
    let state = test_state_with_providers(
        ProviderCredentials {
            client_id: "gid".to_string(),
            client_secret: "gsecret".to_string(),
        },
        ProviderCredentials::default(),
    )
    .await;
    let issued_state = state.states.create().await.unwrap();
    let app = build_router(state.clone());

    // No cookie at all.
    let response = send(
        &app,
        get(&format!("/api/auth/callback/google?state={issued_state}&code=c")),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Cookie disagrees with the query.
    let response = send(
        &app,
        request_with_headers(
            Method::GET,
            &format!("/api/auth/callback/google?state={issued_state}&code=c"),
            &[("cookie", "osduth_oauth_state=other")],
            None,
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // The mismatches above never consumed the stored state.
    assert!(state.states.validate(&issued_state).await.unwrap());
    // A second consumption is a replay.
    assert!(!state.states.validate(&issued_state).await.unwrap());
}

#[tokio::test]
async fn callback_with_provider_error_is_rejected() {
    let state = test_state_with_providers(
        ProviderCredentials {
            client_id: "gid".to_string(),
            client_secret: "gsecret".to_string(),
        },
        ProviderCredentials::default(),
    )
    .await;
    let issued_state = state.states.create().await.unwrap();
    let cookie = format!("osduth_oauth_state={issued_state}");
    let app = build_router(state);

    let response = send(
        &app,
        request_with_headers(
            Method::GET,
            &format!("/api/auth/callback/google?state={issued_state}&error=access_denied"),
            &[("cookie", &cookie)],
            None,
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["errors"][0]
        .as_str()
        .unwrap()
        .contains("access_denied"));
}

// ============================================================================
// Token management (session-guarded)
// ============================================================================

#[tokio::test]
async fn token_lifecycle_over_http() {
    let state = test_state().await;
    let user_id = seed_user(&state, "tok@example.com", "regular").await;
    let cookie = session_cookie_for(&state, user_id).await;
    state
        .features
        .create("maps", "Maps", None, false)
        .await
        .unwrap();
    let app = build_router(state);

    // Create
    let response = send(
        &app,
        request_with_headers(
            Method::POST,
            "/api/auth/tokens",
            &[("cookie", &cookie)],
            Some(json!({"label": "ci", "features": ["maps"]})),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    let raw = body["data"]["token"].as_str().unwrap().to_string();
    assert!(raw.starts_with("osduth_"));
    let token_id = body["data"]["details"]["id"].as_i64().unwrap();
    // The hash never appears anywhere in the response.
    assert!(!body.to_string().contains("tokenHash"));

    // List
    let response = send(
        &app,
        request_with_headers(Method::GET, "/api/auth/tokens", &[("cookie", &cookie)], None),
    )
    .await;
    let body = body_json(response).await;
    assert_eq!(body["data"]["tokens"].as_array().unwrap().len(), 1);
    // Raw token is never shown again.
    assert!(!body.to_string().contains(&raw));

    // Revoke
    let response = send(
        &app,
        request_with_headers(
            Method::DELETE,
            &format!("/api/auth/tokens/{token_id}"),
            &[("cookie", &cookie)],
            None,
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    // Double revocation reports gone.
    let response = send(
        &app,
        request_with_headers(
            Method::DELETE,
            &format!("/api/auth/tokens/{token_id}"),
            &[("cookie", &cookie)],
            None,
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn token_quota_exhaustion_is_bad_input() {
    let state = test_state().await;
    let user_id = seed_user(&state, "cap@example.com", "regular").await;
    state
        .identity
        .update_user(user_id, None, None, None, Some(2))
        .await
        .unwrap();
    let cookie = session_cookie_for(&state, user_id).await;
    state
        .features
        .create("maps.tiles", "Tiles", None, false)
        .await
        .unwrap();
    issue_token(&state, user_id, &["maps.tiles"]).await;
    issue_token(&state, user_id, &["maps.tiles"]).await;
    let app = build_router(state);

    let response = send(
        &app,
        request_with_headers(
            Method::POST,
            "/api/auth/tokens",
            &[("cookie", &cookie)],
            Some(json!({"label": "x", "features": ["maps.tiles"]})),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["errors"][0].as_str().unwrap().contains("maximum token limit"));
}

#[tokio::test]
async fn admin_only_feature_denied_for_user_issuance() {
    let state = test_state().await;
    let user_id = seed_user(&state, "plain@example.com", "regular").await;
    let cookie = session_cookie_for(&state, user_id).await;
    state
        .features
        .create("admin.ops", "Ops", None, true)
        .await
        .unwrap();
    let app = build_router(state);

    let response = send(
        &app,
        request_with_headers(
            Method::POST,
            "/api/auth/tokens",
            &[("cookie", &cookie)],
            Some(json!({"label": "t", "features": ["admin.ops"]})),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["errors"][0].as_str().unwrap().contains("admin-only"));
}

#[tokio::test]
async fn assignable_features_excludes_admin_only() {
    let state = test_state().await;
    let user_id = seed_user(&state, "feat@example.com", "regular").await;
    let cookie = session_cookie_for(&state, user_id).await;
    state.features.create("maps", "Maps", None, false).await.unwrap();
    state.features.create("admin.ops", "Ops", None, true).await.unwrap();
    let app = build_router(state);

    let response = send(
        &app,
        request_with_headers(
            Method::GET,
            "/api/auth/tokens/features",
            &[("cookie", &cookie)],
            None,
        ),
    )
    .await;
    let body = body_json(response).await;
    let features = body["data"]["features"].as_array().unwrap();
    assert_eq!(features.len(), 1);
    assert_eq!(features[0]["slug"], "maps");
}

// ============================================================================
// Admin surface
// ============================================================================

#[tokio::test]
async fn admin_routes_enforce_role() {
    let state = test_state().await;
    let user_id = seed_user(&state, "pleb@example.com", "regular").await;
    let cookie = session_cookie_for(&state, user_id).await;
    let app = build_router(state.clone());

    // No session: 401.
    let response = send(&app, get("/api/admin/groups")).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Session without the admin role: 403.
    let response = send(
        &app,
        request_with_headers(Method::GET, "/api/admin/groups", &[("cookie", &cookie)], None),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // Promoted to admin: 200.
    make_admin(&state, user_id).await;
    let response = send(
        &app,
        request_with_headers(Method::GET, "/api/admin/groups", &[("cookie", &cookie)], None),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body["data"]["groups"].as_array().unwrap().len() >= 2);
}

#[tokio::test]
async fn admin_manages_users_quotas_and_tokens() {
    let state = test_state().await;
    let admin_id = seed_user(&state, "root@example.com", "regular").await;
    make_admin(&state, admin_id).await;
    let cookie = session_cookie_for(&state, admin_id).await;

    let target_id = seed_user(&state, "target@example.com", "regular").await;
    let feature = state
        .features
        .create("schedule", "Schedule", None, false)
        .await
        .unwrap();
    let app = build_router(state.clone());

    // Patch the user's status.
    let response = send(
        &app,
        request_with_headers(
            Method::PATCH,
            &format!("/api/admin/users/{target_id}"),
            &[("cookie", &cookie)],
            Some(json!({"status": "suspended", "maxTokens": 1})),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["user"]["status"], "suspended");
    assert_eq!(body["data"]["user"]["maxTokens"], 1);

    // Set a user override to explicitly uncapped.
    let response = send(
        &app,
        request_with_headers(
            Method::PUT,
            &format!("/api/admin/users/{target_id}/quotas"),
            &[("cookie", &cookie)],
            Some(json!({"quotas": [{"featureId": feature.id, "rpmLimit": null}]})),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        state.quota.effective_rpm(target_id, feature.id).await.unwrap(),
        -1
    );

    // Admin token issuance ignores the quota ceiling and suspension of the
    // target plays no role at issuance time.
    let response = send(
        &app,
        request_with_headers(
            Method::POST,
            &format!("/api/admin/users/{target_id}/tokens"),
            &[("cookie", &cookie)],
            Some(json!({"label": "issued-for", "features": ["schedule"]})),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    let token_id = body["data"]["details"]["id"].as_i64().unwrap();
    assert_eq!(body["data"]["details"]["adminCreated"], true);

    // Admin revocation needs no ownership.
    let response = send(
        &app,
        request_with_headers(
            Method::DELETE,
            &format!("/api/admin/tokens/{token_id}"),
            &[("cookie", &cookie)],
            None,
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn admin_manages_features_and_domains() {
    let state = test_state().await;
    let admin_id = seed_user(&state, "root2@example.com", "regular").await;
    make_admin(&state, admin_id).await;
    let cookie = session_cookie_for(&state, admin_id).await;
    let app = build_router(state.clone());

    // Create a parent and a child feature.
    let response = send(
        &app,
        request_with_headers(
            Method::POST,
            "/api/admin/features",
            &[("cookie", &cookie)],
            Some(json!({"slug": "maps", "name": "Maps"})),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let parent_id = body_json(response).await["data"]["feature"]["id"]
        .as_i64()
        .unwrap();

    let response = send(
        &app,
        request_with_headers(
            Method::POST,
            "/api/admin/features",
            &[("cookie", &cookie)],
            Some(json!({"slug": "maps.tiles", "name": "Tiles", "parentId": parent_id})),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    // Unknown feature id is a 404.
    let response = send(
        &app,
        request_with_headers(Method::GET, "/api/admin/features/999", &[("cookie", &cookie)], None),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Academic domains round trip.
    let response = send(
        &app,
        request_with_headers(
            Method::POST,
            "/api/admin/academic-domains",
            &[("cookie", &cookie)],
            Some(json!({"domain": "ee.duth.gr"})),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert!(state.identity.is_academic_domain("ee.duth.gr").await.unwrap());

    let response = send(
        &app,
        request_with_headers(
            Method::DELETE,
            "/api/admin/academic-domains/ee.duth.gr",
            &[("cookie", &cookie)],
            None,
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(!state.identity.is_academic_domain("ee.duth.gr").await.unwrap());
}

#[tokio::test]
async fn optional_session_loads_user_without_requiring_one() {
    use axum::extract::Extension;
    use axum::middleware::from_fn_with_state;
    use axum::routing::get as route_get;
    use osduth_gateway::auth::{optional_session, CurrentUser};

    let state = test_state().await;
    let user_id = seed_user(&state, "opt@example.com", "regular").await;
    let cookie = session_cookie_for(&state, user_id).await;

    async fn who(user: Option<Extension<CurrentUser>>) -> String {
        match user {
            Some(Extension(CurrentUser(user))) => user.email,
            None => "anonymous".to_string(),
        }
    }

    let app = axum::Router::new()
        .route("/who", route_get(who))
        .layer(from_fn_with_state(state.clone(), optional_session));

    // Without a cookie the request still succeeds.
    let response = send(&app, get("/who")).await;
    assert_eq!(response.status(), StatusCode::OK);

    // With a valid session the user is attached.
    let response = send(
        &app,
        request_with_headers(Method::GET, "/who", &[("cookie", &cookie)], None),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body();
    let bytes = http_body_util::BodyExt::collect(body).await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"opt@example.com");
}

#[tokio::test]
async fn health_probe_is_public() {
    let state = test_state().await;
    let app = build_router(state);

    let response = send(&app, get("/health")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
}
