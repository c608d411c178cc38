//! # Integration Tests for market-api
//!
//! Drives the assembled router end to end: filing with escrow, party
//! checks, proposals through mutual finalization, forced resolution,
//! escalation runs, KPIs, notifications and authentication.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::{Duration, SecondsFormat, Utc};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use market_api::state::{AppConfig, AppState};

const SECRET: &str = "s3cret";

struct Harness {
    app: Router,
    client: Uuid,
    professional: Uuid,
    admin: Uuid,
}

impl Harness {
    fn new() -> Self {
        let config = AppConfig {
            auth_token: Some(SECRET.to_string()),
            ..AppConfig::default()
        };
        Self {
            app: market_api::app(AppState::with_config(config, None)),
            client: Uuid::new_v4(),
            professional: Uuid::new_v4(),
            admin: Uuid::new_v4(),
        }
    }

    fn party(user: Uuid) -> String {
        format!("party:{user}:{SECRET}")
    }

    fn admin_token(&self) -> String {
        format!("admin:{}:{SECRET}", self.admin)
    }

    async fn send(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let body = match body {
            Some(value) => {
                builder = builder.header("content-type", "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };
        let response = self
            .app
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn file(&self, amount: Option<&str>) -> Value {
        let mut body = json!({
            "job_id": Uuid::new_v4(),
            "client_id": self.client,
            "professional_id": self.professional,
            "category": "quality",
            "title": "Tiles cracked within a week",
            "description": "Bathroom tiles cracked; professional unresponsive.",
        });
        if let Some(amount) = amount {
            body["disputed_amount"] = json!({"amount": amount, "currency": "USD"});
        }
        let (status, dispute) = self
            .send("POST", "/v1/disputes", Some(&Self::party(self.client)), Some(body))
            .await;
        assert_eq!(status, StatusCode::CREATED, "{dispute}");
        dispute
    }
}

// -- Health & docs ------------------------------------------------------------

#[tokio::test]
async fn health_probes_skip_auth() {
    let h = Harness::new();
    let response = h
        .app
        .clone()
        .oneshot(Request::builder().uri("/health/liveness").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"ok");
}

#[tokio::test]
async fn openapi_requires_auth_and_lists_paths() {
    let h = Harness::new();
    let (status, _) = h.send("GET", "/openapi.json", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, doc) = h.send("GET", "/openapi.json", Some(&h.admin_token()), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(doc["paths"]["/v1/admin/kpis"].is_object());
}

// -- Filing & party checks ----------------------------------------------------

#[tokio::test]
async fn filing_freezes_escrow_and_notifies_counterpart() {
    let h = Harness::new();
    let dispute = h.file(Some("250.00")).await;
    assert_eq!(dispute["workflow_state"], "open");
    assert_eq!(dispute["stage"], 1);
    assert_eq!(dispute["escalation_level"], 0);
    assert_eq!(dispute["escrow_frozen"], true);
    assert_eq!(dispute["filed_by"], "client");
    assert_eq!(dispute["number"], 1);

    let (status, notes) = h
        .send("GET", "/v1/notifications", Some(&Harness::party(h.professional)), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let notes = notes.as_array().unwrap();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0]["link"], format!("/disputes/{}", dispute["id"].as_str().unwrap()));

    // Draining empties the queue.
    let (_, again) = h
        .send("GET", "/v1/notifications", Some(&Harness::party(h.professional)), None)
        .await;
    assert!(again.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn party_cannot_file_for_someone_else() {
    let h = Harness::new();
    let body = json!({
        "job_id": Uuid::new_v4(),
        "client_id": h.client,
        "professional_id": h.professional,
        "filed_by": h.professional,
        "category": "payment",
        "title": "Unpaid invoice",
        "description": "Invoice overdue",
    });
    let (status, _) = h
        .send("POST", "/v1/disputes", Some(&Harness::party(h.client)), Some(body))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn malformed_body_is_bad_request_and_blank_title_is_unprocessable() {
    let h = Harness::new();
    let token = Harness::party(h.client);
    let (status, _) = h
        .send("POST", "/v1/disputes", Some(&token), Some(json!({"title": 5})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let body = json!({
        "job_id": Uuid::new_v4(),
        "client_id": h.client,
        "professional_id": h.professional,
        "category": "quality",
        "title": "   ",
        "description": "x",
    });
    let (status, err) = h.send("POST", "/v1/disputes", Some(&token), Some(body)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(err["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn outsiders_cannot_read_or_act() {
    let h = Harness::new();
    let dispute = h.file(None).await;
    let id = dispute["id"].as_str().unwrap();
    let outsider = Harness::party(Uuid::new_v4());

    let (status, _) = h.send("GET", &format!("/v1/disputes/{id}"), Some(&outsider), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = h
        .send(
            "POST",
            &format!("/v1/disputes/{id}/evidence"),
            Some(&outsider),
            Some(json!({"summary": "not mine"})),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, list) = h.send("GET", "/v1/disputes", Some(&outsider), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(list.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn missing_dispute_is_not_found() {
    let h = Harness::new();
    let (status, err) = h
        .send(
            "GET",
            &format!("/v1/disputes/{}", Uuid::new_v4()),
            Some(&h.admin_token()),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(err["error"]["code"], "NOT_FOUND");
}

// -- Lifecycle ----------------------------------------------------------------

#[tokio::test]
async fn evidence_advances_stage_and_review_is_admin_only() {
    let h = Harness::new();
    let dispute = h.file(None).await;
    let id = dispute["id"].as_str().unwrap();

    let (status, d) = h
        .send(
            "POST",
            &format!("/v1/disputes/{id}/evidence"),
            Some(&Harness::party(h.professional)),
            Some(json!({"summary": "Photos of the finished work"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(d["workflow_state"], "in_progress");
    assert_eq!(d["stage"], 2);

    let (status, _) = h
        .send("POST", &format!("/v1/disputes/{id}/review"), Some(&Harness::party(h.client)), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, d) = h
        .send("POST", &format!("/v1/disputes/{id}/review"), Some(&h.admin_token()), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(d["stage"], 3);
    assert_eq!(d["stage_label"], "Under Review");
}

#[tokio::test]
async fn closing_refunds_and_blocks_further_mutation() {
    let h = Harness::new();
    let dispute = h.file(Some("80")).await;
    let id = dispute["id"].as_str().unwrap();
    let client = Harness::party(h.client);

    let (status, d) = h
        .send(
            "POST",
            &format!("/v1/disputes/{id}/close"),
            Some(&client),
            Some(json!({"reason": "Settled privately"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(d["workflow_state"], "closed");
    assert_eq!(d["escrow_frozen"], false);
    assert_eq!(d["closure_reason"], "Settled privately");

    let (status, err) = h
        .send(
            "POST",
            &format!("/v1/disputes/{id}/respond"),
            Some(&client),
            Some(json!({"message": "one more thing"})),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(err["error"]["code"], "CONFLICT");
}

// -- Proposals ----------------------------------------------------------------

#[tokio::test]
async fn mutual_acceptance_resolves_and_releases() {
    let h = Harness::new();
    let dispute = h.file(Some("100.00")).await;
    let id = dispute["id"].as_str().unwrap();

    let (status, opened) = h
        .send(
            "POST",
            &format!("/v1/disputes/{id}/proposals"),
            Some(&Harness::party(h.client)),
            Some(json!({
                "summary": "Split 60/40",
                "client_share": {"amount": "60.00", "currency": "USD"},
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{opened}");
    assert_eq!(opened["proposal"]["proposed_by"], "client");
    assert_eq!(opened["proposal"]["professional_share"]["amount"], "40.00");
    assert_eq!(opened["dispute"]["stage"], 4);
    let proposal = opened["proposal"]["id"].as_str().unwrap().to_string();
    let respond_uri = format!("/v1/proposals/{proposal}/respond");

    let (status, first) = h
        .send(
            "POST",
            &respond_uri,
            Some(&Harness::party(h.professional)),
            Some(json!({"decision": "accept"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["finalized"], false);
    assert_eq!(first["proposal"]["status"], "open");

    let (status, second) = h
        .send(
            "POST",
            &respond_uri,
            Some(&Harness::party(h.client)),
            Some(json!({"decision": "accept"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["finalized"], true);
    assert_eq!(second["dispute"]["workflow_state"], "resolved");
    assert_eq!(second["dispute"]["resolution"]["kind"], "mutual");
    assert_eq!(second["dispute"]["escrow_frozen"], false);

    // Replaying the same answer is accepted; changing it is not.
    let (status, replay) = h
        .send(
            "POST",
            &respond_uri,
            Some(&Harness::party(h.client)),
            Some(json!({"decision": "accept"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(replay["finalized"], true);

    let (status, _) = h
        .send(
            "POST",
            &respond_uri,
            Some(&Harness::party(h.client)),
            Some(json!({"decision": "reject"})),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, dash) = h.send("GET", "/v1/admin/kpis", Some(&h.admin_token()), None).await;
    assert_eq!(dash["kpis"]["resolved"], 1);
    assert_eq!(dash["kpis"]["admin_forced"], 0);
}

#[tokio::test]
async fn new_proposal_supersedes_open_one() {
    let h = Harness::new();
    let dispute = h.file(None).await;
    let id = dispute["id"].as_str().unwrap();
    let uri = format!("/v1/disputes/{id}/proposals");

    let (_, first) = h
        .send("POST", &uri, Some(&Harness::party(h.client)), Some(json!({"summary": "Redo the work"})))
        .await;
    let (status, second) = h
        .send(
            "POST",
            &uri,
            Some(&Harness::party(h.professional)),
            Some(json!({"summary": "Partial refund instead"})),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(second["superseded"][0]["id"], first["proposal"]["id"]);
    assert_eq!(second["superseded"][0]["status"], "superseded");

    let (_, list) = h.send("GET", &uri, Some(&Harness::party(h.client)), None).await;
    let statuses: Vec<&str> = list
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["status"].as_str().unwrap())
        .collect();
    assert_eq!(statuses, vec!["superseded", "open"]);

    let first_uri = format!("/v1/proposals/{}/respond", first["proposal"]["id"].as_str().unwrap());
    let (status, _) = h
        .send("POST", &first_uri, Some(&Harness::party(h.client)), Some(json!({"decision": "accept"})))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn shares_exceeding_escrow_are_rejected() {
    let h = Harness::new();
    let dispute = h.file(Some("50")).await;
    let id = dispute["id"].as_str().unwrap();
    let (status, _) = h
        .send(
            "POST",
            &format!("/v1/disputes/{id}/proposals"),
            Some(&Harness::party(h.client)),
            Some(json!({
                "summary": "Everything to me",
                "client_share": {"amount": "75", "currency": "USD"},
            })),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn unknown_decision_is_unprocessable() {
    let h = Harness::new();
    let (status, _) = h
        .send(
            "POST",
            &format!("/v1/proposals/{}/respond", Uuid::new_v4()),
            Some(&Harness::party(h.client)),
            Some(json!({"decision": "maybe"})),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

// -- Admin --------------------------------------------------------------------

#[tokio::test]
async fn force_resolve_is_admin_only_and_counted_apart() {
    let h = Harness::new();
    let dispute = h.file(Some("100")).await;
    let id = dispute["id"].as_str().unwrap();
    let uri = format!("/v1/admin/disputes/{id}/force-resolve");
    let body = json!({
        "summary": "Full refund to client",
        "client_share": {"amount": "100", "currency": "USD"},
    });

    let (status, _) = h
        .send("POST", &uri, Some(&Harness::party(h.client)), Some(body.clone()))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, d) = h.send("POST", &uri, Some(&h.admin_token()), Some(body.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(d["workflow_state"], "resolved");
    assert_eq!(d["resolution"]["kind"], "admin_forced");
    assert_eq!(d["resolution"]["admin_id"], h.admin.to_string());

    let (status, _) = h.send("POST", &uri, Some(&h.admin_token()), Some(body)).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, dash) = h.send("GET", "/v1/admin/kpis", Some(&h.admin_token()), None).await;
    assert_eq!(dash["kpis"]["resolved"], 0);
    assert_eq!(dash["kpis"]["admin_forced"], 1);
    assert!(dash["kpis"]["average_resolution_hours"].is_number());
}

#[tokio::test]
async fn escalation_run_moves_level_once_per_stall() {
    let h = Harness::new();
    let dispute = h.file(None).await;
    let at = (Utc::now() + Duration::hours(50)).to_rfc3339_opts(SecondsFormat::Secs, true);
    let uri = format!("/v1/admin/escalations/run?at={at}");

    let (status, report) = h.send("POST", &uri, Some(&h.admin_token()), None).await;
    assert_eq!(status, StatusCode::OK, "{report}");
    assert_eq!(report["scanned"], 1);
    assert_eq!(report["escalated"], 1);
    assert_eq!(report["level_changes"], 1);
    assert_eq!(report["outcomes"][0]["level"], 1);

    let (_, again) = h.send("POST", &uri, Some(&h.admin_token()), None).await;
    assert_eq!(again["escalated"], 1);
    assert_eq!(again["level_changes"], 0);

    let id = dispute["id"].as_str().unwrap();
    let (_, d) = h.send("GET", &format!("/v1/disputes/{id}"), Some(&h.admin_token()), None).await;
    assert_eq!(d["escalation_level"], 1);
    assert_eq!(d["escalation_reasons"].as_array().unwrap().len(), 2);

    let (_, dash) = h.send("GET", "/v1/admin/kpis", Some(&h.admin_token()), None).await;
    assert_eq!(dash["kpis"]["escalated"], 1);
}

#[tokio::test]
async fn early_warning_is_raised_inside_window() {
    let h = Harness::new();
    h.file(None).await;
    let at = (Utc::now() + Duration::hours(30)).to_rfc3339_opts(SecondsFormat::Secs, true);

    let (status, report) = h
        .send("POST", &format!("/v1/admin/escalations/run?at={at}"), Some(&h.admin_token()), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["escalated"], 0);
    assert_eq!(report["warnings_raised"], 1);

    let (_, dash) = h.send("GET", "/v1/admin/kpis", Some(&h.admin_token()), None).await;
    assert_eq!(dash["kpis"]["active_early_warnings"], 1);
    assert_eq!(dash["early_warnings"][0]["kind"], "inactivity");
}

#[tokio::test]
async fn kpis_require_admin() {
    let h = Harness::new();
    let support = format!("support::{SECRET}");
    let (status, _) = h.send("GET", "/v1/admin/kpis", Some(&support), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = h
        .send("POST", "/v1/admin/escalations/run", Some(&Harness::party(h.client)), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn support_reads_all_disputes_and_queues() {
    let h = Harness::new();
    h.file(None).await;
    let support = format!("support::{SECRET}");

    let (status, list) = h.send("GET", "/v1/disputes?workflow_state=open", Some(&support), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().unwrap().len(), 1);

    let (status, notes) = h
        .send(
            "GET",
            &format!("/v1/notifications?recipient={}", h.professional),
            Some(&support),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(notes.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn party_cannot_drain_someone_elses_queue() {
    let h = Harness::new();
    let (status, _) = h
        .send(
            "GET",
            &format!("/v1/notifications?recipient={}", h.professional),
            Some(&Harness::party(h.client)),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

// -- Authentication -------------------------------------------------------------

#[tokio::test]
async fn wrong_secret_is_unauthorized() {
    let h = Harness::new();
    let token = format!("party:{}:wrong", h.client);
    let (status, err) = h.send("GET", "/v1/disputes", Some(&token), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(err["error"]["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn auth_disabled_grants_admin() {
    let app = market_api::app(AppState::new());
    let response = app
        .oneshot(Request::builder().uri("/v1/admin/kpis").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
