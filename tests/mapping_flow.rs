mod common;

use std::net::TcpListener;

use ayush_mapper::{
    AppConfig, AppError, AppState, ConfidenceBand, HistorySummary, MappingService, RequestState,
    SecretVault, SessionBackend, SubmitOutcome, EMPTY_TERM_MESSAGE,
};
use httptest::matchers::{all_of, contains, eq, json_decoded, request};
use httptest::responders::{json_encoded, status_code};
use httptest::{Expectation, Server};
use serde_json::json;

use common::{access_token, bearer, mapping_body, signed_in_app};

#[tokio::test]
async fn mapping_round_trip_reaches_succeeded() {
    let server = Server::run();
    let access = access_token("vaidya@example.org", "a1");
    server.expect(
        Expectation::matching(all_of![
            request::method_path("POST", "/api/mappings/map-ayush/"),
            request::headers(contains(("authorization", bearer(&access)))),
            request::body(json_decoded(eq(json!({ "ayush_term": "Vata" })))),
        ])
        .respond_with(json_encoded(mapping_body("Vata", "XYZ", 92))),
    );

    let (app, _vault) = signed_in_app(&server, &access, "r1");
    let controller = app.controller();

    let outcome = controller.submit("  Vata ").await.expect("submit");

    let SubmitOutcome::Applied(RequestState::Succeeded(result)) = outcome else {
        panic!("unexpected outcome {outcome:?}");
    };
    assert_eq!(result.term, "Vata");
    assert_eq!(result.code, "XYZ");
    assert_eq!(result.confidence.value(), 92);
    assert_eq!(result.confidence.band(), ConfidenceBand::High);
    assert_eq!(result.processing_steps.len(), 3);
    assert_eq!(result.processing_steps[0].agent_name, "Extraction Agent");
    assert_eq!(controller.current().result(), Some(&result));
}

#[tokio::test]
async fn empty_term_never_reaches_the_network() {
    // No expectations: any request would fail the server's verification on drop.
    let server = Server::run();
    let access = access_token("vaidya@example.org", "a1");
    let (app, _vault) = signed_in_app(&server, &access, "r1");
    let controller = app.controller();

    let err = controller.submit("   ").await.unwrap_err();
    assert_eq!(err.user_message(), EMPTY_TERM_MESSAGE);
    assert_eq!(controller.current(), RequestState::Idle);

    let err = app.gateway().submit_mapping("").await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
}

#[tokio::test]
async fn server_detail_becomes_failure_message() {
    let server = Server::run();
    let access = access_token("vaidya@example.org", "a1");
    server.expect(
        Expectation::matching(request::method_path("POST", "/api/mappings/map-ayush/"))
            .respond_with(
                status_code(400)
                    .append_header("content-type", "application/json")
                    .body(json!({ "detail": "Term not found in AYUSH corpus" }).to_string()),
            ),
    );

    let (app, _vault) = signed_in_app(&server, &access, "r1");
    let controller = app.controller();
    controller.submit("Zzz").await.expect("submit");

    let failure = controller.current().failure().cloned().expect("failed state");
    assert_eq!(failure.message, "Term not found in AYUSH corpus");
    assert!(!failure.session_ended);
}

#[tokio::test]
async fn server_error_without_detail_uses_generic_message() {
    let server = Server::run();
    let access = access_token("vaidya@example.org", "a1");
    server.expect(
        Expectation::matching(request::method_path("POST", "/api/mappings/map-ayush/"))
            .respond_with(status_code(502)),
    );

    let (app, _vault) = signed_in_app(&server, &access, "r1");
    let controller = app.controller();
    controller.submit("Vata").await.expect("submit");

    let failure = controller.current().failure().cloned().expect("failed state");
    assert_eq!(failure.message, "Failed to map AYUSH term. Please try again.");
}

#[tokio::test]
async fn unreachable_service_reports_network_failure() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        listener.local_addr().expect("addr").port()
    };
    let mut config = AppConfig::default().with_base_url(format!("http://127.0.0.1:{port}/api"));
    config.session_backend = SessionBackend::Memory;
    let app = AppState::with_vault(SecretVault::in_memory(), config).expect("app state");
    let controller = app.controller();

    controller.submit("Vata").await.expect("submit");

    let failure = controller.current().failure().cloned().expect("failed state");
    assert_eq!(
        failure.message,
        "Unable to reach the mapping service. Check your connection and try again."
    );
    assert!(!failure.session_ended);
}

#[tokio::test]
async fn ended_session_is_flagged_on_the_failure() {
    let server = Server::run();
    let access = access_token("vaidya@example.org", "a1");
    server.expect(
        Expectation::matching(request::method_path("POST", "/api/mappings/map-ayush/"))
            .times(1)
            .respond_with(status_code(401)),
    );
    server.expect(
        Expectation::matching(request::method_path("POST", "/api/users/token/refresh/"))
            .times(1)
            .respond_with(status_code(401)),
    );

    let (app, _vault) = signed_in_app(&server, &access, "r1");
    let controller = app.controller();
    controller.submit("Vata").await.expect("submit");

    let failure = controller.current().failure().cloned().expect("failed state");
    assert!(failure.session_ended);
    assert!(!app.session().is_authenticated());
}

#[tokio::test]
async fn history_preserves_server_order() {
    let server = Server::run();
    let access = access_token("vaidya@example.org", "a1");
    let entries: Vec<_> = [(5, "Vata", 95), (9, "Pitta", 72), (2, "Kapha", 40)]
        .into_iter()
        .map(|(id, term, confidence)| {
            let mut body = mapping_body(term, "XYZ", confidence);
            body["id"] = json!(id);
            body
        })
        .collect();
    server.expect(
        Expectation::matching(all_of![
            request::method_path("GET", "/api/mappings/history/"),
            request::headers(contains(("authorization", bearer(&access)))),
        ])
        .respond_with(json_encoded(json!(entries))),
    );

    let (app, _vault) = signed_in_app(&server, &access, "r1");
    let history = app.gateway().fetch_history().await.expect("history");

    let ids: Vec<_> = history.iter().map(|entry| entry.id).collect();
    assert_eq!(ids, [5, 9, 2]);
    assert_eq!(history[1].result.term, "Pitta");

    let summary = HistorySummary::from_entries(&history);
    assert_eq!(summary.total, 3);
    assert_eq!(summary.high_confidence, 1);
    assert!((summary.average_confidence - 69.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn empty_history_is_an_empty_list() {
    let server = Server::run();
    let access = access_token("vaidya@example.org", "a1");
    server.expect(
        Expectation::matching(request::method_path("GET", "/api/mappings/history/"))
            .respond_with(json_encoded(json!([]))),
    );

    let (app, _vault) = signed_in_app(&server, &access, "r1");
    assert!(app.gateway().fetch_history().await.expect("history").is_empty());
}
