use super::*;
use carebridge_types::EscalationRecord;

fn test_db() -> Connection {
    let conn = Connection::open_in_memory().expect("should open in-memory db");
    carebridge_db::run_migrations(&conn).expect("migrations should succeed");
    conn
}

fn patient() -> PatientSnapshot {
    serde_json::from_value(serde_json::json!({
        "patientId": "p-100",
        "displayName": "Grace",
        "conditions": ["heart failure"],
    }))
    .expect("valid snapshot")
}

fn seed(conn: &Connection, call_id: &str) -> CallRecord {
    create_call(
        conn,
        &NewCall {
            call_id: call_id.to_string(),
            patient: Some(patient()),
            objective: Some("weekly check-in".to_string()),
            clinical_context: Some("post-discharge day 7".to_string()),
            callback_url: Some("https://cb.example/x".to_string()),
        },
    )
    .expect("create should succeed")
}

fn summary(findings: &[&str]) -> ClinicalSummary {
    ClinicalSummary {
        summary: findings.iter().map(|s| s.to_string()).collect(),
        recommendation: "continue plan".to_string(),
        red_flags: false,
        symptoms: None,
        escalation: None,
        biomarker: None,
    }
}

#[test]
fn create_call_starts_in_created() {
    let conn = test_db();
    let call = seed(&conn, "C1");

    assert_eq!(call.status, CallStatus::Created);
    assert_eq!(call.transport_session_id, None);
    assert_eq!(call.last_risk, None);
    assert_eq!(call.patient.as_ref().map(|p| p.display_name.as_str()), Some("Grace"));
    assert_eq!(call.callback_url.as_deref(), Some("https://cb.example/x"));
}

#[test]
fn duplicate_call_id_is_rejected() {
    let conn = test_db();
    seed(&conn, "C1");
    let err = create_call(
        &conn,
        &NewCall {
            call_id: "C1".to_string(),
            patient: None,
            objective: None,
            clinical_context: None,
            callback_url: None,
        },
    )
    .expect_err("second create must fail");
    assert!(matches!(err, CallError::AlreadyExists(id) if id == "C1"));
}

#[test]
fn missing_call_is_not_found() {
    let conn = test_db();
    assert!(matches!(get_call(&conn, "nope"), Err(CallError::NotFound(_))));
    assert!(find_call(&conn, "nope").unwrap().is_none());
}

#[test]
fn transport_session_binds_once() {
    let conn = test_db();
    seed(&conn, "C1");

    bind_transport_session(&conn, "C1", "MZ-1").expect("first bind");
    bind_transport_session(&conn, "C1", "MZ-1").expect("same value is a no-op");

    let err = bind_transport_session(&conn, "C1", "MZ-2").expect_err("rebind must fail");
    match err {
        CallError::TransportSessionConflict { bound, .. } => assert_eq!(bound, "MZ-1"),
        other => panic!("unexpected error: {other:?}"),
    }

    let found = find_call_by_transport_session(&conn, "MZ-1")
        .unwrap()
        .expect("bound call should be found");
    assert_eq!(found.call_id, "C1");
}

#[test]
fn risk_is_overwritten_in_arrival_order() {
    let conn = test_db();
    seed(&conn, "C2");

    record_risk(&conn, "C2", 0.85).unwrap();
    record_risk(&conn, "C2", 0.3).unwrap();

    assert_eq!(get_call(&conn, "C2").unwrap().last_risk, Some(0.3));
}

#[test]
fn completed_status_stamps_completion_time() {
    let conn = test_db();
    seed(&conn, "C1");
    set_status(&conn, "C1", CallStatus::Streaming).unwrap();
    assert!(get_call(&conn, "C1").unwrap().completed_at.is_none());

    set_status(&conn, "C1", CallStatus::Completed).unwrap();
    let call = get_call(&conn, "C1").unwrap();
    assert_eq!(call.status, CallStatus::Completed);
    assert!(call.completed_at.is_some());
}

#[test]
fn first_summary_wins() {
    let conn = test_db();
    seed(&conn, "C1");

    let first = ClinicalSummary {
        escalation: Some(EscalationRecord {
            level: "urgent".to_string(),
            reason: "weight gain".to_string(),
        }),
        ..summary(&["stable", "no red flags"])
    };
    assert_eq!(
        record_summary(&conn, "C1", &first, true).unwrap(),
        SummaryWrite::Stored
    );
    assert_eq!(
        record_summary(&conn, "C1", &summary(&["overwritten"]), false).unwrap(),
        SummaryWrite::AlreadyStored
    );

    let call = get_call(&conn, "C1").unwrap();
    assert_eq!(call.summary, Some(first));
    assert_eq!(call.result_delivered, Some(true));
}

#[test]
fn summary_for_unknown_call_is_not_found() {
    let conn = test_db();
    assert!(matches!(
        record_summary(&conn, "ghost", &summary(&["x"]), true),
        Err(CallError::NotFound(_))
    ));
}
