mod test_support;

use serde_json::json;
use test_support::{request, request_ok, sample_record, select_workspace, spawn_sidecar, temp_dir};

#[test]
fn zero_scores_and_ranks_are_valid_values() {
    let workspace = temp_dir("schooldesk-validate-zero");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);

    let mut record = sample_record("240101", "Weekly Test 4", 42.0);
    record["rank"] = json!(0);
    record["subjects"][0]["scored"] = json!(0);
    record["overallTotalMarks"] = json!(0);

    let report = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "records.bulkUpload",
        json!({ "records": [record] }),
    );
    assert_eq!(
        report.get("validationErrorCount").and_then(|v| v.as_u64()),
        Some(0)
    );
    assert_eq!(report.get("insertedCount").and_then(|v| v.as_u64()), Some(1));
}

#[test]
fn invalid_payloads_are_reported_and_skipped() {
    let workspace = temp_dir("schooldesk-validate-errors");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);

    let mut bad_stream = sample_record("240101", "Weekly Test 4", 42.0);
    bad_stream["stream"] = json!("Foo");
    let mut bad_date = sample_record("240102", "Weekly Test 4", 42.0);
    bad_date["date"] = json!("14/03/2026");
    let mut bad_subject = sample_record("240103", "Weekly Test 4", 42.0);
    bad_subject["subjects"] = json!([{ "subjectName": "Physics", "scored": 100 }]);
    let mut no_reg = sample_record("240104", "Weekly Test 4", 42.0);
    no_reg.as_object_mut().expect("object").remove("regNumber");

    let report = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "records.bulkUpload",
        json!({
            "records": [
                bad_stream,
                bad_date,
                bad_subject,
                no_reg,
                sample_record("240105", "Weekly Test 4", 42.0),
            ]
        }),
    );
    assert_eq!(report.get("insertedCount").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(
        report.get("validationErrorCount").and_then(|v| v.as_u64()),
        Some(4)
    );

    let errors = report
        .get("validationErrors")
        .and_then(|v| v.as_array())
        .expect("validation errors");
    let errors_for = |index: u64| {
        errors
            .iter()
            .find(|e| e.get("index").and_then(|v| v.as_u64()) == Some(index))
            .and_then(|e| e.get("errors"))
            .and_then(|v| v.as_array())
            .expect("error list")
            .iter()
            .filter_map(|v| v.as_str())
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
    };
    assert!(errors_for(0)
        .iter()
        .any(|e| e.contains("Invalid stream value: Foo")));
    assert!(errors_for(1).contains(&"Invalid date format".to_string()));
    assert!(errors_for(2).contains(&"Subject 1 missing field: totalMarks".to_string()));
    assert!(errors_for(3).contains(&"Missing required field: regNumber".to_string()));

    let unknown = errors
        .iter()
        .find(|e| e.get("index").and_then(|v| v.as_u64()) == Some(3))
        .and_then(|e| e.get("regNumber"))
        .and_then(|v| v.as_str());
    assert_eq!(unknown, Some("Unknown"));
}

#[test]
fn strict_mode_aborts_on_any_validation_error() {
    let workspace = temp_dir("schooldesk-validate-strict");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);

    let mut invalid = sample_record("240102", "Weekly Test 4", 42.0);
    invalid.as_object_mut().expect("object").remove("percentile");

    let resp = request(
        &mut stdin,
        &mut reader,
        "1",
        "records.bulkUpload",
        json!({
            "records": [sample_record("240101", "Weekly Test 4", 42.0), invalid],
            "strict": true
        }),
    );
    assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(false));
    let error = resp.get("error").expect("error");
    assert_eq!(
        error.get("code").and_then(|v| v.as_str()),
        Some("validation_failed")
    );
    assert_eq!(
        error
            .get("details")
            .and_then(|d| d.get("errorCount"))
            .and_then(|v| v.as_u64()),
        Some(1)
    );

    // Strict abort means the valid record was not committed either.
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "records.list",
        json!({ "testName": "Weekly Test 4" }),
    );
    assert_eq!(listed.get("count").and_then(|v| v.as_u64()), Some(0));
}

#[test]
fn empty_batch_is_rejected() {
    let workspace = temp_dir("schooldesk-validate-empty");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);

    let resp = request(
        &mut stdin,
        &mut reader,
        "1",
        "records.bulkUpload",
        json!({ "records": [] }),
    );
    assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        resp.get("error")
            .and_then(|v| v.get("code"))
            .and_then(|v| v.as_str()),
        Some("bad_params")
    );
}
