//! Vendor response fixtures

use serde_json::{Value, json};
use wiremock::ResponseTemplate;

/// Successful vendor envelope around `result`
pub fn ok_envelope(result: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "code": 200,
        "result": result,
        "message": null
    }))
}

/// Vendor envelope carrying an application error
pub fn error_envelope(code: i64, message: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "code": code,
        "result": null,
        "message": { "en": message }
    }))
}

/// Result of a task creation call
pub fn created(task_id: &str) -> Value {
    json!({ "task_id": task_id, "task_cost": 10 })
}

/// Get-task record with the given vendor status and output
pub fn task_record(task_id: &str, status: &str, output: Value) -> Value {
    json!({
        "task_id": task_id,
        "user_id": 1,
        "version": "test-version",
        "error": null,
        "output": output,
        "status": status,
        "create_at": 1_700_000_000,
        "completed_at": null
    })
}

/// Detection output with one usable and one failed sub-result
pub fn mixed_detection_output() -> Value {
    json!([
        {
            "id": "det-good",
            "status": "succeed",
            "faces": [
                { "id": 0, "link": "https://cdn.example.com/faces/0.jpg" },
                { "id": 1, "link": "https://cdn.example.com/faces/1.jpg" }
            ],
            "error": null
        },
        {
            "id": "det-bad",
            "status": "failed",
            "faces": [],
            "error": "frame decode error"
        }
    ])
}

/// Bytes standing in for a rendered video
pub const VIDEO_BYTES: &[u8] = b"\x00\x00\x00\x18ftypmp42fake-video-payload";
