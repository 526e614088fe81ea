use crate::activity::{ActivityPayload, ActivityType};
use crate::ipc::helpers::{get_optional_str, get_required_str, require_sync};
use crate::ipc::response::{respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::store::{Acknowledgement, ActivityFilter};
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::json;

const MAX_FEED_LIMIT: usize = 500;

fn activities_submit(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let svc = require_sync(state)?;
    let raw = params
        .get("payload")
        .ok_or_else(|| HandlerErr::bad_params("missing payload"))?;
    // Malformed payloads are rejected here and never reach the queue.
    let payload = ActivityPayload::from_json(raw)?;
    let outcome = svc.submit(payload)?;
    Ok(json!(outcome))
}

fn parse_filter(params: &serde_json::Value) -> Result<ActivityFilter, HandlerErr> {
    let kind = match get_optional_str(params, "type") {
        Some(t) => Some(
            ActivityType::parse(&t)
                .ok_or_else(|| HandlerErr::bad_params(format!("unknown activity type: {}", t)))?,
        ),
        None => None,
    };
    let limit = match params.get("limit") {
        None => None,
        Some(v) if v.is_null() => None,
        Some(v) => {
            let n = v
                .as_u64()
                .ok_or_else(|| HandlerErr::bad_params("limit must be a positive integer"))?;
            Some((n as usize).min(MAX_FEED_LIMIT))
        }
    };
    Ok(ActivityFilter {
        kind,
        student_name: get_optional_str(params, "studentName"),
        limit,
    })
}

fn activities_list(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let svc = require_sync(state)?;
    let filter = parse_filter(params)?;
    let rows = svc.store().list(&filter)?;
    Ok(json!({ "activities": rows }))
}

/// Accepts a full RFC3339 timestamp or a bare `YYYY-MM-DD` (taken as midnight UTC).
fn parse_roll_call_date(raw: &str) -> Result<DateTime<Utc>, HandlerErr> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| HandlerErr::bad_params(format!("invalid date: {}", raw)))
}

/// One attendance entry per student, inserted together.
fn activities_roll_call(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let svc = require_sync(state)?;
    let grade = get_optional_str(params, "grade").unwrap_or_default();
    let subject = get_optional_str(params, "subject").unwrap_or_default();
    let Some(students) = params.get("students").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing students"));
    };
    if students.is_empty() {
        return Err(HandlerErr::bad_params("students must not be empty"));
    }

    let mut payloads = Vec::with_capacity(students.len());
    let mut present_count = 0usize;
    for (i, s) in students.iter().enumerate() {
        let name = get_required_str(s, "studentName").map_err(|mut e| {
            e.details = Some(json!({ "index": i }));
            e
        })?;
        let present = s.get("present").and_then(|v| v.as_bool()).unwrap_or(false);
        if present {
            present_count += 1;
        }
        let mut details = if present { "Present" } else { "Absent" }.to_string();
        if let Some(note) = get_optional_str(s, "note") {
            details = format!("{} - {}", details, note);
        }
        let payload = ActivityPayload {
            student_name: name,
            grade: grade.clone(),
            subject: subject.clone(),
            kind: ActivityType::Attendance,
            details,
            score: None,
            attachment: None,
        }
        .normalized()?;
        payloads.push(payload);
    }

    let at = match get_optional_str(params, "date") {
        Some(raw) => parse_roll_call_date(&raw)?,
        None => Utc::now(),
    };
    let records = svc.store().write_batch(&payloads, at)?;
    log::info!(
        "roll call saved: {} present, {} absent",
        present_count,
        records.len() - present_count
    );
    Ok(json!({
        "activities": records,
        "present": present_count,
        "absent": records.len() - present_count,
    }))
}

fn activities_acknowledge(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let svc = require_sync(state)?;
    let activity_id = get_required_str(params, "activityId")?;
    let parent_name = get_required_str(params, "parentName")?;
    let ack = Acknowledgement {
        parent_name,
        signature: get_optional_str(params, "signature"),
        at: Utc::now(),
    };
    let record = svc.store().acknowledge(&activity_id, &ack)?;
    Ok(json!({ "activity": record }))
}

fn handle_activities_submit(state: &mut AppState, req: &Request) -> serde_json::Value {
    respond(&req.id, activities_submit(state, &req.params))
}

fn handle_activities_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    respond(&req.id, activities_list(state, &req.params))
}

fn handle_activities_roll_call(state: &mut AppState, req: &Request) -> serde_json::Value {
    respond(&req.id, activities_roll_call(state, &req.params))
}

fn handle_activities_acknowledge(state: &mut AppState, req: &Request) -> serde_json::Value {
    respond(&req.id, activities_acknowledge(state, &req.params))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "activities.submit" => Some(handle_activities_submit(state, req)),
        "activities.list" => Some(handle_activities_list(state, req)),
        "activities.rollCall" => Some(handle_activities_roll_call(state, req)),
        "activities.acknowledge" => Some(handle_activities_acknowledge(state, req)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feed_filter_parsing() {
        let f = parse_filter(&json!({ "type": "Permission Slip", "limit": 10_000 })).expect("filter");
        assert_eq!(f.kind, Some(ActivityType::PermissionSlip));
        assert_eq!(f.limit, Some(MAX_FEED_LIMIT));
        assert_eq!(f.student_name, None);

        assert!(parse_filter(&json!({ "type": "Recess" })).is_err());
        assert!(parse_filter(&json!({ "limit": -1 })).is_err());
        assert_eq!(parse_filter(&json!({})).expect("empty"), ActivityFilter::default());
    }

    #[test]
    fn roll_call_date_accepts_day_or_timestamp() {
        let day = parse_roll_call_date("2026-03-02").expect("day");
        assert_eq!(day.to_rfc3339(), "2026-03-02T00:00:00+00:00");
        let ts = parse_roll_call_date("2026-03-02T09:30:00+02:00").expect("ts");
        assert_eq!(ts.to_rfc3339(), "2026-03-02T07:30:00+00:00");
        assert!(parse_roll_call_date("yesterday").is_err());
    }
}
