//! Cross-module dispatch utilities
//!
//! Stateless helpers for the common interop patterns: invoking a method on
//! every module that implements it, verifying declared module dependencies,
//! comparing event times from loosely-typed payloads, and translating event
//! payloads between module schemas. All of them degrade gracefully on bad
//! input; none of them panic or return errors to the caller.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, error, warn};

use crate::modules::{ModuleCallError, ModuleRegistry};

/// Known event payload schemas for [`convert_event_format`]
pub const EVENT_FORMAT_CALENDAR: &str = "calendar";
pub const EVENT_FORMAT_TASK: &str = "task";

/// Outcome of invoking one module during a dispatch fan-out
#[derive(Debug, Clone, Serialize)]
pub struct DispatchResult {
    /// Module that was invoked
    pub module: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DispatchResult {
    fn ok(module: impl Into<String>, result: Value) -> Self {
        Self {
            module: module.into(),
            success: true,
            result: Some(result),
            error: None,
        }
    }

    fn failed(module: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            success: false,
            result: None,
            error: Some(error.into()),
        }
    }
}

/// Outcome of a module dependency check
#[derive(Debug, Clone, Serialize)]
pub struct DependencyCheckResult {
    /// Module (or plugin) whose dependencies were checked
    pub module_name: String,
    pub success: bool,
    pub message: String,
    pub missing_dependencies: Vec<String>,
}

/// Invoke `method` on every registered module that implements it
///
/// Modules are visited in registration order. A module that does not expose
/// the method is skipped silently; a module whose method fails or panics
/// contributes a failed entry without disturbing the rest of the fan-out. The
/// result therefore has one entry per *implementing* module.
///
/// When no registry is available (host shutting down, or dispatch invoked
/// before wiring finished) the fan-out is skipped with a warning.
pub fn execute_across_modules(
    registry: Option<&ModuleRegistry>,
    method: &str,
    args: &[Value],
) -> Vec<DispatchResult> {
    let Some(registry) = registry else {
        warn!("Module system unavailable, skipping '{}' dispatch", method);
        return Vec::new();
    };

    let mut results = Vec::new();
    for entry in registry.snapshot() {
        let outcome = catch_unwind(AssertUnwindSafe(|| entry.api.invoke(method, args)));
        match outcome {
            Ok(Ok(value)) => results.push(DispatchResult::ok(&entry.name, value)),
            Ok(Err(ModuleCallError::Unsupported { .. })) => {
                debug!("Module '{}' does not implement '{}'", entry.name, method);
            }
            Ok(Err(ModuleCallError::Failed(message))) => {
                error!("Module '{}' failed on '{}': {}", entry.name, method, message);
                results.push(DispatchResult::failed(&entry.name, message));
            }
            Err(_) => {
                error!("Module '{}' panicked on '{}'", entry.name, method);
                results.push(DispatchResult::failed(
                    &entry.name,
                    format!("method '{}' panicked", method),
                ));
            }
        }
    }
    results
}

/// Verify that every module named in `dependencies` is registered
///
/// `dependencies` of `None` means the caller declared nothing, which passes
/// trivially. A missing registry fails closed: every requested dependency is
/// reported missing, because "unknown" must not be mistaken for "satisfied".
pub fn check_module_dependencies(
    registry: Option<&ModuleRegistry>,
    module_name: &str,
    dependencies: Option<&[String]>,
) -> DependencyCheckResult {
    let Some(dependencies) = dependencies else {
        return DependencyCheckResult {
            module_name: module_name.to_string(),
            success: true,
            message: "no dependencies to check".to_string(),
            missing_dependencies: Vec::new(),
        };
    };

    let Some(registry) = registry else {
        warn!(
            "Module system unavailable while checking dependencies of '{}'",
            module_name
        );
        return DependencyCheckResult {
            module_name: module_name.to_string(),
            success: false,
            message: "module system unavailable".to_string(),
            missing_dependencies: dependencies.to_vec(),
        };
    };

    let missing: Vec<String> = dependencies
        .iter()
        .filter(|name| !registry.has(name))
        .cloned()
        .collect();

    let success = missing.is_empty();
    let message = if success {
        "all required modules are available".to_string()
    } else {
        format!("{} required module(s) are missing", missing.len())
    };

    DependencyCheckResult {
        module_name: module_name.to_string(),
        success,
        message,
        missing_dependencies: missing,
    }
}

/// Whether two event payloads occupy overlapping time ranges
///
/// Ranges are half-open, so an event ending exactly when another starts does
/// not conflict. Anything that cannot be interpreted (missing payloads,
/// missing `start`/`end` fields, unparseable instants) reports `false`;
/// scheduling decisions should never be blocked by malformed data.
pub fn check_time_conflict(event_a: &Value, event_b: &Value) -> bool {
    let (Some(a), Some(b)) = (event_a.as_object(), event_b.as_object()) else {
        error!("Time conflict check received a non-object event payload");
        return false;
    };

    let (Some(start_a), Some(end_a)) = (a.get("start"), a.get("end")) else {
        debug!("First event is missing start/end fields");
        return false;
    };
    let (Some(start_b), Some(end_b)) = (b.get("start"), b.get("end")) else {
        debug!("Second event is missing start/end fields");
        return false;
    };

    let instants = (
        parse_event_instant(start_a),
        parse_event_instant(end_a),
        parse_event_instant(start_b),
        parse_event_instant(end_b),
    );
    let (Some(start_a), Some(end_a), Some(start_b), Some(end_b)) = instants else {
        error!("Time conflict check could not parse one of the event instants");
        return false;
    };

    start_a < end_b && start_b < end_a
}

/// Interpret a JSON value as a point in time
///
/// Accepts RFC 3339 strings, common `YYYY-MM-DD [HH:MM[:SS]]` forms, bare
/// dates (midnight UTC), bare times (anchored to the epoch date, useful for
/// comparing times-of-day), and numeric epoch milliseconds.
pub fn parse_event_instant(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(raw) => parse_instant_str(raw),
        Value::Number(number) => {
            let millis = number.as_i64().or_else(|| number.as_f64().map(|f| f as i64))?;
            DateTime::from_timestamp_millis(millis)
        }
        _ => None,
    }
}

fn parse_instant_str(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(parsed.and_utc());
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
    }

    // Bare times anchor to the epoch date so "10:00" < "10:30" compares the
    // way schedule payloads expect.
    for format in ["%H:%M:%S", "%H:%M"] {
        if let Ok(time) = NaiveTime::parse_from_str(raw, format) {
            return NaiveDate::from_ymd_opt(1970, 1, 1).map(|date| date.and_time(time).and_utc());
        }
    }

    None
}

/// Translate an event payload from one module schema to another
///
/// Identical source and destination formats return a fresh copy. Unknown
/// destination formats return `None` with a warning. Individual fields that
/// cannot be derived (an unparseable start when computing a task duration)
/// degrade to JSON `null` rather than failing the whole conversion.
pub fn convert_event_format(event: &Value, source_format: &str, dest_format: &str) -> Option<Value> {
    let Some(fields) = event.as_object() else {
        warn!("Cannot convert a non-object event payload");
        return None;
    };

    if source_format == dest_format {
        return Some(Value::Object(fields.clone()));
    }

    match dest_format {
        EVENT_FORMAT_CALENDAR => Some(to_calendar_format(fields, source_format)),
        EVENT_FORMAT_TASK => Some(to_task_format(fields, source_format)),
        other => {
            warn!("Unknown destination event format '{}'", other);
            None
        }
    }
}

fn field(fields: &Map<String, Value>, key: &str) -> Value {
    fields.get(key).cloned().unwrap_or(Value::Null)
}

fn to_task_format(fields: &Map<String, Value>, source_format: &str) -> Value {
    let start = field(fields, "start");
    let end = field(fields, "end");

    let duration_minutes = match (parse_event_instant(&start), parse_event_instant(&end)) {
        (Some(start), Some(end)) => json!((end - start).num_minutes()),
        _ => Value::Null,
    };

    json!({
        "id": field(fields, "id"),
        "title": field(fields, "title"),
        "due": start,
        "durationMinutes": duration_minutes,
        "sourceFormat": source_format,
    })
}

fn to_calendar_format(fields: &Map<String, Value>, source_format: &str) -> Value {
    let start = match fields.get("due") {
        Some(due) => due.clone(),
        None => field(fields, "start"),
    };

    let end = match fields.get("end") {
        Some(end) => end.clone(),
        None => {
            let duration = fields.get("durationMinutes").and_then(Value::as_i64);
            match (parse_event_instant(&start), duration) {
                (Some(start), Some(minutes)) => chrono::Duration::try_minutes(minutes)
                    .and_then(|delta| start.checked_add_signed(delta))
                    .map(|end| json!(end.to_rfc3339()))
                    .unwrap_or(Value::Null),
                _ => Value::Null,
            }
        }
    };

    json!({
        "id": field(fields, "id"),
        "title": field(fields, "title"),
        "start": start,
        "end": end,
        "allDay": fields.get("allDay").cloned().unwrap_or(json!(false)),
        "sourceFormat": source_format,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::{MethodMap, ModuleApi};
    use std::sync::Arc;

    fn registry_with_calendar_and_tasks() -> ModuleRegistry {
        let registry = ModuleRegistry::new();
        registry.register(
            "calendar",
            Arc::new(MethodMap::new().with_method("getEvents", |_args| {
                Ok(json!([{"id": "e1"}, {"id": "e2"}]))
            })),
        );
        registry.register(
            "tasks",
            Arc::new(MethodMap::new().with_method("listTasks", |_args| Ok(json!([])))),
        );
        registry
    }

    #[test]
    fn dispatch_only_reaches_implementing_modules() {
        let registry = registry_with_calendar_and_tasks();
        let results = execute_across_modules(Some(&registry), "getEvents", &[]);

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].module, "calendar");
        assert!(results[0].success);
        assert_eq!(results[0].result, Some(json!([{"id": "e1"}, {"id": "e2"}])));
    }

    #[test]
    fn dispatch_with_no_implementers_is_empty() {
        let registry = registry_with_calendar_and_tasks();
        assert!(execute_across_modules(Some(&registry), "unknownMethod", &[]).is_empty());
    }

    #[test]
    fn dispatch_isolates_failing_modules() {
        let registry = ModuleRegistry::new();
        registry.register(
            "flaky",
            Arc::new(MethodMap::new().with_method("sync", |_args| anyhow::bail!("backend offline"))),
        );
        registry.register(
            "steady",
            Arc::new(MethodMap::new().with_method("sync", |_args| Ok(json!("done")))),
        );

        let results = execute_across_modules(Some(&registry), "sync", &[]);
        assert_eq!(results.len(), 2);

        assert_eq!(results[0].module, "flaky");
        assert!(!results[0].success);
        assert!(results[0].error.as_deref().unwrap().contains("backend offline"));

        assert_eq!(results[1].module, "steady");
        assert!(results[1].success);
    }

    #[test]
    fn dispatch_contains_panicking_modules() {
        struct PanickyApi;
        impl ModuleApi for PanickyApi {
            fn method_names(&self) -> Vec<String> {
                vec!["sync".to_string()]
            }
            fn invoke(&self, _method: &str, _args: &[Value]) -> Result<Value, ModuleCallError> {
                panic!("module blew up");
            }
        }

        let registry = ModuleRegistry::new();
        registry.register("panicky", Arc::new(PanickyApi));
        registry.register(
            "steady",
            Arc::new(MethodMap::new().with_method("sync", |_args| Ok(json!("done")))),
        );

        let results = execute_across_modules(Some(&registry), "sync", &[]);
        assert_eq!(results.len(), 2);
        assert!(!results[0].success);
        assert!(results[0].error.as_deref().unwrap().contains("panicked"));
        assert!(results[1].success);
    }

    #[test]
    fn dispatch_without_a_registry_returns_nothing() {
        assert!(execute_across_modules(None, "getEvents", &[]).is_empty());
    }

    #[test]
    fn dispatch_passes_arguments_through() {
        let registry = ModuleRegistry::new();
        registry.register(
            "echo",
            Arc::new(MethodMap::new().with_method("repeat", |args| Ok(json!(args)))),
        );

        let results = execute_across_modules(Some(&registry), "repeat", &[json!(1), json!("two")]);
        assert_eq!(results[0].result, Some(json!([1, "two"])));
    }

    #[test]
    fn dependency_check_passes_with_nothing_declared() {
        let registry = registry_with_calendar_and_tasks();

        let result = check_module_dependencies(Some(&registry), "notes", None);
        assert!(result.success);
        assert!(result.missing_dependencies.is_empty());

        let result = check_module_dependencies(Some(&registry), "notes", Some(&[]));
        assert!(result.success);
        assert!(result.missing_dependencies.is_empty());
    }

    #[test]
    fn dependency_check_reports_missing_modules() {
        let registry = registry_with_calendar_and_tasks();
        let wanted = vec!["calendar".to_string(), "contacts".to_string()];

        let result = check_module_dependencies(Some(&registry), "notes", Some(&wanted));
        assert!(!result.success);
        assert_eq!(result.missing_dependencies, vec!["contacts"]);
        assert!(result.message.contains("1"));
    }

    #[test]
    fn dependency_check_fails_closed_without_a_registry() {
        let wanted = vec!["calendar".to_string()];

        let result = check_module_dependencies(None, "notes", Some(&wanted));
        assert!(!result.success);
        assert_eq!(result.missing_dependencies, vec!["calendar"]);
        assert_eq!(result.module_name, "notes");
    }

    #[test]
    fn overlapping_ranges_conflict() {
        let a = json!({"start": "10:00", "end": "11:00"});
        let b = json!({"start": "10:30", "end": "11:30"});

        assert!(check_time_conflict(&a, &b));
        assert!(check_time_conflict(&b, &a));
    }

    #[test]
    fn adjacent_ranges_do_not_conflict() {
        let a = json!({"start": "10:00", "end": "11:00"});
        let b = json!({"start": "11:00", "end": "12:00"});

        assert!(!check_time_conflict(&a, &b));
        assert!(!check_time_conflict(&b, &a));
    }

    #[test]
    fn containment_is_a_conflict() {
        let outer = json!({"start": "2024-05-01T09:00:00Z", "end": "2024-05-01T17:00:00Z"});
        let inner = json!({"start": "2024-05-01T12:00:00Z", "end": "2024-05-01T12:30:00Z"});

        assert!(check_time_conflict(&outer, &inner));
        assert!(check_time_conflict(&inner, &outer));
    }

    #[test]
    fn malformed_events_never_conflict() {
        let valid = json!({"start": "10:00", "end": "11:00"});

        assert!(!check_time_conflict(&Value::Null, &valid));
        assert!(!check_time_conflict(&valid, &json!("not an object")));
        assert!(!check_time_conflict(&json!({"start": "10:00"}), &valid));
        assert!(!check_time_conflict(&json!({"start": "whenever", "end": "later"}), &valid));
    }

    #[test]
    fn instants_parse_from_many_shapes() {
        assert!(parse_event_instant(&json!("2024-05-01T10:00:00Z")).is_some());
        assert!(parse_event_instant(&json!("2024-05-01T10:00:00+02:00")).is_some());
        assert!(parse_event_instant(&json!("2024-05-01 10:00")).is_some());
        assert!(parse_event_instant(&json!("2024-05-01")).is_some());
        assert!(parse_event_instant(&json!("10:00")).is_some());
        assert!(parse_event_instant(&json!(1714557600000i64)).is_some());

        assert!(parse_event_instant(&json!("soonish")).is_none());
        assert!(parse_event_instant(&json!(null)).is_none());
        assert!(parse_event_instant(&json!("")).is_none());
    }

    #[test]
    fn bare_date_means_midnight_utc() {
        let parsed = parse_event_instant(&json!("2024-05-01")).unwrap();
        assert_eq!(parsed.to_rfc3339(), "2024-05-01T00:00:00+00:00");
    }

    #[test]
    fn identity_conversion_returns_a_fresh_copy() {
        let event = json!({"id": "e1", "title": "Standup"});
        let copy = convert_event_format(&event, "calendar", "calendar").unwrap();
        assert_eq!(copy, event);
    }

    #[test]
    fn unknown_destination_format_is_rejected() {
        let event = json!({"id": "e1"});
        assert!(convert_event_format(&event, "calendar", "kanban").is_none());
        assert!(convert_event_format(&json!("not an object"), "calendar", "task").is_none());
    }

    #[test]
    fn calendar_to_task_derives_duration() {
        let event = json!({
            "id": "e1",
            "title": "Planning",
            "start": "2024-05-01T10:00:00Z",
            "end": "2024-05-01T11:30:00Z",
        });

        let task = convert_event_format(&event, "calendar", "task").unwrap();
        assert_eq!(task["id"], json!("e1"));
        assert_eq!(task["title"], json!("Planning"));
        assert_eq!(task["due"], json!("2024-05-01T10:00:00Z"));
        assert_eq!(task["durationMinutes"], json!(90));
        assert_eq!(task["sourceFormat"], json!("calendar"));
    }

    #[test]
    fn unparseable_times_degrade_duration_to_null() {
        let event = json!({
            "id": "e1",
            "title": "Planning",
            "start": "whenever",
            "end": "2024-05-01T11:30:00Z",
        });

        let task = convert_event_format(&event, "calendar", "task").unwrap();
        assert_eq!(task["durationMinutes"], Value::Null);
        assert_eq!(task["due"], json!("whenever"));
    }

    #[test]
    fn task_to_calendar_reconstructs_the_end_time() {
        let task = json!({
            "id": "t1",
            "title": "Write report",
            "due": "2024-05-01T10:00:00Z",
            "durationMinutes": 45,
        });

        let event = convert_event_format(&task, "task", "calendar").unwrap();
        assert_eq!(event["start"], json!("2024-05-01T10:00:00Z"));
        assert_eq!(
            parse_event_instant(&event["end"]).unwrap(),
            parse_event_instant(&json!("2024-05-01T10:45:00Z")).unwrap()
        );
        assert_eq!(event["allDay"], json!(false));
    }

    #[test]
    fn task_without_duration_gets_a_null_end() {
        let task = json!({"id": "t1", "title": "Someday", "due": "2024-05-01"});

        let event = convert_event_format(&task, "task", "calendar").unwrap();
        assert_eq!(event["end"], Value::Null);
        assert_eq!(event["start"], json!("2024-05-01"));
    }

    #[test]
    fn missing_fields_convert_to_null_not_errors() {
        let task = convert_event_format(&json!({}), "calendar", "task").unwrap();
        assert_eq!(task["id"], Value::Null);
        assert_eq!(task["title"], Value::Null);
        assert_eq!(task["due"], Value::Null);
        assert_eq!(task["durationMinutes"], Value::Null);
    }
}
