//! FFI bindings for Synheart Relay
//!
//! C-compatible functions for hosts that own the real link transport and the
//! display. All functions take null-terminated C strings and return allocated
//! memory that must be freed by the caller using `relay_free_string`.
//!
//! The stateful Monitor API wraps a `SyncCoordinator` over an `OutboxLink`:
//! the host pushes received payloads in with `relay_monitor_receive`, which
//! delivers them through the link, and drains payloads to transmit with
//! `relay_monitor_drain_outbox`.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::alert::AlertPolicy;
use crate::config::SyncConfig;
use crate::coordinator::SyncCoordinator;
use crate::error::SyncError;
use crate::history::{HistoryAggregator, InMemorySource};
use crate::link::{Link, LinkMessage, OutboxLink, Payload};
use crate::types::{AlertDecision, DailyAverage, Sample, UiIntent};

// Thread-local storage for the last error message
thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

/// Helper to convert C string to Rust string
unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

/// Helper to convert Rust string to C string (caller must free)
fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// Serialize, or record the error and return NULL
fn json_to_cstr<T: serde::Serialize>(value: &T) -> *mut c_char {
    match serde_json::to_string(value) {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

fn parse_now(now: Option<String>) -> Result<DateTime<Utc>, SyncError> {
    match now {
        None => Ok(Utc::now()),
        Some(s) => DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| SyncError::ConfigError(format!("invalid 'now' instant: {}", e))),
    }
}

fn daily_averages(
    samples_json: &str,
    window_days: i32,
    now: Option<String>,
) -> Result<Vec<DailyAverage>, SyncError> {
    let samples: Vec<Sample> = serde_json::from_str(samples_json)?;
    let window_days = u32::try_from(window_days)
        .map_err(|_| SyncError::ConfigError(format!("invalid window_days: {}", window_days)))?;
    HistoryAggregator::new(InMemorySource::new(samples))
        .compute_daily_averages_at(window_days, parse_now(now)?)
}

// ============================================================================
// Stateless API
// ============================================================================

/// Compute per-day averages from a JSON array of samples.
///
/// # Safety
/// - `samples_json` must be a valid null-terminated C string holding a JSON
///   array of `{"timestamp": RFC 3339, "bpm": number}` objects.
/// - `now` is an RFC 3339 instant closing the window, or NULL for the current time.
/// - Returns a JSON array of `{"day", "bpm"}` ascending by day, which must be
///   freed with `relay_free_string`.
/// - Returns NULL on error; call `relay_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn relay_daily_averages(
    samples_json: *const c_char,
    window_days: i32,
    now: *const c_char,
) -> *mut c_char {
    clear_last_error();

    let json_str = match cstr_to_string(samples_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid JSON string pointer");
            return ptr::null_mut();
        }
    };

    match daily_averages(&json_str, window_days, cstr_to_string(now)) {
        Ok(averages) => json_to_cstr(&averages),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Evaluate a heart rate against an alert threshold.
///
/// Returns 1 for a high heart rate, 0 otherwise, and -1 when the threshold is
/// not a positive number.
#[no_mangle]
pub extern "C" fn relay_alert_evaluate(bpm: f64, threshold_bpm: f64) -> i32 {
    clear_last_error();

    if !threshold_bpm.is_finite() || threshold_bpm <= 0.0 {
        set_last_error("Threshold must be a positive number");
        return -1;
    }

    match AlertPolicy::new(threshold_bpm).evaluate(&Sample::now(bpm)) {
        AlertDecision::HighHeartRate => 1,
        AlertDecision::None => 0,
    }
}

/// Decode a wire payload into a normalized message object.
///
/// # Safety
/// - `payload_json` must be a valid null-terminated C string.
/// - Returns `{"kind", "payload", "id"?, "sent_at"?}` as JSON, which must be
///   freed with `relay_free_string`.
/// - Returns NULL for malformed payloads; call `relay_last_error` for details.
#[no_mangle]
pub unsafe extern "C" fn relay_message_normalize(payload_json: *const c_char) -> *mut c_char {
    clear_last_error();

    let json_str = match cstr_to_string(payload_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid JSON string pointer");
            return ptr::null_mut();
        }
    };

    match LinkMessage::from_json(&json_str) {
        Ok(message) => json_to_cstr(&message),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Stateful Monitor API
// ============================================================================

/// Opaque handle to a Monitor endpoint
pub struct RelayMonitorHandle {
    coordinator: SyncCoordinator,
    link: OutboxLink,
    /// Payloads the link delivered, not yet handed to the coordinator
    inbox: Arc<Mutex<VecDeque<Payload>>>,
}

impl RelayMonitorHandle {
    fn new(coordinator: SyncCoordinator, link: OutboxLink) -> Self {
        let inbox = Arc::new(Mutex::new(VecDeque::new()));
        let sink = Arc::clone(&inbox);
        link.on_receive(Arc::new(move |payload| {
            sink.lock()
                .unwrap_or_else(|e| e.into_inner())
                .push_back(payload);
        }));
        Self {
            coordinator,
            link,
            inbox,
        }
    }

    fn receive(&mut self, payload: Payload) {
        self.link.deliver(payload);
        loop {
            let next = self.inbox.lock().unwrap_or_else(|e| e.into_inner()).pop_front();
            match next {
                Some(payload) => self.coordinator.handle_inbound(payload),
                None => break,
            }
        }
    }
}

/// Create a Monitor endpoint.
///
/// # Safety
/// - `config_json` is a `SyncConfig` JSON object, or NULL for defaults.
/// - Returns a pointer that must be freed with `relay_monitor_free`.
/// - Returns NULL on error; call `relay_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn relay_monitor_new(config_json: *const c_char) -> *mut RelayMonitorHandle {
    clear_last_error();

    let config = match cstr_to_string(config_json) {
        None => Ok(SyncConfig::default()),
        Some(json) => SyncConfig::from_json(&json),
    };

    let link = OutboxLink::new();
    let coordinator = match config.and_then(|c| SyncCoordinator::monitor(c, Arc::new(link.clone()))) {
        Ok(coordinator) => coordinator,
        Err(e) => {
            set_last_error(&e.to_string());
            return ptr::null_mut();
        }
    };

    Box::into_raw(Box::new(RelayMonitorHandle::new(coordinator, link)))
}

/// Free a Monitor endpoint.
///
/// # Safety
/// - `monitor` must be a valid pointer returned by `relay_monitor_new`, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn relay_monitor_free(monitor: *mut RelayMonitorHandle) {
    if !monitor.is_null() {
        drop(Box::from_raw(monitor));
    }
}

/// Signal that the host transport finished activating.
///
/// # Safety
/// - `monitor` must be a valid pointer returned by `relay_monitor_new`.
/// - Returns 0 on success, -1 on error.
#[no_mangle]
pub unsafe extern "C" fn relay_monitor_link_activated(monitor: *mut RelayMonitorHandle) -> i32 {
    clear_last_error();

    if monitor.is_null() {
        set_last_error("Null monitor pointer");
        return -1;
    }

    let handle = &mut *monitor;
    handle.link.activate();
    handle.coordinator.handle_link_activated();
    0
}

/// Hand a payload received by the host transport to the Monitor.
///
/// # Safety
/// - `monitor` must be a valid pointer returned by `relay_monitor_new`.
/// - `payload_json` must be a valid null-terminated C string.
/// - Returns 0 when the payload was accepted, -1 when it was rejected.
///   Rejected payloads leave the Monitor unchanged.
#[no_mangle]
pub unsafe extern "C" fn relay_monitor_receive(
    monitor: *mut RelayMonitorHandle,
    payload_json: *const c_char,
) -> i32 {
    clear_last_error();

    if monitor.is_null() {
        set_last_error("Null monitor pointer");
        return -1;
    }

    let handle = &mut *monitor;

    let json_str = match cstr_to_string(payload_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid JSON string pointer");
            return -1;
        }
    };

    let validated = serde_json::from_str::<Payload>(&json_str)
        .map_err(SyncError::from)
        .and_then(|payload| LinkMessage::from_payload(&payload).map(|_| payload));
    match validated {
        Ok(payload) => {
            handle.receive(payload);
            0
        }
        Err(e) => {
            log::warn!("Rejected payload from host: {}", e);
            set_last_error(&e.to_string());
            -1
        }
    }
}

/// Apply a button tap: "start", "stop" or "toggle".
///
/// # Safety
/// - `monitor` must be a valid pointer returned by `relay_monitor_new`.
/// - `intent` must be a valid null-terminated C string.
/// - Returns 0 on success, -1 on error.
#[no_mangle]
pub unsafe extern "C" fn relay_monitor_intent(
    monitor: *mut RelayMonitorHandle,
    intent: *const c_char,
) -> i32 {
    clear_last_error();

    if monitor.is_null() {
        set_last_error("Null monitor pointer");
        return -1;
    }

    let handle = &mut *monitor;

    let intent_str = match cstr_to_string(intent) {
        Some(s) => s,
        None => {
            set_last_error("Invalid intent string pointer");
            return -1;
        }
    };

    let result = serde_json::from_value::<UiIntent>(Value::String(intent_str))
        .map_err(SyncError::from)
        .and_then(|intent| handle.coordinator.handle_intent(intent));

    match result {
        Ok(()) => 0,
        Err(e) => {
            set_last_error(&e.to_string());
            -1
        }
    }
}

/// Take the payloads waiting to be transmitted, as a JSON array.
///
/// # Safety
/// - `monitor` must be a valid pointer returned by `relay_monitor_new`.
/// - Returns a newly allocated string that must be freed with `relay_free_string`.
/// - Returns NULL on error; call `relay_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn relay_monitor_drain_outbox(monitor: *mut RelayMonitorHandle) -> *mut c_char {
    clear_last_error();

    if monitor.is_null() {
        set_last_error("Null monitor pointer");
        return ptr::null_mut();
    }

    let handle = &*monitor;
    let payloads: Vec<Payload> = handle.link.drain_outbox();
    json_to_cstr(&payloads)
}

/// Replace the daily averages shown on the display.
///
/// # Safety
/// - `monitor` must be a valid pointer returned by `relay_monitor_new`.
/// - `averages_json` must be a JSON array as returned by `relay_daily_averages`.
/// - Returns 0 on success, -1 on error.
#[no_mangle]
pub unsafe extern "C" fn relay_monitor_set_history(
    monitor: *mut RelayMonitorHandle,
    averages_json: *const c_char,
) -> i32 {
    clear_last_error();

    if monitor.is_null() {
        set_last_error("Null monitor pointer");
        return -1;
    }

    let handle = &mut *monitor;

    let json_str = match cstr_to_string(averages_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid JSON string pointer");
            return -1;
        }
    };

    match serde_json::from_str::<Vec<DailyAverage>>(&json_str) {
        Ok(averages) => {
            handle.coordinator.set_daily_averages(averages);
            0
        }
        Err(e) => {
            set_last_error(&e.to_string());
            -1
        }
    }
}

/// Current display state as JSON.
///
/// # Safety
/// - `monitor` must be a valid pointer returned by `relay_monitor_new`.
/// - Returns a newly allocated string that must be freed with `relay_free_string`.
/// - Returns NULL on error; call `relay_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn relay_monitor_display(monitor: *mut RelayMonitorHandle) -> *mut c_char {
    clear_last_error();

    if monitor.is_null() {
        set_last_error("Null monitor pointer");
        return ptr::null_mut();
    }

    let handle = &*monitor;
    json_to_cstr(handle.coordinator.display())
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by Relay functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by a Relay function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn relay_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// Get the last error message.
///
/// # Safety
/// - Returns a pointer to a thread-local error string.
/// - The returned pointer is valid until the next Relay function call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn relay_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

/// Get the Relay library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn relay_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ButtonLabel, DisplayState};

    unsafe fn take_string(ptr: *mut c_char) -> String {
        assert!(!ptr.is_null());
        let s = CStr::from_ptr(ptr).to_str().unwrap().to_string();
        relay_free_string(ptr);
        s
    }

    unsafe fn last_error() -> String {
        let error = relay_last_error();
        assert!(!error.is_null());
        CStr::from_ptr(error).to_str().unwrap().to_string()
    }

    #[test]
    fn test_ffi_daily_averages() {
        let samples = CString::new(
            r#"[
                {"timestamp": "2024-03-01T08:00:00Z", "bpm": 70.0},
                {"timestamp": "2024-03-01T20:00:00Z", "bpm": 74.0},
                {"timestamp": "2024-03-03T12:00:00Z", "bpm": 65.0}
            ]"#,
        )
        .unwrap();
        let now = CString::new("2024-03-07T18:00:00Z").unwrap();

        unsafe {
            let result = take_string(relay_daily_averages(samples.as_ptr(), 7, now.as_ptr()));
            let averages: Vec<DailyAverage> = serde_json::from_str(&result).unwrap();
            assert_eq!(averages.len(), 2);
            assert_eq!(averages[0].bpm, 72.0);
        }
    }

    #[test]
    fn test_ffi_daily_averages_errors() {
        let samples = CString::new("not json").unwrap();
        unsafe {
            assert!(relay_daily_averages(samples.as_ptr(), 7, ptr::null()).is_null());
            assert!(!last_error().is_empty());

            let empty = CString::new("[]").unwrap();
            assert!(relay_daily_averages(empty.as_ptr(), -1, ptr::null()).is_null());
            assert!(relay_daily_averages(ptr::null(), 7, ptr::null()).is_null());

            assert!(relay_daily_averages(empty.as_ptr(), i32::MAX, ptr::null()).is_null());
            assert!(last_error().contains("window_days"));
        }
    }

    #[test]
    fn test_ffi_alert_evaluate() {
        assert_eq!(relay_alert_evaluate(195.0, 195.0), 1);
        assert_eq!(relay_alert_evaluate(194.9999, 195.0), 0);
        assert_eq!(relay_alert_evaluate(120.0, 0.0), -1);
    }

    #[test]
    fn test_ffi_message_normalize() {
        let payload = CString::new(r#"{"heartRate": "98"}"#).unwrap();
        let garbage = CString::new(r#"{"heartRate": 98}"#).unwrap();

        unsafe {
            let normalized = take_string(relay_message_normalize(payload.as_ptr()));
            let value: Value = serde_json::from_str(&normalized).unwrap();
            assert_eq!(value["kind"], "HeartRateUpdate");
            assert_eq!(value["payload"], "98");

            assert!(relay_message_normalize(garbage.as_ptr()).is_null());
            assert!(last_error().contains("Malformed"));
        }
    }

    #[test]
    fn test_ffi_monitor_lifecycle() {
        let start = CString::new("start").unwrap();
        let update = CString::new(r#"{"heartRate": "120", "sentAt": "2999-01-01T00:00:00Z"}"#)
            .unwrap();
        let stopped = CString::new(
            r#"{"stopButtonTappedFromWatch": "---", "sentAt": "2999-01-01T00:00:05Z"}"#,
        )
        .unwrap();

        unsafe {
            let monitor = relay_monitor_new(ptr::null());
            assert!(!monitor.is_null());

            assert_eq!(relay_monitor_intent(monitor, start.as_ptr()), 0);
            assert_eq!(take_string(relay_monitor_drain_outbox(monitor)), "[]");

            assert_eq!(relay_monitor_link_activated(monitor), 0);
            let sent: Vec<Payload> =
                serde_json::from_str(&take_string(relay_monitor_drain_outbox(monitor))).unwrap();
            assert_eq!(sent.len(), 1);
            assert!(sent[0].contains_key("startWorkout"));

            assert_eq!(relay_monitor_receive(monitor, update.as_ptr()), 0);
            let display: DisplayState =
                serde_json::from_str(&take_string(relay_monitor_display(monitor))).unwrap();
            assert_eq!(display.current_bpm, "120");
            assert_eq!(display.button_label, ButtonLabel::Stop);

            assert_eq!(relay_monitor_receive(monitor, stopped.as_ptr()), 0);
            let display: DisplayState =
                serde_json::from_str(&take_string(relay_monitor_display(monitor))).unwrap();
            assert_eq!(display, DisplayState::default());

            relay_monitor_free(monitor);
        }
    }

    #[test]
    fn test_ffi_monitor_rejects_bad_input() {
        let bad_payload = CString::new(r#"{"startWorkout": "a", "stopWorkout": "b"}"#).unwrap();
        let bad_intent = CString::new("pause").unwrap();
        let history = CString::new(r#"[{"day": "2024-03-01", "bpm": 72.0}]"#).unwrap();

        unsafe {
            let monitor = relay_monitor_new(ptr::null());

            assert_eq!(relay_monitor_receive(monitor, bad_payload.as_ptr()), -1);
            assert_eq!(relay_monitor_intent(monitor, bad_intent.as_ptr()), -1);
            assert_eq!(relay_monitor_link_activated(ptr::null_mut()), -1);

            assert_eq!(relay_monitor_set_history(monitor, history.as_ptr()), 0);
            let display: DisplayState =
                serde_json::from_str(&take_string(relay_monitor_display(monitor))).unwrap();
            assert_eq!(display.daily_averages.len(), 1);

            relay_monitor_free(monitor);
        }
    }

    #[test]
    fn test_ffi_monitor_receive_before_activation() {
        let update = CString::new(
            r#"{"heartRate": "88", "messageId": "6f9619ff-8b86-d011-b42d-00c04fc964ff"}"#,
        )
        .unwrap();

        unsafe {
            let monitor = relay_monitor_new(ptr::null());

            // Held by the coordinator until the link is up, then applied once
            assert_eq!(relay_monitor_receive(monitor, update.as_ptr()), 0);
            assert_eq!(relay_monitor_receive(monitor, update.as_ptr()), 0);
            let display: DisplayState =
                serde_json::from_str(&take_string(relay_monitor_display(monitor))).unwrap();
            assert_eq!(display, DisplayState::default());

            assert_eq!(relay_monitor_link_activated(monitor), 0);
            let display: DisplayState =
                serde_json::from_str(&take_string(relay_monitor_display(monitor))).unwrap();
            assert_eq!(display.current_bpm, "88");
            assert_eq!(display.button_label, ButtonLabel::Stop);

            relay_monitor_free(monitor);
        }
    }

    #[test]
    fn test_ffi_monitor_invalid_config() {
        let config = CString::new(r#"{"pending_message_limit": 0}"#).unwrap();
        unsafe {
            assert!(relay_monitor_new(config.as_ptr()).is_null());
            assert!(last_error().contains("pending_message_limit"));
        }
    }

    #[test]
    fn test_ffi_version() {
        unsafe {
            let version = relay_version();
            let version_str = CStr::from_ptr(version).to_str().unwrap();
            assert!(!version_str.is_empty());
        }
    }
}
