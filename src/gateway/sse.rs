use crate::session::FeedbackEvent;

/// Encode one event as an SSE frame: `event: <name>` plus JSON `data:`
/// lines. Each embedded newline must become its own `data:` line per the
/// SSE specification.
pub fn encode_event(event: &FeedbackEvent) -> String {
    let data = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    let payload: Vec<String> = data.lines().map(|line| format!("data: {line}")).collect();
    format!("event: {}\n{}\n\n", event.name(), payload.join("\n"))
}
