//! Store key layout. Every key lives under the `cadence:` prefix.

const PREFIX: &str = "cadence:";

/// Set of every registered loop id.
pub const LOOP_INDEX: &str = "cadence:loop:index";

/// Sorted set of execution ids scored by start time (epoch millis).
pub const EXEC_INDEX: &str = "cadence:loop:exec:index";

pub fn loop_def(id: &str) -> String {
    format!("{PREFIX}loop:def:{id}")
}

/// Start time of the loop's latest run, RFC 3339. Written only by
/// `record_run`, so definition edits never race with it.
pub fn loop_last_run(id: &str) -> String {
    format!("{PREFIX}loop:last_run:{id}")
}

pub fn exec_log(exec_id: &str) -> String {
    format!("{PREFIX}loop:exec:{exec_id}")
}

pub fn exec_trace(exec_id: &str) -> String {
    format!("{PREFIX}loop:trace:{exec_id}")
}

pub fn lease(loop_id: &str) -> String {
    format!("{PREFIX}loop:lease:{loop_id}")
}

/// Glob matching every execution log key of `loop_id`. Glob metacharacters
/// in the id are escaped.
pub fn exec_log_pattern(loop_id: &str) -> String {
    let mut escaped = String::with_capacity(loop_id.len());
    for c in loop_id.chars() {
        match c {
            '*' | '?' | '[' | ']' => {
                escaped.push('[');
                escaped.push(c);
                escaped.push(']');
            }
            _ => escaped.push(c),
        }
    }
    format!("{PREFIX}loop:exec:{escaped}-*")
}
