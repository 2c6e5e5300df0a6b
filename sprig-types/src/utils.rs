use std::time::{SystemTime, UNIX_EPOCH};

/// Get the current unix timestamp in milliseconds
pub fn timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}

/// Validate a group, node, device or metric name for use in a topic
pub fn validate_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("name must not be empty".into());
    }
    for c in name.chars() {
        if matches!(c, '+' | '/' | '#') {
            return Err(format!(
                "name {name} cannot contain '+', '/' or '#' characters"
            ));
        }
    }
    Ok(())
}
