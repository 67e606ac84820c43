// ABOUTME: Shared utility functions for Automa
// ABOUTME: Prefixed ID generation and output truncation

use rand::Rng;

const CHARSET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const ID_LEN: usize = 16;

/// Generate a prefixed random ID such as `job_3k9x0c1m2a8zq7we`
pub fn generate_id(prefix: &str) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..ID_LEN)
        .map(|_| {
            let idx = rng.gen_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect();
    format!("{}_{}", prefix, suffix)
}

/// Truncate a string to at most `max_bytes`, respecting char boundaries.
/// Appends a marker when anything was cut.
pub fn truncate(value: &str, max_bytes: usize) -> String {
    if value.len() <= max_bytes {
        return value.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !value.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n[truncated {} bytes]", &value[..end], value.len() - end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_id_format() {
        let id = generate_id("job");
        assert!(id.starts_with("job_"));
        assert_eq!(id.len(), "job_".len() + ID_LEN);
        assert!(id[4..].chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_generate_id_unique() {
        let a = generate_id("exec");
        let b = generate_id("exec");
        assert_ne!(a, b);
    }

    #[test]
    fn test_truncate_short_value_unchanged() {
        assert_eq!(truncate("hello", 10), "hello");
    }

    #[test]
    fn test_truncate_respects_char_boundary() {
        // "é" is two bytes; cutting at 1 must back off to 0
        let out = truncate("éa", 1);
        assert!(out.starts_with("\n[truncated"));
    }
}
