use getrandom::getrandom;

const BASE36_ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const RANDOM_SUFFIX_CHARS: usize = 10;

pub fn validate_identifier_value(kind: &str, value: &str) -> Result<(), String> {
    if value.is_empty() {
        return Err(format!("{kind} must be non-empty"));
    }
    if value
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
    {
        return Ok(());
    }
    Err(format!(
        "{kind} must use only ASCII letters, digits, '-' or '_'"
    ))
}

/// Builds `<prefix>-<base36 millis>-<random>`; ids sort roughly by creation time.
pub fn generate_id(prefix: &str, now_millis: i64) -> Result<String, getrandom::Error> {
    let mut bytes = [0_u8; RANDOM_SUFFIX_CHARS];
    getrandom(&mut bytes)?;
    let suffix = bytes
        .iter()
        .map(|byte| BASE36_ALPHABET[(*byte % 36) as usize] as char)
        .collect::<String>();
    let ts = base36_encode_u64(u64::try_from(now_millis).unwrap_or(0));
    Ok(format!("{prefix}-{ts}-{suffix}"))
}

fn base36_encode_u64(mut value: u64) -> String {
    if value == 0 {
        return "0".to_string();
    }
    let mut chars = Vec::new();
    while value > 0 {
        chars.push(BASE36_ALPHABET[(value % 36) as usize] as char);
        value /= 36;
    }
    chars.iter().rev().collect()
}
