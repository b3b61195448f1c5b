// Session blob helpers: the `k=v; k=v` strings that stand in for a
// browser cookie jar.

use crate::error::Error;

/// Keys a blob must carry before the store accepts it.
pub const REQUIRED_KEYS: [&str; 2] = ["c_user", "xs"];

/// Keys emitted first, in this order, when composing a blob.
pub const PRIORITY_KEYS: [&str; 5] = ["c_user", "xs", "fr", "datr", "sb"];

/// Sentinel stored when no derived token could be obtained.
pub const NO_TOKEN: &str = "N/A";

/// Ordered cookie collection. Re-inserting a key replaces its value in
/// place so arrival order is kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieJar {
    pairs: Vec<(String, String)>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(blob: &str) -> Self {
        let mut jar = Self::new();
        for part in blob.split(';') {
            if let Some((k, v)) = part.trim().split_once('=') {
                let k = k.trim();
                if !k.is_empty() {
                    jar.insert(k, v.trim());
                }
            }
        }
        jar
    }

    pub fn insert(&mut self, key: &str, value: &str) {
        match self.pairs.iter_mut().find(|(k, _)| k == key) {
            Some(slot) => slot.1 = value.to_string(),
            None => self.pairs.push((key.to_string(), value.to_string())),
        }
    }

    pub fn extend<I, K, V>(&mut self, iter: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (k, v) in iter {
            self.insert(k.as_ref(), v.as_ref());
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Render as a blob: priority keys first, then the rest in arrival order.
    pub fn compose(&self) -> String {
        let mut parts: Vec<String> = PRIORITY_KEYS
            .iter()
            .filter_map(|key| self.get(key).map(|v| format!("{key}={v}")))
            .collect();
        parts.extend(
            self.pairs
                .iter()
                .filter(|(k, _)| !PRIORITY_KEYS.contains(&k.as_str()))
                .map(|(k, v)| format!("{k}={v}")),
        );
        parts.join("; ")
    }
}

/// Check a blob for the required keys and return its remote user id.
pub fn validate(blob: &str) -> Result<String, Error> {
    let blob = blob.trim();
    if blob.is_empty() {
        return Err(Error::Validation("Session cannot be empty".into()));
    }
    let jar = CookieJar::parse(blob);
    for key in REQUIRED_KEYS {
        if jar.get(key).map_or(true, str::is_empty) {
            return Err(Error::Validation(format!("Invalid session: missing {key}")));
        }
    }
    let user_id = jar.get("c_user").unwrap_or_default();
    if !user_id.chars().all(|c| c.is_ascii_digit()) {
        return Err(Error::Validation("Invalid session: c_user is not numeric".into()));
    }
    Ok(user_id.to_string())
}

/// Best-effort display name carried inside the blob itself.
pub fn name_hint(blob: &str) -> Option<String> {
    CookieJar::parse(blob)
        .get("name")
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Mask a login identifier for the audit log. Numeric ids keep two
/// characters on each side, emails keep three.
pub fn mask_identifier(identifier: &str) -> String {
    let chars: Vec<char> = identifier.chars().collect();
    let numeric = !chars.is_empty() && chars.iter().all(char::is_ascii_digit);
    let keep = if numeric { 2 } else { 3 };
    let masked = if chars.len() <= keep * 2 {
        "*".repeat(chars.len())
    } else {
        let head: String = chars[..keep].iter().collect();
        let tail: String = chars[chars.len() - keep..].iter().collect();
        format!("{head}{}{tail}", "*".repeat(chars.len() - keep * 2))
    };
    if numeric {
        format!("UID:{masked}")
    } else {
        masked
    }
}

/// Shorten a long secret for on-screen display.
pub fn abbreviate(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if secret.is_empty() {
        NO_TOKEN.to_string()
    } else if chars.len() > 30 {
        let head: String = chars[..20].iter().collect();
        let tail: String = chars[chars.len() - 10..].iter().collect();
        format!("{head}...{tail}")
    } else {
        secret.to_string()
    }
}
