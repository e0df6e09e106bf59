use crate::api::types::MessagesRequest;
use once_cell::sync::Lazy;
use regex::Regex;

static SESSION_ID: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"_session_([A-Za-z0-9._-]+)").ok());

/// Session id carried in `metadata.user_id`, e.g. `user_abc_account__session_1234`.
pub fn session_id(request: &MessagesRequest) -> Option<String> {
    let user_id = request
        .metadata
        .as_ref()?
        .get("user_id")?
        .as_str()?;

    let regex = SESSION_ID.as_ref()?;
    regex
        .captures(user_id)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}
