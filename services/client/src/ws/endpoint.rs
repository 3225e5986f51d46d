/// Path of the streaming chat endpoint, relative to the backend root.
pub const CHAT_PATH: &str = "/v1/ws/chat";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EndpointError {
    #[error("Unsupported scheme in '{0}' (expected http, https, ws or wss)")]
    UnsupportedScheme(String),
    #[error("No host in '{0}'")]
    MissingHost(String),
}

/// Builds the chat websocket address from an HTTP(S) base address.
///
/// `http` becomes `ws` and `https` becomes `wss`; trailing slashes are
/// dropped before [`CHAT_PATH`] is appended.
pub fn chat_endpoint(base: &str) -> Result<String, EndpointError> {
    let trimmed = base.trim();
    let (scheme, rest) = trimmed
        .split_once("://")
        .ok_or_else(|| EndpointError::UnsupportedScheme(base.to_string()))?;

    let ws_scheme = match scheme.to_ascii_lowercase().as_str() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        _ => return Err(EndpointError::UnsupportedScheme(base.to_string())),
    };

    let rest = rest.trim_end_matches('/');
    if rest.is_empty() || rest.starts_with('/') {
        return Err(EndpointError::MissingHost(base.to_string()));
    }

    Ok(format!("{ws_scheme}://{rest}{CHAT_PATH}"))
}
