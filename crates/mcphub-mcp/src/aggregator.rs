//! Capability discovery: fetches a connected server's tools, resources and
//! prompts and normalizes them into one [`Capabilities`] value.

use crate::protocol::ServerCapabilities;
use crate::session::McpSession;
use async_trait::async_trait;
use mcphub_core::{
    Capabilities, HubError, HubResult, PromptDescriptor, ResourceDescriptor, ToolDescriptor,
};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Stop following `nextCursor` after this many pages.
pub const MAX_PAGES: usize = 100;

/// Anything that can answer MCP list requests.
#[async_trait]
pub trait ListSource: Send + Sync {
    /// One JSON-RPC round-trip.
    async fn request(&self, method: &str, params: Option<Value>) -> HubResult<Value>;
}

#[async_trait]
impl ListSource for McpSession {
    async fn request(&self, method: &str, params: Option<Value>) -> HubResult<Value> {
        McpSession::request(self, method, params).await
    }
}

/// Fetch every advertised capability list.
///
/// Lists the server did not advertise are left empty. The result is only
/// returned once every list is complete.
pub async fn fetch_capabilities(
    source: &dyn ListSource,
    advertised: &ServerCapabilities,
) -> HubResult<Capabilities> {
    let mut caps = Capabilities::default();
    if advertised.tools.is_some() {
        caps.tools = list_all::<ToolDescriptor>(source, "tools/list", "tools").await?;
    }
    if advertised.resources.is_some() {
        caps.resources = list_all::<ResourceDescriptor>(source, "resources/list", "resources").await?;
    }
    if advertised.prompts.is_some() {
        caps.prompts = list_all::<PromptDescriptor>(source, "prompts/list", "prompts").await?;
    }
    Ok(caps)
}

async fn list_all<T: DeserializeOwned>(
    source: &dyn ListSource,
    method: &str,
    key: &str,
) -> HubResult<Vec<T>> {
    let mut items = Vec::new();
    let mut cursor: Option<String> = None;

    for _ in 0..MAX_PAGES {
        let params = cursor.take().map(|c| serde_json::json!({ "cursor": c }));
        let result = source.request(method, params).await?;

        let Value::Object(mut page) = result else {
            return Err(HubError::Protocol(format!("{method} result is not an object")));
        };
        let entries = match page.remove(key) {
            Some(Value::Array(entries)) => entries,
            Some(_) => {
                return Err(HubError::Protocol(format!("{method} '{key}' is not an array")))
            }
            None => Vec::new(),
        };
        for entry in entries {
            let item = serde_json::from_value::<T>(entry)
                .map_err(|e| HubError::Protocol(format!("Malformed {method} entry: {e}")))?;
            items.push(item);
        }

        match page.remove("nextCursor") {
            Some(Value::String(next)) if !next.is_empty() => cursor = Some(next),
            _ => return Ok(items),
        }
    }

    tracing::warn!(method, pages = MAX_PAGES, "Page limit reached, list truncated");
    Ok(items)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    /// Serves canned pages keyed by method and cursor.
    struct Pages {
        calls: Mutex<Vec<(String, Option<Value>)>>,
        respond: fn(&str, Option<&Value>) -> Value,
    }

    #[async_trait]
    impl ListSource for Pages {
        async fn request(&self, method: &str, params: Option<Value>) -> HubResult<Value> {
            let reply = (self.respond)(method, params.as_ref());
            self.calls.lock().push((method.to_string(), params));
            Ok(reply)
        }
    }

    fn pages(respond: fn(&str, Option<&Value>) -> Value) -> Pages {
        Pages {
            calls: Mutex::new(Vec::new()),
            respond,
        }
    }

    fn everything() -> ServerCapabilities {
        ServerCapabilities {
            tools: Some(json!({})),
            resources: Some(json!({})),
            prompts: Some(json!({})),
        }
    }

    #[tokio::test]
    async fn test_follows_next_cursor() {
        let source = pages(|method, params| match (method, params) {
            ("tools/list", None) => json!({
                "tools": [{"name": "read_file", "description": "Read a file"}],
                "nextCursor": "p2"
            }),
            ("tools/list", Some(_)) => json!({"tools": [{"name": "write_file"}]}),
            ("resources/list", _) => json!({"resources": [{"uri": "file:///a", "name": "a", "mimeType": "text/plain"}]}),
            _ => json!({"prompts": [{"name": "review", "arguments": [{"name": "diff", "required": true}]}]}),
        });

        let caps = fetch_capabilities(&source, &everything()).await.unwrap();
        let names: Vec<_> = caps.tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["read_file", "write_file"]);
        assert_eq!(caps.tools[1].description, "");
        assert_eq!(caps.resources[0].mime_type.as_deref(), Some("text/plain"));
        assert!(caps.prompts[0].arguments[0].required);

        let calls = source.calls.lock();
        assert_eq!(calls[1].1, Some(json!({"cursor": "p2"})));
    }

    #[tokio::test]
    async fn test_only_advertised_lists_are_fetched() {
        let source = pages(|_, _| json!({"tools": []}));
        let advertised = ServerCapabilities {
            tools: Some(json!({"listChanged": true})),
            ..Default::default()
        };
        let caps = fetch_capabilities(&source, &advertised).await.unwrap();
        assert!(caps.is_empty());
        let calls = source.calls.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "tools/list");
    }

    #[tokio::test]
    async fn test_malformed_payload_is_protocol_error() {
        let source = pages(|_, _| json!({"tools": [{"description": "no name"}]}));
        let err = fetch_capabilities(&source, &everything()).await.unwrap_err();
        assert_eq!(err.kind(), "protocol");

        let source = pages(|_, _| json!({"tools": "nope"}));
        let err = fetch_capabilities(&source, &everything()).await.unwrap_err();
        assert_eq!(err.kind(), "protocol");
    }
}
