//! Validated server configuration entries.
//!
//! Raw JSON entries are loosely shaped; they are validated here into the
//! closed [`TransportSpec`] union so that nothing downstream ever has to
//! guess which transport an entry means.

use crate::interpolate::interpolate;
use indexmap::IndexMap;
use mcphub_core::{HubError, HubResult, TransportKind};
use serde::Deserialize;
use std::path::Path;

/// How to reach a downstream server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportSpec {
    /// Spawn a local process and speak over its stdio.
    Process {
        /// Program to run, looked up on `PATH`.
        command: String,
        /// Arguments, already interpolated.
        args: Vec<String>,
        /// Extra environment, already interpolated.
        env: IndexMap<String, String>,
    },
    /// Connect to a remote streamable-HTTP endpoint.
    Http {
        /// Endpoint every frame is POSTed to.
        url: String,
        /// Extra request headers, already interpolated.
        headers: IndexMap<String, String>,
    },
    /// A declared transport type the hub does not implement.
    Unsupported {
        /// The `type` as written in the source.
        kind: String,
    },
}

impl TransportSpec {
    /// The transport family this spec selects.
    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Process { .. } => TransportKind::Stdio,
            Self::Http { .. } => TransportKind::Http,
            Self::Unsupported { .. } => TransportKind::Unsupported,
        }
    }
}

/// A single named server's configuration record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfigEntry {
    /// Key under `mcpServers`.
    pub name: String,
    /// How to reach the server.
    pub transport: TransportSpec,
    /// Parked until explicitly enabled.
    pub disabled: bool,
}

impl ServerConfigEntry {
    /// Same entry with a different `disabled` flag.
    pub fn with_disabled(&self, disabled: bool) -> Self {
        Self {
            disabled,
            ..self.clone()
        }
    }

    /// Whether two entries differ in anything other than `disabled`.
    pub fn transport_differs(&self, other: &Self) -> bool {
        self.transport != other.transport
    }
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: IndexMap<String, String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    headers: IndexMap<String, String>,
    #[serde(default)]
    disabled: bool,
}

/// An entry that validated, plus any `${VAR}` names that were not set.
#[derive(Debug, Clone)]
pub struct ParsedEntry {
    /// The validated entry.
    pub entry: ServerConfigEntry,
    /// Placeholders left as written because the variable was unset.
    pub unresolved: Vec<String>,
}

/// Validate one raw JSON entry from `source`.
pub fn parse_entry(
    source: &Path,
    name: &str,
    value: &serde_json::Value,
) -> HubResult<ParsedEntry> {
    if name.trim().is_empty() {
        return Err(HubError::config_entry(source, name, "server name is empty"));
    }
    let raw: RawEntry = serde_json::from_value(value.clone())
        .map_err(|e| HubError::config_entry(source, name, e.to_string()))?;

    let kind = match raw.kind.as_deref().map(str::to_ascii_lowercase) {
        Some(kind) => kind,
        None => match (&raw.command, &raw.url) {
            (Some(_), Some(_)) => {
                return Err(HubError::config_entry(
                    source,
                    name,
                    "entry sets both 'command' and 'url'; add a 'type' to disambiguate",
                ))
            }
            (Some(_), None) => "stdio".to_string(),
            (None, Some(_)) => "http".to_string(),
            (None, None) => {
                return Err(HubError::config_entry(
                    source,
                    name,
                    "entry needs either 'command' (stdio) or 'url' (http)",
                ))
            }
        },
    };

    let mut unresolved = Vec::new();
    let transport = match kind.as_str() {
        "stdio" | "process" => {
            let command = raw
                .command
                .filter(|c| !c.trim().is_empty())
                .ok_or_else(|| HubError::config_entry(source, name, "stdio entry needs a non-empty 'command'"))?;
            let env = resolve_map(raw.env, &mut unresolved);
            TransportSpec::Process {
                command,
                args: raw.args,
                env,
            }
        }
        "http" | "streamable-http" | "streamable_http" | "streamablehttp" => {
            let url = raw
                .url
                .ok_or_else(|| HubError::config_entry(source, name, "http entry needs a 'url'"))?;
            let resolved = interpolate(&url);
            unresolved.extend(resolved.unresolved);
            if !(resolved.value.starts_with("http://") || resolved.value.starts_with("https://")) {
                return Err(HubError::config_entry(
                    source,
                    name,
                    format!("url '{}' is not an http(s) URL", resolved.value),
                ));
            }
            let headers = resolve_map(raw.headers, &mut unresolved);
            TransportSpec::Http {
                url: resolved.value,
                headers,
            }
        }
        other => TransportSpec::Unsupported {
            kind: other.to_string(),
        },
    };

    Ok(ParsedEntry {
        entry: ServerConfigEntry {
            name: name.to_string(),
            transport,
            disabled: raw.disabled,
        },
        unresolved,
    })
}

fn resolve_map(
    map: IndexMap<String, String>,
    unresolved: &mut Vec<String>,
) -> IndexMap<String, String> {
    map.into_iter()
        .map(|(key, value)| {
            let resolved = interpolate(&value);
            for var in resolved.unresolved {
                if !unresolved.contains(&var) {
                    unresolved.push(var);
                }
            }
            (key, resolved.value)
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: serde_json::Value) -> HubResult<ParsedEntry> {
        parse_entry(Path::new("test.json"), "srv", &value)
    }

    #[test]
    fn test_command_infers_stdio() {
        let parsed = parse(json!({"command": "npx", "args": ["-y", "server-fs"]})).unwrap();
        assert_eq!(parsed.entry.transport.kind(), TransportKind::Stdio);
        assert!(!parsed.entry.disabled);
        match parsed.entry.transport {
            TransportSpec::Process { command, args, .. } => {
                assert_eq!(command, "npx");
                assert_eq!(args, vec!["-y", "server-fs"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_url_infers_http_and_keeps_header_order() {
        let parsed = parse(json!({
            "url": "https://mcp.example.com/mcp",
            "headers": {"X-B": "2", "X-A": "1"},
            "disabled": true
        }))
        .unwrap();
        assert!(parsed.entry.disabled);
        match parsed.entry.transport {
            TransportSpec::Http { headers, .. } => {
                let keys: Vec<_> = headers.keys().cloned().collect();
                assert_eq!(keys, vec!["X-B", "X-A"]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_ambiguous_and_empty_entries_rejected() {
        let both = parse(json!({"command": "x", "url": "http://a"})).unwrap_err();
        assert!(both.to_string().contains("both"));
        let neither = parse(json!({"args": []})).unwrap_err();
        assert!(neither.to_string().contains("either"));
        let not_object = parse(json!("npx server")).unwrap_err();
        assert_eq!(not_object.kind(), "config");
    }

    #[test]
    fn test_explicit_type_overrides_inference() {
        let parsed = parse(json!({"type": "stdio", "command": "x", "url": "http://a"})).unwrap();
        assert_eq!(parsed.entry.transport.kind(), TransportKind::Stdio);
    }

    #[test]
    fn test_unknown_type_is_kept_as_unsupported() {
        let parsed = parse(json!({"type": "sse", "url": "http://a/sse"})).unwrap();
        assert_eq!(
            parsed.entry.transport,
            TransportSpec::Unsupported { kind: "sse".into() }
        );
    }

    #[test]
    fn test_non_http_url_rejected() {
        let err = parse(json!({"url": "ftp://files"})).unwrap_err();
        assert!(err.to_string().contains("not an http"));
    }

    #[test]
    fn test_unset_header_variable_reported() {
        let parsed = parse(json!({
            "url": "http://localhost:9000/mcp",
            "headers": {"Authorization": "Bearer ${MCPHUB_TEST_SURELY_UNSET_VAR}"}
        }))
        .unwrap();
        assert_eq!(parsed.unresolved, vec!["MCPHUB_TEST_SURELY_UNSET_VAR"]);
        match parsed.entry.transport {
            TransportSpec::Http { headers, .. } => {
                assert_eq!(headers["Authorization"], "Bearer ");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
