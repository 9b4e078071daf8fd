#![allow(clippy::unwrap_used, clippy::expect_used)]

use mcphub_core::*;

// ---------------------------------------------------------------------------
// 1. ServerState snapshot serialization
// ---------------------------------------------------------------------------

#[test]
fn server_state_serializes_for_api_consumers() {
    let mut state = ServerState::new("serverA", TransportKind::Stdio, ServerStatus::Connecting)
        .transition(ServerStatus::Connected);
    state.capabilities.prompts.push(PromptDescriptor {
        name: "summarize".to_string(),
        description: Some("Summarize a document".to_string()),
        arguments: vec![PromptArgument {
            name: "path".to_string(),
            description: None,
            required: true,
        }],
    });
    state.server_info = Some(ServerInfo {
        name: "fs-server".to_string(),
        version: "1.2.0".to_string(),
    });

    let json = serde_json::to_value(&state).unwrap();
    assert_eq!(json["name"], "serverA");
    assert_eq!(json["status"], "connected");
    assert_eq!(json["transport"], "stdio");
    assert_eq!(json["disabled"], false);
    assert_eq!(json["capabilities"]["prompts"][0]["name"], "summarize");
    assert_eq!(
        json["capabilities"]["prompts"][0]["arguments"][0]["required"],
        true
    );
    assert_eq!(json["server_info"]["version"], "1.2.0");
}

// ---------------------------------------------------------------------------
// 2. Resource descriptors accept the wire format
// ---------------------------------------------------------------------------

#[test]
fn resource_descriptor_wire_format() {
    let res: ResourceDescriptor = serde_json::from_str(
        r#"{"uri":"file:///tmp/a.txt","name":"a.txt","mimeType":"text/plain"}"#,
    )
    .unwrap();
    assert_eq!(res.uri, "file:///tmp/a.txt");
    assert_eq!(res.mime_type.as_deref(), Some("text/plain"));
    assert!(res.description.is_none());

    let back = serde_json::to_value(&res).unwrap();
    assert_eq!(back["mimeType"], "text/plain");
    assert!(back.get("description").is_none());
}

// ---------------------------------------------------------------------------
// 3. Error taxonomy
// ---------------------------------------------------------------------------

#[test]
fn error_kinds_are_stable() {
    let cases: Vec<(HubError, &str)> = vec![
        (HubError::config("a.json", "bad"), "config"),
        (HubError::Transport("closed".into()), "transport"),
        (HubError::persistence("a.json", "read-only"), "persistence"),
        (HubError::Protocol("no result".into()), "protocol"),
        (HubError::UnknownServer("x".into()), "unknown_server"),
    ];
    for (err, kind) in cases {
        assert_eq!(err.kind(), kind, "{err}");
    }
}

#[test]
fn io_and_json_errors_convert() {
    let io: HubError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
    assert!(io.to_string().contains("gone"));
    assert!(io.is_recoverable());

    let json: HubError = serde_json::from_str::<serde_json::Value>("{").unwrap_err().into();
    assert_eq!(json.kind(), "json");
}
