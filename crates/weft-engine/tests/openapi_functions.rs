use std::sync::Arc;

use serde_json::{json, Map, Value};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use weft_core::config::WeftConfig;
use weft_core::error::WeftError;
use weft_core::types::NodeContext;
use weft_engine::{FunctionDefinition, Runtime};

/// Starts a local HTTP server and returns its base URL.
///
/// `/fail...` answers 500, `/plain...` answers a non-JSON body, anything else
/// echoes the request back as `{method, target, headers, body}`.
async fn echo_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(respond(stream));
        }
    });
    format!("http://{addr}")
}

async fn respond(stream: TcpStream) {
    let mut reader = BufReader::new(stream);
    let mut request_line = String::new();
    reader.read_line(&mut request_line).await.unwrap();

    let mut headers = Map::new();
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), json!(value.trim()));
        }
    }
    let length = headers
        .get("content-length")
        .and_then(Value::as_str)
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let mut body = vec![0; length];
    reader.read_exact(&mut body).await.unwrap();

    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let target = parts.next().unwrap_or_default().to_string();
    let (status, payload) = if target.starts_with("/fail") {
        ("500 Internal Server Error", "upstream broke".to_string())
    } else if target.starts_with("/plain") {
        ("200 OK", "pong".to_string())
    } else {
        let echoed = json!({
            "method": method,
            "target": target,
            "headers": headers,
            "body": String::from_utf8_lossy(&body),
        });
        ("200 OK", echoed.to_string())
    };

    let response = format!(
        "HTTP/1.1 {status}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{payload}",
        payload.len()
    );
    let mut stream = reader.into_inner();
    stream.write_all(response.as_bytes()).await.unwrap();
    stream.shutdown().await.ok();
}

fn operation(base_url: &str, method: &str, path: &str, auth: Value) -> FunctionDefinition {
    let mut def = json!({
        "name": "api",
        "type": "openapi",
        "operation": {
            "method": method,
            "base_url": base_url,
            "path": path,
            "headers": {"x-client": "weft-tests"},
        },
    });
    if !auth.is_null() {
        def["auth"] = auth;
    }
    serde_json::from_value(def).unwrap()
}

async fn call(def: &FunctionDefinition, arguments: Value) -> Result<Value, WeftError> {
    let rt: Arc<Runtime> = Runtime::builder(WeftConfig::default()).build().unwrap();
    def.invoke(&rt, arguments, NodeContext::new("exec", "wf", "think")).await
}

#[tokio::test]
async fn get_sends_remaining_arguments_as_query() {
    let base = echo_server().await;
    let def = operation(&base, "get", "/users/{id}", Value::Null);

    let echoed = call(&def, json!({"id": 42, "limit": 5, "q": "rust"})).await.unwrap();
    assert_eq!(echoed["method"], json!("GET"));
    assert_eq!(echoed["target"], json!("/users/42?limit=5&q=rust"));
    assert_eq!(echoed["body"], json!(""));
    assert_eq!(echoed["headers"]["x-client"], json!("weft-tests"));
}

#[tokio::test]
async fn delete_also_uses_the_query_string() {
    let base = echo_server().await;
    let def = operation(&base, "DELETE", "/users/{id}", Value::Null);

    let echoed = call(&def, json!({"id": "a b", "hard": true})).await.unwrap();
    assert_eq!(echoed["method"], json!("DELETE"));
    assert_eq!(echoed["target"], json!("/users/a%20b?hard=true"));
}

#[tokio::test]
async fn post_sends_remaining_arguments_as_json_body() {
    let base = echo_server().await;
    let def = operation(&base, "post", "/orgs/{org}/users", Value::Null);

    let echoed = call(&def, json!({"org": "acme", "name": "Ada", "admin": false}))
        .await
        .unwrap();
    assert_eq!(echoed["method"], json!("POST"));
    assert_eq!(echoed["target"], json!("/orgs/acme/users"));
    assert_eq!(echoed["headers"]["content-type"], json!("application/json"));
    let body: Value = serde_json::from_str(echoed["body"].as_str().unwrap()).unwrap();
    assert_eq!(body, json!({"name": "Ada", "admin": false}));
}

#[tokio::test]
async fn auth_kinds_set_their_headers() {
    let base = echo_server().await;

    let bearer = operation(&base, "get", "/me", json!({"type": "bearer", "token": "tok-1"}));
    let echoed = call(&bearer, json!({})).await.unwrap();
    assert_eq!(echoed["headers"]["authorization"], json!("Bearer tok-1"));

    let api_key = operation(
        &base,
        "get",
        "/me",
        json!({"type": "api_key", "header": "X-Api-Key", "value": "k-2"}),
    );
    let echoed = call(&api_key, json!({})).await.unwrap();
    assert_eq!(echoed["headers"]["x-api-key"], json!("k-2"));
    assert!(echoed["headers"].get("authorization").is_none());

    let basic = operation(
        &base,
        "get",
        "/me",
        json!({"type": "basic", "username": "ada", "password": "secret"}),
    );
    let echoed = call(&basic, json!({})).await.unwrap();
    assert_eq!(echoed["headers"]["authorization"], json!("Basic YWRhOnNlY3JldA=="));
}

#[tokio::test]
async fn error_status_fails_the_call() {
    let base = echo_server().await;
    let def = operation(&base, "get", "/fail", Value::Null);

    let err = call(&def, json!({})).await.unwrap_err();
    match err {
        WeftError::ToolExecution { tool, message } => {
            assert_eq!(tool, "api");
            assert!(message.contains("HTTP 500"), "{message}");
            assert!(message.contains("upstream broke"), "{message}");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn non_json_body_is_returned_as_text() {
    let base = echo_server().await;
    let def = operation(&base, "get", "/plain", Value::Null);

    assert_eq!(call(&def, Value::Null).await.unwrap(), json!("pong"));
}

#[tokio::test]
async fn non_object_arguments_are_rejected() {
    let base = echo_server().await;
    let def = operation(&base, "get", "/users", Value::Null);

    let err = call(&def, json!([1, 2])).await.unwrap_err();
    assert!(matches!(err, WeftError::ToolExecution { .. }));
}
