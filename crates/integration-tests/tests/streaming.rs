mod harness;

use harness::fixture::{Fixture, parse_sse, streamed_text};
use harness::mock_vendor::MockVendor;
use switchboard_llm::{ChatRequest, LlmError, Message, Role};
use tokio_util::sync::CancellationToken;

fn streaming(model: &str) -> ChatRequest {
    ChatRequest::new(model, vec![Message::text(Role::User, "Hello")]).streaming(true)
}

#[tokio::test]
async fn openai_stream_is_written_as_sse() {
    let mock = MockVendor::start_with_response("one two three").await.unwrap();
    let fixture = Fixture::new();
    fixture.openai_credential("openai", "dev-a", "sk-test", &mock.base_url());
    let mut output = Vec::new();

    let result = fixture
        .dispatcher("development")
        .dispatch(&streaming("gpt-4o"), Some(&mut output))
        .await
        .unwrap();

    assert!(result.is_none());
    let (frames, done) = parse_sse(&output);
    assert!(done, "stream ends with [DONE]");
    assert_eq!(streamed_text(&frames), "one two three ");

    let id = frames[0]["id"].as_str().unwrap();
    assert!(id.starts_with("chatcmpl-"));
    for frame in &frames {
        assert_eq!(frame["object"], "chat.completion.chunk");
        assert_eq!(frame["id"], id);
        assert_eq!(frame["created"], frames[0]["created"]);
        assert_eq!(frame["model"], "gpt-4o");
    }

    assert!(
        frames
            .iter()
            .any(|f| f.pointer("/choices/0/finish_reason") == Some(&serde_json::json!("stop")))
    );
    assert!(frames.iter().any(|f| f["usage"]["total_tokens"] == 15));
}

#[tokio::test]
async fn streamed_tool_calls_keep_their_index() {
    let mock = MockVendor::start().await.unwrap();
    let fixture = Fixture::new();
    fixture.openai_credential("openai", "dev-a", "sk-test", &mock.base_url());

    let mut request = streaming("gpt-4o");
    request.tools = Some(vec![switchboard_llm::types::ToolDefinition::function(
        "get_weather",
        Some("Get current weather".to_owned()),
        Some(serde_json::json!({"type": "object"})),
    )]);
    let mut output = Vec::new();

    fixture
        .dispatcher("development")
        .dispatch(&request, Some(&mut output))
        .await
        .unwrap();

    let (frames, done) = parse_sse(&output);
    assert!(done);
    let calls: Vec<&serde_json::Value> = frames
        .iter()
        .filter_map(|f| f.pointer("/choices/0/delta/tool_calls/0"))
        .collect();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0]["id"], "call_test_stream");
    assert_eq!(calls[0]["function"]["name"], "get_weather");
    assert_eq!(calls[1]["index"], 0);
    assert_eq!(calls[1]["function"]["arguments"], r#"{"location":"San Francisco"}"#);
    assert!(
        frames
            .iter()
            .any(|f| f.pointer("/choices/0/finish_reason") == Some(&serde_json::json!("tool_calls")))
    );
}

#[tokio::test]
async fn claude_stream_is_normalized() {
    let mock = MockVendor::start_with_response("Hello there").await.unwrap();
    let fixture = Fixture::new();
    let key = fixture.seal("sk-ant-test");
    fixture.write(
        "claude",
        &indoc::formatdoc! {r#"
            environments:
              development:
                credentials:
                  - name: dev-claude
                    api_key: "{key}"
                    base_url: "{base_url}"
                    enabled: true
                    weight: 1
        "#, base_url = mock.base_url()},
    );
    let mut output = Vec::new();

    fixture
        .dispatcher("development")
        .dispatch(&streaming("claude-sonnet-4").with_provider("claude"), Some(&mut output))
        .await
        .unwrap();

    let (frames, done) = parse_sse(&output);
    assert!(done);
    assert_eq!(streamed_text(&frames), "Hello there ");
    let last = frames.last().unwrap();
    assert_eq!(last["choices"][0]["finish_reason"], "stop");
    assert_eq!(last["usage"]["prompt_tokens"], 12);
    assert_eq!(last["usage"]["completion_tokens"], 6);
    assert_eq!(mock.last_request().body["stream"], true);
}

#[tokio::test]
async fn failed_stream_open_writes_nothing() {
    let mock = MockVendor::start_failing(1).await.unwrap();
    let fixture = Fixture::new();
    fixture.openai_credential("openai", "dev-a", "sk-test", &mock.base_url());
    let mut output = Vec::new();

    let err = fixture
        .dispatcher("development")
        .dispatch(&streaming("gpt-4o"), Some(&mut output))
        .await
        .unwrap_err();

    assert!(matches!(err, LlmError::ProviderCall { status: Some(503), .. }));
    assert!(output.is_empty());
}

#[tokio::test]
async fn cancelled_stream_stops_without_done() {
    let mock = MockVendor::start().await.unwrap();
    let fixture = Fixture::new();
    fixture.openai_credential("openai", "dev-a", "sk-test", &mock.base_url());
    let cancel = CancellationToken::new();
    cancel.cancel();
    let mut output = Vec::new();

    let err = fixture
        .dispatcher("development")
        .dispatch_with_cancel(&streaming("gpt-4o"), Some(&mut output), cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, LlmError::Cancelled));
    assert!(!String::from_utf8_lossy(&output).contains("[DONE]"));
}

#[tokio::test]
async fn in_band_vendor_error_ends_the_stream_with_an_error_frame() {
    let mock = MockVendor::start_with_stream_error().await.unwrap();
    let fixture = Fixture::new();
    fixture.openai_credential("openai", "dev-a", "sk-test", &mock.base_url());
    let mut output = Vec::new();

    let err = fixture
        .dispatcher("development")
        .dispatch(&streaming("gpt-4o"), Some(&mut output))
        .await
        .unwrap_err();

    let LlmError::StreamTerminated(reason) = &err else {
        panic!("expected a terminated stream, got {err:?}");
    };
    assert!(reason.contains("server_error: upstream overloaded"), "{reason}");

    let (frames, done) = parse_sse(&output);
    assert!(!done, "no [DONE] after an error");
    assert_eq!(streamed_text(&frames), "Hello ");
    let error = &frames.last().unwrap()["error"];
    assert_eq!(error["type"], "stream_terminated");
    assert!(error["message"].as_str().unwrap().contains("upstream overloaded"));
}
