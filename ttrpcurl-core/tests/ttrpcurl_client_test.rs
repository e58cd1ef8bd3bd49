use echo_service::GREETER_PROTO;
use echo_service_impl::{EchoServer, echo_source};
use std::time::Duration;
use ttrpcurl_core::{
    client::{
        self, CallContext, CallError, CallOptions, CallShape, CancelReason, ConnectOptions,
        DynamicRequest, TtrpcurlClient,
    },
    codec::EncodeOptions,
    schema::{SchemaFile, SchemaParser, SchemaSource},
    ttrpc::{client::TransportError, frame::FrameError},
};


fn request(method: &str, payload: serde_json::Value) -> DynamicRequest {
    DynamicRequest {
        method: method.to_string(),
        payload: serde_json::to_vec(&payload).unwrap(),
        headers: vec![],
    }
}

fn streaming_request(method: &str, payloads: &[serde_json::Value]) -> DynamicRequest {
    DynamicRequest {
        method: method.to_string(),
        payload: payloads
            .iter()
            .flat_map(|p| serde_json::to_vec(p).unwrap())
            .collect(),
        headers: vec![],
    }
}

fn as_json(responses: &[Vec<u8>]) -> Vec<serde_json::Value> {
    responses
        .iter()
        .map(|r| serde_json::from_slice(r).unwrap())
        .collect()
}

async fn online(server: &EchoServer) -> TtrpcurlClient<client::Online> {
    TtrpcurlClient::offline(echo_source())
        .connect(&server.socket, &ConnectOptions::default())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_unary() {
    let server = EchoServer::start().await;
    let mut client = online(&server).await;
    let mut responses: Vec<Vec<u8>> = Vec::new();

    let summary = client
        .call(
            &CallContext::background(),
            request("echo.EchoService.UnaryEcho", serde_json::json!({ "message": "hello" })),
            &CallOptions::default(),
            &mut responses,
        )
        .await
        .unwrap();

    assert_eq!(summary.shape, CallShape::Unary);
    assert_eq!(summary.responses, 1);
    assert_eq!(as_json(&responses), [serde_json::json!({ "message": "hello" })]);
}

#[tokio::test]
async fn test_greeter_multiline_output() {
    let server = EchoServer::start().await;
    let options = CallOptions {
        encode: EncodeOptions {
            multiline: true,
            emit_defaults: false,
        },
        ..CallOptions::default()
    };
    let mut responses: Vec<Vec<u8>> = Vec::new();

    client::call(
        &CallContext::background(),
        echo_source(),
        &server.socket,
        request("pkg.Greeter.SayHello", serde_json::json!({ "name": "Ada" })),
        &options,
        &mut responses,
    )
    .await
    .unwrap();

    assert_eq!(responses, [b"{\n  \"message\": \"hello Ada\"\n}".to_vec()]);
}

#[tokio::test]
async fn test_server_streaming() {
    let server = EchoServer::start().await;
    let mut client = online(&server).await;
    let mut responses: Vec<Vec<u8>> = Vec::new();

    let summary = client
        .call(
            &CallContext::background(),
            request(
                "echo.EchoService.ServerStreamingEcho",
                serde_json::json!({ "message": "stream" }),
            ),
            &CallOptions::default(),
            &mut responses,
        )
        .await
        .unwrap();

    assert_eq!(summary.shape, CallShape::ServerStreaming);
    let results = as_json(&responses);
    assert_eq!(results.len(), 3);
    assert_eq!(results[0]["message"], "stream - seq 0");
    assert_eq!(results[1]["message"], "stream - seq 1");
    assert_eq!(results[2]["message"], "stream - seq 2");
}

#[tokio::test]
async fn test_client_streaming() {
    let server = EchoServer::start().await;
    let mut client = online(&server).await;
    let mut responses: Vec<Vec<u8>> = Vec::new();

    let summary = client
        .call(
            &CallContext::background(),
            streaming_request(
                "echo.EchoService.ClientStreamingEcho",
                &[
                    serde_json::json!({ "message": "A" }),
                    serde_json::json!({ "message": "B" }),
                    serde_json::json!({ "message": "C" }),
                ],
            ),
            &CallOptions::default(),
            &mut responses,
        )
        .await
        .unwrap();

    assert_eq!(summary.shape, CallShape::ClientStreaming);
    assert_eq!(as_json(&responses), [serde_json::json!({ "message": "ABC" })]);
}

#[tokio::test]
async fn test_bidirectional_streaming() {
    let server = EchoServer::start().await;
    let mut client = online(&server).await;
    let mut responses: Vec<Vec<u8>> = Vec::new();

    let summary = client
        .call(
            &CallContext::background(),
            streaming_request(
                "echo.EchoService.BidirectionalEcho",
                &[
                    serde_json::json!({ "message": "Ping" }),
                    serde_json::json!({ "message": "Pong" }),
                ],
            ),
            &CallOptions::default(),
            &mut responses,
        )
        .await
        .unwrap();

    assert_eq!(summary.shape, CallShape::Bidirectional);
    let results = as_json(&responses);
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["message"], "echo: Ping");
    assert_eq!(results[1]["message"], "echo: Pong");
}

#[tokio::test]
async fn test_several_calls_share_a_connection() {
    let server = EchoServer::start().await;
    let mut client = online(&server).await;
    let ctx = CallContext::background();
    let options = CallOptions::default();

    for word in ["one", "two"] {
        let mut responses: Vec<Vec<u8>> = Vec::new();
        client
            .call(
                &ctx,
                request("echo.EchoService.UnaryEcho", serde_json::json!({ "message": word })),
                &options,
                &mut responses,
            )
            .await
            .unwrap();
        assert_eq!(as_json(&responses)[0]["message"], word);
    }

    let mut responses: Vec<Vec<u8>> = Vec::new();
    client
        .call(
            &ctx,
            request(
                "echo.EchoService.ServerStreamingEcho",
                serde_json::json!({ "message": "three" }),
            ),
            &options,
            &mut responses,
        )
        .await
        .unwrap();
    assert_eq!(responses.len(), 3);
}

#[tokio::test]
async fn test_empty_payload_sends_empty_message() {
    let server = EchoServer::start().await;
    let mut client = online(&server).await;
    let mut responses: Vec<Vec<u8>> = Vec::new();

    let request = DynamicRequest {
        method: "echo.EchoService.UnaryEcho".to_string(),
        payload: vec![],
        headers: vec![],
    };
    client
        .call(
            &CallContext::background(),
            request,
            &CallOptions::default(),
            &mut responses,
        )
        .await
        .unwrap();

    assert_eq!(responses, [b"{}".to_vec()]);
}

#[tokio::test]
async fn test_headers_are_sent_as_metadata() {
    let server = EchoServer::start().await;
    let mut client = online(&server).await;
    let mut responses: Vec<Vec<u8>> = Vec::new();

    let mut request = request("echo.EchoService.UnaryEcho", serde_json::json!({ "message": "x" }));
    request.headers = vec![("prefix".to_string(), "> ".to_string())];

    client
        .call(
            &CallContext::background(),
            request,
            &CallOptions::default(),
            &mut responses,
        )
        .await
        .unwrap();

    assert_eq!(as_json(&responses)[0]["message"], "> x");
}

#[tokio::test]
async fn test_remote_error_status() {
    let server = EchoServer::start().await;
    let mut client = online(&server).await;
    let mut responses: Vec<Vec<u8>> = Vec::new();

    let err = client
        .call(
            &CallContext::background(),
            request(
                "echo.EchoService.Fail",
                serde_json::json!({ "code": 5, "message": "no such item" }),
            ),
            &CallOptions::default(),
            &mut responses,
        )
        .await
        .unwrap_err();

    match err {
        CallError::Remote { code, message } => {
            assert_eq!(code, tonic::Code::NotFound);
            assert_eq!(message, "no such item");
        }
        other => panic!("expected a remote error, got {other:?}"),
    }
    assert!(responses.is_empty());

    // A remote error leaves the connection usable.
    client
        .call(
            &CallContext::background(),
            request("echo.EchoService.UnaryEcho", serde_json::json!({ "message": "still here" })),
            &CallOptions::default(),
            &mut responses,
        )
        .await
        .unwrap();
    assert_eq!(responses.len(), 1);
}

#[tokio::test]
async fn test_method_unknown_to_server() {
    let server = EchoServer::start().await;
    let schema = r#"
        syntax = "proto3";
        package other;
        message Empty {}
        service Nope { rpc Do(Empty) returns (Empty); }
    "#;
    let parsed = SchemaParser::new()
        .parse(vec![SchemaFile::new("other.proto", schema)])
        .unwrap();
    let mut responses: Vec<Vec<u8>> = Vec::new();

    let err = client::call(
        &CallContext::background(),
        SchemaSource::merge(parsed.files, vec![]),
        &server.socket,
        request("other.Nope.Do", serde_json::json!({})),
        &CallOptions::default(),
        &mut responses,
    )
    .await
    .unwrap_err();

    assert!(matches!(
        err,
        CallError::Remote {
            code: tonic::Code::Unimplemented,
            ..
        }
    ));
}

#[tokio::test]
async fn test_method_from_included_tier() {
    let server = EchoServer::start().await;
    let primary = SchemaParser::new()
        .parse(vec![SchemaFile::new("echo.proto", echo_service::ECHO_PROTO)])
        .unwrap();
    let included = SchemaParser::new()
        .parse(vec![SchemaFile::new("greeter.proto", GREETER_PROTO)])
        .unwrap();
    let mut responses: Vec<Vec<u8>> = Vec::new();

    client::call(
        &CallContext::background(),
        SchemaSource::merge(primary.files, included.files),
        &server.socket,
        request("pkg.Greeter.SayHello", serde_json::json!({ "name": "Bob" })),
        &CallOptions::default(),
        &mut responses,
    )
    .await
    .unwrap();

    assert_eq!(as_json(&responses)[0]["message"], "hello Bob");
}

#[tokio::test]
async fn test_deadline_during_server_stream() {
    let server = EchoServer::start().await;
    let mut client = online(&server).await;
    let mut responses: Vec<Vec<u8>> = Vec::new();

    let ctx = CallContext::background().with_timeout(Duration::from_millis(350));
    let err = client
        .call(
            &ctx,
            request(
                "echo.EchoService.SlowStream",
                serde_json::json!({ "message": "slow", "count": 50, "intervalMs": 100 }),
            ),
            &CallOptions::default(),
            &mut responses,
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        CallError::Canceled(CancelReason::DeadlineExceeded)
    ));
    assert!(!responses.is_empty());
    assert!(responses.len() < 50);
    assert_eq!(as_json(&responses)[0]["message"], "slow - tick 0");

    // The connection is closed after a canceled call.
    let err = client
        .call(
            &CallContext::background(),
            request("echo.EchoService.UnaryEcho", serde_json::json!({})),
            &CallOptions::default(),
            &mut Vec::<Vec<u8>>::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CallError::Transport(TransportError::Closed)
    ));
}

#[tokio::test]
async fn test_cancel_during_server_stream() {
    let server = EchoServer::start().await;
    let mut client = online(&server).await;
    let mut responses: Vec<Vec<u8>> = Vec::new();

    let (ctx, handle) = CallContext::new();
    let canceler = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(250)).await;
        handle.cancel();
    });

    let err = client
        .call(
            &ctx,
            request(
                "echo.EchoService.SlowStream",
                serde_json::json!({ "message": "slow", "count": 50, "intervalMs": 50 }),
            ),
            &CallOptions::default(),
            &mut responses,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, CallError::Canceled(CancelReason::Canceled)));
    assert!(!responses.is_empty());
    canceler.await.unwrap();
}

#[tokio::test]
async fn test_pre_canceled_context() {
    let server = EchoServer::start().await;
    let mut client = online(&server).await;
    let mut responses: Vec<Vec<u8>> = Vec::new();

    let (ctx, handle) = CallContext::new();
    handle.cancel();

    let err = client
        .call(
            &ctx,
            request("echo.EchoService.UnaryEcho", serde_json::json!({ "message": "hi" })),
            &CallOptions::default(),
            &mut responses,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, CallError::Canceled(CancelReason::Canceled)));
    assert!(responses.is_empty());
}

async fn assert_connection_usable(client: &mut TtrpcurlClient<client::Online>) {
    let ctx = CallContext::background().with_timeout(Duration::from_secs(3));
    let mut responses: Vec<Vec<u8>> = Vec::new();

    client
        .call(
            &ctx,
            request("echo.EchoService.UnaryEcho", serde_json::json!({ "message": "still here" })),
            &CallOptions::default(),
            &mut responses,
        )
        .await
        .unwrap();
    assert_eq!(as_json(&responses), [serde_json::json!({ "message": "still here" })]);
}

#[tokio::test]
async fn test_undecodable_response() {
    let server = EchoServer::start().await;
    let mut client = online(&server).await;
    let mut responses: Vec<Vec<u8>> = Vec::new();

    let err = client
        .call(
            &CallContext::background(),
            request("echo.EchoService.Garbage", serde_json::json!({ "message": "x" })),
            &CallOptions::default(),
            &mut responses,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, CallError::InvalidResponse(_)), "{err:?}");
    assert!(responses.is_empty());
    assert_connection_usable(&mut client).await;
}

#[tokio::test]
async fn test_responses_before_remote_failure_stay_emitted() {
    let server = EchoServer::start().await;
    let mut client = online(&server).await;
    let mut responses: Vec<Vec<u8>> = Vec::new();

    let err = client
        .call(
            &CallContext::background(),
            request(
                "echo.EchoService.FailMidStream",
                serde_json::json!({ "code": 10, "message": "gave up" }),
            ),
            &CallOptions::default(),
            &mut responses,
        )
        .await
        .unwrap_err();

    match err {
        CallError::Remote { code, message } => {
            assert_eq!(code, tonic::Code::Aborted);
            assert_eq!(message, "gave up");
        }
        other => panic!("expected a remote error, got {other:?}"),
    }
    assert_eq!(
        as_json(&responses),
        [
            serde_json::json!({ "message": "part 0" }),
            serde_json::json!({ "message": "part 1" })
        ]
    );
}

#[tokio::test]
async fn test_bidirectional_failure_stops_requests() {
    let server = EchoServer::start().await;
    let mut client = online(&server).await;
    let mut responses: Vec<Vec<u8>> = Vec::new();

    let payloads: Vec<_> = (0..50)
        .map(|i| serde_json::json!({ "message": format!("m{i}") }))
        .collect();
    let err = client
        .call(
            &CallContext::background(),
            streaming_request("echo.EchoService.BidirectionalFail", &payloads),
            &CallOptions::default(),
            &mut responses,
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        CallError::Remote {
            code: tonic::Code::FailedPrecondition,
            ..
        }
    ));
    assert_eq!(as_json(&responses), [serde_json::json!({ "message": "echo: m0" })]);
    assert_connection_usable(&mut client).await;
}

#[tokio::test]
async fn test_connection_reused_after_rejected_client_stream() {
    const UPLOAD_PROTO: &str = r#"
        syntax = "proto3";
        package other;
        message Chunk { bytes data = 1; }
        message Done {}
        service Uploads { rpc Upload(stream Chunk) returns (Done); }
    "#;

    let server = EchoServer::start().await;
    let parsed = SchemaParser::new()
        .parse(vec![
            SchemaFile::new("echo.proto", echo_service::ECHO_PROTO),
            SchemaFile::new("upload.proto", UPLOAD_PROTO),
        ])
        .unwrap();
    let mut client = TtrpcurlClient::offline(SchemaSource::merge(parsed.files, vec![]))
        .connect(&server.socket, &ConnectOptions::default())
        .await
        .unwrap();

    // Large chunks, so the server answers while requests are still being written.
    let chunk = serde_json::json!({ "data": "A".repeat(1 << 20) });
    let err = client
        .call(
            &CallContext::background(),
            streaming_request("other.Uploads.Upload", &vec![chunk; 10]),
            &CallOptions::default(),
            &mut Vec::<Vec<u8>>::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        CallError::Remote {
            code: tonic::Code::Unimplemented,
            ..
        }
    ));
    assert_connection_usable(&mut client).await;
}

#[tokio::test]
async fn test_request_sender_failure_ends_call() {
    let server = EchoServer::start().await;
    let options = ConnectOptions {
        max_message_size: 64,
        ..ConnectOptions::default()
    };
    let mut client = TtrpcurlClient::offline(echo_source())
        .connect(&server.socket, &options)
        .await
        .unwrap();

    let err = client
        .call(
            &CallContext::background().with_timeout(Duration::from_secs(3)),
            streaming_request(
                "echo.EchoService.ClientStreamingEcho",
                &[serde_json::json!({ "message": "x".repeat(200) })],
            ),
            &CallOptions::default(),
            &mut Vec::<Vec<u8>>::new(),
        )
        .await
        .unwrap_err();

    assert!(
        matches!(
            err,
            CallError::Transport(TransportError::Frame(FrameError::TooLarge { max: 64, .. }))
        ),
        "{err:?}"
    );
}

// The socket below does not exist: these calls must fail before dialing.

#[tokio::test]
async fn test_malformed_method_name_fails_before_io() {
    for method in ["echo.EchoService", "echo.EchoService.UnaryEcho.Extra", "UnaryEcho"] {
        let err = client::call(
            &CallContext::background(),
            echo_source(),
            "/nonexistent/ttrpcurl.sock",
            request(method, serde_json::json!({})),
            &CallOptions::default(),
            &mut Vec::<Vec<u8>>::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, CallError::InvalidMethodName(_)), "{method}: {err:?}");
    }
}

#[tokio::test]
async fn test_unknown_field_fails_before_io() {
    let err = client::call(
        &CallContext::background(),
        echo_source(),
        "/nonexistent/ttrpcurl.sock",
        request(
            "echo.EchoService.UnaryEcho",
            serde_json::json!({ "unknown_field": 1 }),
        ),
        &CallOptions::default(),
        &mut Vec::<Vec<u8>>::new(),
    )
    .await
    .unwrap_err();

    match err {
        CallError::Decode(err) => assert_eq!(err.path, "unknown_field"),
        other => panic!("expected a decode error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unknown_method_fails_before_io() {
    let err = client::call(
        &CallContext::background(),
        echo_source(),
        "/nonexistent/ttrpcurl.sock",
        request("echo.EchoService.Missing", serde_json::json!({})),
        &CallOptions::default(),
        &mut Vec::<Vec<u8>>::new(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, CallError::MethodNotFound(_)));
}

#[tokio::test]
async fn test_dial_error() {
    let err = client::call(
        &CallContext::background(),
        echo_source(),
        "/nonexistent/ttrpcurl.sock",
        request("echo.EchoService.UnaryEcho", serde_json::json!({ "message": "hi" })),
        &CallOptions::default(),
        &mut Vec::<Vec<u8>>::new(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, CallError::Dial(TransportError::Dial { .. })));
}
