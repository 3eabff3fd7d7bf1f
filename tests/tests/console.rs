use rundev::{handler, mux, protocol};
use rundev_tests::fixtures::{self, events_until};
use std::sync::Arc;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::UnixStream,
};

// ---- Registration protocol over a socket ----

#[tokio::test(flavor = "multi_thread")]
async fn connection_is_confirmed_with_a_single_byte() {
    let (ctx, mut rx) = fixtures::test_context();
    let (mut client, server) = UnixStream::pair().unwrap();

    let served = tokio::spawn(handler::handle_connection(ctx.clone(), server));

    let request = fixtures::request("build", &["sh", "-c", "echo over-socket"], true);
    let mut line = serde_json::to_string(&request).unwrap();
    line.push('\n');
    client.write_all(line.as_bytes()).await.unwrap();

    let mut ack = [0u8; 1];
    client.read_exact(&mut ack).await.unwrap();
    assert_eq!(ack[0], protocol::ACK);

    served.await.unwrap();
    let events = events_until(&mut rx, |text| text.contains("exited with status")).await;
    assert!(events
        .iter()
        .any(|(_, text)| text.trim_end() == "over-socket"));
}

#[tokio::test(flavor = "multi_thread")]
async fn rejected_duplicate_still_gets_the_confirmation_byte() {
    let (ctx, mut rx) = fixtures::test_context();

    // Occupy the name with a live session.
    let first = fixtures::request("build", &["sleep", "1"], false);
    let active = handler::handle_request(&ctx, first).await.unwrap();
    let runner = {
        let ctx = ctx.clone();
        tokio::spawn(async move { handler::run_session(&ctx, active).await })
    };

    let (mut client, server) = UnixStream::pair().unwrap();
    let served = tokio::spawn(handler::handle_connection(ctx.clone(), server));

    let request = fixtures::request("build", &["true"], true);
    let mut line = serde_json::to_string(&request).unwrap();
    line.push('\n');
    client.write_all(line.as_bytes()).await.unwrap();

    // The rejection is silent on the wire; only the stream reports it.
    let mut ack = [0u8; 1];
    client.read_exact(&mut ack).await.unwrap();
    assert_eq!(ack[0], protocol::ACK);

    served.await.unwrap();
    runner.await.unwrap().unwrap();

    let events = events_until(&mut rx, |text| text.contains("PROCESS EXITED")).await;
    assert!(events
        .iter()
        .any(|(name, text)| name == "build" && text.contains("child already running")));
}

#[tokio::test(flavor = "multi_thread")]
async fn session_is_reaped_when_the_client_disconnects_early() {
    let (ctx, mut rx) = fixtures::test_context();
    let (mut client, server) = UnixStream::pair().unwrap();

    // The request is buffered in the socket; closing the client before the
    // handler even starts guarantees the confirmation write hits a hangup.
    let request = fixtures::request("build", &["true"], true);
    let mut line = serde_json::to_string(&request).unwrap();
    line.push('\n');
    client.write_all(line.as_bytes()).await.unwrap();
    drop(client);

    tokio::spawn(handler::handle_connection(ctx.clone(), server))
        .await
        .unwrap();

    // The session must still be pumped and reaped.
    let events = events_until(&mut rx, |text| text.contains("exited with status")).await;
    assert!(events.last().unwrap().1.contains("exited with status 0"));
    assert!(ctx.registry.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_request_does_not_take_down_the_handler() {
    let (ctx, _rx) = fixtures::test_context();
    let (mut client, server) = UnixStream::pair().unwrap();

    let served = tokio::spawn(handler::handle_connection(ctx.clone(), server));
    client.write_all(b"not json\n").await.unwrap();

    // The connection is dropped without a confirmation byte.
    let mut buf = [0u8; 1];
    assert_eq!(client.read(&mut buf).await.unwrap(), 0);
    served.await.unwrap();
    assert!(ctx.registry.is_empty());
}

// ---- Liveness: the consumer detects "nothing left to run" ----

#[tokio::test(flavor = "multi_thread")]
async fn consumer_reports_shutdown_once_the_last_session_is_reaped() {
    let (ctx, rx) = fixtures::test_context();

    let request = fixtures::request(protocol::INITIAL_NAME, &["sleep", "1"], true);
    let active = handler::handle_request(&ctx, request).await.unwrap();
    handler::run_session(&ctx, active).await.unwrap();

    let mut buf = Vec::new();
    mux::run_output_loop(Arc::clone(&ctx), rx, &mut buf)
        .await
        .unwrap();

    let output = String::from_utf8_lossy(&buf);
    assert!(output.contains("exited with status 0"));
    assert!(output.ends_with("No more running processes, exiting.\n"));
}
