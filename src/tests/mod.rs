use futures::StreamExt;
use log::info;
use serde::{Deserialize, Serialize};

use crate::client::StreamHandle;
use crate::{ConnectionState, HubClient, HubError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct TestEntity {
    pub text: String,
    pub number: i32,
}

#[test_log::test(tokio::test)]
async fn operations_require_a_connected_client() {
    let client = HubClient::new("localhost", "test");

    let invoke = client.invoke::<TestEntity>("SingleEntity".to_string()).await;
    assert_eq!(invoke.unwrap_err(), HubError::NotConnected);

    let send = client.send("TriggerEntityCallback".to_string()).await;
    assert_eq!(send.unwrap_err(), HubError::NotConnected);

    let stream = client.stream::<TestEntity>("HundredEntities".to_string()).await;
    assert_eq!(stream.err(), Some(HubError::NotConnected));

    let handle = StreamHandle { invocation_id: "1".to_string() };
    let cancel = client.cancel_stream_invocation(&handle).await;
    assert_eq!(cancel.unwrap_err(), HubError::NotConnected);
}

#[test_log::test(tokio::test)]
async fn stop_is_idempotent_while_disconnected() {
    let client = HubClient::new("localhost", "test");

    client.stop().await;
    client.stop().await;

    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(client.connection_id(), None);
}

#[test_log::test(tokio::test)]
async fn registrations_work_without_a_connection() {
    let client = HubClient::new("localhost", "test");

    let first = client.on("callback1".to_string(), |_ctx| {});
    let second = client.on("callback1".to_string(), |ctx| {
        let _ = ctx.argument::<TestEntity>(0);
    });

    first.unregister();
    second.unregister();
}

#[test_log::test(tokio::test)]
async fn start_surfaces_negotiation_failures() {
    let client = HubClient::new_with("localhost", "test", |c| {
        c.with_port(59997);
        c.unsecure();
    });

    let result = client.start().await;
    assert!(matches!(result.unwrap_err(), HubError::Negotiation(_)));
    assert_eq!(client.state(), ConnectionState::Disconnected);

    // a failed start leaves the client restartable
    let result = client.start().await;
    assert!(matches!(result.unwrap_err(), HubError::Negotiation(_)));
}

// Requires the reference test server: `dotnet run` in TestServer, listening on
// localhost:5220.
#[test_log::test(tokio::test)]
#[ignore = "requires the reference test server on localhost:5220"]
async fn chat_round_trip_against_the_test_server() {
    let client = HubClient::new_with("localhost", "test", |c| {
        c.with_port(5220);
        c.unsecure();
    });

    client.start().await.unwrap();
    assert_eq!(client.state(), ConnectionState::Connected);

    let entity = client.invoke::<TestEntity>("SingleEntity".to_string()).await.unwrap();
    assert_eq!(entity.text, "test".to_string());
    info!("Entity {}, {}", entity.text, entity.number);

    let echoed = client
        .invoke_with_args::<String, _>("Echo".to_string(), |c| {
            c.argument("hi");
        })
        .await
        .unwrap();
    assert_eq!(echoed, "hi");

    let mut stream = client.stream::<TestEntity>("HundredEntities".to_string()).await.unwrap();
    let mut count = 0;
    while let Some(item) = stream.next().await {
        item.unwrap();
        count += 1;
    }
    assert_eq!(count, 100);

    client.stop().await;
    assert_eq!(client.state(), ConnectionState::Disconnected);
}
