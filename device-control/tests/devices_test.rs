use chrono::Utc;
use device_control::{CloudNodes, DeviceError, Devices};
use mockito::{Matcher, Server, ServerGuard};
use pdk::config::{FlowVariant, HttpConfig, Platform};
use pdk::credentials::{IssuedTokens, TokenTtls};
use pdk::{AccountCredentials, AuthFlow, AuthenticatedClient, CredentialSet, TokenExchange, TokenLifecycleManager, TokenStore};
use serde_json::json;
use std::sync::Arc;

/// Client whose store already holds a valid system token, so no login runs.
fn client(server: &ServerGuard) -> Arc<AuthenticatedClient> {
    let platform = Platform::single_host(&server.url(), FlowVariant::Implicit);
    let http = HttpConfig::default();
    let ttls = TokenTtls::default();

    let store = Arc::new(TokenStore::new(":memory:", None).unwrap());
    store
        .put(&CredentialSet::issue(
            "SYS",
            IssuedTokens {
                id_token: "ID1".to_string(),
                system_token: "SYS1".to_string(),
                ..Default::default()
            },
            &ttls,
            Utc::now(),
        ))
        .unwrap();

    let manager = TokenLifecycleManager::new(
        store,
        AuthFlow::new(platform.clone(), http.clone(), ttls).unwrap(),
        TokenExchange::new(platform.clone(), &http).unwrap(),
        AccountCredentials::new("ops@example.com", "hunter2", "SYS"),
        ttls,
    );
    Arc::new(AuthenticatedClient::new(Arc::new(manager), platform.systems_url, &http).unwrap())
}

#[tokio::test]
async fn list_cloud_nodes_with_paging() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/systems/SYS/cloud-nodes")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("page".into(), "0".into()),
            Matcher::UrlEncoded("per_page".into(), "50".into()),
        ]))
        .match_header("authorization", "Bearer SYS1")
        .with_status(200)
        .with_body(
            r#"[
                {"id": "cn1", "name": "Front Office", "serialNumber": "CN-1", "connectionStatus": {"connected": true}},
                {"id": "cn2", "name": "Warehouse"}
            ]"#,
        )
        .create_async()
        .await;

    let nodes = CloudNodes::new(client(&server)).list(Some(0), Some(50)).await.unwrap();

    assert_eq!(nodes.len(), 2);
    assert!(nodes[0].is_connected());
    assert!(!nodes[1].is_connected());
    mock.assert_async().await;
}

#[tokio::test]
async fn list_devices_on_node() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/systems/SYS/cloud-nodes/cn1/devices")
        .with_status(200)
        .with_body(r#"[{"id": "d1", "name": "Main Gate", "type": "door", "dwell": 50}]"#)
        .create_async()
        .await;

    let devices = Devices::new(client(&server)).list("cn1").await.unwrap();

    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].name, "Main Gate");
    assert_eq!(devices[0].dwell, Some(50));
    mock.assert_async().await;
}

#[tokio::test]
async fn try_open_sends_dwell() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/systems/SYS/cloud-nodes/cn1/devices/d1/try-open")
        .match_body(Matcher::Json(json!({"dwell": 50})))
        .with_status(204)
        .create_async()
        .await;

    Devices::new(client(&server)).try_open("cn1", "d1", Some(50)).await.unwrap();

    mock.assert_async().await;
}

#[tokio::test]
async fn try_open_without_dwell_sends_empty_object() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/systems/SYS/cloud-nodes/cn1/devices/d1/try-open")
        .match_body(Matcher::Json(json!({})))
        .with_status(204)
        .create_async()
        .await;

    Devices::new(client(&server)).try_open("cn1", "d1", None).await.unwrap();

    mock.assert_async().await;
}

#[tokio::test]
async fn dwell_out_of_range_is_rejected_before_any_request() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", Matcher::Any)
        .expect(0)
        .create_async()
        .await;
    let devices = Devices::new(client(&server));

    for dwell in [0, 5401] {
        let err = devices.try_open("cn1", "d1", Some(dwell)).await.unwrap_err();
        assert!(matches!(err, DeviceError::InvalidDwell(d) if d == dwell));
    }

    mock.assert_async().await;
}

#[tokio::test]
async fn close_failure_is_reported() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("POST", "/systems/SYS/cloud-nodes/cn1/devices/d1/close")
        .match_body(Matcher::Json(json!({})))
        .with_status(409)
        .with_body(r#"{"message": "device offline"}"#)
        .create_async()
        .await;

    let err = Devices::new(client(&server)).close("cn1", "d1").await.unwrap_err();

    match err {
        DeviceError::Request(pdk::RequestError::Status { status, body, .. }) => {
            assert_eq!(status.as_u16(), 409);
            assert!(body.contains("device offline"));
        }
        other => panic!("expected status error, got {:?}", other),
    }
}
