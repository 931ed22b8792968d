mod common;

use std::sync::Arc;

use agent_opcua::{
    Acquisition, ConnectionState, DataValue, InputClient, InputClientConfig, NodeSettings,
    OpcUaError, ReadClient, TimestampSource, Variant,
};
use agent_telemetry::AcquisitionMetrics;
use chrono::DateTime;
use common::{MockTransport, connection, double};
use domain::FieldValue;

fn config() -> InputClientConfig {
    InputClientConfig::from_json(
        r#"{
            "endpoint": "opc.tcp://plc.local:4840",
            "security_policy": "None",
            "metric_name": "opcua",
            "root_nodes": [
                { "name": "temp", "namespace": "2", "identifier_type": "s", "identifier": "t",
                  "default_tags": { "site": "a" } },
                { "name": "pressure", "namespace": "2", "identifier_type": "i", "identifier": "7" }
            ]
        }"#,
    )
    .expect("config")
}

fn client(
    config: InputClientConfig,
    transport: Arc<MockTransport>,
    metrics: Arc<AcquisitionMetrics>,
) -> ReadClient {
    let conn = connection(config.client.clone(), transport);
    let base = Arc::new(InputClient::new(config, metrics).expect("base"));
    ReadClient::with_connection(base, conn)
}

#[tokio::test]
async fn reads_registered_nodes() {
    let transport = MockTransport::insecure();
    let metrics = Arc::new(AcquisitionMetrics::new());
    let mut reader = client(config(), transport.clone(), metrics.clone());

    transport.push_read(Ok(vec![double(21.5), double(3.0)]));
    let values = reader.current_values().await.expect("values");

    assert_eq!(reader.connection().state(), ConnectionState::Connected);
    assert_eq!(transport.call_count("register_nodes"), 1);
    assert_eq!(
        transport.read_ids()[0],
        ["registered:ns=2;s=t", "registered:ns=2;i=7"]
    );

    assert_eq!(values.len(), 2);
    let temp = &values[0];
    assert_eq!(temp.name, "opcua");
    assert_eq!(temp.tag("id"), Some("ns=2;s=t"));
    assert_eq!(temp.tag("site"), Some("a"));
    assert_eq!(temp.field("temp"), Some(&FieldValue::F64(21.5)));
    assert_eq!(
        temp.field("Quality"),
        Some(&FieldValue::from("The operation succeeded. Good (0x0)"))
    );
    assert_eq!(metrics.snapshot().read_success, 1);

    // 已连接时不再重新注册
    reader.current_values().await.expect("values");
    assert_eq!(transport.call_count("register_nodes"), 1);
    assert_eq!(transport.call_count("read"), 2);
}

#[tokio::test]
async fn unregistered_reads_use_raw_ids() {
    let transport = MockTransport::insecure();
    let mut cfg = config();
    cfg.client.workarounds.use_unregistered_reads = true;
    let mut reader = client(cfg, transport.clone(), Arc::new(AcquisitionMetrics::new()));

    reader.connect().await.expect("connect");
    assert_eq!(transport.call_count("register_nodes"), 0);
    assert_eq!(transport.read_ids()[0], ["ns=2;s=t", "ns=2;i=7"]);
}

#[tokio::test]
async fn bad_status_withholds_node_and_keeps_value() {
    let transport = MockTransport::insecure();
    let mut reader = client(config(), transport.clone(), Arc::new(AcquisitionMetrics::new()));

    transport.push_read(Ok(vec![double(21.5), double(3.0)]));
    reader.current_values().await.expect("values");

    transport.push_read(Ok(vec![DataValue::with_status(0x8034_0000), double(4.0)]));
    let values = reader.current_values().await.expect("values");
    assert_eq!(values.len(), 1);
    assert_eq!(values[0].field("pressure"), Some(&FieldValue::F64(4.0)));

    let slot = reader.base().node_value(0).expect("slot");
    assert_eq!(slot.quality, 0x8034_0000);
    assert_eq!(slot.value, Some(Variant::Double(21.5)));
}

#[tokio::test]
async fn additional_status_codes_pass() {
    let transport = MockTransport::insecure();
    let mut cfg = config();
    cfg.client.workarounds.additional_valid_status_codes = vec!["0x40000000".to_string()];
    let mut reader = client(cfg, transport.clone(), Arc::new(AcquisitionMetrics::new()));

    let mut uncertain = double(9.0);
    uncertain.status = 0x4000_0000;
    transport.push_read(Ok(vec![uncertain, double(1.0)]));
    let values = reader.current_values().await.expect("values");
    assert_eq!(values.len(), 2);
    assert_eq!(values[0].field("temp"), Some(&FieldValue::F64(9.0)));
}

#[tokio::test]
async fn read_failure_disconnects_and_next_call_reconnects() {
    let transport = MockTransport::insecure();
    let metrics = Arc::new(AcquisitionMetrics::new());
    let mut reader = client(config(), transport.clone(), metrics.clone());
    reader.current_values().await.expect("values");

    transport.push_read(Err(OpcUaError::Transport("socket reset".to_string())));
    let err = reader.current_values().await.expect_err("read error");
    assert!(matches!(err, OpcUaError::Transport(msg) if msg == "socket reset"));
    assert_eq!(reader.connection().state(), ConnectionState::Disconnected);
    assert_eq!(transport.call_count("close_session"), 1);
    assert_eq!(metrics.snapshot().read_error, 1);

    reader.current_values().await.expect("reconnected");
    assert_eq!(reader.connection().state(), ConnectionState::Connected);
    assert_eq!(transport.call_count("open_session"), 2);
    assert_eq!(transport.call_count("register_nodes"), 2);
    assert_eq!(metrics.snapshot().read_success, 2);
}

#[tokio::test]
async fn disconnect_failure_does_not_mask_read_error() {
    let transport = MockTransport::insecure();
    let mut reader = client(config(), transport.clone(), Arc::new(AcquisitionMetrics::new()));
    reader.current_values().await.expect("values");

    transport.fail_close();
    transport.push_read(Err(OpcUaError::Transport("broken pipe".to_string())));
    let err = reader.current_values().await.expect_err("read error");
    assert!(matches!(err, OpcUaError::Transport(msg) if msg == "broken pipe"));
}

#[tokio::test]
async fn arrays_unpack_and_data_type_field() {
    let transport = MockTransport::insecure();
    let mut cfg = config();
    cfg.optional_fields = vec!["DataType".to_string()];
    let mut reader = client(cfg, transport.clone(), Arc::new(AcquisitionMetrics::new()));

    let array = DataValue::good(Variant::Array(vec![Variant::Int32(1), Variant::Int32(-2)]));
    transport.push_read(Ok(vec![array, DataValue::good(Variant::Boolean(true))]));
    let values = reader.current_values().await.expect("values");

    let temp = &values[0];
    assert_eq!(temp.field("temp[0]"), Some(&FieldValue::I64(1)));
    assert_eq!(temp.field("temp[1]"), Some(&FieldValue::I64(-2)));
    assert_eq!(temp.field("temp"), None);
    assert_eq!(temp.field("DataType"), Some(&FieldValue::from("Int32")));
    assert_eq!(values[1].field("DataType"), Some(&FieldValue::from("Boolean")));
}

#[tokio::test]
async fn server_timestamp_source() {
    let transport = MockTransport::insecure();
    let mut cfg = config();
    cfg.timestamp = TimestampSource::Server;
    let mut reader = client(cfg, transport.clone(), Arc::new(AcquisitionMetrics::new()));

    let mut value = double(1.0);
    value.server_timestamp = DateTime::from_timestamp_millis(1_700_000_000_123);
    value.source_timestamp = DateTime::from_timestamp_millis(1_600_000_000_000);
    transport.push_read(Ok(vec![value, double(2.0)]));

    let values = reader.current_values().await.expect("values");
    assert_eq!(values[0].ts_ms, 1_700_000_000_123);
}

#[tokio::test]
async fn invalid_node_config_fails_construction() {
    let mut cfg = config();
    cfg.root_nodes.push(NodeSettings::new("bad", "2", "i", "abc"));
    let result = ReadClient::new(
        cfg,
        MockTransport::insecure(),
        Arc::new(AcquisitionMetrics::new()),
    );
    assert!(matches!(result, Err(OpcUaError::Config(_))));
}

#[tokio::test]
async fn stop_closes_connection() {
    let transport = MockTransport::insecure();
    let mut reader = client(config(), transport.clone(), Arc::new(AcquisitionMetrics::new()));
    reader.connect().await.expect("connect");
    reader.stop().await.expect("stop");
    assert_eq!(reader.connection().state(), ConnectionState::Closed);
}
