//! OPC UA 采集进程：按设备配置轮询或订阅节点，并将指标写入日志。

use std::sync::Arc;
use std::time::Duration;

use agent_config::{AcquisitionMode, AppConfig};
use agent_opcua::{
    Acquisition, ClientConfig, InputClientConfig, OpcUaSessionTransport, ReadClient, Secret,
    SubscribeClient, SubscribeClientConfig,
};
use agent_telemetry::{AcquisitionMetrics, init_tracing};
use domain::Metric;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 加载本地 .env（如存在），便于直接 cargo run 启动
    dotenvy::dotenv().ok();
    // 初始化结构化日志
    init_tracing();
    // 从环境变量加载运行配置
    let config = AppConfig::from_env()?;

    let raw = tokio::fs::read_to_string(&config.device_config).await?;
    let transport = Arc::new(OpcUaSessionTransport::default());
    let metrics = Arc::new(AcquisitionMetrics::new());

    info!(
        device_config = %config.device_config.display(),
        mode = ?config.mode,
        "starting opcua agent"
    );

    match config.mode {
        AcquisitionMode::Read => {
            let mut device = InputClientConfig::from_json(&raw)?;
            apply_credentials(&config, &mut device.client);
            let client = ReadClient::new(device, transport, metrics.clone())?;
            run_read(client, Duration::from_millis(config.poll_interval_ms)).await?;
        }
        AcquisitionMode::Subscribe => {
            let mut device = SubscribeClientConfig::from_json(&raw)?;
            apply_credentials(&config, &mut device.input.client);
            let client = SubscribeClient::new(device, transport, metrics.clone())?;
            run_subscribe(client).await?;
        }
    }

    let stats = metrics.snapshot();
    info!(
        read_success = stats.read_success,
        read_error = stats.read_error,
        notification = stats.notification,
        notification_dropped = stats.notification_dropped,
        "opcua agent stopped"
    );
    Ok(())
}

/// 环境变量中的账号优先于设备配置文件
fn apply_credentials(config: &AppConfig, client: &mut ClientConfig) {
    if let Some(username) = &config.opcua_username {
        client.username = Some(Secret::new(username.as_str()));
    }
    if let Some(password) = &config.opcua_password {
        client.password = Some(Secret::new(password.as_str()));
    }
}

async fn run_read(
    mut client: ReadClient,
    period: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                match client.current_values().await {
                    Ok(batch) => batch.iter().for_each(emit),
                    // 下一轮会自动重连
                    Err(e) => warn!(error = %e, "read cycle failed"),
                }
            }
        }
    }

    client.stop().await?;
    Ok(())
}

async fn run_subscribe(mut client: SubscribeClient) -> Result<(), Box<dyn std::error::Error>> {
    let mut stream = client.start_stream_values().await?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            next = stream.recv() => match next {
                Some(metric) => emit(&metric),
                None => {
                    error!("metric stream closed unexpectedly");
                    break;
                }
            },
        }
    }

    client.stop().await?;
    Ok(())
}

fn emit(metric: &Metric) {
    info!(metric = %metric, "collected");
}
