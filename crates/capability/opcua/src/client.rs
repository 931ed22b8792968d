//! 轮询与订阅共用的采集基础：节点映射、状态过滤、最新值槽位与指标生成。

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use agent_telemetry::StatsSink;
use async_trait::async_trait;
use chrono::Utc;
use domain::{FieldValue, Metric};
use tracing::{debug, error};

use crate::config::InputClientConfig;
use crate::error::OpcUaResult;
use crate::node::{NodeMapper, NodeValue};
use crate::status::{StatusCodeFilter, quality_text};
use crate::types::{DataValue, TimestampSource, Variant};

/// 采集策略的公共生命周期
#[async_trait]
pub trait Acquisition: Send {
    async fn connect(&mut self) -> OpcUaResult<()>;

    async fn stop(&mut self) -> OpcUaResult<()>;
}

/// 采集基础对象，由具体策略共享持有
pub struct InputClient {
    config: InputClientConfig,
    mapper: NodeMapper,
    filter: StatusCodeFilter,
    values: Mutex<Vec<NodeValue>>,
    stats: Arc<dyn StatsSink>,
}

impl InputClient {
    /// 校验配置并构建节点映射与状态码白名单
    pub fn new(config: InputClientConfig, stats: Arc<dyn StatsSink>) -> OpcUaResult<Self> {
        config.validate()?;
        let mapper = NodeMapper::new(&config.metric_name, &config.root_nodes, &config.groups)?;
        let filter = StatusCodeFilter::new(&config.client.workarounds.additional_valid_status_codes)?;
        let values = vec![NodeValue::default(); mapper.len()];
        Ok(Self {
            config,
            mapper,
            filter,
            values: Mutex::new(values),
            stats,
        })
    }

    pub fn config(&self) -> &InputClientConfig {
        &self.config
    }

    pub fn mapper(&self) -> &NodeMapper {
        &self.mapper
    }

    pub fn filter(&self) -> &StatusCodeFilter {
        &self.filter
    }

    pub fn stats(&self) -> &Arc<dyn StatsSink> {
        &self.stats
    }

    fn values(&self) -> MutexGuard<'_, Vec<NodeValue>> {
        self.values.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 当前槽位快照
    pub fn node_value(&self, index: usize) -> Option<NodeValue> {
        self.values().get(index).cloned()
    }

    /// 槽位最近质量码是否在白名单内
    pub fn status_ok(&self, index: usize) -> bool {
        self.values()
            .get(index)
            .is_some_and(|v| self.filter.is_ok(v.quality))
    }

    /// 更新槽位；质量码不在白名单时只更新质量并保留旧值
    pub fn update_node_value(&self, index: usize, data: &DataValue) -> bool {
        let Some(mapping) = self.mapper.get(index) else {
            return false;
        };
        let mut values = self.values();
        let Some(slot) = values.get_mut(index) else {
            return false;
        };

        slot.quality = data.status;
        if !self.filter.is_ok(data.status) {
            error!(
                field = %mapping.field_name(),
                node = %mapping.id,
                status = %quality_text(data.status),
                "status not OK for node"
            );
            return false;
        }

        if let Some(value) = &data.value {
            slot.data_type = Some(value.data_type());
            slot.value = Some(value.clone());
        }
        slot.server_timestamp = data.server_timestamp;
        slot.source_timestamp = data.source_timestamp;
        true
    }

    /// 按槽位生成输出记录
    pub fn metric_for_node(&self, index: usize) -> Option<Metric> {
        let mapping = self.mapper.get(index)?;
        let slot = self.node_value(index)?;

        let mut tags = BTreeMap::new();
        tags.insert("id".to_string(), mapping.id.clone());
        tags.extend(mapping.tags.iter().map(|(k, v)| (k.clone(), v.clone())));

        let format = self.config.timestamp_format.as_str();
        let mut fields = BTreeMap::new();
        match &slot.value {
            Some(Variant::Array(items)) => {
                for (i, item) in items.iter().enumerate() {
                    if let Some(value) = item.to_field(format) {
                        fields.insert(format!("{}[{i}]", mapping.field_name()), value);
                    }
                }
            }
            Some(value) => {
                if let Some(value) = value.to_field(format) {
                    fields.insert(mapping.field_name().to_string(), value);
                }
            }
            None => {}
        }

        fields.insert(
            "Quality".to_string(),
            FieldValue::String(quality_text(slot.quality)),
        );
        if self.config.wants_data_type() {
            if let Some(data_type) = slot.data_type {
                fields.insert("DataType".to_string(), FieldValue::from(data_type));
            }
        }
        if !self.filter.is_ok(slot.quality) {
            debug!(
                field = %mapping.field_name(),
                metric = %mapping.metric_name,
                tags = %mapping.tag_string(),
                "status not OK for node"
            );
        }

        let ts = match self.config.timestamp {
            TimestampSource::Server => slot.server_timestamp,
            TimestampSource::Source => slot.source_timestamp,
            TimestampSource::Gather => None,
        }
        .unwrap_or_else(Utc::now);

        Some(Metric::new(
            mapping.metric_name.clone(),
            tags,
            fields,
            ts.timestamp_millis(),
        ))
    }
}
