//! 节点配置解析与节点到指标的映射。
//!
//! `NodeMapper` 把根节点与分组节点展开为一张扁平映射表，三个数组
//! （节点标识、映射、最新值）始终等长且按位置对齐。

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{OpcUaError, OpcUaResult};
use crate::status::STATUS_GOOD;
use crate::types::Variant;

// =============================================================================
// 监控参数（仅订阅模式）
// =============================================================================

/// 数据变更过滤器配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataChangeFilterSettings {
    /// `Status` | `StatusValue` | `StatusValueTimestamp`
    pub trigger: String,
    /// `Absolute` | `Percent`
    pub deadband_type: String,
    #[serde(default)]
    pub deadband_value: Option<f64>,
}

/// 数据变更触发条件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataChangeTrigger {
    Status = 0,
    StatusValue = 1,
    StatusValueTimestamp = 2,
}

/// 死区类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadbandType {
    Absolute = 1,
    Percent = 2,
}

/// 校验后的数据变更过滤器
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DataChangeFilter {
    pub trigger: DataChangeTrigger,
    pub deadband_type: DeadbandType,
    pub deadband_value: f64,
}

impl DataChangeFilterSettings {
    /// 校验并转换；错误信息包含节点标识
    pub fn resolve(&self, node_id: &str) -> OpcUaResult<DataChangeFilter> {
        let trigger = match self.trigger.as_str() {
            "Status" => DataChangeTrigger::Status,
            "StatusValue" => DataChangeTrigger::StatusValue,
            "StatusValueTimestamp" => DataChangeTrigger::StatusValueTimestamp,
            other => {
                return Err(OpcUaError::config(format!(
                    "trigger '{other}' not supported, node '{node_id}'"
                )));
            }
        };
        let deadband_type = match self.deadband_type.as_str() {
            "Absolute" => DeadbandType::Absolute,
            "Percent" => DeadbandType::Percent,
            other => {
                return Err(OpcUaError::config(format!(
                    "deadband_type '{other}' not supported, node '{node_id}'"
                )));
            }
        };
        let deadband_value = self.deadband_value.ok_or_else(|| {
            OpcUaError::config(format!("deadband_value was not set, node '{node_id}'"))
        })?;
        if deadband_value < 0.0 {
            return Err(OpcUaError::config(format!(
                "negative deadband_value not supported, node '{node_id}'"
            )));
        }
        Ok(DataChangeFilter {
            trigger,
            deadband_type,
            deadband_value,
        })
    }
}

/// 监控项参数
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringParameters {
    /// 采样间隔，0 表示沿用分组设置或由服务端决定
    pub sampling_interval_ms: u64,
    pub queue_size: Option<u32>,
    pub discard_oldest: Option<bool>,
    pub data_change_filter: Option<DataChangeFilterSettings>,
}

pub const DEFAULT_QUEUE_SIZE: u32 = 10;

impl MonitoringParameters {
    pub fn queue_size(&self) -> u32 {
        self.queue_size.unwrap_or(DEFAULT_QUEUE_SIZE)
    }

    pub fn discard_oldest(&self) -> bool {
        self.discard_oldest.unwrap_or(true)
    }
}

// =============================================================================
// 节点配置
// =============================================================================

/// 单个节点配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeSettings {
    /// 输出字段名
    #[serde(rename = "name")]
    pub field_name: String,
    #[serde(default)]
    pub namespace: String,
    /// `s` | `i` | `g` | `b`
    #[serde(default)]
    pub identifier_type: String,
    pub identifier: String,
    #[serde(default)]
    pub default_tags: BTreeMap<String, String>,
    /// 已弃用的标签对格式 `[["k", "v"], ...]`
    #[serde(default)]
    pub tags: Vec<Vec<String>>,
    #[serde(default)]
    pub monitoring_params: MonitoringParameters,
}

impl NodeSettings {
    pub fn new(
        field_name: impl Into<String>,
        namespace: impl Into<String>,
        identifier_type: impl Into<String>,
        identifier: impl Into<String>,
    ) -> Self {
        Self {
            field_name: field_name.into(),
            namespace: namespace.into(),
            identifier_type: identifier_type.into(),
            identifier: identifier.into(),
            ..Self::default()
        }
    }

    /// `ns=<namespace>;<type>=<identifier>`
    pub fn node_id(&self) -> String {
        format!(
            "ns={};{}={}",
            self.namespace, self.identifier_type, self.identifier
        )
    }

    fn resolved_tags(&self) -> OpcUaResult<BTreeMap<String, String>> {
        if self.tags.is_empty() {
            return Ok(self.default_tags.clone());
        }
        if !self.default_tags.is_empty() {
            warn!(
                node = %self.field_name,
                "both deprecated tags and default_tags set, using default_tags"
            );
            return Ok(self.default_tags.clone());
        }
        legacy_tags_to_map(&self.field_name, &self.tags)
    }
}

/// 节点分组配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeGroupSettings {
    /// 分组指标名，为空时使用全局指标名
    #[serde(rename = "name", default)]
    pub metric_name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub identifier_type: String,
    #[serde(default)]
    pub default_tags: BTreeMap<String, String>,
    /// 已弃用的标签对格式
    #[serde(default)]
    pub tags: Vec<Vec<String>>,
    /// 组内节点的默认采样间隔
    #[serde(default)]
    pub sampling_interval_ms: u64,
    #[serde(default)]
    pub nodes: Vec<NodeSettings>,
}

impl NodeGroupSettings {
    fn resolved_tags(&self) -> OpcUaResult<BTreeMap<String, String>> {
        if self.tags.is_empty() {
            return Ok(self.default_tags.clone());
        }
        if !self.default_tags.is_empty() {
            warn!(
                group = %self.metric_name,
                "both deprecated tags and default_tags set, using default_tags"
            );
            return Ok(self.default_tags.clone());
        }
        legacy_tags_to_map(&self.metric_name, &self.tags)
    }
}

fn legacy_tags_to_map(owner: &str, tags: &[Vec<String>]) -> OpcUaResult<BTreeMap<String, String>> {
    let mut map = BTreeMap::new();
    for (i, pair) in tags.iter().enumerate() {
        let [key, value] = pair.as_slice() else {
            return Err(OpcUaError::config(format!(
                "tag {i} in {owner:?} needs 2 values, has {}",
                pair.len()
            )));
        };
        if map.insert(key.clone(), value.clone()).is_some() {
            return Err(OpcUaError::config(format!(
                "tag {i} in {owner:?} has duplicate key {key:?}"
            )));
        }
    }
    Ok(map)
}

// =============================================================================
// 映射
// =============================================================================

/// 解析后的节点到指标映射
#[derive(Debug, Clone)]
pub struct NodeMetricMapping {
    pub node: NodeSettings,
    pub id: String,
    pub metric_name: String,
    pub tags: BTreeMap<String, String>,
}

impl NodeMetricMapping {
    fn new(metric_name: &str, node: NodeSettings, group_tags: &BTreeMap<String, String>) -> OpcUaResult<Self> {
        let mut tags = group_tags.clone();
        tags.extend(node.resolved_tags()?);
        Ok(Self {
            id: node.node_id(),
            metric_name: metric_name.to_string(),
            node,
            tags,
        })
    }

    pub fn field_name(&self) -> &str {
        &self.node.field_name
    }

    /// 标签按键排序后拼接为 `k1=v1, k2=v2`
    pub fn tag_string(&self) -> String {
        self.tags
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn identity(&self) -> MetricIdentity {
        MetricIdentity {
            metric_name: self.metric_name.clone(),
            field_name: self.node.field_name.clone(),
            tags: self.tag_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MetricIdentity {
    metric_name: String,
    field_name: String,
    tags: String,
}

/// 节点最新值槽位
#[derive(Debug, Clone, PartialEq)]
pub struct NodeValue {
    pub value: Option<Variant>,
    pub quality: u32,
    pub data_type: Option<&'static str>,
    pub server_timestamp: Option<DateTime<Utc>>,
    pub source_timestamp: Option<DateTime<Utc>>,
}

impl Default for NodeValue {
    fn default() -> Self {
        Self {
            value: None,
            quality: STATUS_GOOD,
            data_type: None,
            server_timestamp: None,
            source_timestamp: None,
        }
    }
}

/// 节点映射表
#[derive(Debug, Clone)]
pub struct NodeMapper {
    mappings: Vec<NodeMetricMapping>,
    node_ids: Vec<String>,
}

impl NodeMapper {
    /// 展开根节点与分组节点并逐个校验
    pub fn new(
        metric_name: &str,
        root_nodes: &[NodeSettings],
        groups: &[NodeGroupSettings],
    ) -> OpcUaResult<Self> {
        let mut existing = HashSet::new();
        let mut mappings = Vec::new();
        let no_tags = BTreeMap::new();

        for node in root_nodes {
            let mapping = NodeMetricMapping::new(metric_name, node.clone(), &no_tags)?;
            validate_node(&mut existing, &mapping)?;
            mappings.push(mapping);
        }

        for group in groups {
            let group_metric = if group.metric_name.is_empty() {
                metric_name
            } else {
                group.metric_name.as_str()
            };
            let group_tags = group.resolved_tags()?;

            for node in &group.nodes {
                let mut node = node.clone();
                if node.namespace.is_empty() {
                    node.namespace = group.namespace.clone();
                }
                if node.identifier_type.is_empty() {
                    node.identifier_type = group.identifier_type.clone();
                }
                if node.monitoring_params.sampling_interval_ms == 0 {
                    node.monitoring_params.sampling_interval_ms = group.sampling_interval_ms;
                }
                let mapping = NodeMetricMapping::new(group_metric, node, &group_tags)?;
                validate_node(&mut existing, &mapping)?;
                mappings.push(mapping);
            }
        }

        let node_ids = mappings.iter().map(|m| m.id.clone()).collect();
        Ok(Self { mappings, node_ids })
    }

    pub fn mappings(&self) -> &[NodeMetricMapping] {
        &self.mappings
    }

    pub fn node_ids(&self) -> &[String] {
        &self.node_ids
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&NodeMetricMapping> {
        self.mappings.get(index)
    }
}

fn validate_node(existing: &mut HashSet<MetricIdentity>, mapping: &NodeMetricMapping) -> OpcUaResult<()> {
    let node = &mapping.node;
    if node.field_name.is_empty() {
        return Err(OpcUaError::config(format!(
            "empty name in node {:?}",
            node.node_id()
        )));
    }
    if node.namespace.is_empty() {
        return Err(OpcUaError::config(format!(
            "node {:?}: namespace not set",
            node.field_name
        )));
    }
    if node.identifier.is_empty() {
        return Err(OpcUaError::config("empty node identifier not allowed"));
    }
    for (key, value) in &mapping.tags {
        if key.is_empty() {
            return Err(OpcUaError::config(format!(
                "empty tag name in tags for {:?}",
                node.field_name
            )));
        }
        if value.is_empty() {
            return Err(OpcUaError::config(format!(
                "empty tag value for tag {key:?} in {:?}",
                node.field_name
            )));
        }
    }

    match node.identifier_type.as_str() {
        "i" => {
            if node.identifier.parse::<u32>().is_err() {
                return Err(OpcUaError::config(format!(
                    "identifier type {:?} does not match the type of identifier {:?}",
                    node.identifier_type, node.identifier
                )));
            }
        }
        "s" | "g" | "b" => {}
        other => {
            return Err(OpcUaError::config(format!(
                "invalid identifier type {other:?} in {:?}",
                node.field_name
            )));
        }
    }

    let identity = mapping.identity();
    if existing.contains(&identity) {
        return Err(OpcUaError::config(format!(
            "name {:?} is duplicated (metric name {:?}, tags {:?})",
            identity.field_name, identity.metric_name, identity.tags
        )));
    }
    existing.insert(identity);
    Ok(())
}
