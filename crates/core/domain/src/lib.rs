//! 采集侧与投递侧共享的记录模型。

pub mod data;

pub use data::{FieldValue, Metric};
