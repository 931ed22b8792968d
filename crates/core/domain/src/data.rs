use std::collections::BTreeMap;
use std::fmt;

/// 指标字段值的数据类型。
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    I64(i64),
    U64(u64),
    F64(f64),
    Bool(bool),
    String(String),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::I64(v) => write!(f, "{}i", v),
            Self::U64(v) => write!(f, "{}u", v),
            Self::F64(v) => write!(f, "{}", v),
            Self::Bool(v) => write!(f, "{}", v),
            Self::String(v) => write!(f, "{:?}", v),
        }
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::I64(value)
    }
}

impl From<u64> for FieldValue {
    fn from(value: u64) -> Self {
        Self::U64(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::F64(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

/// 采集输出记录：交给下游投递 sink 的单条指标。
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    pub name: String,
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, FieldValue>,
    /// 记录时间戳（毫秒）。
    pub ts_ms: i64,
}

impl Metric {
    pub fn new(
        name: impl Into<String>,
        tags: BTreeMap<String, String>,
        fields: BTreeMap<String, FieldValue>,
        ts_ms: i64,
    ) -> Self {
        Self {
            name: name.into(),
            tags,
            fields,
            ts_ms,
        }
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    pub fn field(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }
}

impl fmt::Display for Metric {
    /// 以 line protocol 风格输出，便于日志查看。
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        for (key, value) in &self.tags {
            write!(f, ",{}={}", key, value)?;
        }
        let mut first = true;
        for (key, value) in &self.fields {
            let sep = if first { ' ' } else { ',' };
            first = false;
            write!(f, "{}{}={}", sep, key, value)?;
        }
        write!(f, " {}", self.ts_ms)
    }
}
