//! 状态码白名单与质量文本。

use std::collections::HashSet;

use crate::error::{OpcUaError, OpcUaResult};

/// 协议定义的 Good（OK）状态码。
pub const STATUS_GOOD: u32 = 0;

/// 允许的状态码集合，始终包含 Good。
#[derive(Debug, Clone)]
pub struct StatusCodeFilter {
    codes: HashSet<u32>,
}

impl StatusCodeFilter {
    /// 解析附加状态码（十进制或 `0x` 前缀十六进制）。
    pub fn new<S: AsRef<str>>(extra: &[S]) -> OpcUaResult<Self> {
        let mut codes = HashSet::with_capacity(extra.len() + 1);
        codes.insert(STATUS_GOOD);
        for raw in extra {
            codes.insert(parse_status_code(raw.as_ref())?);
        }
        Ok(Self { codes })
    }

    /// 状态码是否在白名单内。
    #[inline]
    pub fn is_ok(&self, code: u32) -> bool {
        self.codes.contains(&code)
    }
}

impl Default for StatusCodeFilter {
    fn default() -> Self {
        Self {
            codes: HashSet::from([STATUS_GOOD]),
        }
    }
}

fn parse_status_code(raw: &str) -> OpcUaResult<u32> {
    let trimmed = raw.trim();
    let parsed = match trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => trimmed.parse::<u32>(),
    };
    parsed.map_err(|e| OpcUaError::config(format!("invalid status code {raw:?}: {e}")))
}

const KNOWN_CODES: &[(u32, &str, &str)] = &[
    (0x0000_0000, "Good", "The operation succeeded."),
    (0x4000_0000, "Uncertain", "The value is uncertain but no specific reason is known."),
    (0x8001_0000, "BadUnexpectedError", "An unexpected error occurred."),
    (0x8002_0000, "BadInternalError", "An internal error occurred as a result of a programming or configuration error."),
    (0x8003_0000, "BadOutOfMemory", "Not enough memory to complete the operation."),
    (0x8005_0000, "BadCommunicationError", "A low level communication error occurred."),
    (0x800A_0000, "BadTimeout", "The operation timed out."),
    (0x8025_0000, "BadSessionIdInvalid", "The session id is not valid."),
    (0x8026_0000, "BadSessionClosed", "The session was closed by the client."),
    (0x8031_0000, "BadNoCommunication", "Communication with the data source is defined, but not established, and there is no last known value available."),
    (0x8032_0000, "BadWaitingForInitialData", "Waiting for the server to obtain values from the underlying data source."),
    (0x8033_0000, "BadNodeIdInvalid", "The syntax of the node id is not valid."),
    (0x8034_0000, "BadNodeIdUnknown", "The node id refers to a node that does not exist in the server address space."),
    (0x8035_0000, "BadAttributeIdInvalid", "The attribute is not supported for the specified Node."),
    (0x803A_0000, "BadNotReadable", "The access level does not allow reading or subscribing to the Node."),
    (0x808A_0000, "BadNotConnected", "The variable should receive its value from another variable, but has never been configured to do so."),
    (0x808B_0000, "BadDeviceFailure", "There has been a failure in the device/data source that generates the value that has affected the value."),
    (0x808C_0000, "BadSensorFailure", "There has been a failure in the sensor from which the value is derived by the device/data source."),
    (0x808D_0000, "BadOutOfService", "The source of the data is not operational."),
];

/// `Quality` 字段文本：`<描述> <名称> (0x<hex>)`，未知码为 `Status (0x<hex>)`。
pub fn quality_text(code: u32) -> String {
    // 低 16 位为信息位，查表只看高位
    let base = code & 0xFFFF_0000;
    match KNOWN_CODES.iter().find(|(c, _, _)| *c == base) {
        Some((_, name, description)) => format!("{description} {name} (0x{code:X})"),
        None => format!("Status (0x{code:X})"),
    }
}

/// 严重度为 Good（高两位为 0）。
#[inline]
pub fn is_good(code: u32) -> bool {
    code & 0xC000_0000 == 0
}
