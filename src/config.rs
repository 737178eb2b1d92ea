//! 输出配置
//!
//! ConfigBlock 是一个输出块的 name/value 参数（带行号和已读标记），
//! MulticastConfig 从中读取带类型的配置并填充默认值。

use std::cell::Cell;
use std::net::{IpAddr, SocketAddr};

use crate::audio::format::StreamConfig;
use crate::audio::pacer::period_for;
use crate::audio::timing::{ClockSource, Nanos, NANOS_PER_MILLI};
use crate::net::packet::HEADER_LEN;

/// 配置错误
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("not a valid number for \"{name}\" in line {line}: {value}")]
    InvalidNumber {
        name: String,
        value: String,
        line: u32,
    },
    #[error("not a positive number for \"{name}\" in line {line}: {value}")]
    NegativeNumber {
        name: String,
        value: String,
        line: u32,
    },
    #[error("{name} is not a boolean value (yes, true, 1) or (no, false, 0) on line {line}")]
    InvalidBool { name: String, line: u32 },
    #[error("invalid value for \"{name}\": {reason}")]
    InvalidValue { name: String, reason: String },
    #[error("unknown output plugin \"{0}\"")]
    UnknownPlugin(String),
}

/// 单个块参数
#[derive(Debug, Clone)]
pub struct BlockParam {
    pub name: String,
    pub value: String,
    pub line: u32,
    used: Cell<bool>,
}

/// 输出块参数集合
#[derive(Debug, Clone, Default)]
pub struct ConfigBlock {
    params: Vec<BlockParam>,
}

impl ConfigBlock {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加参数（行号用于错误信息）
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>, line: u32) {
        self.params.push(BlockParam {
            name: name.into(),
            value: value.into(),
            line,
            used: Cell::new(false),
        });
    }

    /// 链式追加，行号按顺序递增
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let line = self.params.len() as u32 + 1;
        self.add(name, value, line);
        self
    }

    /// 查找参数并标记为已读
    pub fn param(&self, name: &str) -> Option<&BlockParam> {
        let param = self.params.iter().find(|p| p.name == name)?;
        param.used.set(true);
        Some(param)
    }

    pub fn get_str<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.param(name).map(|p| p.value.as_str()).unwrap_or(default)
    }

    /// 无符号整数，接受十进制、0x 十六进制、0 开头八进制
    pub fn get_unsigned(&self, name: &str, default: u64) -> Result<u64, ConfigError> {
        match self.param(name) {
            Some(param) => param.unsigned_value(),
            None => Ok(default),
        }
    }

    /// 可选无符号整数
    pub fn get_optional_unsigned(&self, name: &str) -> Result<Option<u64>, ConfigError> {
        self.param(name).map(BlockParam::unsigned_value).transpose()
    }

    pub fn get_bool(&self, name: &str, default: bool) -> Result<bool, ConfigError> {
        match self.param(name) {
            Some(param) => param.bool_value(),
            None => Ok(default),
        }
    }

    /// 从未被读取过的参数（通常是拼写错误）
    pub fn unused(&self) -> Vec<&BlockParam> {
        self.params.iter().filter(|p| !p.used.get()).collect()
    }
}

impl BlockParam {
    pub fn unsigned_value(&self) -> Result<u64, ConfigError> {
        let raw = self.value.trim();
        let (negative, digits) = match raw.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, raw.strip_prefix('+').unwrap_or(raw)),
        };

        let parsed = if let Some(hex) = digits
            .strip_prefix("0x")
            .or_else(|| digits.strip_prefix("0X"))
        {
            u64::from_str_radix(hex, 16)
        } else if digits.len() > 1 && digits.starts_with('0') {
            u64::from_str_radix(&digits[1..], 8)
        } else {
            digits.parse::<u64>()
        };

        let value = parsed.map_err(|_| ConfigError::InvalidNumber {
            name: self.name.clone(),
            value: self.value.clone(),
            line: self.line,
        })?;

        if negative && value != 0 {
            return Err(ConfigError::NegativeNumber {
                name: self.name.clone(),
                value: self.value.clone(),
                line: self.line,
            });
        }
        Ok(value)
    }

    pub fn bool_value(&self) -> Result<bool, ConfigError> {
        match self.value.trim().to_ascii_lowercase().as_str() {
            "yes" | "true" | "1" => Ok(true),
            "no" | "false" | "0" => Ok(false),
            _ => Err(ConfigError::InvalidBool {
                name: self.name.clone(),
                line: self.line,
            }),
        }
    }
}

/// 组播输出配置
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MulticastConfig {
    /// 只做节拍，不发送
    pub sync_only: bool,
    pub address: IpAddr,
    pub port: u16,
    /// 包头中的 stream_id，未配置时使用端口号
    pub stream_id: u32,
    /// 可听时间相对触发时间的提前量
    pub transmission_gap: Nanos,
    /// None 时使用 min(1ms, period / 2)
    pub due_time_slot: Option<Nanos>,
    pub stream: StreamConfig,
    pub ttl: u32,
    pub clock: ClockSource,
}

pub const DEFAULT_ADDRESS: &str = "239.255.77.77";
pub const DEFAULT_PORT: u16 = 4010;
pub const DEFAULT_TRANSMISSION_GAP: Nanos = 500 * NANOS_PER_MILLI;

impl Default for MulticastConfig {
    fn default() -> Self {
        Self {
            sync_only: false,
            address: IpAddr::from([239, 255, 77, 77]),
            port: DEFAULT_PORT,
            stream_id: DEFAULT_PORT as u32,
            transmission_gap: DEFAULT_TRANSMISSION_GAP,
            due_time_slot: None,
            stream: StreamConfig::default(),
            ttl: 1,
            clock: ClockSource::Monotonic,
        }
    }
}

impl MulticastConfig {
    /// 从输出块读取配置
    pub fn from_block(block: &ConfigBlock) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let sync_only = block.get_bool("sync", defaults.sync_only)?;

        let address_str = block.get_str("address", DEFAULT_ADDRESS);
        let address: IpAddr = address_str.parse().map_err(|_| ConfigError::InvalidValue {
            name: "address".into(),
            reason: format!("\"{}\" is not an IP address", address_str),
        })?;

        let port = bounded(block, "port", DEFAULT_PORT as u64, 1, u16::MAX as u64)? as u16;
        let stream_id = bounded(block, "stream_id", port as u64, 0, u32::MAX as u64)? as u32;
        let transmission_gap = bounded(
            block,
            "transmission_gap",
            defaults.transmission_gap as u64,
            0,
            i64::MAX as u64 / 2,
        )? as Nanos;

        let stream = StreamConfig {
            block_size: bounded(block, "block_size", defaults.stream.block_size as u64, 1, 1 << 16)?
                as u32,
            channels: bounded(block, "channels", defaults.stream.channels as u64, 1, 64)? as u16,
            sample_rate: bounded(
                block,
                "sample_rate",
                defaults.stream.sample_rate as u64,
                1,
                768_000,
            )? as u32,
        };

        let due_time_slot = block
            .get_optional_unsigned("due_time_slot")?
            .map(|ns| ns.min(i64::MAX as u64 / 2) as Nanos);
        let ttl = bounded(block, "ttl", defaults.ttl as u64, 0, 255)? as u32;

        let clock_name = block.get_str("clock", "monotonic");
        let clock = ClockSource::from_name(clock_name).ok_or_else(|| ConfigError::InvalidValue {
            name: "clock".into(),
            reason: format!("\"{}\" is not one of monotonic, realtime", clock_name),
        })?;

        let config = Self {
            sync_only,
            address,
            port,
            stream_id,
            transmission_gap,
            due_time_slot,
            stream,
            ttl,
            clock,
        };
        config.validate()?;

        for param in block.unused() {
            log::warn!(
                "Unused output parameter \"{}\" in line {}",
                param.name,
                param.line
            );
        }

        Ok(config)
    }

    /// 检查派生参数
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.period() <= 0 {
            return Err(ConfigError::InvalidValue {
                name: "block_size".into(),
                reason: format!(
                    "{} frames at {}Hz is shorter than 1ns",
                    self.stream.block_size, self.stream.sample_rate
                ),
            });
        }
        if !self.sync_only && self.packet_bytes() > MAX_DATAGRAM {
            return Err(ConfigError::InvalidValue {
                name: "block_size".into(),
                reason: format!(
                    "packet of {} bytes does not fit in a UDP datagram",
                    self.packet_bytes()
                ),
            });
        }
        Ok(())
    }

    /// 组播目标地址
    pub fn target(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }

    /// 每帧周期（纳秒）
    pub fn period(&self) -> Nanos {
        period_for(self.stream.block_size, self.stream.sample_rate)
    }

    /// 完整包大小（字节）
    pub fn packet_bytes(&self) -> usize {
        HEADER_LEN + self.stream.frame_bytes()
    }
}

/// UDP 负载上限
const MAX_DATAGRAM: usize = 65_507;

fn bounded(
    block: &ConfigBlock,
    name: &str,
    default: u64,
    min: u64,
    max: u64,
) -> Result<u64, ConfigError> {
    let value = block.get_unsigned(name, default)?;
    if value < min || value > max {
        return Err(ConfigError::InvalidValue {
            name: name.into(),
            reason: format!("{} is outside {}..={}", value, min, max),
        });
    }
    Ok(value)
}
