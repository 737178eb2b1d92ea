//! 输出插件接口和注册表
//!
//! 播放引擎只依赖 `AudioOutput` trait；具体后端由注册表按名称创建。
//! 注册表在启动时构造一次，之后只读。

use std::collections::BTreeMap;
use std::time::Duration;

use crate::audio::{AudioFormat, Clock, ClockError, StatsReport, SystemClock};
use crate::config::{ConfigBlock, ConfigError, MulticastConfig};
use crate::net::{TransportSink, UdpMulticastSink};

use super::session::{OutputError, OutputSession};

/// 输出生命周期契约
///
/// open → (play/delay)* → cancel? → close
pub trait AudioOutput: Send {
    /// 插件名称
    fn name(&self) -> &'static str;

    fn open(&mut self, format: &AudioFormat) -> Result<(), OutputError>;

    /// 返回实际消费的字节数
    fn play(&mut self, chunk: &[u8]) -> Result<usize, OutputError>;

    fn delay(&self) -> Result<Duration, OutputError>;

    fn cancel(&mut self) -> Result<(), OutputError>;

    fn close(&mut self);

    /// 输出统计（不支持时为 None）
    fn report(&self) -> Option<StatsReport> {
        None
    }
}

impl<C: Clock + Clone + 'static> AudioOutput for OutputSession<C> {
    fn name(&self) -> &'static str {
        MULTICAST_PLUGIN
    }

    fn open(&mut self, format: &AudioFormat) -> Result<(), OutputError> {
        OutputSession::open(self, format)
    }

    fn play(&mut self, chunk: &[u8]) -> Result<usize, OutputError> {
        OutputSession::play(self, chunk)
    }

    fn delay(&self) -> Result<Duration, OutputError> {
        OutputSession::delay(self)
    }

    fn cancel(&mut self) -> Result<(), OutputError> {
        OutputSession::cancel(self)
    }

    fn close(&mut self) {
        OutputSession::close(self)
    }

    fn report(&self) -> Option<StatsReport> {
        Some(OutputSession::report(self))
    }
}

/// 创建输出失败
#[derive(Debug, thiserror::Error)]
pub enum CreateError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Clock(#[from] ClockError),
    #[error("failed to set up transport: {0}")]
    Transport(#[from] std::io::Error),
}

/// 输出工厂
pub type OutputFactory = fn(&ConfigBlock) -> Result<Box<dyn AudioOutput>, CreateError>;

pub const MULTICAST_PLUGIN: &str = "multicast";

/// 名称 → 工厂
pub struct OutputRegistry {
    factories: BTreeMap<&'static str, OutputFactory>,
}

impl OutputRegistry {
    /// 空注册表
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// 带内置插件的注册表
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(MULTICAST_PLUGIN, create_multicast);
        registry
    }

    /// 注册插件，同名插件会被替换
    pub fn register(&mut self, name: &'static str, factory: OutputFactory) {
        if self.factories.insert(name, factory).is_some() {
            log::debug!("Output plugin \"{}\" replaced", name);
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.factories.keys().copied()
    }

    /// 按名称创建输出
    pub fn create(
        &self,
        name: &str,
        block: &ConfigBlock,
    ) -> Result<Box<dyn AudioOutput>, CreateError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| ConfigError::UnknownPlugin(name.to_string()))?;
        factory(block)
    }
}

impl Default for OutputRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

/// 组播输出工厂：系统时钟 + UDP 发送端（sync 模式下不创建 socket）
fn create_multicast(block: &ConfigBlock) -> Result<Box<dyn AudioOutput>, CreateError> {
    let config = MulticastConfig::from_block(block)?;
    let clock = SystemClock::new(config.clock)?;

    let sink: Option<Box<dyn TransportSink>> = if config.sync_only {
        None
    } else {
        Some(Box::new(UdpMulticastSink::connect(config.target(), config.ttl)?))
    };

    Ok(Box::new(OutputSession::new(config, clock, sink)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::NetworkPacket;
    use std::net::UdpSocket;

    #[test]
    fn test_unknown_plugin() {
        let registry = OutputRegistry::with_builtin();
        let result = registry.create("alsa", &ConfigBlock::new());
        assert!(matches!(
            result,
            Err(CreateError::Config(ConfigError::UnknownPlugin(ref name))) if name == "alsa"
        ));
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["multicast"]);
    }

    #[test]
    fn test_sync_only_output() {
        let registry = OutputRegistry::default();
        let block = ConfigBlock::new().with("sync", "yes");
        let mut output = registry.create(MULTICAST_PLUGIN, &block).unwrap();
        assert_eq!(output.name(), "multicast");

        assert!(output.open(&AudioFormat::s16(1, 48000)).is_err());
        output.open(&AudioFormat::s16(2, 48000)).unwrap();

        let written = output.play(&[0u8; 1500]).unwrap();
        assert_eq!(written, 1024);
        assert!(output.delay().unwrap() > Duration::ZERO);

        output.cancel().unwrap();
        assert_eq!(output.delay().unwrap(), Duration::ZERO);
        output.close();

        let report = output.report().unwrap();
        assert_eq!(report.frames_completed, 1);
        assert_eq!(report.packets_sent, 0);
    }

    #[test]
    fn test_udp_output_end_to_end() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let port = receiver.local_addr().unwrap().port();

        let block = ConfigBlock::new()
            .with("address", "127.0.0.1")
            .with("port", port.to_string())
            .with("block_size", "64")
            .with("transmission_gap", "1000");
        let mut output = OutputRegistry::with_builtin()
            .create(MULTICAST_PLUGIN, &block)
            .unwrap();
        output.open(&AudioFormat::s16(2, 48000)).unwrap();

        let frame: Vec<u8> = (0..256).map(|i| i as u8).collect();
        assert_eq!(output.play(&frame).unwrap(), 256);

        let mut buf = [0u8; 1024];
        let n = receiver.recv(&mut buf).unwrap();
        let packet = NetworkPacket::decode(&buf[..n]).unwrap();
        assert_eq!(packet.header.sequence, 1);
        assert_eq!(packet.header.stream_id, port as u32);
        assert_eq!(packet.payload, &frame[..]);

        output.close();
    }
}
