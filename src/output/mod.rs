//! 输出层
//!
//! - Session: Open/Play/Delay/Cancel/Close 生命周期
//! - Plugin: 输出插件 trait 和按名称创建的注册表

pub mod plugin;
pub mod session;

pub use plugin::{AudioOutput, CreateError, OutputRegistry, MULTICAST_PLUGIN};
pub use session::{OutputError, OutputSession};
