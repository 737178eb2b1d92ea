//! 传输端
//!
//! 只负责把编码好的 datagram 发出去：尽力而为，不重试，不等待确认。
//! 重试策略属于更外层。

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::sync::{Arc, Mutex};

/// 传输错误
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("send failed: {0}")]
    Io(#[from] io::Error),
    #[error("short send: {sent} of {len} bytes")]
    ShortSend { sent: usize, len: usize },
}

/// 发送端接口
pub trait TransportSink: Send {
    fn send(&mut self, datagram: &[u8]) -> Result<(), TransportError>;
}

impl<T: TransportSink + ?Sized> TransportSink for Box<T> {
    fn send(&mut self, datagram: &[u8]) -> Result<(), TransportError> {
        (**self).send(datagram)
    }
}

/// UDP 组播发送端
pub struct UdpMulticastSink {
    socket: UdpSocket,
    target: SocketAddr,
}

impl UdpMulticastSink {
    /// 绑定临时端口并 connect 到组播地址
    ///
    /// `ttl` 为组播跳数，1 表示不出本网段
    pub fn connect(target: SocketAddr, ttl: u32) -> io::Result<Self> {
        let bind: SocketAddr = match target.ip() {
            IpAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            IpAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let socket = UdpSocket::bind(bind)?;

        match target.ip() {
            IpAddr::V4(ip) if ip.is_multicast() => {
                socket.set_multicast_ttl_v4(ttl)?;
                // 同机接收端也能收到
                socket.set_multicast_loop_v4(true)?;
            }
            IpAddr::V6(ip) if ip.is_multicast() => {
                socket.set_multicast_loop_v6(true)?;
            }
            _ => {
                log::warn!("{} is not a multicast address, sending unicast", target.ip());
            }
        }

        socket.connect(target)?;
        log::info!(
            "UDP sink connected: {} -> {} (ttl {})",
            socket.local_addr()?,
            target,
            ttl
        );

        Ok(Self { socket, target })
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }
}

impl TransportSink for UdpMulticastSink {
    fn send(&mut self, datagram: &[u8]) -> Result<(), TransportError> {
        let sent = self.socket.send(datagram)?;
        if sent != datagram.len() {
            return Err(TransportError::ShortSend {
                sent,
                len: datagram.len(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    datagrams: Vec<Vec<u8>>,
    fail_next: usize,
}

/// 内存发送端：记录所有 datagram，可注入发送失败
///
/// clone 共享同一份记录，一份交给会话，一份留在测试中检查
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// 接下来 `count` 次发送失败
    pub fn fail_next(&self, count: usize) {
        self.lock().fail_next = count;
    }

    /// 已成功发送的 datagram
    pub fn datagrams(&self) -> Vec<Vec<u8>> {
        self.lock().datagrams.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().datagrams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        // 测试中 panic 导致的 poison 不影响记录本身
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl TransportSink for MemorySink {
    fn send(&mut self, datagram: &[u8]) -> Result<(), TransportError> {
        let mut inner = self.lock();
        if inner.fail_next > 0 {
            inner.fail_next -= 1;
            return Err(TransportError::Io(io::Error::other("injected failure")));
        }
        inner.datagrams.push(datagram.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_failure_injection() {
        let sink = MemorySink::new();
        let mut writer = sink.clone();

        sink.fail_next(1);
        assert!(writer.send(&[1, 2]).is_err());
        assert!(writer.send(&[3, 4]).is_ok());

        assert_eq!(sink.datagrams(), vec![vec![3, 4]]);
    }

    #[test]
    fn test_udp_loopback_delivery() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(std::time::Duration::from_secs(2)))
            .unwrap();
        let target = receiver.local_addr().unwrap();

        let mut sink = UdpMulticastSink::connect(target, 1).unwrap();
        assert_eq!(sink.target(), target);
        sink.send(b"hello").unwrap();

        let mut buf = [0u8; 16];
        let n = receiver.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello");
    }
}
