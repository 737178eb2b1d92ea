//! 打包发送
//!
//! 每个完成的帧加上序号和可听时间（触发时间 + 传输提前量）打成一个包交给发送端。
//! 发送失败只上报，不回滚序号：丢一个包不能打乱后续节拍。
//! 可听时间单调不减：Cancel 后节拍重新锚定到 now，可能早于已发出的包，
//! 此时沿用上一个包的可听时间。

use crate::audio::Nanos;

use super::packet::{NetworkPacket, PacketHeader, HEADER_LEN};
use super::transport::{TransportError, TransportSink};

/// 一次发出的包的同步信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Emitted {
    pub sequence: u32,
    pub audible_time: Nanos,
}

pub struct Packetizer {
    sink: Box<dyn TransportSink>,
    stream_id: u32,
    /// 最近一次使用的序号，0 表示尚未发送
    sequence: u32,
    transmission_gap: Nanos,
    /// 最近一次打上的可听时间
    last_audible: Option<Nanos>,
    /// 编码缓冲区（复用，避免每包分配）
    datagram: Vec<u8>,
}

impl Packetizer {
    pub fn new(
        sink: Box<dyn TransportSink>,
        stream_id: u32,
        transmission_gap: Nanos,
        frame_bytes: usize,
    ) -> Self {
        Self {
            sink,
            stream_id,
            sequence: 0,
            transmission_gap,
            last_audible: None,
            datagram: Vec::with_capacity(HEADER_LEN + frame_bytes),
        }
    }

    #[inline]
    pub fn stream_id(&self) -> u32 {
        self.stream_id
    }

    /// 最近一次使用的序号
    #[inline]
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    #[inline]
    pub fn transmission_gap(&self) -> Nanos {
        self.transmission_gap
    }

    /// 打包并发送一帧
    ///
    /// 序号 u32 回绕：u32::MAX 之后是 0
    pub fn emit(&mut self, frame: &[u8], trigger_time: Nanos) -> Result<Emitted, TransportError> {
        self.sequence = self.sequence.wrapping_add(1);
        let mut audible_time = trigger_time + self.transmission_gap;
        if let Some(last) = self.last_audible {
            if audible_time < last {
                log::debug!(
                    "Audible time {} behind previous packet, holding at {}",
                    audible_time,
                    last
                );
                audible_time = last;
            }
        }
        self.last_audible = Some(audible_time);
        let emitted = Emitted {
            sequence: self.sequence,
            audible_time,
        };

        let packet = NetworkPacket::new(
            PacketHeader {
                stream_id: self.stream_id,
                sequence: emitted.sequence,
                audible_time: emitted.audible_time,
            },
            frame,
        );
        packet.encode_into(&mut self.datagram);

        self.sink.send(&self.datagram)?;
        Ok(emitted)
    }

    /// 归还发送端（会话关闭时）
    pub fn into_sink(self) -> Box<dyn TransportSink> {
        self.sink
    }

    /// 测试用：从指定序号继续
    #[cfg(test)]
    pub(crate) fn set_sequence(&mut self, sequence: u32) {
        self.sequence = sequence;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{ManualClock, Pacer};
    use crate::net::transport::MemorySink;

    const GAP: Nanos = 500_000_000;

    fn packetizer() -> (Packetizer, MemorySink) {
        let sink = MemorySink::new();
        (Packetizer::new(Box::new(sink.clone()), 4010, GAP, 8), sink)
    }

    #[test]
    fn test_sequence_and_audible_time() {
        let (mut packetizer, sink) = packetizer();
        let clock = ManualClock::new(10_000);
        let mut pacer = Pacer::new(clock.clone(), 1_000, None);

        let mut last_audible = i64::MIN;
        for n in 1..=50u32 {
            let emitted = packetizer.emit(&[n as u8; 8], pacer.trigger()).unwrap();
            assert_eq!(emitted.sequence, n);
            assert!(emitted.audible_time >= last_audible);
            last_audible = emitted.audible_time;
            // 不规则推进，偶尔脱节
            clock.advance(if n % 10 == 0 { 5_000 } else { 1_000 });
        }

        let datagrams = sink.datagrams();
        assert_eq!(datagrams.len(), 50);
        for (i, datagram) in datagrams.iter().enumerate() {
            let packet = NetworkPacket::decode(datagram).unwrap();
            assert_eq!(packet.header.sequence, i as u32 + 1);
            assert_eq!(packet.header.stream_id, 4010);
            assert_eq!(packet.payload, &[i as u8 + 1; 8]);
        }
    }

    #[test]
    fn test_gap_added_to_trigger() {
        let (mut packetizer, sink) = packetizer();
        let emitted = packetizer.emit(&[0; 8], 1_000).unwrap();
        assert_eq!(emitted.audible_time, 1_000 + GAP);

        let datagram = &sink.datagrams()[0];
        let packet = NetworkPacket::decode(datagram).unwrap();
        assert_eq!(packet.header.audible_time, 1_000 + GAP);
    }

    #[test]
    fn test_audible_time_never_goes_back() {
        let (mut packetizer, sink) = packetizer();
        assert_eq!(packetizer.emit(&[0; 8], 5_000).unwrap().audible_time, 5_000 + GAP);
        // 触发时间回退（Cancel 后重新锚定）
        assert_eq!(packetizer.emit(&[0; 8], 2_000).unwrap().audible_time, 5_000 + GAP);
        assert_eq!(packetizer.emit(&[0; 8], 6_000).unwrap().audible_time, 6_000 + GAP);

        let audible: Vec<i64> = sink
            .datagrams()
            .iter()
            .map(|d| NetworkPacket::decode(d).unwrap().header.audible_time)
            .collect();
        assert_eq!(audible, vec![5_000 + GAP, 5_000 + GAP, 6_000 + GAP]);
    }

    #[test]
    fn test_sequence_wraps() {
        let (mut packetizer, _) = packetizer();
        packetizer.set_sequence(u32::MAX - 1);

        assert_eq!(packetizer.emit(&[0; 8], 0).unwrap().sequence, u32::MAX);
        assert_eq!(packetizer.emit(&[0; 8], 0).unwrap().sequence, 0);
        assert_eq!(packetizer.emit(&[0; 8], 0).unwrap().sequence, 1);
    }

    #[test]
    fn test_failed_send_consumes_sequence() {
        let (mut packetizer, sink) = packetizer();
        packetizer.emit(&[0; 8], 0).unwrap();

        sink.fail_next(1);
        assert!(packetizer.emit(&[0; 8], 0).is_err());
        assert_eq!(packetizer.sequence(), 2);

        assert_eq!(packetizer.emit(&[0; 8], 0).unwrap().sequence, 3);

        let sequences: Vec<u32> = sink
            .datagrams()
            .iter()
            .map(|d| NetworkPacket::decode(d).unwrap().header.sequence)
            .collect();
        assert_eq!(sequences, vec![1, 3]);
    }
}
