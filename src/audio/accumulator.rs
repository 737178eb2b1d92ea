//! 帧累积器
//!
//! 把任意长度的 PCM 写入拼成固定大小的帧。
//! 调用方的写入粒度不受控制：一次写入可能不足一帧，也可能跨越帧边界。
//! 跨越边界时只消费填满当前帧所需的字节，剩余部分由调用方重新提交。

/// `accept` 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accepted {
    /// 实际消费的字节数
    pub consumed: usize,
    /// 当前帧是否已满
    pub frame_ready: bool,
}

/// 固定大小帧累积器
pub struct FrameAccumulator {
    /// 预分配的帧缓冲区，长度恒为 frame_size
    buffer: Box<[u8]>,
    /// 已填充字节数
    len: usize,
}

impl FrameAccumulator {
    /// 创建指定帧大小（字节）的累积器
    pub fn new(frame_size: usize) -> Self {
        assert!(frame_size > 0, "frame size must be positive");
        Self {
            buffer: vec![0u8; frame_size].into_boxed_slice(),
            len: 0,
        }
    }

    #[inline]
    pub fn frame_size(&self) -> usize {
        self.buffer.len()
    }

    /// 当前未完成帧中的字节数
    #[inline]
    pub fn pending(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len == self.buffer.len()
    }

    /// 吸收一块数据
    ///
    /// 帧已满时（上一帧尚未 `clear()`）不消费任何字节，并再次报告 frame_ready
    pub fn accept(&mut self, chunk: &[u8]) -> Accepted {
        let space = self.buffer.len() - self.len;
        let to_copy = chunk.len().min(space);

        self.buffer[self.len..self.len + to_copy].copy_from_slice(&chunk[..to_copy]);
        self.len += to_copy;

        Accepted {
            consumed: to_copy,
            frame_ready: self.is_full(),
        }
    }

    /// 已完成的帧；未满时返回 None
    pub fn frame(&self) -> Option<&[u8]> {
        if self.is_full() {
            Some(&self.buffer)
        } else {
            None
        }
    }

    /// 丢弃当前内容（已完成的帧或未完成的部分帧）
    #[inline]
    pub fn clear(&mut self) {
        self.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(len: usize, seed: u8) -> Vec<u8> {
        (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
    }

    #[test]
    fn test_partial_then_complete() {
        let mut acc = FrameAccumulator::new(512);
        let data = pattern(512, 7);

        let r = acc.accept(&data[..300]);
        assert_eq!(r, Accepted { consumed: 300, frame_ready: false });
        assert_eq!(acc.pending(), 300);
        assert!(acc.frame().is_none());

        let r = acc.accept(&data[300..]);
        assert_eq!(r, Accepted { consumed: 212, frame_ready: true });
        assert_eq!(acc.frame().unwrap(), &data[..]);
    }

    #[test]
    fn test_oversized_chunk_consumes_only_space() {
        let mut acc = FrameAccumulator::new(16);
        let data = pattern(40, 1);

        acc.accept(&data[..10]);
        let r = acc.accept(&data[10..]);
        assert_eq!(r.consumed, 6);
        assert!(r.frame_ready);
        assert_eq!(acc.frame().unwrap(), &data[..16]);
    }

    #[test]
    fn test_full_buffer_refuses_more() {
        let mut acc = FrameAccumulator::new(4);
        assert!(acc.accept(&[1, 2, 3, 4]).frame_ready);

        let r = acc.accept(&[5, 6]);
        assert_eq!(r, Accepted { consumed: 0, frame_ready: true });
        assert_eq!(acc.frame().unwrap(), &[1, 2, 3, 4]);

        acc.clear();
        assert_eq!(acc.pending(), 0);
        assert_eq!(acc.accept(&[5, 6]).consumed, 2);
    }

    #[test]
    fn test_empty_chunk() {
        let mut acc = FrameAccumulator::new(8);
        assert_eq!(acc.accept(&[]), Accepted { consumed: 0, frame_ready: false });
    }

    #[test]
    fn test_irregular_writes_yield_in_order_frames() {
        const FRAME: usize = 64;
        let frames = 7;
        let data = pattern(FRAME * frames, 3);
        let sizes = [1, 13, 64, 100, 5, 27, 200, 2, 63, 65];

        let mut acc = FrameAccumulator::new(FRAME);
        let mut emitted: Vec<Vec<u8>> = Vec::new();
        let mut offset = 0;
        let mut i = 0;

        while offset < data.len() {
            let end = (offset + sizes[i % sizes.len()]).min(data.len());
            i += 1;
            // 调用方负责循环提交剩余部分
            let mut chunk = &data[offset..end];
            while !chunk.is_empty() {
                let r = acc.accept(chunk);
                chunk = &chunk[r.consumed..];
                offset += r.consumed;
                if r.frame_ready {
                    emitted.push(acc.frame().unwrap().to_vec());
                    acc.clear();
                }
            }
        }

        assert_eq!(emitted.len(), frames);
        for (n, frame) in emitted.iter().enumerate() {
            assert_eq!(&frame[..], &data[n * FRAME..(n + 1) * FRAME]);
        }
        assert_eq!(acc.pending(), 0);
    }
}
