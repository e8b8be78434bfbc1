use std::collections::VecDeque;

/// Rolling buffer of recent mono f32 samples sized to
/// `engaged_vad_window_s + 2s`, so a session that transitions into
/// LISTENING can hand the downstream consumer a little pre-roll instead of
/// only audio captured after activation.
pub struct AudioRingBuffer {
    samples: VecDeque<f32>,
    capacity: usize,
}

impl AudioRingBuffer {
    pub fn new(capacity_samples: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity_samples),
            capacity: capacity_samples,
        }
    }

    pub fn push_block(&mut self, block: &[f32]) {
        self.samples.extend(block.iter().copied());
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    pub fn drain_all(&mut self) -> Vec<f32> {
        self.samples.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_oldest_samples_past_capacity() {
        let mut buf = AudioRingBuffer::new(4);
        buf.push_block(&[1.0, 2.0, 3.0]);
        buf.push_block(&[4.0, 5.0]);
        assert_eq!(buf.drain_all(), vec![2.0, 3.0, 4.0, 5.0]);
    }
}
