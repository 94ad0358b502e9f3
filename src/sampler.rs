/// Picks every Nth frame for inference. Frame indices start at 1.
#[derive(Debug, Clone, Copy)]
pub struct FrameSampler {
    every: u64,
}

impl FrameSampler {
    pub fn new(every: u64) -> Self {
        Self {
            every: every.max(1),
        }
    }

    pub fn should_process(&self, frame_index: u64) -> bool {
        frame_index % self.every == 0
    }
}

impl Default for FrameSampler {
    fn default() -> Self {
        Self::new(3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_sampler_matches_modulo_three() {
        let sampler = FrameSampler::default();
        for i in 0..300 {
            assert_eq!(sampler.should_process(i), i % 3 == 0, "frame {}", i);
        }
    }

    #[test]
    fn test_first_nine_frames() {
        let sampler = FrameSampler::default();
        let picked: Vec<u64> = (1..=9).filter(|i| sampler.should_process(*i)).collect();
        assert_eq!(picked, vec![3, 6, 9]);
    }

    #[test]
    fn test_zero_is_clamped_to_every_frame() {
        let sampler = FrameSampler::new(0);
        assert!((1..10).all(|i| sampler.should_process(i)));
    }
}
