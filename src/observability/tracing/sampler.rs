//! Head sampling.
//!
//! The decision is made once, at the root span, from the trace id. Child
//! spans always take the parent's decision.

use crate::observability::tracing::context::TraceId;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sampler {
    ratio: f64,
}

impl Sampler {
    /// Trace-id-ratio sampler; out-of-range ratios are clamped, NaN samples nothing.
    pub fn ratio(ratio: f64) -> Self {
        let ratio = if ratio.is_nan() { 0.0 } else { ratio.clamp(0.0, 1.0) };
        Self { ratio }
    }

    pub fn always_on() -> Self {
        Self { ratio: 1.0 }
    }

    pub fn always_off() -> Self {
        Self { ratio: 0.0 }
    }

    pub fn rate(&self) -> f64 {
        self.ratio
    }

    /// Decide whether a span is recorded. `parent_sampled` is the parent's flag, if any.
    pub fn should_sample(&self, trace_id: &TraceId, parent_sampled: Option<bool>) -> bool {
        if let Some(sampled) = parent_sampled {
            return sampled;
        }
        if self.ratio >= 1.0 {
            return true;
        }
        if self.ratio <= 0.0 {
            return false;
        }
        let bound = self.ratio * u64::MAX as f64;
        (trace_id.low_u64() as f64) < bound
    }
}

impl Default for Sampler {
    fn default() -> Self {
        Self::always_on()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id_with_low(low: u64) -> TraceId {
        let mut bytes = [0u8; 16];
        bytes[0] = 1;
        bytes[8..].copy_from_slice(&low.to_be_bytes());
        TraceId::from_bytes(bytes)
    }

    #[test]
    fn test_extremes() {
        let id = TraceId::random();
        assert!(Sampler::always_on().should_sample(&id, None));
        assert!(!Sampler::always_off().should_sample(&id, None));
        assert_eq!(Sampler::ratio(7.0).rate(), 1.0);
        assert_eq!(Sampler::ratio(f64::NAN).rate(), 0.0);
    }

    #[test]
    fn test_ratio_is_deterministic_per_trace() {
        let sampler = Sampler::ratio(0.5);
        assert!(sampler.should_sample(&id_with_low(10), None));
        assert!(!sampler.should_sample(&id_with_low(u64::MAX - 10), None));
        let id = TraceId::random();
        assert_eq!(sampler.should_sample(&id, None), sampler.should_sample(&id, None));
    }

    #[test]
    fn test_children_inherit() {
        let id = TraceId::random();
        assert!(Sampler::always_off().should_sample(&id, Some(true)));
        assert!(!Sampler::always_on().should_sample(&id, Some(false)));
    }
}
