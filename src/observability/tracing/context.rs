//! W3C trace context identifiers and header propagation.

use std::collections::HashMap;
use std::fmt;

use rand::Rng;
use thiserror::Error;

pub const TRACEPARENT_HEADER: &str = "traceparent";
pub const TRACESTATE_HEADER: &str = "tracestate";

const SUPPORTED_VERSION: &str = "00";
const FLAG_SAMPLED: u8 = 0x01;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TraceContextError {
    #[error("malformed traceparent header: {0}")]
    Malformed(&'static str),

    #[error("unsupported traceparent version {0}")]
    UnsupportedVersion(String),

    #[error("trace id and span id must not be all zeros")]
    ZeroId,
}

/// 16-byte trace identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TraceId([u8; 16]);

impl TraceId {
    pub fn random() -> Self {
        let mut rng = rand::thread_rng();
        loop {
            let bytes: [u8; 16] = rng.gen();
            if bytes != [0; 16] {
                return Self(bytes);
            }
        }
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn to_bytes(self) -> [u8; 16] {
        self.0
    }

    pub fn from_hex(hex: &str) -> Result<Self, TraceContextError> {
        let bytes = decode_hex::<16>(hex).ok_or(TraceContextError::Malformed("trace id"))?;
        if bytes == [0; 16] {
            return Err(TraceContextError::ZeroId);
        }
        Ok(Self(bytes))
    }

    /// Lower 64 bits, the part the ratio sampler looks at.
    pub fn low_u64(&self) -> u64 {
        let mut low = [0u8; 8];
        low.copy_from_slice(&self.0[8..]);
        u64::from_be_bytes(low)
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_hex(f, &self.0)
    }
}

/// 8-byte span identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpanId([u8; 8]);

impl SpanId {
    pub fn random() -> Self {
        let mut rng = rand::thread_rng();
        loop {
            let bytes: [u8; 8] = rng.gen();
            if bytes != [0; 8] {
                return Self(bytes);
            }
        }
    }

    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    pub fn from_hex(hex: &str) -> Result<Self, TraceContextError> {
        let bytes = decode_hex::<8>(hex).ok_or(TraceContextError::Malformed("span id"))?;
        if bytes == [0; 8] {
            return Err(TraceContextError::ZeroId);
        }
        Ok(Self(bytes))
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_hex(f, &self.0)
    }
}

/// Propagated parent context of a span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceContext {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub sampled: bool,
    /// Vendor state, passed through untouched.
    pub trace_state: Option<String>,
}

impl TraceContext {
    pub fn new(trace_id: TraceId, span_id: SpanId, sampled: bool) -> Self {
        Self {
            trace_id,
            span_id,
            sampled,
            trace_state: None,
        }
    }

    pub fn to_traceparent(&self) -> String {
        let flags = if self.sampled { FLAG_SAMPLED } else { 0 };
        format!("{}-{}-{}-{:02x}", SUPPORTED_VERSION, self.trace_id, self.span_id, flags)
    }

    /// Parse `00-<32 hex>-<16 hex>-<2 hex>`.
    pub fn from_traceparent(header: &str) -> Result<Self, TraceContextError> {
        let mut parts = header.trim().split('-');
        let (Some(version), Some(trace_id), Some(span_id), Some(flags)) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(TraceContextError::Malformed("expected four fields"));
        };
        if parts.next().is_some() {
            return Err(TraceContextError::Malformed("too many fields"));
        }
        if version.len() != 2 {
            return Err(TraceContextError::Malformed("version"));
        }
        if version != SUPPORTED_VERSION {
            return Err(TraceContextError::UnsupportedVersion(version.to_string()));
        }
        if trace_id.len() != 32 || span_id.len() != 16 || flags.len() != 2 {
            return Err(TraceContextError::Malformed("field length"));
        }

        let trace_id = TraceId::from_hex(trace_id)?;
        let span_id = SpanId::from_hex(span_id)?;
        let flags = decode_hex::<1>(flags).ok_or(TraceContextError::Malformed("flags"))?[0];

        Ok(Self::new(trace_id, span_id, flags & FLAG_SAMPLED != 0))
    }

    pub fn with_trace_state(mut self, state: impl Into<String>) -> Self {
        self.trace_state = Some(state.into());
        self
    }

    /// Write `traceparent` (and `tracestate` when present) into a header map.
    pub fn inject(&self, headers: &mut HashMap<String, String>) {
        headers.insert(TRACEPARENT_HEADER.to_string(), self.to_traceparent());
        if let Some(state) = &self.trace_state {
            headers.insert(TRACESTATE_HEADER.to_string(), state.clone());
        }
    }

    /// Read a context from a header map; header names are matched case-insensitively.
    pub fn extract(headers: &HashMap<String, String>) -> Result<Option<Self>, TraceContextError> {
        let lookup = |name: &str| {
            headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.as_str())
        };
        let Some(parent) = lookup(TRACEPARENT_HEADER) else {
            return Ok(None);
        };
        let mut ctx = Self::from_traceparent(parent)?;
        ctx.trace_state = lookup(TRACESTATE_HEADER)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        Ok(Some(ctx))
    }
}

fn write_hex(f: &mut fmt::Formatter<'_>, bytes: &[u8]) -> fmt::Result {
    for b in bytes {
        write!(f, "{:02x}", b)?;
    }
    Ok(())
}

fn decode_hex<const N: usize>(hex: &str) -> Option<[u8; N]> {
    let lower_hex = |b: u8| b.is_ascii_digit() || (b'a'..=b'f').contains(&b);
    if hex.len() != N * 2 || !hex.bytes().all(lower_hex) {
        return None;
    }
    let mut out = [0u8; N];
    for (i, slot) in out.iter_mut().enumerate() {
        *slot = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).ok()?;
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";

    #[test]
    fn test_parse_traceparent() {
        let ctx = TraceContext::from_traceparent(HEADER).unwrap();
        assert_eq!(ctx.trace_id.to_string(), "4bf92f3577b34da6a3ce929d0e0e4736");
        assert_eq!(ctx.span_id.to_string(), "00f067aa0ba902b7");
        assert!(ctx.sampled);
        assert_eq!(ctx.to_traceparent(), HEADER);
    }

    #[test]
    fn test_rejects_bad_headers() {
        assert_eq!(
            TraceContext::from_traceparent(
                "00-00000000000000000000000000000000-00f067aa0ba902b7-01"
            ),
            Err(TraceContextError::ZeroId)
        );
        assert!(matches!(
            TraceContext::from_traceparent(
                "01-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01"
            ),
            Err(TraceContextError::UnsupportedVersion(_))
        ));
        let uppercase = "00-4BF92F3577B34DA6A3CE929D0E0E4736-00f067aa0ba902b7-01";
        assert!(TraceContext::from_traceparent(uppercase).is_err());
        assert!(TraceContext::from_traceparent("00-abc-def-01").is_err());
        assert!(TraceContext::from_traceparent("garbage").is_err());
    }

    #[test]
    fn test_inject_extract_carries_tracestate() {
        let ctx = TraceContext::new(TraceId::random(), SpanId::random(), false)
            .with_trace_state("vendor=abc");
        let mut headers = HashMap::new();
        ctx.inject(&mut headers);
        assert!(headers["traceparent"].ends_with("-00"));

        let mut upper = HashMap::new();
        for (k, v) in headers {
            upper.insert(k.to_uppercase(), v);
        }
        let extracted = TraceContext::extract(&upper).unwrap().unwrap();
        assert_eq!(extracted, ctx);
    }

    #[test]
    fn test_extract_without_header() {
        assert_eq!(TraceContext::extract(&HashMap::new()), Ok(None));
    }
}
