//! Trace sampling policy.
//!
//! Mutations are rare and valuable traces; reads are abundant noise.
//! [`MutationSampler`] force-samples spans whose name starts with a
//! mutating HTTP verb and leaves the rest to ratio-based sampling.

use opentelemetry::trace::{
    Link, SamplingDecision, SamplingResult, SpanKind, TraceContextExt, TraceId,
};
use opentelemetry::{Context, KeyValue};
use opentelemetry_sdk::trace::{Sampler, ShouldSample};

const MUTATING_PREFIXES: [&str; 3] = ["POST ", "PUT ", "DELETE "];

/// Samples every `POST `/`PUT `/`DELETE ` span not on the deny-list;
/// everything else falls through to `TraceIdRatioBased`.
#[derive(Debug, Clone)]
pub struct MutationSampler {
    fallback: Sampler,
    deny: Vec<String>,
}

impl MutationSampler {
    /// `ratio` drives the fallback sampler; `deny` lists exact span
    /// names (e.g. `"POST /node/status"`) excluded from force-sampling.
    pub fn new(ratio: f64, deny: Vec<String>) -> Self {
        Self {
            fallback: Sampler::TraceIdRatioBased(ratio),
            deny,
        }
    }
}

impl ShouldSample for MutationSampler {
    fn should_sample(
        &self,
        parent_context: Option<&Context>,
        trace_id: TraceId,
        name: &str,
        span_kind: &SpanKind,
        attributes: &[KeyValue],
        links: &[Link],
    ) -> SamplingResult {
        let mutating = MUTATING_PREFIXES
            .iter()
            .any(|prefix| name.starts_with(prefix));
        if mutating && !self.deny.iter().any(|denied| denied == name) {
            return SamplingResult {
                decision: SamplingDecision::RecordAndSample,
                attributes: Vec::new(),
                trace_state: parent_context
                    .map(|cx| cx.span().span_context().trace_state().clone())
                    .unwrap_or_default(),
            };
        }
        self.fallback
            .should_sample(parent_context, trace_id, name, span_kind, attributes, links)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decision(sampler: &MutationSampler, name: &str) -> SamplingDecision {
        sampler
            .should_sample(
                None,
                TraceId::from_bytes(1u128.to_be_bytes()),
                name,
                &SpanKind::Server,
                &[],
                &[],
            )
            .decision
    }

    #[test]
    fn mutations_are_always_sampled() {
        let sampler = MutationSampler::new(0.0, Vec::new());
        assert_eq!(
            decision(&sampler, "POST /apps"),
            SamplingDecision::RecordAndSample
        );
        assert_eq!(
            decision(&sampler, "PUT /apps/{name}/{team}"),
            SamplingDecision::RecordAndSample
        );
        assert_eq!(
            decision(&sampler, "DELETE /apps/{name}"),
            SamplingDecision::RecordAndSample
        );
    }

    #[test]
    fn reads_follow_the_ratio() {
        let drop_all = MutationSampler::new(0.0, Vec::new());
        assert_eq!(decision(&drop_all, "GET /apps"), SamplingDecision::Drop);

        let keep_all = MutationSampler::new(1.0, Vec::new());
        assert_eq!(
            decision(&keep_all, "GET /apps"),
            SamplingDecision::RecordAndSample
        );
    }

    #[test]
    fn denied_mutations_fall_back() {
        let sampler = MutationSampler::new(0.0, vec!["POST /node/status".to_string()]);
        assert_eq!(
            decision(&sampler, "POST /node/status"),
            SamplingDecision::Drop
        );
        assert_eq!(
            decision(&sampler, "POST /apps"),
            SamplingDecision::RecordAndSample
        );
    }
}
