//! Record processors
//!
//! The processor is a pluggable per-record stage applied before a record
//! enters the chunk buffer. Returning `Ok(None)` filters the record out
//! silently; an error propagates as a chunk-level failure.

use anyhow::Result;

/// Per-record transform / filter stage
pub trait RecordProcessor<R>: Send + Sync {
    fn process(&self, record: R) -> Result<Option<R>>;
}

/// Identity processor: every record passes through unchanged
///
/// The default stage for the employee import job; replace it to add
/// transformation logic without touching the orchestrator.
pub struct PassthroughProcessor;

impl<R> RecordProcessor<R> for PassthroughProcessor {
    fn process(&self, record: R) -> Result<Option<R>> {
        Ok(Some(record))
    }
}

impl<R, F> RecordProcessor<R> for F
where
    F: Fn(R) -> Result<Option<R>> + Send + Sync,
{
    fn process(&self, record: R) -> Result<Option<R>> {
        self(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passthrough_returns_input() {
        let processor = PassthroughProcessor;
        assert_eq!(processor.process(7u32).unwrap(), Some(7));
    }

    #[test]
    fn test_closure_processor_can_filter() {
        let drop_odd = |n: u32| -> Result<Option<u32>> { Ok(if n % 2 == 0 { Some(n) } else { None }) };

        assert_eq!(RecordProcessor::process(&drop_odd, 2).unwrap(), Some(2));
        assert_eq!(RecordProcessor::process(&drop_odd, 3).unwrap(), None);
    }
}
