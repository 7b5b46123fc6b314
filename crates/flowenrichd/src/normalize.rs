//! Sampling rate normalization.
//!
//! Records without a sampling rate are scaled by a configured fallback rate,
//! and that rate is written back into `sampling_rate`. Downstream consumers
//! must treat `normalized` counters of such records as an estimate based on
//! an operator assumption, not a measured rate.

use flow_types::FlowRecord;

/// Scales `bytes` and `packets` by the record's sampling rate, or by
/// `fallback_rate` if the record carries none, and sets `normalized`.
///
/// Counters saturate at `u64::MAX`.
pub fn apply(record: &mut FlowRecord, fallback_rate: u64) {
    if record.sampling_rate == 0 {
        record.sampling_rate = fallback_rate;
    }

    let rate = record.sampling_rate;
    record.bytes = record.bytes.saturating_mul(rate);
    record.packets = record.packets.saturating_mul(rate);
    record.normalized = true;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn record(bytes: u64, packets: u64, sampling_rate: u64) -> FlowRecord {
        FlowRecord {
            bytes,
            packets,
            sampling_rate,
            ..Default::default()
        }
    }

    #[test]
    fn test_explicit_rate() {
        let mut rec = record(100, 1, 10);
        apply(&mut rec, 32);
        assert_eq!(rec, FlowRecord { normalized: true, ..record(1000, 10, 10) });
    }

    #[test]
    fn test_fallback_rate() {
        let mut rec = record(100, 1, 0);
        apply(&mut rec, 32);
        assert_eq!(rec, FlowRecord { normalized: true, ..record(3200, 32, 32) });
    }

    #[test]
    fn test_configured_fallback() {
        let mut rec = record(5, 5, 0);
        apply(&mut rec, 1000);
        assert_eq!((rec.bytes, rec.packets, rec.sampling_rate), (5000, 5000, 1000));
    }

    #[test]
    fn test_saturates() {
        let mut rec = record(u64::MAX / 2, 1, 4);
        apply(&mut rec, 32);
        assert_eq!(rec.bytes, u64::MAX);
        assert_eq!(rec.packets, 4);
    }
}
