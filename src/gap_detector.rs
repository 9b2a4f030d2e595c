/// Sequence number gap detection
///
/// Each transport frame carries the sequence number of its first message and a
/// message count, so the next frame is expected to start at `first + count`.
/// Gaps are reported as inclusive ranges of missing message sequence numbers;
/// the detector itself keeps only the next expected number.

#[derive(Debug, Clone, Default)]
pub struct GapDetector {
    next_expected: Option<u64>,
}

impl GapDetector {
    pub fn new() -> Self {
        GapDetector { next_expected: None }
    }

    /// Process one frame's sequence range.
    /// Returns the gap opened by this frame, if any.
    pub fn process(&mut self, first_sequence: u64, message_count: u16) -> Option<(u64, u64)> {
        let gap = match self.next_expected {
            // Replays and heartbeats at or before the expected number are not gaps
            Some(expected) if first_sequence > expected => Some((expected, first_sequence - 1)),
            _ => None,
        };

        let next = first_sequence.wrapping_add(message_count as u64);
        self.next_expected = Some(match self.next_expected {
            Some(expected) => expected.max(next),
            None => next,
        });
        gap
    }

    /// Sequence number the next frame should start at
    pub fn next_expected(&self) -> Option<u64> {
        self.next_expected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_gaps() {
        let mut detector = GapDetector::new();
        let mut seq = 1;
        for count in [3u16, 1, 5, 2] {
            assert_eq!(detector.process(seq, count), None);
            seq += count as u64;
        }
        assert_eq!(detector.next_expected(), Some(12));
    }

    #[test]
    fn test_heartbeat_does_not_advance() {
        let mut detector = GapDetector::new();
        detector.process(10, 2);
        // heartbeat: zero messages, announces the next sequence number
        assert_eq!(detector.process(12, 0), None);
        assert_eq!(detector.process(12, 4), None);
        assert_eq!(detector.next_expected(), Some(16));
    }

    #[test]
    fn test_single_gap() {
        let mut detector = GapDetector::new();
        detector.process(1, 2);
        assert_eq!(detector.process(5, 1), Some((3, 4)));
        assert_eq!(detector.next_expected(), Some(6));
    }

    #[test]
    fn test_multiple_gaps() {
        let mut detector = GapDetector::new();
        detector.process(1, 1);
        assert_eq!(detector.process(5, 1), Some((2, 4)));
        assert_eq!(detector.process(10, 2), Some((6, 9)));
        assert_eq!(detector.process(12, 1), None);
    }

    #[test]
    fn test_replayed_frame_is_ignored() {
        let mut detector = GapDetector::new();
        detector.process(1, 5);
        assert_eq!(detector.process(3, 2), None);
        assert_eq!(detector.next_expected(), Some(6));
        assert_eq!(detector.process(6, 1), None);
    }

    #[test]
    fn test_first_frame_never_a_gap() {
        let mut detector = GapDetector::new();
        assert_eq!(detector.next_expected(), None);
        assert_eq!(detector.process(1_000, 3), None);
    }
}
