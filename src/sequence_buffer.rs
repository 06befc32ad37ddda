use anyhow::bail;

/// Wrapping comparison of 16-bit sequence numbers: `a` is newer than `b` if it is ahead of `b`
///  by less than half the sequence space.
pub fn is_sequence_newer(a: u16, b: u16) -> bool {
    (a.wrapping_sub(b) as i16) > 0
}

/// A fixed-capacity map from sequence number to value, addressed by `sequence % capacity`.
///
/// Every slot remembers the sequence it was written for, so a lookup can tell a live entry
///  apart from a slot that was never written or that was recycled for a later sequence. There
///  is no explicit removal: entries are evicted only by being overwritten.
pub struct SequenceRingBuffer<T> {
    entries: Vec<Option<(u16, T)>>,
    last_added: Option<u16>,
}

impl<T> SequenceRingBuffer<T> {
    /// `capacity` must be a power of two, so that slot assignment is consistent across sequence
    ///  wrap-around, and larger than the 32 sequences an ack bitmask reaches back.
    pub fn new(capacity: usize) -> anyhow::Result<SequenceRingBuffer<T>> {
        if !capacity.is_power_of_two() || capacity <= 32 || capacity > u16::MAX as usize + 1 {
            bail!("ring buffer capacity must be a power of two in 64..=65536, was {}", capacity);
        }

        let mut entries = Vec::with_capacity(capacity);
        entries.resize_with(capacity, || None);
        Ok(SequenceRingBuffer {
            entries,
            last_added: None,
        })
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    fn slot(&self, sequence: u16) -> usize {
        sequence as usize % self.entries.len()
    }

    /// Stores `value` for `sequence`, replacing whatever occupied the slot.
    pub fn put(&mut self, sequence: u16, value: T) {
        let slot = self.slot(sequence);
        self.entries[slot] = Some((sequence, value));
        self.last_added = Some(sequence);
    }

    pub fn get(&self, sequence: u16) -> Option<&T> {
        match &self.entries[self.slot(sequence)] {
            Some((s, value)) if *s == sequence => Some(value),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, sequence: u16) -> Option<&mut T> {
        let slot = self.slot(sequence);
        match &mut self.entries[slot] {
            Some((s, value)) if *s == sequence => Some(value),
            _ => None,
        }
    }

    pub fn contains(&self, sequence: u16) -> bool {
        self.get(sequence).is_some()
    }

    /// the sequence of the most recent [Self::put]
    pub fn last_added(&self) -> Option<u16> {
        self.last_added
    }

    pub fn clear(&mut self) {
        self.entries.iter_mut().for_each(|e| *e = None);
        self.last_added = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::simple(2, 1, true)]
    #[case::equal(5, 5, false)]
    #[case::older(1, 2, false)]
    #[case::across_wrap(0, 65535, true)]
    #[case::across_wrap_reverse(65535, 0, false)]
    #[case::almost_half(32767, 0, true)]
    #[case::exactly_half(32768, 0, false)]
    fn test_is_sequence_newer(#[case] a: u16, #[case] b: u16, #[case] expected: bool) {
        assert_eq!(is_sequence_newer(a, b), expected);
    }

    #[rstest]
    #[case::too_small(32)]
    #[case::not_power_of_two(100)]
    #[case::zero(0)]
    #[case::too_big(131072)]
    fn test_invalid_capacity(#[case] capacity: usize) {
        assert!(SequenceRingBuffer::<u8>::new(capacity).is_err());
    }

    #[test]
    fn test_put_get() {
        let mut buf = SequenceRingBuffer::new(64).unwrap();
        assert_eq!(buf.get(3), None);
        assert_eq!(buf.last_added(), None);

        buf.put(3, "a");
        buf.put(4, "b");
        assert_eq!(buf.get(3), Some(&"a"));
        assert_eq!(buf.get(4), Some(&"b"));
        assert_eq!(buf.get(5), None);
        assert_eq!(buf.last_added(), Some(4));

        *buf.get_mut(3).unwrap() = "c";
        assert_eq!(buf.get(3), Some(&"c"));
    }

    #[rstest]
    #[case::start(0)]
    #[case::middle(100)]
    #[case::before_wrap(65500)]
    fn test_wraparound_evicts(#[case] sequence: u16) {
        let mut buf = SequenceRingBuffer::new(64).unwrap();
        buf.put(sequence, 1);
        buf.put(sequence.wrapping_add(64), 2);

        assert_eq!(buf.get(sequence), None);
        assert!(buf.get_mut(sequence).is_none());
        assert_eq!(buf.get(sequence.wrapping_add(64)), Some(&2));
    }

    #[test]
    fn test_slots_stay_consistent_across_u16_wrap() {
        let mut buf = SequenceRingBuffer::new(256).unwrap();
        buf.put(65535, 'x');
        buf.put(0, 'y');
        assert_eq!(buf.get(65535), Some(&'x'));
        assert_eq!(buf.get(0), Some(&'y'));
    }

    #[test]
    fn test_clear() {
        let mut buf = SequenceRingBuffer::new(64).unwrap();
        buf.put(1, ());
        buf.clear();
        assert!(!buf.contains(1));
        assert_eq!(buf.last_added(), None);
    }
}
