/// Simple moving average over the last `N` values, kept in a fixed-size ring.
pub struct RollingAverage<const N: usize> {
    values: [f64; N],
    /// slot for the next value, i.e. the oldest value once the ring is full
    next: usize,
    len: usize,
}

impl<const N: usize> RollingAverage<N> {
    pub fn new() -> Self {
        assert!(N > 0);
        RollingAverage {
            values: [0.0; N],
            next: 0,
            len: 0,
        }
    }

    pub fn add_value(&mut self, value: f64) {
        self.values[self.next] = value;
        self.next = (self.next + 1) % N;
        self.len = (self.len + 1).min(N);
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// `None` until the first value is added
    pub fn mean(&self) -> Option<f64> {
        if self.is_empty() {
            return None;
        }
        // unfilled slots are zero
        let sum: f64 = self.values.iter().sum();
        Some(sum / self.len as f64)
    }
}

impl<const N: usize> Default for RollingAverage<N> {
    fn default() -> Self {
        Self::new()
    }
}
