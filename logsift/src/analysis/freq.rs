// logsift/src/analysis/freq.rs
//
// Ascending sequence of frequency items with quartile statistics.
// Used by the bot analyser to derive the IP outlier threshold Q3 + c·IQR.

/// Anything carrying a request count.
pub trait FreqInfo {
    fn freq(&self) -> u64;
}

impl FreqInfo for u64 {
    fn freq(&self) -> u64 {
        *self
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quartiles {
    pub q1: f64,
    pub q2: f64,
    pub q3: f64,
}

impl Quartiles {
    pub fn iqr(&self) -> f64 {
        self.q3 - self.q1
    }
}

/// Below this many items quartiles are not meaningful.
pub const MIN_QUARTILE_ITEMS: usize = 4;

#[derive(Debug, Clone)]
pub struct OrderedFreqSeq<T> {
    items: Vec<T>,
}

impl<T> Default for OrderedFreqSeq<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<T: FreqInfo> OrderedFreqSeq<T> {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> {
        self.items.iter()
    }

    /// Linear interpolation at positions p·(n−1). `None` for fewer than
    /// four items; callers treat that as "dataset too small".
    pub fn quartiles(&self) -> Option<Quartiles> {
        if self.items.len() < MIN_QUARTILE_ITEMS {
            return None;
        }
        Some(Quartiles {
            q1: self.percentile(0.25),
            q2: self.percentile(0.50),
            q3: self.percentile(0.75),
        })
    }

    fn percentile(&self, p: f64) -> f64 {
        let pos  = p * (self.items.len() - 1) as f64;
        let lo   = pos.floor() as usize;
        let hi   = (lo + 1).min(self.items.len() - 1);
        let frac = pos - lo as f64;
        let a    = self.items[lo].freq() as f64;
        let b    = self.items[hi].freq() as f64;
        a + frac * (b - a)
    }
}

/// Sorts ascending; equal frequencies keep their input order.
impl<T: FreqInfo> FromIterator<T> for OrderedFreqSeq<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut items: Vec<T> = iter.into_iter().collect();
        items.sort_by_key(|x| x.freq());
        Self { items }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_is_stable() {
        struct Hit(&'static str, u64);
        impl FreqInfo for Hit {
            fn freq(&self) -> u64 { self.1 }
        }
        let s: OrderedFreqSeq<Hit> = [Hit("a", 5), Hit("b", 1), Hit("c", 3), Hit("d", 3)].into_iter().collect();
        let got: Vec<&str> = s.iter().map(|h| h.0).collect();
        assert_eq!(got, vec!["b", "c", "d", "a"]);
        assert_eq!(s.len(), 4);
    }

    #[test]
    fn test_quartiles_interpolate() {
        let s: OrderedFreqSeq<u64> = [1u64, 2, 3, 4, 5, 6, 7, 8].into_iter().collect();
        let q = s.quartiles().unwrap();
        assert!((q.q1 - 2.75).abs() < 1e-9);
        assert!((q.q2 - 4.5).abs() < 1e-9);
        assert!((q.q3 - 6.25).abs() < 1e-9);
        assert!((q.iqr() - 3.5).abs() < 1e-9);
    }

    #[test]
    fn test_quartiles_flat_with_spike() {
        let mut counts = vec![1u64; 19];
        counts.push(50);
        let s: OrderedFreqSeq<u64> = counts.into_iter().collect();
        let q = s.quartiles().unwrap();
        assert_eq!(q.q1, 1.0);
        assert_eq!(q.q3, 1.0);
        assert_eq!(q.iqr(), 0.0);
    }

    #[test]
    fn test_too_small() {
        let s: OrderedFreqSeq<u64> = [1u64, 2, 3].into_iter().collect();
        assert!(s.quartiles().is_none());
        assert!(OrderedFreqSeq::<u64>::default().quartiles().is_none());
    }
}
