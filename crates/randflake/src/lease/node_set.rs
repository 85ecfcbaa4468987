use crate::lease::LEASE_SIZE;

const WORDS: usize = (LEASE_SIZE as usize).div_ceil(64);

/// Fixed-size set of node-ID offsets within one lease.
///
/// Bit `i` is set once offset `i` has been bound to a source. Offsets are
/// never released back: a returned source goes to the idle pool instead and
/// keeps its node ID.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NodeSet {
    words: [u64; WORDS],
    len: usize,
}

impl NodeSet {
    /// Creates an empty set covering `len` offsets.
    pub fn new(len: usize) -> Self {
        Self {
            words: [0; WORDS],
            len: len.min(WORDS * 64),
        }
    }

    /// Marks the lowest free offset as taken and returns it.
    pub fn take_first(&mut self) -> Option<usize> {
        for (w, word) in self.words.iter_mut().enumerate() {
            if *word == u64::MAX {
                continue;
            }
            let offset = w * 64 + (!*word).trailing_zeros() as usize;
            if offset >= self.len {
                return None;
            }
            *word |= 1 << (offset % 64);
            return Some(offset);
        }
        None
    }

    pub fn contains(&self, offset: usize) -> bool {
        offset < self.len && self.words[offset / 64] & (1 << (offset % 64)) != 0
    }

    /// Number of offsets taken.
    pub fn taken(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub const fn len(&self) -> usize {
        self.len
    }

    pub fn is_full(&self) -> bool {
        self.taken() == self.len
    }
}
