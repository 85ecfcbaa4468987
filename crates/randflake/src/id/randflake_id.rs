use core::fmt;

/// Randflake epoch: Sunday, October 27, 2024 03:33:20 UTC, in Unix seconds.
pub const RANDFLAKE_EPOCH: i64 = 1_730_000_000;

/// A 64-bit Randflake identifier.
///
/// ## Bit layout
///
/// The ID is packed from **MSB to LSB**:
///
/// ```text
///  Bit Index:  63           34 33          17 16            0
///              +---------------+--------------+---------------+
///  Field:      | timestamp(30) | node ID (17) | counter (17)  |
///              +---------------+--------------+---------------+
/// ```
///
/// - `timestamp`: seconds since [`RANDFLAKE_EPOCH`], good for ~34 years.
/// - `node_id`: the leased node ID of the source that issued the ID.
/// - `counter`: per-second sequence of that source.
///
/// The layout is fixed. Changing it would break compatibility with every ID
/// ever issued.
///
/// ## Example
///
/// ```
/// use randflake::RandflakeId;
///
/// let id = RandflakeId::from_components(5, 42, 7);
/// assert_eq!(id.timestamp(), 5);
/// assert_eq!(id.node_id(), 42);
/// assert_eq!(id.counter(), 7);
/// assert_eq!(RandflakeId::from_raw(id.to_raw()), id);
/// ```
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(from = "i64", into = "i64"))]
pub struct RandflakeId {
    id: u64,
}

impl RandflakeId {
    pub const TIMESTAMP_BITS: u32 = 30;
    pub const NODE_ID_BITS: u32 = 17;
    pub const COUNTER_BITS: u32 = 17;

    pub const COUNTER_SHIFT: u32 = 0;
    pub const NODE_ID_SHIFT: u32 = Self::COUNTER_SHIFT + Self::COUNTER_BITS;
    pub const TIMESTAMP_SHIFT: u32 = Self::NODE_ID_SHIFT + Self::NODE_ID_BITS;

    pub const TIMESTAMP_MASK: u64 = (1 << Self::TIMESTAMP_BITS) - 1;
    pub const NODE_ID_MASK: u64 = (1 << Self::NODE_ID_BITS) - 1;
    pub const COUNTER_MASK: u64 = (1 << Self::COUNTER_BITS) - 1;

    /// Largest representable timestamp offset.
    pub const MAX_TIMESTAMP: u64 = Self::TIMESTAMP_MASK;

    /// Largest node ID that fits in the layout.
    pub const MAX_NODE_ID: u64 = Self::NODE_ID_MASK;

    /// Largest counter a source ever issues. The all-ones value is never
    /// produced, leaving 131,071 IDs per second per source.
    pub const MAX_COUNTER: u64 = Self::COUNTER_MASK - 1;

    /// Constructs an ID from its components. Each component is masked to its
    /// field width.
    pub const fn from_components(timestamp: u64, node_id: u64, counter: u64) -> Self {
        let t = (timestamp & Self::TIMESTAMP_MASK) << Self::TIMESTAMP_SHIFT;
        let n = (node_id & Self::NODE_ID_MASK) << Self::NODE_ID_SHIFT;
        let c = (counter & Self::COUNTER_MASK) << Self::COUNTER_SHIFT;
        Self { id: t | n | c }
    }

    pub const fn from_raw(raw: u64) -> Self {
        Self { id: raw }
    }

    pub const fn to_raw(&self) -> u64 {
        self.id
    }

    /// Seconds since [`RANDFLAKE_EPOCH`].
    pub const fn timestamp(&self) -> u64 {
        (self.id >> Self::TIMESTAMP_SHIFT) & Self::TIMESTAMP_MASK
    }

    pub const fn node_id(&self) -> u64 {
        (self.id >> Self::NODE_ID_SHIFT) & Self::NODE_ID_MASK
    }

    pub const fn counter(&self) -> u64 {
        (self.id >> Self::COUNTER_SHIFT) & Self::COUNTER_MASK
    }

    /// The Unix second at which this ID was issued.
    pub const fn unix_secs(&self) -> i64 {
        self.timestamp() as i64 + RANDFLAKE_EPOCH
    }

    /// Returns `true` if the counter can be incremented within the same
    /// second.
    pub const fn has_counter_room(&self) -> bool {
        self.counter() < Self::MAX_COUNTER
    }

    /// Returns the ID with the counter advanced by one.
    pub const fn increment_counter(&self) -> Self {
        Self::from_components(self.timestamp(), self.node_id(), self.counter() + 1)
    }

    /// Returns the ID moved to a new second with the counter reset.
    pub const fn rollover_to_timestamp(&self, timestamp: u64) -> Self {
        Self::from_components(timestamp, self.node_id(), 0)
    }
}

impl From<i64> for RandflakeId {
    fn from(raw: i64) -> Self {
        Self::from_raw(raw as u64)
    }
}

impl From<RandflakeId> for i64 {
    fn from(id: RandflakeId) -> Self {
        id.to_raw() as i64
    }
}

impl fmt::Display for RandflakeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id as i64)
    }
}

impl fmt::Debug for RandflakeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RandflakeId")
            .field("id", &(self.id as i64))
            .field("timestamp", &self.timestamp())
            .field("node_id", &self.node_id())
            .field("counter", &self.counter())
            .finish()
    }
}
