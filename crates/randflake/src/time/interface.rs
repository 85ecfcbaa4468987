/// A trait for time sources that return the current wall-clock second.
///
/// Lease expiry is stored as absolute Unix seconds in a store shared by many
/// processes, so the clock must be the wall clock rather than a process-local
/// monotonic one. The abstraction exists so tests can move time by hand.
///
/// # Example
///
/// ```
/// use randflake::TimeSource;
///
/// struct FixedTime;
/// impl TimeSource for FixedTime {
///     fn unix_secs(&self) -> i64 {
///         1_730_000_100
///     }
/// }
///
/// assert_eq!(FixedTime.unix_secs(), 1_730_000_100);
/// ```
pub trait TimeSource: Send + Sync + 'static {
    /// Returns the current time in whole seconds since the Unix epoch.
    fn unix_secs(&self) -> i64;
}
