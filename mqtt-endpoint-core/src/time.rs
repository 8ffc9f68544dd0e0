//! Time abstraction for keep-alive and timeout scheduling.

/// Monotonic clock plus a sleep primitive.
///
/// The endpoint computes absolute deadlines from `now_millis` and sleeps the
/// difference, so an adapter backed by virtual time (for tests) works the
/// same as one backed by the runtime clock.
#[allow(async_fn_in_trait)]
pub trait Clock {
    /// Milliseconds since an arbitrary fixed origin. Must be monotonic.
    fn now_millis(&self) -> u64;

    async fn sleep_millis(&self, millis: u64);
}
