//! Blocking delays used for bus timing.

use crate::{GpioError, GpioResult};
use std::fmt::Debug;
use std::thread::sleep;
use std::time::Duration;

/// A blocking delay provider.
///
/// Without a read path there is no busy flag to poll, so every wait on the bus is a plain sleep of
/// at least the time the controller needs.
pub trait Delay: Debug {
    /// Sleeps for `duration`. Used for the short, fixed waits like the enable pulse width.
    fn delay(&self, duration: Duration) -> GpioResult<()>;

    /// Sleeps for at least `min`. The implementation may sleep for anything up to `max`, which
    /// gives it room to coalesce timers.
    ///
    /// # Errors
    /// - `GpioError::InvalidArgument` if `min` is greater than `max`.
    fn delay_range(&self, min: Duration, max: Duration) -> GpioResult<()>;
}

/// [Delay] backed by [std::thread::sleep].
#[derive(Copy, Clone, Debug, Default)]
pub struct ThreadDelay;

impl Delay for ThreadDelay {
    fn delay(&self, duration: Duration) -> GpioResult<()> {
        sleep(duration);
        Ok(())
    }

    fn delay_range(&self, min: Duration, max: Duration) -> GpioResult<()> {
        if min > max {
            return Err(GpioError::InvalidArgument);
        }
        sleep(min);
        Ok(())
    }
}
