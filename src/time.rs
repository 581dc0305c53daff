//! Time instants and durations tagged with their unit, and the clock seam of the crate.
//!
//! Everything which has to wait or to measure an interval asks a `TimeSource`,
//! so the board can count DWT cycles while the tests step a simulated clock.

use core::cmp::Ordering;
use core::marker::PhantomData;
use core::ops::{Add, Sub};
use num_traits::{WrappingAdd, WrappingSub};

/// Time unit marker
#[derive(Copy, Clone, Debug, Default)]
pub struct Seconds;

/// Time unit marker
#[derive(Copy, Clone, Debug, Default)]
pub struct MicroSeconds;

#[derive(Copy, Clone, Debug)]
pub struct Duration<T, UNIT>
where
    T: Ord,
{
    count: T,
    unit: PhantomData<UNIT>,
}

#[derive(Copy, Clone, Debug)]
pub struct Time<T, UNIT>
where
    T: Ord,
{
    instant: T,
    unit: PhantomData<UNIT>,
}

pub trait TimeSource<T, UNIT>
where
    T: Ord,
{
    fn now(&self) -> Time<T, UNIT>;
}

impl<T, UNIT> Time<T, UNIT>
where
    T: Ord + Copy,
{
    pub fn instant(&self) -> T {
        self.instant
    }
}

impl<T, UNIT> Duration<T, UNIT>
where
    T: Ord + Copy,
{
    pub fn count(&self) -> T {
        self.count
    }
}

impl<T, UNIT> PartialEq for Time<T, UNIT>
where
    T: Ord,
{
    fn eq(&self, other: &Time<T, UNIT>) -> bool {
        self.instant == other.instant
    }
}

impl<UNIT> From<u32> for Time<u32, UNIT> {
    fn from(instant: u32) -> Time<u32, UNIT> {
        Time::<u32, UNIT> {
            instant,
            unit: PhantomData::<UNIT>,
        }
    }
}

impl<UNIT> From<u32> for Duration<u32, UNIT> {
    fn from(count: u32) -> Duration<u32, UNIT> {
        Duration::<u32, UNIT> {
            count,
            unit: PhantomData::<UNIT>,
        }
    }
}

impl Duration<u32, Seconds> {
    /// Splits into hours, minutes and seconds (hours are not wrapped at a day)
    pub fn to_hms(&self) -> (u32, u32, u32) {
        let t = self.count;
        let hour = t / 3600;
        let t = t - hour * 3600;
        let min = t / 60;
        let sec = t - min * 60;
        (hour, min, sec)
    }
}

impl<T, UNIT> PartialOrd for Duration<T, UNIT>
where
    T: Ord,
{
    fn partial_cmp(&self, other: &Duration<T, UNIT>) -> Option<Ordering> {
        Some(self.count.cmp(&other.count))
    }
}

impl<T, UNIT> Ord for Duration<T, UNIT>
where
    T: Ord,
{
    fn cmp(&self, other: &Duration<T, UNIT>) -> Ordering {
        self.count.cmp(&other.count)
    }
}

impl<T, UNIT> PartialEq for Duration<T, UNIT>
where
    T: Ord,
{
    fn eq(&self, other: &Duration<T, UNIT>) -> bool {
        self.count == other.count
    }
}

impl<T, UNIT> Eq for Duration<T, UNIT> where T: Ord {}

impl<T, UNIT> Default for Duration<T, UNIT>
where
    T: Default + Ord,
{
    fn default() -> Duration<T, UNIT> {
        Duration::<T, UNIT> {
            count: T::default(),
            unit: PhantomData::<UNIT>,
        }
    }
}

impl<T, UNIT> Add for Duration<T, UNIT>
where
    T: Add<Output = T> + Ord,
{
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Self::Output {
            count: self.count + rhs.count,
            unit: PhantomData::<UNIT>,
        }
    }
}

impl<T, UNIT> Sub for Time<T, UNIT>
where
    T: WrappingSub + Ord,
{
    type Output = Duration<T, UNIT>;
    fn sub(self, rhs: Self) -> Self::Output {
        Self::Output {
            count: self.instant.wrapping_sub(&rhs.instant),
            unit: PhantomData::<UNIT>,
        }
    }
}

impl<T, UNIT> Add<Duration<T, UNIT>> for Time<T, UNIT>
where
    T: WrappingAdd + Ord,
{
    type Output = Self;
    fn add(self, rhs: Duration<T, UNIT>) -> Self::Output {
        Self::Output {
            instant: self.instant.wrapping_add(&rhs.count),
            unit: PhantomData::<UNIT>,
        }
    }
}

pub trait TimeExt<T>
where
    T: Ord,
{
    /// Wrap in `Seconds`
    fn s(self) -> Duration<T, Seconds>;

    /// Wrap in `Microseconds`
    fn us(self) -> Duration<T, MicroSeconds>;
}

impl TimeExt<u32> for u32 {
    fn s(self) -> Duration<u32, Seconds> {
        Duration::<u32, Seconds>::from(self)
    }

    fn us(self) -> Duration<u32, MicroSeconds> {
        Duration::<u32, MicroSeconds>::from(self)
    }
}

/// Busy waits until `offset` has elapsed since `origin`.
///
/// Chaining several waits from the same origin keeps the rounding and the code
/// overhead of each step from accumulating. Correct across counter wrap around
/// as long as `offset` fits into the counter.
pub fn wait_until<SOURCE, UNIT>(
    source: &SOURCE,
    origin: Time<u32, UNIT>,
    offset: Duration<u32, UNIT>,
) where
    SOURCE: TimeSource<u32, UNIT>,
    UNIT: Copy,
{
    while source.now() - origin < offset {}
}
