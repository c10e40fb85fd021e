use std::sync::LazyLock;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use rosc::OscTime;

/// SC uses the NTP epoch (1900-01-01); add this to Unix seconds.
const NTP_UNIX_OFFSET: u64 = 2_208_988_800;

const FRACTION_SCALE: f64 = 4_294_967_296.0;

/// Anchor pair captured once: (monotonic instant, wall-clock seconds).
/// Timetags are derived from time elapsed since the anchor so that wall-clock
/// adjustments never make scheduled bundles jump.
static CLOCK_ANCHOR: LazyLock<(Instant, f64)> = LazyLock::new(|| {
    let wall = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64();
    (Instant::now(), wall)
});

/// 64-bit NTP timestamp: upper 32 bits are seconds since 1900, lower 32 bits
/// are the binary fraction of a second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Timetag(u64);

impl Timetag {
    /// The special value 1: "execute as soon as received".
    pub const IMMEDIATE: Timetag = Timetag(1);

    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn new(seconds: u32, fraction: u32) -> Self {
        Self(((seconds as u64) << 32) | fraction as u64)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    pub const fn seconds(self) -> u32 {
        (self.0 >> 32) as u32
    }

    pub const fn fraction(self) -> u32 {
        self.0 as u32
    }

    pub fn is_immediate(self) -> bool {
        self == Self::IMMEDIATE
    }

    pub fn now() -> Self {
        Self::from_now(Duration::ZERO)
    }

    /// Timetag for the wall-clock instant `offset` from now.
    pub fn from_now(offset: Duration) -> Self {
        let (anchor_instant, anchor_wall) = &*CLOCK_ANCHOR;
        let elapsed = anchor_instant.elapsed().as_secs_f64();
        Self::from_unix_secs(anchor_wall + elapsed + offset.as_secs_f64())
    }

    pub fn from_system_time(time: SystemTime) -> Self {
        let secs = time
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        Self::from_unix_secs(secs)
    }

    fn from_unix_secs(total: f64) -> Self {
        let seconds = (total.trunc() as u64).wrapping_add(NTP_UNIX_OFFSET) as u32;
        let fraction = (total.fract() * FRACTION_SCALE).min(u32::MAX as f64) as u32;
        Self::new(seconds, fraction)
    }
}

impl Default for Timetag {
    fn default() -> Self {
        Self::IMMEDIATE
    }
}

impl From<Timetag> for OscTime {
    fn from(tag: Timetag) -> Self {
        OscTime {
            seconds: tag.seconds(),
            fractional: tag.fraction(),
        }
    }
}

impl From<OscTime> for Timetag {
    fn from(time: OscTime) -> Self {
        Timetag::new(time.seconds, time.fractional)
    }
}
