use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Display, Formatter};
use std::ops::Add;
use std::time::{Duration, SystemTime};

/// A Unix timestamp represented as a `u64`, in seconds since the epoch.
///
/// Used for challenge expiry (`expiresAt`) and dispense event timestamps.
/// Serialized as a stringified integer to avoid loss of precision in JSON:
/// `1699999999` becomes `"1699999999"` in the wire format.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Ord, Eq, Hash)]
pub struct UnixTimestamp(u64);

impl Serialize for UnixTimestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for UnixTimestamp {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let ts = s
            .parse::<u64>()
            .map_err(|_| serde::de::Error::custom("timestamp must be a non-negative integer"))?;
        Ok(UnixTimestamp(ts))
    }
}

impl Display for UnixTimestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Add<Duration> for UnixTimestamp {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        UnixTimestamp(self.0.saturating_add(rhs.as_secs()))
    }
}

/// Reading the system clock failed: the clock reports a time before the Unix epoch.
#[derive(Debug, thiserror::Error)]
#[error("System clock is before the Unix epoch")]
pub struct ClockError;

impl UnixTimestamp {
    pub fn from_secs(secs: u64) -> Self {
        Self(secs)
    }

    /// Current wall-clock time. Errors instead of panicking on a clock
    /// set before the epoch, since verification outcomes depend on it.
    pub fn now() -> Result<Self, ClockError> {
        let now = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map_err(|_| ClockError)?
            .as_secs();
        Ok(Self(now))
    }

    pub fn as_secs(&self) -> u64 {
        self.0
    }

    /// Whether this timestamp lies strictly in the past of `now`.
    pub fn is_before(&self, now: UnixTimestamp) -> bool {
        self.0 < now.0
    }
}
