use once_cell::sync::Lazy;
use std::time::{Duration, Instant, SystemTime};

// RTP spec "wallclock" uses NTP time, which starts at 1900-01-01.
//
// https://tools.ietf.org/html/rfc868
//
// 365 days * 70 years + 17 leap year days
// (365 * 70 + 17) * 86400 = 2208988800
const SECS_1900: u64 = 2_208_988_800;

/// 2^32 as float.
const F32: f64 = 4_294_967_296.0;

// A constant "beginning of time" in both Instant and SystemTime that we use as
// relative values for the rest of the crate. The crate's internal idea of time
// is driven entirely from the external API using `Instant`, but Instant can't
// represent absolute dates (SystemTime can), so we freeze a pair once.
static BEGINNING_OF_TIME: Lazy<(Instant, SystemTime)> = Lazy::new(|| {
    let now = Instant::now();
    let now_sys = SystemTime::now();

    // Find an Instant in the past, up to an hour back.
    let beginning_of_time = {
        let mut secs = 3600;
        loop {
            let dur = Duration::from_secs(secs);
            if let Some(v) = now.checked_sub(dur) {
                break v;
            }
            secs -= 1;
            if secs == 0 {
                panic!("Failed to find a beginning of time instant");
            }
        }
    };

    let since_beginning_of_time = Instant::now() - beginning_of_time;
    let beginning_of_time_sys = now_sys - since_beginning_of_time;

    (beginning_of_time, beginning_of_time_sys)
});

/// NTP conversions on [`Instant`].
pub trait InstantExt {
    /// This instant as a 64-bit NTP timestamp (32.32 fixed point, epoch 1900).
    fn as_ntp_64(&self) -> u64;

    /// The middle 32 bits of the 64-bit NTP timestamp. Used in RRTR/DLRR
    /// blocks and report-block `last_sr` fields.
    fn as_ntp_32(&self) -> u32;

    /// Reconstruct an instant from a 64-bit NTP timestamp.
    fn from_ntp_64(v: u64) -> Self;
}

impl InstantExt for Instant {
    fn as_ntp_64(&self) -> u64 {
        let since_beginning_of_time = self.duration_since(BEGINNING_OF_TIME.0);

        let epoch_to_beginning = BEGINNING_OF_TIME
            .1
            .duration_since(SystemTime::UNIX_EPOCH)
            .expect("beginning of time to be after unix epoch");

        let since_epoch = since_beginning_of_time + epoch_to_beginning;
        let secs_ntp = since_epoch.as_secs_f64() + SECS_1900 as f64;

        (secs_ntp * F32) as u64
    }

    fn as_ntp_32(&self) -> u32 {
        (self.as_ntp_64() >> 16) as u32
    }

    fn from_ntp_64(v: u64) -> Self {
        let secs_ntp = (v as f64) / F32;

        // Shift to UNIX EPOCH. Duration is not allowed to be negative.
        let secs_epoch = secs_ntp - SECS_1900 as f64;
        let secs_dur = if secs_epoch <= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(secs_epoch)
        };

        let sys = SystemTime::UNIX_EPOCH + secs_dur;

        let since_beginning_of_time = sys
            .duration_since(BEGINNING_OF_TIME.1)
            .unwrap_or(Duration::ZERO);

        BEGINNING_OF_TIME.0 + since_beginning_of_time
    }
}

/// Duration expressed by a 32-bit NTP value (units of 1/65536 seconds).
pub fn duration_from_ntp_32(v: u32) -> Duration {
    Duration::from_secs_f64(v as f64 / 65_536.0)
}

/// A duration as a 32-bit NTP value (units of 1/65536 seconds).
pub fn duration_as_ntp_32(d: Duration) -> u32 {
    (d.as_secs_f64() * 65_536.0) as u32
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ntp_64_roundtrip() {
        let now = Instant::now();
        let ntp = now.as_ntp_64();
        let now2 = Instant::from_ntp_64(ntp);
        let abs = if now > now2 { now - now2 } else { now2 - now };
        assert!(abs < Duration::from_millis(1));
    }

    #[test]
    fn ntp_32_duration_roundtrip() {
        let d = Duration::from_millis(125);
        let v = duration_as_ntp_32(d);
        let d2 = duration_from_ntp_32(v);
        let abs = if d > d2 { d - d2 } else { d2 - d };
        assert!(abs < Duration::from_micros(100));
    }

    #[test]
    fn ntp_32_is_middle_bits() {
        let now = Instant::now();
        let full = now.as_ntp_64();
        assert_eq!(now.as_ntp_32(), (full >> 16) as u32);
    }
}
