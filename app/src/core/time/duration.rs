use std::fmt::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct Duration {
    #[serde(with = "duration_format")]
    pub(super) delegate: chrono::Duration,
}

impl Duration {
    pub(super) fn new(delegate: chrono::Duration) -> Self {
        Self { delegate }
    }

    pub fn zero() -> Self {
        Self::new(chrono::Duration::zero())
    }

    pub fn hours(hours: i64) -> Self {
        Self::new(chrono::Duration::hours(hours))
    }

    pub fn minutes(minutes: i64) -> Self {
        Self::new(chrono::Duration::minutes(minutes))
    }

    pub fn seconds(seconds: i64) -> Self {
        Self::new(chrono::Duration::seconds(seconds))
    }

    pub fn millis(millis: i64) -> Self {
        Self::new(chrono::Duration::milliseconds(millis))
    }

    pub fn micros(micros: i64) -> Self {
        Self::new(chrono::Duration::microseconds(micros))
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.delegate.num_milliseconds() as f64 / 1000.0
    }

    pub fn as_millis_f64(&self) -> f64 {
        match self.delegate.num_microseconds() {
            Some(micros) => micros as f64 / 1000.0,
            None => self.delegate.num_milliseconds() as f64,
        }
    }

    pub fn to_human_readable(&self) -> String {
        chrono_humanize::HumanTime::from(self.delegate).to_text_en(
            chrono_humanize::Accuracy::Rough,
            chrono_humanize::Tense::Present,
        )
    }

    pub fn to_iso_string(&self) -> String {
        from_chrono_duration(&self.delegate).to_string()
    }
}

impl std::ops::Add<Duration> for Duration {
    type Output = Duration;

    fn add(self, rhs: Duration) -> Self::Output {
        Self::new(self.delegate + rhs.delegate)
    }
}

impl std::ops::Mul<i32> for Duration {
    type Output = Duration;

    fn mul(self, rhs: i32) -> Self::Output {
        Self::new(self.delegate * rhs)
    }
}

impl Display for Duration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_iso_string())
    }
}

impl From<Duration> for std::time::Duration {
    fn from(val: Duration) -> Self {
        let millis = val.delegate.num_milliseconds().max(0);
        std::time::Duration::from_millis(millis as u64)
    }
}

impl From<std::time::Duration> for Duration {
    fn from(val: std::time::Duration) -> Self {
        Self::millis(i64::try_from(val.as_millis()).unwrap_or(i64::MAX))
    }
}

mod duration_format {
    use iso8601_duration::Duration as Iso8601Duration;
    use serde::{Deserializer, Serializer, de::Visitor};

    // Serialize `chrono::Duration` to ISO 8601 string format (e.g., "PT2S")
    pub fn serialize<S>(duration: &chrono::TimeDelta, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&super::from_chrono_duration(duration).to_string())
    }

    // Deserialize ISO 8601 string format to `chrono::Duration`
    pub fn deserialize<'de, D>(deserializer: D) -> Result<chrono::Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct DurationVisitor;

        impl Visitor<'_> for DurationVisitor {
            type Value = chrono::TimeDelta;

            fn expecting(&self, formatter: &mut core::fmt::Formatter) -> core::fmt::Result {
                formatter.write_str("a string representing an ISO 8601 duration (e.g., PT1M30S)")
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                let iso_duration = Iso8601Duration::parse(value)
                    .map_err(|e| E::custom(format!("Error parsing {} to duration: {:?}", value, e)))?;

                iso_duration.to_chrono().ok_or_else(|| {
                    E::custom(format!(
                        "Duration too long. Must not contain years and/or months. Received {}",
                        value
                    ))
                })
            }
        }

        deserializer.deserialize_str(DurationVisitor)
    }
}

fn from_chrono_duration(duration: &chrono::Duration) -> iso8601_duration::Duration {
    let days = duration.num_days();
    let millis = duration.num_milliseconds() - days * 86_400_000;
    let hours = millis / 3_600_000;
    let minutes = (millis % 3_600_000) / 60_000;
    let seconds = (millis % 60_000) as f32 / 1000.0;

    iso8601_duration::Duration::new(
        0.0, //years
        0.0, //months
        days as f32,
        hours as f32,
        minutes as f32,
        seconds,
    )
}
