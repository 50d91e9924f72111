use chrono::{DateTime, Utc};
use snapvault_core::ImageKind;
use std::sync::atomic::{AtomicI64, Ordering};

/// Generates `{prefix}_{epoch_ms}.{ext}` names.
///
/// The millisecond component is strictly increasing for a given generator,
/// so two uploads landing in the same millisecond still get distinct names
/// while keeping the plain timestamp format.
#[derive(Debug)]
pub struct NameGenerator {
    prefix: String,
    last_millis: AtomicI64,
}

impl NameGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            last_millis: AtomicI64::new(0),
        }
    }

    /// Name for a new upload. The hint only decides the extension; anything
    /// that is not a recognised image is stored as `.jpg`.
    pub fn next_name(&self, name_hint: &str) -> String {
        let extension = ImageKind::from_filename(name_hint)
            .unwrap_or(ImageKind::Jpeg)
            .extension();
        let millis = self.next_millis(Utc::now().timestamp_millis());
        format!("{}_{}.{}", self.prefix, millis, extension)
    }

    fn next_millis(&self, now: i64) -> i64 {
        let previous = self
            .last_millis
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or_else(|last| last);
        now.max(previous + 1)
    }
}

/// Recover the upload time encoded in a generated name, if any.
pub fn timestamp_from_name(name: &str) -> Option<DateTime<Utc>> {
    let stem = name.rsplit_once('.').map_or(name, |(stem, _)| stem);
    let (_, digits) = stem.rsplit_once(['_', '-'])?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits
        .parse::<i64>()
        .ok()
        .and_then(DateTime::from_timestamp_millis)
}
