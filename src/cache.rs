//! Single-slot result cache with TTL.
//! Hit: same image bytes (blake3 digest pre-check, then byte comparison) within the TTL.
//! Failed recognitions are cached too, so a broken frame is not re-sent for the TTL.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::result::ScalableResult;

struct CacheEntry {
    digest: [u8; 32],
    image: Vec<u8>,
    result: Option<ScalableResult>,
    inserted_at: Instant,
}

pub struct ResultCache {
    slot: Mutex<Option<CacheEntry>>,
    ttl: Duration,
}

impl ResultCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            slot: Mutex::new(None),
            ttl,
        }
    }

    fn digest(image: &[u8]) -> [u8; 32] {
        *blake3::hash(image).as_bytes()
    }

    /// Look up the cached outcome for `image`.
    ///
    /// `Some(None)` is a cached failure; `None` means the engine must be asked.
    pub fn get(&self, image: &[u8]) -> Option<Option<ScalableResult>> {
        let mut slot = self.slot.lock();
        let entry = slot.as_ref()?;
        if entry.inserted_at.elapsed() >= self.ttl {
            *slot = None;
            return None;
        }
        if entry.digest != Self::digest(image) || entry.image != image {
            return None;
        }
        Some(entry.result.clone())
    }

    /// Replace the cached entry, success or failure alike.
    pub fn insert(&self, image: &[u8], result: Option<ScalableResult>) {
        *self.slot.lock() = Some(CacheEntry {
            digest: Self::digest(image),
            image: image.to_vec(),
            result,
            inserted_at: Instant::now(),
        });
    }

    /// Drop the cached entry (engine settings changed).
    pub fn clear(&self) {
        *self.slot.lock() = None;
    }
}
