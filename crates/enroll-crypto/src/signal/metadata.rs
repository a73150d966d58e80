use parking_lot::Mutex;

use crate::CryptoError;

/// Per-role prekey ID counters and active-key pointers.
///
/// The `next_*` methods reserve IDs: each call returns the first ID of a
/// contiguous range and advances the counter past it before returning.
/// Concurrent callers always get disjoint ranges. A fresh store hands out
/// ID 1 first; counters never move backwards.
pub trait PreKeyMetadataStore: Send + Sync {
    /// Reserve one signed prekey ID.
    fn next_signed_prekey_id(&self) -> Result<u32, CryptoError>;

    /// Reserve `count` consecutive one-time EC prekey IDs, returning the first.
    fn next_one_time_prekey_ids(&self, count: u32) -> Result<u32, CryptoError>;

    /// Reserve `count` consecutive post-quantum prekey IDs, returning the first.
    fn next_kyber_prekey_ids(&self, count: u32) -> Result<u32, CryptoError>;

    fn active_signed_prekey_id(&self) -> Result<Option<u32>, CryptoError>;
    fn set_active_signed_prekey_id(&self, id: u32) -> Result<(), CryptoError>;

    fn last_resort_kyber_prekey_id(&self) -> Result<Option<u32>, CryptoError>;
    fn set_last_resort_kyber_prekey_id(&self, id: u32) -> Result<(), CryptoError>;

    fn is_signed_prekey_registered(&self) -> Result<bool, CryptoError>;
    fn set_signed_prekey_registered(&self, registered: bool) -> Result<(), CryptoError>;
}

/// Advance `counter` by `count`, returning the first reserved ID.
///
/// `counter` holds the last ID handed out (0 when none has been).
pub fn reserve_range(counter: &mut u32, count: u32, kind: &str) -> Result<u32, CryptoError> {
    if count == 0 {
        return Err(CryptoError::PreKeyError(format!("cannot reserve zero {kind} ids")));
    }
    let first = counter
        .checked_add(1)
        .ok_or_else(|| CryptoError::PreKeyError(format!("{kind} id space exhausted")))?;
    let last = counter
        .checked_add(count)
        .ok_or_else(|| CryptoError::PreKeyError(format!("{kind} id space exhausted")))?;
    *counter = last;
    Ok(first)
}

#[derive(Debug, Default)]
struct Counters {
    signed: u32,
    one_time: u32,
    kyber: u32,
    active_signed: Option<u32>,
    last_resort_kyber: Option<u32>,
    signed_registered: bool,
}

/// In-memory metadata store. All state sits behind one lock so reservations
/// are serialized.
#[derive(Debug, Default)]
pub struct MemoryPreKeyMetadataStore {
    counters: Mutex<Counters>,
}

impl MemoryPreKeyMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreKeyMetadataStore for MemoryPreKeyMetadataStore {
    fn next_signed_prekey_id(&self) -> Result<u32, CryptoError> {
        reserve_range(&mut self.counters.lock().signed, 1, "signed prekey")
    }

    fn next_one_time_prekey_ids(&self, count: u32) -> Result<u32, CryptoError> {
        reserve_range(&mut self.counters.lock().one_time, count, "one-time prekey")
    }

    fn next_kyber_prekey_ids(&self, count: u32) -> Result<u32, CryptoError> {
        reserve_range(&mut self.counters.lock().kyber, count, "kyber prekey")
    }

    fn active_signed_prekey_id(&self) -> Result<Option<u32>, CryptoError> {
        Ok(self.counters.lock().active_signed)
    }

    fn set_active_signed_prekey_id(&self, id: u32) -> Result<(), CryptoError> {
        self.counters.lock().active_signed = Some(id);
        Ok(())
    }

    fn last_resort_kyber_prekey_id(&self) -> Result<Option<u32>, CryptoError> {
        Ok(self.counters.lock().last_resort_kyber)
    }

    fn set_last_resort_kyber_prekey_id(&self, id: u32) -> Result<(), CryptoError> {
        self.counters.lock().last_resort_kyber = Some(id);
        Ok(())
    }

    fn is_signed_prekey_registered(&self) -> Result<bool, CryptoError> {
        Ok(self.counters.lock().signed_registered)
    }

    fn set_signed_prekey_registered(&self, registered: bool) -> Result<(), CryptoError> {
        self.counters.lock().signed_registered = registered;
        Ok(())
    }
}
