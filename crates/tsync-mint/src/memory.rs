//! In-process stand-in for the minting service.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{MintError, MintResult};
use crate::minter::{IdMinter, MintRequest};

/// Mints `<kind>-<uuid v7>` identifiers and records every request.
///
/// The service can be switched off with [`set_available`] to exercise
/// outage handling.
///
/// [`set_available`]: InMemoryMinter::set_available
#[derive(Debug)]
pub struct InMemoryMinter {
    available: AtomicBool,
    requests: Mutex<Vec<MintRequest>>,
}

impl InMemoryMinter {
    pub fn new() -> Self {
        Self {
            available: AtomicBool::new(true),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Requests served so far, in order.
    pub fn requests(&self) -> Vec<MintRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn minted(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or_default()
    }
}

impl Default for InMemoryMinter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdMinter for InMemoryMinter {
    async fn mint(&self, request: MintRequest) -> MintResult<String> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(MintError::Unavailable("minting service is offline".into()));
        }
        let id = format!("{}-{}", request.kind, Uuid::now_v7().simple());
        self.requests
            .lock()
            .map_err(|e| MintError::Unavailable(format!("lock poisoned: {e}")))?
            .push(request);
        Ok(id)
    }
}
