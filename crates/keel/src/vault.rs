//! Cancellation token vault.
//!
//! Process-wide registry mapping opaque 128-bit tokens to cancellation
//! sources. The host holds only the token bytes; cancelling means calling
//! back into the plugin with those bytes. Absence of a token is *never* an
//! error here — the operation may simply have finished and unregistered
//! itself, and that race is benign by design.
//!
//! One coarse global lock guards the map. Registration and cancellation are
//! low-frequency next to the data path, so contention is a non-issue.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use keel_abi::error::AbiError;
use keel_abi::event::Event;
use keel_abi::token::CancelToken;

/// A cancellable execution context. Work checks [`CancelSource::checkpoint`]
/// (or blocks on [`CancelSource::wait_cancelled`]) at its own pace —
/// cancellation is cooperative and advisory, never forcible.
#[derive(Debug)]
pub struct CancelSource {
    flag: AtomicBool,
    event: Event,
}

impl CancelSource {
    pub fn new() -> Self {
        Self {
            flag: AtomicBool::new(false),
            event: Event::new(),
        }
    }

    /// Signal cancellation. Idempotent.
    pub fn cancel(&self) {
        if !self.flag.swap(true, Ordering::AcqRel) {
            self.event.signal();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Cooperative checkpoint: `Err(Cancelled)` once cancellation fired.
    pub fn checkpoint(&self) -> Result<(), AbiError> {
        if self.is_cancelled() {
            Err(AbiError::cancelled())
        } else {
            Ok(())
        }
    }

    /// Block up to `timeout`; true if cancellation fired within it. Lets
    /// workers sleep interruptibly instead of busy-checking the flag.
    pub fn wait_cancelled(&self, timeout: Duration) -> bool {
        self.event.wait_timeout(timeout)
    }
}

impl Default for CancelSource {
    fn default() -> Self {
        Self::new()
    }
}

static VAULT: OnceLock<Mutex<HashMap<CancelToken, Arc<CancelSource>>>> = OnceLock::new();

fn vault() -> &'static Mutex<HashMap<CancelToken, Arc<CancelSource>>> {
    VAULT.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Explicit init. Idempotent; provided so hosts/plugins that want a fixed
/// init order (instead of init-at-first-use) have a hook.
pub fn init() {
    let _ = vault();
}

/// Register a token. Idempotent: the same token returns the *same* source —
/// the token is a capability, not a constructor argument.
pub fn register(token: CancelToken) -> Arc<CancelSource> {
    let mut map = vault().lock().unwrap();
    Arc::clone(map.entry(token).or_insert_with(|| Arc::new(CancelSource::new())))
}

/// Cancel the source behind `token`, if registered. Returns false for an
/// unknown token — already-completed operations are a benign race, not an
/// error.
pub fn cancel(token: CancelToken, unregister_after: bool) -> bool {
    let source = {
        let mut map = vault().lock().unwrap();
        if unregister_after {
            map.remove(&token)
        } else {
            map.get(&token).cloned()
        }
    };
    match source {
        Some(source) => {
            source.cancel();
            true
        }
        None => false,
    }
}

/// Remove a token. Safe on unknown tokens.
pub fn unregister(token: CancelToken) -> Option<Arc<CancelSource>> {
    vault().lock().unwrap().remove(&token)
}

/// Number of live registrations (diagnostics and tests).
pub fn len() -> usize {
    vault().lock().unwrap().len()
}

/// Shutdown path: cancel and drop every outstanding source. Must run before
/// the plugin's threads and memory are torn down, or workers keep polling
/// flags that nobody can reach anymore.
pub fn cancel_and_unregister_all() {
    let drained: Vec<_> = {
        let mut map = vault().lock().unwrap();
        map.drain().collect()
    };
    if !drained.is_empty() {
        log::debug!("vault teardown: cancelling {} outstanding token(s)", drained.len());
    }
    for (_, source) in drained {
        source.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // The vault is process-global; tests that mutate it take this lock so
    // the teardown test cannot drain tokens out from under the others.
    static TEST_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn register_is_idempotent_and_identity_preserving() {
        let _guard = TEST_LOCK.lock().unwrap();
        let token = CancelToken::fresh();
        let a = register(token);
        let b = register(token);
        assert!(Arc::ptr_eq(&a, &b));
        unregister(token);
    }

    #[test]
    fn cancel_unknown_token_is_a_benign_no_op() {
        assert!(!cancel(CancelToken::fresh(), true));
    }

    #[test]
    fn cancel_fires_flag_and_unregisters() {
        let _guard = TEST_LOCK.lock().unwrap();
        let token = CancelToken::fresh();
        let source = register(token);
        assert!(!source.is_cancelled());
        assert!(cancel(token, true));
        assert!(source.is_cancelled());
        assert!(source.checkpoint().is_err());
        // Token gone now; double-cancel is a no-op returning false.
        assert!(!cancel(token, true));
        // Cancelling the source again directly is idempotent too.
        source.cancel();
        assert!(source.is_cancelled());
    }

    #[test]
    fn wait_cancelled_unblocks_on_cancel() {
        let _guard = TEST_LOCK.lock().unwrap();
        let token = CancelToken::fresh();
        let source = register(token);
        let source2 = Arc::clone(&source);
        let t = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            source2.cancel();
        });
        assert!(source.wait_cancelled(Duration::from_secs(5)));
        t.join().unwrap();
        unregister(token);
    }

    #[test]
    fn teardown_cancels_everything() {
        let _guard = TEST_LOCK.lock().unwrap();
        let tokens: Vec<_> = (0..4).map(|_| CancelToken::fresh()).collect();
        let sources: Vec<_> = tokens.iter().map(|t| register(*t)).collect();
        cancel_and_unregister_all();
        for source in &sources {
            assert!(source.is_cancelled());
        }
        for token in &tokens {
            assert!(!cancel(*token, true));
        }
    }
}
