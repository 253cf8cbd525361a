use std::sync::{Mutex, OnceLock};

fn env_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

/// Locks process environment mutation for the entire test body.
pub(crate) fn with_locked_env<R>(run: impl FnOnce() -> R) -> R {
    let _guard = env_lock().lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    run()
}

/// Clears a fixed set of variables and restores their original values on
/// drop. Use inside `with_locked_env`.
pub(crate) struct EnvGuard {
    saved: Vec<(String, Option<String>)>,
}

impl EnvGuard {
    pub(crate) fn cleared(keys: &[&str]) -> Self {
        let saved = keys
            .iter()
            .map(|key| (key.to_string(), std::env::var(key).ok()))
            .collect();
        let guard = Self { saved };
        for key in keys {
            guard.remove(key);
        }
        guard
    }

    pub(crate) fn set(&self, key: &str, value: &str) {
        // SAFETY: callers hold the env lock, so no other test thread reads
        // or writes the environment concurrently.
        unsafe {
            std::env::set_var(key, value);
        }
    }

    pub(crate) fn remove(&self, key: &str) {
        // SAFETY: see `set`.
        unsafe {
            std::env::remove_var(key);
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, value) in &self.saved {
            match value {
                Some(value) => self.set(key, value),
                None => self.remove(key),
            }
        }
    }
}
