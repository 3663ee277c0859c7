#![cfg(test)]

//! Scoped environment overrides for tests that read `AFD_*` variables.

use std::env;
use std::ffi::{OsStr, OsString};
use std::sync::Mutex;

/// Held by every test that changes the process environment.
pub(crate) static ENV_LOCK: Mutex<()> = Mutex::new(());

/// Restores the previous value of one variable when dropped.
#[allow(unsafe_code)]
#[derive(Debug)]
pub(crate) struct EnvGuard {
    key: OsString,
    previous: Option<OsString>,
}

impl EnvGuard {
    /// Sets `key` to `value` for the lifetime of the guard.
    #[allow(unsafe_code)]
    pub(crate) fn set(key: &'static str, value: &OsStr) -> Self {
        let previous = env::var_os(key);
        unsafe {
            env::set_var(key, value);
        }
        Self {
            key: OsString::from(key),
            previous,
        }
    }

    /// Unsets `key` for the lifetime of the guard.
    #[allow(unsafe_code)]
    pub(crate) fn remove(key: &'static str) -> Self {
        let previous = env::var_os(key);
        unsafe {
            env::remove_var(key);
        }
        Self {
            key: OsString::from(key),
            previous,
        }
    }
}

#[allow(unsafe_code)]
impl Drop for EnvGuard {
    fn drop(&mut self) {
        match self.previous.take() {
            Some(value) => unsafe { env::set_var(&self.key, value) },
            None => unsafe { env::remove_var(&self.key) },
        }
    }
}
