//! Environment variable access behind a trait so configuration can be tested
//! without touching the process environment.
//!
//! ```
//! use rtac_scheduler::env::{ReadEnv, SystemEnv};
//!
//! fn redis_url<E: ReadEnv>(env: &E) -> String {
//!     env.var("REDIS_URL")
//!         .unwrap_or_else(|_| "redis://localhost:6379/0".to_string())
//! }
//!
//! let url = redis_url(&SystemEnv);
//! ```

use std::env;

pub trait ReadEnv {
    fn var(&self, key: &str) -> Result<String, env::VarError>;

    /// Like [`var`](Self::var) but treats blank values as unset.
    fn non_empty(&self, key: &str) -> Option<String> {
        self.var(key)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }
}

/// Zero-sized type, delegates to `std::env`.
pub struct SystemEnv;

impl ReadEnv for SystemEnv {
    #[inline]
    fn var(&self, key: &str) -> Result<String, env::VarError> {
        env::var(key)
    }
}

#[cfg(any(test, feature = "test-support"))]
pub use in_memory::InMemoryEnv;

#[cfg(any(test, feature = "test-support"))]
mod in_memory {
    use std::collections::HashMap;
    use std::env;
    use std::sync::Mutex;

    use super::ReadEnv;

    /// Won't touch the global process environment.
    ///
    /// Backed by a `Mutex` so it can be shared with multi-threaded tokio tests.
    #[derive(Default)]
    pub struct InMemoryEnv {
        vars: Mutex<HashMap<String, String>>,
    }

    impl InMemoryEnv {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
            self.vars.lock().unwrap().insert(key.into(), value.into());
        }

        pub fn remove(&self, key: &str) {
            self.vars.lock().unwrap().remove(key);
        }
    }

    impl ReadEnv for InMemoryEnv {
        fn var(&self, key: &str) -> Result<String, env::VarError> {
            self.vars
                .lock()
                .unwrap()
                .get(key)
                .cloned()
                .ok_or(env::VarError::NotPresent)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_env_set_get_remove() {
        let env = InMemoryEnv::new();
        env.set("POD_NAME", "poller-0");
        assert_eq!(env.var("POD_NAME").unwrap(), "poller-0");

        env.remove("POD_NAME");
        assert!(matches!(env.var("POD_NAME"), Err(env::VarError::NotPresent)));
    }

    #[test]
    fn non_empty_skips_blank_values() {
        let env = InMemoryEnv::new();
        env.set("POD_NAME", "   ");
        env.set("HOSTNAME", " host-1 ");

        assert_eq!(env.non_empty("POD_NAME"), None);
        assert_eq!(env.non_empty("HOSTNAME").as_deref(), Some("host-1"));
        assert_eq!(env.non_empty("MISSING"), None);
    }

    #[test]
    fn system_env_matches_std() {
        assert_eq!(SystemEnv.var("PATH").is_ok(), std::env::var("PATH").is_ok());
    }
}
