use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;
use std::sync::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, anyhow};
use tracing::{error, info, warn};

use crate::bloom::BloomFilter;

pub const DEFAULT_CAPACITY: usize = 1_000_000;
pub const DEFAULT_ERROR_RATE: f64 = 0.001;

#[derive(Debug, Clone)]
pub struct FilterConfig {
    /// Cache file. The database stays the source of truth.
    pub path: PathBuf,
    /// Minimum capacity; rebuilds size to `max(2 * count, capacity)`.
    pub capacity: usize,
    pub error_rate: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("username_filter.bloom"),
            capacity: DEFAULT_CAPACITY,
            error_rate: DEFAULT_ERROR_RATE,
        }
    }
}

/// Outcome of asking the filter about a candidate username.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reservation {
    /// Never added: the name is free and no exact lookup is needed.
    DefinitelyFree,
    /// Might be taken: the caller must confirm against the database.
    PossiblyTaken,
}

/// Process-wide username filter with a persisted cache.
///
/// `contains` only touches memory. Every `add` rewrites the cache file;
/// a failed write is logged and otherwise ignored since the in-memory
/// filter stays correct for the lifetime of the process.
pub struct UsernameFilter {
    config: FilterConfig,
    filter: RwLock<BloomFilter>,
    /// Serializes cache writes; they share one temp file.
    persist_lock: Mutex<()>,
    /// Set when the cache could not be trusted at boot. Every check then
    /// answers `PossiblyTaken` until a rebuild succeeds.
    degraded: AtomicBool,
}

impl UsernameFilter {
    /// Load the cache file if it exists. Never fails: an unreadable cache
    /// starts an empty, degraded filter.
    pub fn load(config: FilterConfig) -> Self {
        let (filter, degraded) = match read_cache(&config) {
            Ok(Some(filter)) => {
                info!(
                    "Username filter loaded from {} ({} entries)",
                    config.path.display(),
                    filter.len()
                );
                (filter, false)
            }
            Ok(None) => {
                warn!(
                    "No username filter at {}, starting empty until resync",
                    config.path.display()
                );
                (BloomFilter::with_rate(config.capacity, config.error_rate), true)
            }
            Err(e) => {
                warn!(
                    "Username filter at {} unusable ({:#}), falling back to exact checks",
                    config.path.display(),
                    e
                );
                (BloomFilter::with_rate(config.capacity, config.error_rate), true)
            }
        };

        Self {
            config,
            filter: RwLock::new(filter),
            persist_lock: Mutex::new(()),
            degraded: AtomicBool::new(degraded),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    /// Probabilistic membership. Empty strings are never members.
    pub fn contains(&self, candidate: &str) -> bool {
        if candidate.is_empty() {
            return false;
        }
        match self.filter.read() {
            Ok(filter) => filter.contains(candidate.as_bytes()),
            // Poisoned: answer "maybe" so the caller falls back to the store.
            Err(_) => true,
        }
    }

    pub fn reserve_check(&self, candidate: &str) -> Reservation {
        if self.is_degraded() || self.contains(candidate) {
            Reservation::PossiblyTaken
        } else {
            Reservation::DefinitelyFree
        }
    }

    /// Insert a claimed username and persist the filter.
    pub fn add(&self, value: &str) {
        if value.is_empty() {
            return;
        }

        let inserted = match self.filter.write() {
            Ok(mut filter) => filter.insert(value.as_bytes()),
            Err(_) => {
                error!("Username filter lock poisoned, '{}' not recorded", value);
                return;
            }
        };

        if inserted {
            if let Err(e) = self.persist() {
                error!("Failed to persist username filter: {:#}", e);
            }
        }
    }

    /// Replace the filter with one sized for `values` and persist it.
    /// Called once at startup with every username in the database.
    pub fn rebuild<I, S>(&self, values: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let values: Vec<S> = values.into_iter().collect();
        let capacity = (values.len() * 2).max(self.config.capacity);
        let mut fresh = BloomFilter::with_rate(capacity, self.config.error_rate);
        for value in &values {
            let value = value.as_ref();
            if !value.is_empty() {
                fresh.insert(value.as_bytes());
            }
        }

        info!(
            "Username filter rebuilt with {} entries (capacity {})",
            fresh.len(),
            capacity
        );

        match self.filter.write() {
            Ok(mut filter) => *filter = fresh,
            Err(_) => {
                error!("Username filter lock poisoned, rebuild discarded");
                return;
            }
        }
        self.degraded.store(false, Ordering::Release);

        if let Err(e) = self.persist() {
            error!("Failed to persist username filter: {:#}", e);
        }
    }

    /// Write to a sibling temp file and rename so a crash never leaves a
    /// half-written cache behind.
    fn persist(&self) -> Result<()> {
        let _guard = self
            .persist_lock
            .lock()
            .map_err(|_| anyhow!("username filter persist lock poisoned"))?;
        let filter = self
            .filter
            .read()
            .map_err(|_| anyhow!("username filter lock poisoned"))?;

        let tmp = self.config.path.with_extension("tmp");
        let file = File::create(&tmp).with_context(|| format!("create {}", tmp.display()))?;
        filter
            .write_to(BufWriter::new(file))
            .with_context(|| format!("write {}", tmp.display()))?;
        fs::rename(&tmp, &self.config.path)
            .with_context(|| format!("rename to {}", self.config.path.display()))?;
        Ok(())
    }
}

fn read_cache(config: &FilterConfig) -> Result<Option<BloomFilter>> {
    if !config.path.exists() {
        return Ok(None);
    }
    let file = File::open(&config.path)?;
    let filter = BloomFilter::read_from(BufReader::new(file))?;
    Ok(Some(filter))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_in(dir: &tempfile::TempDir) -> FilterConfig {
        FilterConfig {
            path: dir.path().join("usernames.bloom"),
            capacity: 1_000,
            error_rate: 0.001,
        }
    }

    #[test]
    fn fresh_filter_fails_open_until_rebuilt() {
        let dir = tempfile::tempdir().unwrap();
        let filter = UsernameFilter::load(config_in(&dir));

        assert!(filter.is_degraded());
        assert_eq!(filter.reserve_check("alice"), Reservation::PossiblyTaken);

        filter.rebuild(Vec::<String>::new());
        assert!(!filter.is_degraded());
        assert_eq!(filter.reserve_check("alice"), Reservation::DefinitelyFree);
    }

    #[test]
    fn add_flips_alice_to_possibly_taken() {
        let dir = tempfile::tempdir().unwrap();
        let filter = UsernameFilter::load(config_in(&dir));
        filter.rebuild(["bob"]);

        assert_eq!(filter.reserve_check("alice"), Reservation::DefinitelyFree);
        filter.add("alice");
        assert_eq!(filter.reserve_check("alice"), Reservation::PossiblyTaken);
        assert_eq!(filter.reserve_check("bob"), Reservation::PossiblyTaken);
    }

    #[test]
    fn persisted_cache_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let filter = UsernameFilter::load(config_in(&dir));
            filter.rebuild(Vec::<String>::new());
            filter.add("carol");
        }

        let reloaded = UsernameFilter::load(config_in(&dir));
        assert!(!reloaded.is_degraded());
        assert!(reloaded.contains("carol"));
    }

    #[test]
    fn corrupt_cache_degrades_instead_of_failing() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(&dir);
        fs::write(&config.path, b"garbage").unwrap();

        let filter = UsernameFilter::load(config);
        assert!(filter.is_degraded());
        assert_eq!(filter.reserve_check("anyone"), Reservation::PossiblyTaken);
    }

    #[test]
    fn unwritable_cache_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let config = FilterConfig {
            path: dir.path().join("missing-dir").join("usernames.bloom"),
            capacity: 100,
            error_rate: 0.01,
        };
        let filter = UsernameFilter::load(config);
        filter.rebuild(["dave"]);
        filter.add("erin");

        assert!(filter.contains("dave"));
        assert!(filter.contains("erin"));
    }

    #[test]
    fn rebuild_sizes_for_twice_the_population() {
        let dir = tempfile::tempdir().unwrap();
        let filter = UsernameFilter::load(FilterConfig {
            capacity: 10,
            ..config_in(&dir)
        });
        let names: Vec<String> = (0..50).map(|i| format!("name{}", i)).collect();
        filter.rebuild(&names);

        assert_eq!(filter.filter.read().unwrap().capacity(), 100);
        assert!(names.iter().all(|n| filter.contains(n)));
    }

    #[test]
    fn concurrent_adds_leave_a_readable_cache() {
        let dir = tempfile::tempdir().unwrap();
        let filter = UsernameFilter::load(config_in(&dir));
        filter.rebuild(Vec::<String>::new());

        let names: Vec<String> = (0..16).map(|i| format!("user{}", i)).collect();
        std::thread::scope(|scope| {
            for name in &names {
                let filter = &filter;
                scope.spawn(move || filter.add(name));
            }
        });

        let reloaded = UsernameFilter::load(config_in(&dir));
        assert!(!reloaded.is_degraded());
        assert!(names.iter().all(|n| reloaded.contains(n)));
        assert!(!config_in(&dir).path.with_extension("tmp").exists());
    }

    #[derive(Clone, Default)]
    struct Captured(std::sync::Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn missing_cache_warns_at_boot() {
        let dir = tempfile::tempdir().unwrap();
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();

        let filter = tracing::subscriber::with_default(subscriber, || {
            UsernameFilter::load(config_in(&dir))
        });
        assert!(filter.is_degraded());

        let logs = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(logs.contains("WARN"), "logs: {}", logs);
        assert!(logs.contains("No username filter"), "logs: {}", logs);
    }

    #[test]
    fn empty_values_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let filter = UsernameFilter::load(config_in(&dir));
        filter.rebuild([""]);
        filter.add("");
        assert!(!filter.contains(""));
    }
}
