use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use ::time::OffsetDateTime;

use crate::model::{CacheRequest, CertificateCacheEntry};
use crate::repository::table::{Record, Table};
use certcheck_common::error::AppError;
use certcheck_common::logging::{debug, warn};
use certcheck_common::target;

/// Stored entries between sweeps of expired entries
pub const PURGE_INTERVAL_PUTS: usize = 64;

/// Result of a population (cache miss) computation
#[derive(Clone, Debug)]
pub struct Population {
    pub entry: CertificateCacheEntry,
    /// Whether entry should be stored (non-cacheable entries are still shared with waiters)
    pub cacheable: bool,
}

/// Computes a certificate's status on a cache miss
pub trait PopulationSource: Send + Sync {
    /// Compute status for the given request.
    ///
    /// Returns population on success, otherwise it returns an error.
    fn populate(&self, request: &CacheRequest) -> Result<Population, AppError>;
}

/// Cache lookup result
#[derive(Clone, Debug, PartialEq)]
pub struct CacheLookup {
    pub entry: CertificateCacheEntry,
    /// Served from cache (true) or freshly computed (false)
    pub cached: bool,
}

/// Shareable (followers) failure of a flight leader
#[derive(Clone, Debug)]
struct FlightFailure {
    signature_failure: bool,
    message: String,
}

impl From<&AppError> for FlightFailure {
    fn from(err: &AppError) -> Self {
        Self {
            signature_failure: err.is_signature_failure(),
            message: err.to_string(),
        }
    }
}

impl From<FlightFailure> for AppError {
    fn from(failure: FlightFailure) -> Self {
        if failure.signature_failure {
            AppError::SignatureVerification(failure.message)
        } else {
            AppError::General(failure.message)
        }
    }
}

type FlightOutcome = Result<CertificateCacheEntry, FlightFailure>;

/// In-flight population for a key
struct Flight {
    outcome: Mutex<Option<FlightOutcome>>,
    completed: Condvar,
}

impl Flight {
    fn new() -> Self {
        Self {
            outcome: Mutex::new(None),
            completed: Condvar::new(),
        }
    }

    fn publish(&self, outcome: FlightOutcome) {
        if let Ok(mut current) = self.outcome.lock() {
            if current.is_none() {
                *current = Some(outcome);
            }
        }
        self.completed.notify_all();
    }

    fn wait(&self) -> Result<CertificateCacheEntry, AppError> {
        let poisoned_fn =
            |_| AppError::General("Failed to wait on cache population".to_string());

        let mut outcome = self.outcome.lock().map_err(poisoned_fn)?;
        while outcome.is_none() {
            outcome = self.completed.wait(outcome).map_err(poisoned_fn)?;
        }
        match outcome.as_ref() {
            Some(Ok(entry)) => Ok(entry.clone()),
            Some(Err(failure)) => Err(failure.clone().into()),
            None => Err(AppError::General(
                "Cache population produced no outcome".to_string(),
            )),
        }
    }
}

/// Releases flight followers and unregisters the flight, even if the leader unwinds
struct FlightGuard<'a> {
    flights: &'a Mutex<HashMap<String, Arc<Flight>>>,
    key: &'a str,
    flight: Arc<Flight>,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.flight.publish(Err(FlightFailure {
            signature_failure: false,
            message: format!("Cache population aborted: key={}", self.key),
        }));
        if let Ok(mut flights) = self.flights.lock() {
            flights.remove(self.key);
        }
    }
}

/// Get-or-populate certificate status cache, with single-flight population per key
pub struct CertificateCache {
    table: Arc<dyn Table<CertificateCacheEntry>>,
    flights: Mutex<HashMap<String, Arc<Flight>>>,
    puts_since_purge: AtomicUsize,
}

impl CertificateCache {
    /// CertificateCache constructor
    ///
    /// # Arguments
    ///
    /// * `table` - Storage for cache entries
    ///
    /// # Returns
    ///
    /// A newly constructed [`CertificateCache`] object.
    ///
    pub fn new(table: Arc<dyn Table<CertificateCacheEntry>>) -> Self {
        Self {
            table,
            flights: Mutex::new(HashMap::new()),
            puts_since_purge: AtomicUsize::new(0),
        }
    }

    /// Get entry for key, populating on miss/expiry
    ///
    /// # Arguments
    ///
    /// * `key` - Method-tagged cache key
    /// * `request` - Request context needed to compute a miss
    /// * `source` - Population strategy
    ///
    /// # Returns
    ///
    /// A [`Result`] containing the entry and whether it was served from cache. Table read
    /// failures and population failures are returned as errors. Table write failures are
    /// logged only.
    ///
    pub fn get(
        &self,
        key: &str,
        request: &CacheRequest,
        source: &dyn PopulationSource,
    ) -> Result<CacheLookup, AppError> {
        if let Some(entry) = self.lookup(key)? {
            return Ok(CacheLookup {
                entry,
                cached: true,
            });
        }

        let (flight, is_leader) = {
            let mut flights = self.flights.lock().map_err(|err| {
                AppError::General(format!("Failed to access cache flights: err={}", err))
            })?;
            match flights.get(key) {
                Some(flight) => (flight.clone(), false),
                None => {
                    let flight = Arc::new(Flight::new());
                    flights.insert(key.to_string(), flight.clone());
                    (flight, true)
                }
            }
        };

        if !is_leader {
            debug(
                &target!(),
                &format!("Awaiting in-flight cache population: key={}", key),
            );
            return flight.wait().map(|entry| CacheLookup {
                entry,
                cached: false,
            });
        }

        let guard = FlightGuard {
            flights: &self.flights,
            key,
            flight,
        };

        // A previous leader may have stored the entry after our lookup
        let population = match self.lookup(key) {
            Ok(Some(entry)) => {
                guard.flight.publish(Ok(entry.clone()));
                return Ok(CacheLookup {
                    entry,
                    cached: true,
                });
            }
            Ok(None) => source.populate(request),
            Err(err) => Err(err),
        }
        .map(|mut population| {
            population.entry.certificate_id = key.to_string();
            population
        });

        match &population {
            Ok(population) => {
                if population.cacheable {
                    match self.table.put(population.entry.clone()) {
                        Ok(_) => self.purge_periodically(),
                        Err(err) => warn(
                            &target!(),
                            &format!("Failed to store cache entry: key={}, err={:?}", key, &err),
                        ),
                    }
                }
                guard.flight.publish(Ok(population.entry.clone()));
            }
            Err(err) => guard.flight.publish(Err(err.into())),
        }

        population.map(|population| CacheLookup {
            entry: population.entry,
            cached: false,
        })
    }

    /// Sweep expired entries once every [`PURGE_INTERVAL_PUTS`] stored entries
    fn purge_periodically(&self) {
        if self.puts_since_purge.fetch_add(1, Ordering::Relaxed) + 1 < PURGE_INTERVAL_PUTS {
            return;
        }
        self.puts_since_purge.store(0, Ordering::Relaxed);

        match self.table.purge_expired() {
            Ok(purged) => debug(
                &target!(),
                &format!("Purged expired cache entries: count={}", purged),
            ),
            Err(err) => warn(
                &target!(),
                &format!("Failed purging cache entries: err={:?}", &err),
            ),
        }
    }

    fn lookup(&self, key: &str) -> Result<Option<CertificateCacheEntry>, AppError> {
        let now = OffsetDateTime::now_utc();
        Ok(self
            .table
            .get(key)?
            .filter(|entry| !entry.is_expired(&now)))
    }
}
