// src/store/lease.rs

//! Named mutual-exclusion leases over the store.
//!
//! A lease is a single uniquely-keyed row with a deadline. Acquisition is
//! one INSERT; a unique violation means another holder has the key. There is
//! no renewal: callers size the TTL to cover the work plus slack, and the
//! supervisor's sweeper removes expired rows so a crashed holder cannot
//! wedge a key forever.

use std::future::Future;
use std::time::{Duration, SystemTime};

use rusqlite::params;
use tracing::{debug, warn};

use super::{begin_tracking, to_utc_millis, Store, StoreError};

/// A held lease, released by id+key match.
#[derive(Debug)]
pub struct Lease {
    pub(crate) id: i64,
    pub(crate) key: String,
}

impl Store {
    /// Try to acquire `key` until `deadline`. `None` means the key is held
    /// elsewhere; that is not an error.
    pub fn try_obtain_lease(
        &self,
        key: &str,
        deadline: SystemTime,
    ) -> Result<Option<Lease>, StoreError> {
        let conn = self.lock();
        let track = begin_tracking("try-obtain-lease");
        let inserted: Result<i64, rusqlite::Error> = conn.query_row(
            "INSERT INTO work_leases (lease_key, leased_until_utcmillis)
             VALUES (?1, ?2)
             RETURNING lease_id",
            params![key, to_utc_millis(deadline)],
            |row| row.get(0),
        );
        match track.finish(inserted) {
            Ok(id) => Ok(Some(Lease {
                id,
                key: key.to_string(),
            })),
            Err(err) if err.is_unique_violation() => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub fn release_lease(&self, lease: &Lease) -> Result<(), StoreError> {
        let conn = self.lock();
        conn.execute(
            "DELETE FROM work_leases WHERE lease_id = ?1 AND lease_key = ?2",
            params![lease.id, lease.key],
        )
        .map(|_| ())
        .map_err(StoreError::from)
    }

    /// Run `work` under the lease `key`, holding it for at most `ttl`.
    ///
    /// Contention is not an error: when the key is held elsewhere, `work` is
    /// dropped unpolled and `Ok(None)` is returned. A failure to release is
    /// logged and swallowed; the sweeper reclaims the row once the TTL
    /// passes.
    pub async fn with_lease<T, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        work: Fut,
    ) -> anyhow::Result<Option<T>>
    where
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let deadline = SystemTime::now() + ttl;
        let Some(lease) = self.try_obtain_lease(key, deadline)? else {
            debug!(key, "lease held elsewhere, skipping");
            return Ok(None);
        };

        let out = work.await;

        if let Err(err) = self.release_lease(&lease) {
            warn!(key, lease_id = lease.id, error = %err, "failed to release lease");
        }

        out.map(Some)
    }
}
