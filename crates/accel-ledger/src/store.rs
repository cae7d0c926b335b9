//! Ledger — redb-backed persistence of prepared claims.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use accel_core::{PreparedClaims, PreparedResult};
use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{LedgerError, LedgerResult};
use crate::tables::PREPARED_CLAIMS;

macro_rules! map_err {
    ($variant:ident) => {
        |e| LedgerError::$variant(e.to_string())
    };
}

/// Prepared-claims ledger. Cheap to clone; clones share the database.
#[derive(Clone)]
pub struct Ledger {
    db: Arc<Database>,
}

impl Ledger {
    /// Open (or create) the ledger file at `path`, creating parent directories.
    pub fn open(path: &Path) -> LedgerResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(map_err!(Open))?;
        }
        let db = Database::create(path).map_err(map_err!(Open))?;
        let ledger = Self { db: Arc::new(db) };
        ledger.ensure_tables()?;
        debug!(?path, "ledger opened");
        Ok(ledger)
    }

    /// Ephemeral ledger for tests and dry runs.
    pub fn open_in_memory() -> LedgerResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let ledger = Self { db: Arc::new(db) };
        ledger.ensure_tables()?;
        Ok(ledger)
    }

    fn ensure_tables(&self) -> LedgerResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(PREPARED_CLAIMS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    pub fn put_claim(&self, claim_uid: &str, result: &PreparedResult) -> LedgerResult<()> {
        let value = serde_json::to_vec(result).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(PREPARED_CLAIMS).map_err(map_err!(Table))?;
            table
                .insert(claim_uid, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(claim = %claim_uid, devices = result.devices.len(), "claim recorded");
        Ok(())
    }

    #[cfg(test)]
    pub fn get_claim(&self, claim_uid: &str) -> LedgerResult<Option<PreparedResult>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(PREPARED_CLAIMS).map_err(map_err!(Table))?;
        match table.get(claim_uid).map_err(map_err!(Read))? {
            Some(guard) => {
                let result = serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(result))
            }
            None => Ok(None),
        }
    }

    /// Every recorded claim.
    pub fn list_claims(&self) -> LedgerResult<PreparedClaims> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(PREPARED_CLAIMS).map_err(map_err!(Table))?;
        let mut claims = PreparedClaims::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            let result: PreparedResult =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            claims.insert(key.value().to_string(), result);
        }
        Ok(claims)
    }

    /// Returns true if the claim was recorded.
    pub fn delete_claim(&self, claim_uid: &str) -> LedgerResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(PREPARED_CLAIMS).map_err(map_err!(Table))?;
            existed = table.remove(claim_uid).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(claim = %claim_uid, existed, "claim removed from ledger");
        Ok(existed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use accel_core::PreparedDevice;

    fn prepared(device: &str) -> PreparedResult {
        PreparedResult {
            devices: vec![PreparedDevice {
                requests: vec!["qat".to_string()],
                pool_name: "node-a".to_string(),
                device_name: device.to_string(),
                cdi_device_ids: vec![
                    format!("intel.com/qat={device}"),
                    "intel.com/qat=qatvf-vfio".to_string(),
                ],
            }],
        }
    }

    #[test]
    fn put_get_delete() {
        let ledger = Ledger::open_in_memory().unwrap();
        assert!(ledger.get_claim("uid-1").unwrap().is_none());

        ledger.put_claim("uid-1", &prepared("qatvf-0000-4b-00-1")).unwrap();
        let got = ledger.get_claim("uid-1").unwrap().unwrap();
        assert_eq!(got, prepared("qatvf-0000-4b-00-1"));

        assert!(ledger.delete_claim("uid-1").unwrap());
        assert!(!ledger.delete_claim("uid-1").unwrap());
        assert!(ledger.list_claims().unwrap().is_empty());
    }

    #[test]
    fn put_overwrites() {
        let ledger = Ledger::open_in_memory().unwrap();
        ledger.put_claim("uid-1", &prepared("a")).unwrap();
        ledger.put_claim("uid-1", &prepared("b")).unwrap();
        let claims = ledger.list_claims().unwrap();
        assert_eq!(claims.len(), 1);
        assert_eq!(claims["uid-1"].devices[0].device_name, "b");
    }

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plugins/qat.intel.com/preparedClaims.redb");
        {
            let ledger = Ledger::open(&path).unwrap();
            ledger.put_claim("uid-1", &prepared("a")).unwrap();
            ledger.put_claim("uid-2", &prepared("b")).unwrap();
        }
        let ledger = Ledger::open(&path).unwrap();
        let claims = ledger.list_claims().unwrap();
        assert_eq!(claims.keys().collect::<Vec<_>>(), ["uid-1", "uid-2"]);
    }
}
