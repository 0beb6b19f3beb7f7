// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The credential store: a bounded in-memory table backed by one
//! `<address>.reg` file per console, guarded by a single process-wide lock
//! (§4.2). This module owns the explicit value the teacher's source
//! replaces many file-scope `static` flags with (§9).

use std::{collections::HashMap, path::PathBuf};

use anyhow::{Context, Result, bail};
use tokio::{fs, sync::Mutex};
use tracing::{info, instrument, warn};

use crate::{
    credentials::{
        migrate::repair_key_field,
        record::{ConsoleRecord, UnifiedCredentials, effective_regist_key_16, key_fingerprint},
        wire::{decode_record, encode_record},
    },
    error::CoreError,
};

/// Owns the directory of `<address>.reg` files and the bounded in-memory
/// mirror of their contents.
pub struct CredentialStore {
    directory: PathBuf,
    capacity: usize,
    table: Mutex<HashMap<String, ConsoleRecord>>,
}

impl CredentialStore {
    pub fn new(directory: impl Into<PathBuf>, capacity: usize) -> Self {
        Self {
            directory: directory.into(),
            capacity,
            table: Mutex::new(HashMap::with_capacity(capacity)),
        }
    }

    fn path_for(&self, address: &str) -> PathBuf {
        self.directory.join(format!("{address}.reg"))
    }

    /// Enumerates the directory, deserializes each file, runs the repair
    /// pass, and populates the in-memory table (§4.2).
    #[instrument(skip(self))]
    pub async fn load_all(&self) -> Result<()> {
        fs::create_dir_all(&self.directory)
            .await
            .with_context(|| format!("creating credentials directory {:?}", self.directory))?;

        let mut entries = fs::read_dir(&self.directory)
            .await
            .with_context(|| format!("reading credentials directory {:?}", self.directory))?;

        let mut loaded = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("reg") {
                continue;
            }
            match self.load_one(&path).await {
                Ok(record) => loaded.push(record),
                Err(e) => warn!("skipping unreadable credential file {path:?}: {e:#}"),
            }
        }

        let mut table = self.table.lock().await;
        for record in loaded {
            if table.len() >= self.capacity && !table.contains_key(&record.address) {
                warn!(
                    "credential table at capacity ({}); dropping record for {}",
                    self.capacity, record.address
                );
                continue;
            }
            table.insert(record.address.clone(), record);
        }
        info!("loaded {} credential record(s)", table.len());
        Ok(())
    }

    async fn load_one(&self, path: &std::path::Path) -> Result<ConsoleRecord> {
        let bytes = fs::read(path).await.with_context(|| format!("reading {path:?}"))?;
        let raw = decode_record(&bytes).with_context(|| format!("parsing {path:?}"))?;

        let (hex8, repaired) = match repair_key_field(&raw.key_field) {
            Ok(v) => v,
            Err(e) => {
                warn!(
                    "credential file {path:?} has an unrepairable registkey field: {e:#}; \
                     loading as present-but-invalid"
                );
                let mut record = ConsoleRecord {
                    address: raw.address.clone(),
                    display_name: raw.display_name,
                    registkey_hex8: String::new(),
                    regist_key_16: raw.regist_key_16,
                    morning_16: raw.morning_16,
                    psn_account_le8: raw.psn_account_le8,
                    valid: false,
                };
                record.recompute_valid();
                return Ok(record);
            },
        };

        let mut record = ConsoleRecord::new(
            raw.address.clone(),
            raw.display_name,
            hex8,
            raw.morning_16,
            raw.psn_account_le8,
        )?;
        // A double-hex/raw-4 migration always repairs regist_key_16's low 4
        // bytes too, since they were derived from the same stale field.
        if repaired {
            record.regist_key_16[0..4]
                .copy_from_slice(&crate::codec::hex_decode(&record.registkey_hex8)?);
            record.recompute_valid();
            self.rewrite(&record).await.with_context(|| {
                format!("rewriting migrated credential file for {}", record.address)
            })?;
        }
        Ok(record)
    }

    /// Most recently inserted record matching `address`, if any.
    pub async fn find(&self, address: &str) -> Option<ConsoleRecord> {
        self.table.lock().await.get(address).cloned()
    }

    /// Replaces or appends `record`, persists it to disk, then re-verifies
    /// by reloading and logs fingerprints of the written key material
    /// (§4.2).
    #[instrument(skip(self, record), fields(address = %record.address))]
    pub async fn upsert_complete(&self, record: ConsoleRecord) -> Result<()> {
        {
            let mut table = self.table.lock().await;
            if table.len() >= self.capacity && !table.contains_key(&record.address) {
                bail!(
                    "credential table at capacity ({}); cannot add {}",
                    self.capacity,
                    record.address
                );
            }
            table.insert(record.address.clone(), record.clone());
        }
        self.rewrite(&record).await?;

        let reloaded = self
            .load_one(&self.path_for(&record.address))
            .await
            .context("reloading after upsert_complete for post-write validation")?;
        info!(
            "upsert_complete for {}: regist_key fp={} morning fp={}",
            record.address,
            key_fingerprint(&reloaded.regist_key_16),
            key_fingerprint(&reloaded.morning_16),
        );
        if reloaded.regist_key_16 != record.regist_key_16 || reloaded.morning_16 != record.morning_16
        {
            bail!(
                "post-write validation failed for {}: reloaded record does not match what was \
                 written",
                record.address
            );
        }
        Ok(())
    }

    async fn rewrite(&self, record: &ConsoleRecord) -> Result<()> {
        let bytes = encode_record(record);
        let path = self.path_for(&record.address);
        fs::write(&path, bytes).await.with_context(|| format!("writing {path:?}"))
    }

    /// Removes `address` from memory and deletes its file, if present.
    pub async fn remove(&self, address: &str) -> Result<()> {
        self.table.lock().await.remove(address);
        let path = self.path_for(address);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("removing {path:?}")),
        }
    }

    /// `(regist_key_16, morning_16)` per the §4.2 preferred-path rule.
    pub async fn get_session_credentials(&self, address: &str) -> Result<([u8; 16], [u8; 16])> {
        let record = self
            .find(address)
            .await
            .ok_or_else(|| CoreError::NotRegistered { address: address.to_string() })?;
        if !record.valid {
            bail!(CoreError::InvalidCredentials {
                message: format!("credential record for {address} is structurally invalid"),
            });
        }
        Ok((effective_regist_key_16(&record)?, record.morning_16))
    }

    /// The single accessor used by wake, session init, and anything else
    /// that must not disagree with itself (§4.2).
    pub async fn get_unified(&self, address: &str) -> Result<UnifiedCredentials> {
        let record = self
            .find(address)
            .await
            .ok_or_else(|| CoreError::NotRegistered { address: address.to_string() })?;
        record.unified()
    }
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;

    fn tempdir() -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("takion-rp-core-test-{}", std::process::id()));
        p
    }

    #[tokio::test]
    #[serial]
    async fn upsert_then_reload_round_trips_byte_identical() {
        let dir = tempdir();
        let _ = std::fs::remove_dir_all(&dir);
        let store = CredentialStore::new(&dir, 16);
        store.load_all().await.expect("load empty dir");

        let record =
            ConsoleRecord::new("192.168.1.10", "living room", "8830739c", [7u8; 16], [9u8; 8])
                .expect("valid record");
        store.upsert_complete(record.clone()).await.expect("upsert");

        let reloaded = store.find("192.168.1.10").await.expect("present");
        assert_eq!(reloaded, record);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    #[serial]
    async fn remove_deletes_file_and_memory_entry() {
        let dir = tempdir();
        let _ = std::fs::remove_dir_all(&dir);
        let store = CredentialStore::new(&dir, 16);
        store.load_all().await.expect("load empty dir");

        let record =
            ConsoleRecord::new("10.0.0.5", "bedroom", "deadbeef", [1u8; 16], [2u8; 8])
                .expect("valid record");
        store.upsert_complete(record).await.expect("upsert");
        store.remove("10.0.0.5").await.expect("remove");

        assert!(store.find("10.0.0.5").await.is_none());
        assert!(!store.path_for("10.0.0.5").exists());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    #[serial]
    async fn double_hex_file_is_migrated_on_load() {
        let dir = tempdir();
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).expect("mkdir");

        let double_hex = "3838333037333963"; // double-hex of "8830739c"
        let raw = crate::credentials::wire::RawRecord {
            address: "192.168.1.20".to_string(),
            display_name: "legacy console".to_string(),
            key_field: double_hex.as_bytes().to_vec(),
            regist_key_16: [0u8; 16],
            morning_16: [5u8; 16],
            psn_account_le8: [6u8; 8],
        };
        std::fs::write(dir.join("192.168.1.20.reg"), encode_record_raw(&raw)).expect("write");

        let store = CredentialStore::new(&dir, 16);
        store.load_all().await.expect("load");
        let record = store.find("192.168.1.20").await.expect("present");
        assert_eq!(record.registkey_hex8, "8830739c");
        assert!(record.valid);

        let _ = std::fs::remove_dir_all(&dir);
    }

    fn encode_record_raw(raw: &crate::credentials::wire::RawRecord) -> Vec<u8> {
        crate::credentials::wire::encode_raw(raw)
    }
}
