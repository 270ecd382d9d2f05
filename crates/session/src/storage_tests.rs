// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn memory_set_get_remove() -> anyhow::Result<()> {
    let storage = MemoryStorage::new();
    assert_eq!(storage.get(ACCESS_TOKEN_KEY), None);

    storage.set(ACCESS_TOKEN_KEY, "a1")?;
    assert_eq!(storage.get(ACCESS_TOKEN_KEY).as_deref(), Some("a1"));

    storage.remove(ACCESS_TOKEN_KEY)?;
    assert_eq!(storage.get(ACCESS_TOKEN_KEY), None);
    // Removing twice is fine.
    storage.remove(ACCESS_TOKEN_KEY)?;
    Ok(())
}

#[test]
fn file_storage_survives_reopen() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("nested").join("tokens.json");

    let storage = FileStorage::open(&path)?;
    storage.set(ACCESS_TOKEN_KEY, "a1")?;
    storage.set(REFRESH_TOKEN_KEY, "r1")?;
    drop(storage);

    let reopened = FileStorage::open(&path)?;
    assert_eq!(reopened.get(ACCESS_TOKEN_KEY).as_deref(), Some("a1"));
    assert_eq!(reopened.get(REFRESH_TOKEN_KEY).as_deref(), Some("r1"));

    reopened.remove(ACCESS_TOKEN_KEY)?;
    let again = FileStorage::open(&path)?;
    assert_eq!(again.get(ACCESS_TOKEN_KEY), None);
    assert_eq!(again.get(REFRESH_TOKEN_KEY).as_deref(), Some("r1"));
    Ok(())
}

#[test]
fn file_storage_missing_file_is_empty() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let storage = FileStorage::open(dir.path().join("absent.json"))?;
    assert_eq!(storage.get(ACCESS_TOKEN_KEY), None);
    assert!(!storage.path().exists());
    Ok(())
}

#[test]
fn file_storage_rejects_corrupt_file() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("tokens.json");
    std::fs::write(&path, "{ not json")?;
    assert!(FileStorage::open(&path).is_err());
    Ok(())
}

#[test]
fn file_storage_leaves_no_tmp_files() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let storage = FileStorage::open(dir.path().join("tokens.json"))?;
    storage.set(ACCESS_TOKEN_KEY, "a1")?;
    storage.set(ACCESS_TOKEN_KEY, "a2")?;

    let names: Vec<String> = std::fs::read_dir(dir.path())?
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["tokens.json".to_owned()]);
    Ok(())
}
