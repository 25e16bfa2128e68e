use cask_log::{Cask, Config, IterOptions};
use test_log::test;

fn seeded_cask(folder: &tempfile::TempDir) -> cask_log::Result<Cask> {
    let cask = Cask::open(folder.path(), Config::default())?;

    for key in ["apple", "banana", "band", "cherry", "date", "elderberry"] {
        cask.put(key.as_bytes(), key.to_uppercase().as_bytes())?;
    }

    Ok(cask)
}

#[test]
fn forward_iteration_is_monotone() -> cask_log::Result<()> {
    let folder = tempfile::tempdir()?;
    let cask = seeded_cask(&folder)?;

    let mut previous: Option<Vec<u8>> = None;
    let mut count = 0;

    for item in cask.iter(IterOptions::default())? {
        let (key, value) = item?;
        if let Some(previous) = &previous {
            assert!(previous.as_slice() < &*key);
        }
        assert_eq!(value.to_ascii_lowercase(), key);
        previous = Some(key.to_vec());
        count += 1;
    }

    assert_eq!(6, count);
    Ok(())
}

#[test]
fn reverse_iteration_is_monotone() -> cask_log::Result<()> {
    let folder = tempfile::tempdir()?;
    let cask = seeded_cask(&folder)?;

    let keys = cask
        .iter(IterOptions {
            reverse: true,
            ..Default::default()
        })?
        .map(|item| item.map(|(k, _)| k.to_vec()))
        .collect::<cask_log::Result<Vec<_>>>()?;

    let mut sorted = keys.clone();
    sorted.sort();
    sorted.reverse();

    assert_eq!(sorted, keys);
    assert_eq!(b"elderberry".to_vec(), keys[0]);
    Ok(())
}

#[test]
fn prefix_iteration() -> cask_log::Result<()> {
    let folder = tempfile::tempdir()?;
    let cask = seeded_cask(&folder)?;

    let keys = cask
        .iter(IterOptions {
            prefix: b"ban".to_vec(),
            ..Default::default()
        })?
        .map(|item| item.map(|(k, _)| k.to_vec()))
        .collect::<cask_log::Result<Vec<_>>>()?;

    assert_eq!(vec![b"banana".to_vec(), b"band".to_vec()], keys);
    Ok(())
}

#[test]
fn prefix_iteration_reverse() -> cask_log::Result<()> {
    let folder = tempfile::tempdir()?;
    let cask = seeded_cask(&folder)?;

    let keys = cask
        .iter(IterOptions {
            prefix: b"ban".to_vec(),
            reverse: true,
        })?
        .map(|item| item.map(|(k, _)| k.to_vec()))
        .collect::<cask_log::Result<Vec<_>>>()?;

    assert_eq!(vec![b"band".to_vec(), b"banana".to_vec()], keys);
    Ok(())
}

#[test]
fn iterator_skips_deleted_keys() -> cask_log::Result<()> {
    let folder = tempfile::tempdir()?;
    let cask = seeded_cask(&folder)?;

    cask.delete(b"banana")?;
    cask.delete(b"date")?;

    let keys = cask
        .iter(IterOptions::default())?
        .map(|item| item.map(|(k, _)| k.to_vec()))
        .collect::<cask_log::Result<Vec<_>>>()?;

    assert_eq!(
        vec![
            b"apple".to_vec(),
            b"band".to_vec(),
            b"cherry".to_vec(),
            b"elderberry".to_vec(),
        ],
        keys
    );
    Ok(())
}

#[test]
fn iterator_snapshot_ignores_later_writes() -> cask_log::Result<()> {
    let folder = tempfile::tempdir()?;
    let cask = seeded_cask(&folder)?;

    let iter = cask.iter(IterOptions::default())?;
    cask.put(b"zucchini", b"ZUCCHINI")?;

    let count = iter.count();
    assert_eq!(6, count);

    Ok(())
}
