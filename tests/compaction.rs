use cask_log::{BatchOptions, Cask, Config, Error};
use std::collections::BTreeMap;
use test_log::test;

fn small_segments() -> Config {
    Config::default()
        .segment_size_bytes(4 * 1_024)
        .merge_ratio(0.0)
}

fn snapshot(cask: &Cask) -> cask_log::Result<BTreeMap<Vec<u8>, Vec<u8>>> {
    let mut map = BTreeMap::new();
    cask.fold(|key, value| {
        map.insert(key.to_vec(), value.to_vec());
        true
    })?;
    Ok(map)
}

#[test]
fn merge_reclaims_space() -> cask_log::Result<()> {
    let folder = tempfile::tempdir()?;

    {
        let cask = Cask::open(folder.path(), small_segments())?;

        for i in 0..100u32 {
            cask.put(format!("key-{i:03}").as_bytes(), &vec![b'a'; 100])?;
        }
        for i in 0..50u32 {
            cask.put(format!("key-{i:03}").as_bytes(), &vec![b'b'; 100])?;
        }
        for i in 50..75u32 {
            cask.delete(format!("key-{i:03}").as_bytes())?;
        }

        let before = cask.stat()?;
        assert!(before.reclaimable_bytes > 0);
        assert_eq!(75, before.key_count);

        cask.merge()?;
        cask.close()?;
        drop(cask);

        let cask = Cask::open(folder.path(), small_segments())?;
        let after = cask.stat()?;

        assert_eq!(75, after.key_count);
        assert_eq!(0, after.reclaimable_bytes);
        assert!(
            after.segment_count < before.segment_count,
            "{} should shrink below {}",
            after.segment_count,
            before.segment_count
        );

        for i in 0..50u32 {
            assert_eq!(cask.get(format!("key-{i:03}").as_bytes())?, vec![b'b'; 100]);
        }
        for i in 50..75u32 {
            assert!(matches!(
                cask.get(format!("key-{i:03}").as_bytes()),
                Err(Error::KeyNotFound)
            ));
        }
        for i in 75..100u32 {
            assert_eq!(cask.get(format!("key-{i:03}").as_bytes())?, vec![b'a'; 100]);
        }
    }

    Ok(())
}

#[test]
fn merge_equivalence() -> cask_log::Result<()> {
    let folder = tempfile::tempdir()?;
    let copy_folder = tempfile::tempdir()?;
    let copy_path = copy_folder.path().join("copy");

    let cask = Cask::open(folder.path(), small_segments())?;

    for i in 0..60u32 {
        cask.put(format!("put-{i:02}").as_bytes(), format!("value-{i}").as_bytes())?;
    }
    for i in 0..20u32 {
        cask.delete(format!("put-{i:02}").as_bytes())?;
    }

    let batch = cask.write_batch(BatchOptions::default())?;
    batch.put(b"batched-1", b"b1")?;
    batch.put(b"batched-2", b"b2")?;
    batch.delete(b"put-30")?;
    batch.commit()?;

    let expected = snapshot(&cask)?;
    cask.backup(&copy_path)?;

    // compact the copy over a full restart cycle
    {
        let copy = Cask::open(&copy_path, small_segments())?;
        assert_eq!(expected, snapshot(&copy)?);
        copy.merge()?;
        copy.close()?;
    }

    let copy = Cask::open(&copy_path, small_segments())?;
    assert_eq!(expected, snapshot(&copy)?);

    Ok(())
}

#[test]
fn merge_ratio_unreached() -> cask_log::Result<()> {
    let folder = tempfile::tempdir()?;
    let cask = Cask::open(folder.path(), Config::default().merge_ratio(0.5))?;

    cask.put(b"fresh", b"data")?;

    assert!(matches!(cask.merge(), Err(Error::MergeRatioUnreached)));

    Ok(())
}

#[test]
fn merge_then_write_then_merge_again() -> cask_log::Result<()> {
    let folder = tempfile::tempdir()?;

    let mut expected = BTreeMap::new();

    {
        let cask = Cask::open(folder.path(), small_segments())?;
        for i in 0..80u32 {
            cask.put(format!("k{i:02}").as_bytes(), &vec![b'1'; 64])?;
            cask.put(format!("k{i:02}").as_bytes(), &vec![b'2'; 64])?;
        }
        cask.merge()?;
        cask.close()?;
    }

    {
        let cask = Cask::open(folder.path(), small_segments())?;
        for i in 0..40u32 {
            cask.put(format!("k{i:02}").as_bytes(), &vec![b'3'; 64])?;
        }
        cask.merge()?;
        cask.close()?;
    }

    for i in 0..40u32 {
        expected.insert(format!("k{i:02}").into_bytes(), vec![b'3'; 64]);
    }
    for i in 40..80u32 {
        expected.insert(format!("k{i:02}").into_bytes(), vec![b'2'; 64]);
    }

    let cask = Cask::open(folder.path(), small_segments())?;
    assert_eq!(expected, snapshot(&cask)?);

    Ok(())
}

#[test]
fn unfinished_merge_directory_is_discarded() -> cask_log::Result<()> {
    let folder = tempfile::tempdir()?;
    let data_dir = folder.path().join("db");

    {
        let cask = Cask::open(&data_dir, small_segments())?;
        cask.put(b"key", b"value")?;
        cask.close()?;
    }

    // fake a merge that died before writing its marker
    let merge_dir = folder.path().join("db-merge");
    std::fs::create_dir_all(&merge_dir)?;
    std::fs::write(merge_dir.join("000000000.data"), b"half-written garbage")?;

    let cask = Cask::open(&data_dir, small_segments())?;
    assert_eq!(&*cask.get(b"key")?, b"value");
    assert!(!merge_dir.exists());

    Ok(())
}
