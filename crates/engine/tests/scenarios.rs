//! End-to-end scenarios through the full engine stack
//!
//! Each test drives real backups through the local driver into a real index
//! and checks the resulting destination layout and query answers.

use anyhow::Result;
use dfb_core::{parse_time_expr, ArtifactKind, LocalDriver};
use dfb_engine::{refresh, Attrib, BackupRun, PruneRun, RunConfig};
use dfb_index::{IndexStore, StateQuery};
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

struct World {
    _tmp: TempDir,
    src: PathBuf,
    dst: PathBuf,
    driver: LocalDriver,
    store: IndexStore,
    config: RunConfig,
}

fn world() -> World {
    let tmp = TempDir::new().unwrap();
    let src = tmp.path().join("src");
    let dst = tmp.path().join("dst");
    fs::create_dir_all(&src).unwrap();
    fs::create_dir_all(&dst).unwrap();
    let driver = LocalDriver::new(&src, &dst);
    let store = IndexStore::open(&tmp.path().join("idx.db")).unwrap();
    let mut config = RunConfig::default();
    config.renames = Attrib::Mtime;
    World {
        _tmp: tmp,
        src,
        dst,
        driver,
        store,
        config,
    }
}

fn backup(world: &World, now: i64) {
    let run = BackupRun::new(&world.config, &world.driver, &world.store, now);
    let plan = run.plan("").unwrap();
    let outcome = run.execute(&plan, None);
    assert_eq!(outcome.report.exit_code(), 0, "backup at {now} failed");
}

fn state_at(world: &World, at: i64) -> Vec<(String, i64)> {
    world
        .store
        .state_at(&StateQuery {
            at: Some(at),
            deref: true,
            ..Default::default()
        })
        .into_iter()
        .map(|e| {
            let size = e.target.as_ref().map(|t| t.size).unwrap_or(e.rec.size);
            (e.rec.apath, size)
        })
        .collect()
}

/// Scenario 1: create, modify, delete a single file
#[test]
fn scenario_create_modify_delete() -> Result<()> {
    let w = world();

    fs::write(w.src.join("foo.txt"), b"a")?;
    backup(&w, 1);
    assert!(w.dst.join("foo.19700101000001.txt").exists());
    assert_eq!(state_at(&w, 1), vec![("foo.txt".to_string(), 1)]);

    fs::write(w.src.join("foo.txt"), b"ab")?;
    backup(&w, 2);
    assert!(w.dst.join("foo.19700101000002.txt").exists());

    fs::remove_file(w.src.join("foo.txt"))?;
    backup(&w, 3);
    assert!(w.dst.join("foo.19700101000003D.txt").exists());
    assert_eq!(fs::read(w.dst.join("foo.19700101000003D.txt"))?, b"DEL");

    assert!(state_at(&w, 3).is_empty());
    assert_eq!(state_at(&w, 2), vec![("foo.txt".to_string(), 2)]);
    Ok(())
}

/// Scenario 2: rename tracked via reference
#[test]
fn scenario_rename_via_reference() -> Result<()> {
    let w = world();

    fs::write(w.src.join("a.bin"), b"content-H")?;
    backup(&w, 1);
    assert!(w.dst.join("a.19700101000001.bin").exists());

    fs::rename(w.src.join("a.bin"), w.src.join("b.bin"))?;
    backup(&w, 2);

    let payload = fs::read(w.dst.join("b.19700101000002R.bin"))?;
    assert_eq!(payload, br#"{"ver":2,"rel":"a.19700101000001.bin"}"#);
    assert!(w.dst.join("a.19700101000002D.bin").exists());

    // b.bin dereferences to the size of the original artifact
    let state = state_at(&w, 2);
    assert_eq!(state, vec![("b.bin".to_string(), 9)]);
    Ok(())
}

/// Scenario 3: multi-extension stamp injection
#[test]
fn scenario_multi_extension_split() -> Result<()> {
    let w = world();
    fs::create_dir_all(w.src.join("logs"))?;
    fs::write(w.src.join("logs/archive.tar.gz"), b"tarball")?;

    let t = parse_time_expr("2024-01-26T09:45:01Z", 0)?;
    backup(&w, t);
    assert!(w.dst.join("logs/archive.20240126094501.tar.gz").exists());
    Ok(())
}

/// Scenario 4: prune honors reference protection until the reference goes
#[test]
fn scenario_prune_reference_protection() -> Result<()> {
    let w = world();

    fs::write(w.src.join("a.bin"), b"content-H")?;
    backup(&w, 1);
    fs::rename(w.src.join("a.bin"), w.src.join("b.bin"))?;
    backup(&w, 2);

    let prune = PruneRun::new(&w.config, &w.driver, &w.store);
    let plan = prune.plan(2, 0, "")?;
    prune.execute(&plan, None)?;
    assert!(
        w.dst.join("a.19700101000001.bin").exists(),
        "referenced artifact must survive while its reference is retained"
    );

    // Prune the reference explicitly; the referent becomes fair game
    let plan = prune.plan_rpaths(&["b.19700101000002R.bin".to_string()], true)?;
    prune.execute(&plan, None)?;
    let plan = prune.plan(10, 0, "")?;
    prune.execute(&plan, None)?;
    assert!(!w.dst.join("a.19700101000001.bin").exists());
    Ok(())
}

/// Scenario 5: refresh reconstructs an equivalent index
#[test]
fn scenario_refresh_reconstructs() -> Result<()> {
    let w = world();

    fs::write(w.src.join("foo.txt"), b"a")?;
    backup(&w, 1);
    fs::write(w.src.join("foo.txt"), b"ab")?;
    backup(&w, 2);
    fs::remove_file(w.src.join("foo.txt"))?;
    backup(&w, 3);

    w.store.reset()?;
    refresh(&w.store, &w.driver, &w.config, false, 100)?;
    assert_eq!(w.store.len(), 3);

    let run = BackupRun::new(&w.config, &w.driver, &w.store, 10);
    let plan = run.plan("")?;
    assert!(plan.is_empty(), "refresh must make re-backup a no-op: {plan:?}");
    Ok(())
}

/// Scenario 6: equivalent time expressions give identical query results
#[test]
fn scenario_timezone_agnostic_query() -> Result<()> {
    let w = world();
    let t = parse_time_expr("u1710060600", 0)?;

    fs::write(w.src.join("tz.txt"), b"zone")?;
    backup(&w, t);

    let a = parse_time_expr("2024-03-10T02:30:00-05:00", 0)?;
    let b = parse_time_expr("u1710060600", 0)?;
    assert_eq!(a, b);
    assert_eq!(state_at(&w, a), state_at(&w, b));
    assert_eq!(state_at(&w, a), vec![("tz.txt".to_string(), 4)]);
    Ok(())
}

/// Delete markers keep their kind and sentinel size through a full cycle
#[test]
fn delete_marker_payload_is_advisory() -> Result<()> {
    let w = world();
    fs::write(w.src.join("x.txt"), b"x")?;
    backup(&w, 1);
    fs::remove_file(w.src.join("x.txt"))?;
    backup(&w, 2);

    // Any payload is accepted on read; only existence matters
    fs::write(w.dst.join("x.19700101000002D.txt"), b"whatever")?;
    w.store.reset()?;
    refresh(&w.store, &w.driver, &w.config, false, 100)?;

    let rec = w.store.get("x.19700101000002D.txt").unwrap();
    assert_eq!(rec.kind, ArtifactKind::DeleteMarker);
    assert_eq!(rec.size, -1);
    Ok(())
}
