//! Moving a working copy between the flat file and the database.

use std::fs;
use std::io;
use std::path::Path;
use std::rc::Rc;

use sds_state::{
    atomic_write, write_shadow_file, FsClock, StateConfig, WorkingState, DB_FILE, SHADOW_FILE,
};
use sds_store::{CopyMap, Database, DirFoldMap, DirsMap, FileFoldMap, FileStateMap, MetaStore};
use tracing::{info, warn};

use crate::codec::FlatCodec;
use crate::error::{FlatError, FlatResult};
use crate::flat::FlatDirstate;

/// Load the flat `dirstate` file of `location`. A missing file reads as an
/// empty dirstate.
pub fn read_flat(location: &Path, codec: &dyn FlatCodec) -> FlatResult<FlatDirstate> {
    match fs::read(location.join(SHADOW_FILE)) {
        Ok(data) => codec.decode(&data),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(FlatDirstate::default()),
        Err(e) => Err(e.into()),
    }
}

/// Build a fresh database in `location` from `flat` and open it.
///
/// Any existing database file is replaced. The load runs with the engine's
/// durability switched off, so an interrupted conversion leaves an unusable
/// file; on error the partial file is removed and the caller may retry.
pub fn convert_to_persistent(
    location: &Path,
    flat: &FlatDirstate,
    config: StateConfig,
    clock: impl FsClock + 'static,
) -> FlatResult<WorkingState> {
    let path = location.join(DB_FILE);
    match fs::remove_file(&path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(FlatError::ConversionFailure {
                path,
                reason: format!("cannot remove existing database: {e}"),
            })
        }
    }

    if let Err(e) = bulk_load(&path, flat, config.cache_size) {
        if let Err(cleanup) = fs::remove_file(&path) {
            warn!(path = %path.display(), error = %cleanup, "could not remove partial database");
        }
        return Err(FlatError::ConversionFailure {
            path,
            reason: e.to_string(),
        });
    }
    if config.emit_shadow_file {
        write_shadow_file(location, &flat.parents)?;
    }
    info!(
        path = %path.display(),
        files = flat.files.len(),
        copies = flat.copies.len(),
        "converted flat dirstate to database"
    );
    Ok(WorkingState::open(location, config, clock)?)
}

fn bulk_load(path: &Path, flat: &FlatDirstate, cache_size: i64) -> FlatResult<()> {
    let db = Rc::new(Database::open(path, cache_size)?);
    db.set_durable(false)?;

    let meta = MetaStore::new(Rc::clone(&db));
    let mut files = FileStateMap::new(Rc::clone(&db));
    let mut copies = CopyMap::new(Rc::clone(&db));
    let mut file_fold = FileFoldMap::new(Rc::clone(&db));
    let mut dir_fold = DirFoldMap::new(Rc::clone(&db));
    let mut dirs = DirsMap::persistent(Rc::clone(&db));
    meta.create_schema()?;
    files.create_schema()?;
    copies.create_schema()?;
    file_fold.create_schema()?;
    dir_fold.create_schema()?;
    dirs.create_schema()?;

    files.update(flat.files.iter().map(|(path, record)| (path.clone(), *record)))?;
    copies.update(flat.copies.clone())?;
    file_fold.update(flat.file_fold_map())?;
    dir_fold.update(flat.dir_fold_map()?)?;
    dirs.load(flat.dir_counts()?)?;
    meta.set_parents(&flat.parents)?;
    db.commit()?;

    db.set_durable(true)?;
    db.close()?;
    Ok(())
}

/// Write the committed and pending contents of `state` to the flat
/// `dirstate` file, replacing it atomically.
pub fn convert_to_flat(state: &mut WorkingState, codec: &dyn FlatCodec) -> FlatResult<()> {
    let mut flat = FlatDirstate::new(state.parents()?);
    state.for_each_file(|path, record| {
        flat.files.insert(path.to_vec(), *record);
    })?;
    flat.copies = state.copies()?;
    for (dest, source) in &flat.copies {
        if !flat.files.contains_key(dest) {
            warn!(
                dest = %String::from_utf8_lossy(dest),
                source = %String::from_utf8_lossy(source),
                "flat dirstate cannot hold a copy of an untracked file; dropping it"
            );
        }
    }

    let now = state.fs_now()?;
    let data = codec.encode(&flat, now)?;
    let path = state.location().join(SHADOW_FILE);
    atomic_write(&path, &data).map_err(|e| FlatError::ConversionFailure {
        path: path.clone(),
        reason: e.to_string(),
    })?;
    info!(
        path = %path.display(),
        files = flat.files.len(),
        "converted database to flat dirstate"
    );
    Ok(())
}
