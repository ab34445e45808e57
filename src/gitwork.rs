//! Temporary clones of the working tree
//!
//! The breaking-change analyzer compiles a baseline from the working tree as
//! it existed at a git reference. The clone lives in a temporary directory
//! that is removed when the handle drops, on every exit path.

use std::path::Path;

use git2::build::RepoBuilder;
use tempfile::TempDir;

use crate::error::Result;

/// Clone `work_dir` into a temporary directory, optionally checked out at
/// the given reference. Fails if `work_dir` is not a git repository.
pub fn temporary_clone(work_dir: &Path, git_ref: Option<&str>) -> Result<TempDir> {
    let tmp = tempfile::Builder::new().prefix("protoforge-clone").tempdir()?;
    let url = work_dir.to_string_lossy();
    tracing::debug!(from = %url, to = %tmp.path().display(), "cloning working tree");

    let repo = RepoBuilder::new().clone(&url, tmp.path())?;
    if let Some(git_ref) = git_ref {
        let (object, reference) = repo.revparse_ext(git_ref)?;
        repo.checkout_tree(&object, None)?;
        match reference.and_then(|r| r.name().map(String::from)) {
            Some(name) => repo.set_head(&name)?,
            None => repo.set_head_detached(object.id())?,
        }
    }
    Ok(tmp)
}
