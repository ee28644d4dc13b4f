//! Copying deployed artifacts.

use async_recursion::async_recursion;
use std::io;
use std::path::Path;

/// Copy a file or a whole directory tree to `dest`, creating missing parent
/// directories and keeping permission bits.
pub(crate) async fn copy_tree(source: &Path, dest: &Path) -> io::Result<()> {
    let metadata = tokio::fs::metadata(source).await?;
    if metadata.is_dir() {
        copy_dir(source, dest).await
    } else {
        copy_file(source, dest).await
    }
}

#[async_recursion]
async fn copy_dir(source: &Path, dest: &Path) -> io::Result<()> {
    let permissions = tokio::fs::metadata(source).await?.permissions();
    tokio::fs::create_dir_all(dest).await?;

    let mut entries = tokio::fs::read_dir(source).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let target = dest.join(entry.file_name());
        if entry.file_type().await?.is_dir() {
            copy_dir(&path, &target).await?;
        } else {
            copy_file(&path, &target).await?;
        }
    }

    // Applied last so read-only directories can still be filled.
    tokio::fs::set_permissions(dest, permissions).await
}

async fn copy_file(source: &Path, dest: &Path) -> io::Result<()> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    // Also copies the permission bits.
    tokio::fs::copy(source, dest).await?;
    Ok(())
}
