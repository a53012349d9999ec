//! Absolute paths into the inventory
//!
//! Paths are `/`-separated and case-sensitive. `""` and `"/"` are the root;
//! anything else must start with `/`. A single trailing slash is ignored.
//! Structural edits check everything up front, so a failed call leaves the
//! tree exactly as it was.

use super::{blocks_under, Container, FileEntry, FolderEntry, Inventory, Node};
use crate::error::{BunkrError, Result};
use crate::range::FragmentedRange;

/// Characters never allowed in an entry name
const FORBIDDEN: &[char] = &['/', ':', '*', '?', '"', '<', '>'];

pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." {
        return Err(BunkrError::InvalidName(name.to_string()));
    }
    if name
        .chars()
        .any(|c| FORBIDDEN.contains(&c) || c.is_ascii_control())
    {
        return Err(BunkrError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Split an absolute path into validated segments; the root has none
pub fn segments(path: &str) -> Result<Vec<&str>> {
    if path.is_empty() || path == "/" {
        return Ok(Vec::new());
    }
    let rest = path
        .strip_prefix('/')
        .ok_or_else(|| BunkrError::InvalidPath(path.to_string()))?;
    let rest = rest.strip_suffix('/').unwrap_or(rest);
    let parts: Vec<&str> = rest.split('/').collect();
    for part in &parts {
        validate_name(part).map_err(|_| BunkrError::InvalidPath(path.to_string()))?;
    }
    Ok(parts)
}

/// Parent folder of `path`, `/` for top-level entries
pub fn dirname(path: &str) -> Result<String> {
    let parts = segments(path)?;
    match parts.split_last() {
        Some((_, parents)) => Ok(format!("/{}", parents.join("/"))),
        None => Err(BunkrError::InvalidPath(path.to_string())),
    }
}

/// Final segment of `path`
pub fn basename(path: &str) -> Result<&str> {
    segments(path)?
        .pop()
        .ok_or_else(|| BunkrError::InvalidPath(path.to_string()))
}

pub fn join(parent: &str, name: &str) -> String {
    let parent = parent.trim_end_matches('/');
    format!("{}/{}", parent, name)
}

fn prefix(parts: &[&str], upto: usize) -> String {
    format!("/{}", parts[..upto].join("/"))
}

impl Inventory {
    /// Resolve any path to a node
    pub fn resolve(&self, path: &str) -> Result<Node<'_>> {
        let parts = segments(path)?;
        let Some((last, parents)) = parts.split_last() else {
            return Ok(Node::Root(&self.root));
        };
        let parent = walk(&self.root, parents)?;
        parent.child(last).ok_or_else(|| {
            BunkrError::traversal(path, format!("No such file or folder '{}'", last))
        })
    }

    /// Children of the folder at `path`
    pub fn resolve_folder(&self, path: &str) -> Result<&Container> {
        let parts = segments(path)?;
        walk(&self.root, &parts)
    }

    pub fn resolve_folder_mut(&mut self, path: &str) -> Result<&mut Container> {
        let parts = segments(path)?;
        walk_mut(&mut self.root, &parts)
    }

    pub fn resolve_file(&self, path: &str) -> Result<&FileEntry> {
        match self.resolve(path)? {
            Node::File(f) => Ok(f),
            _ => Err(BunkrError::traversal(path, "Path is a folder, not a file")),
        }
    }

    pub fn resolve_file_mut(&mut self, path: &str) -> Result<&mut FileEntry> {
        let parts = segments(path)?;
        let (last, parents) = parts
            .split_last()
            .ok_or_else(|| BunkrError::traversal(path, "Path is a folder, not a file"))?;
        let parent = walk_mut(&mut self.root, parents)?;
        if parent.find_folder(last).is_some() {
            return Err(BunkrError::traversal(path, "Path is a folder, not a file"));
        }
        parent
            .find_file_mut(last)
            .ok_or_else(|| BunkrError::traversal(path, format!("No such file '{}'", last)))
    }

    /// Create the folder at `path`.
    ///
    /// Without `recursive` every ancestor must already exist and the folder
    /// itself must not. With `recursive` missing ancestors are created and an
    /// existing folder is accepted. A file anywhere on the way is an error.
    pub fn mkdir(&mut self, path: &str, recursive: bool) -> Result<()> {
        let parts = segments(path)?;
        if parts.is_empty() {
            return if recursive {
                Ok(())
            } else {
                Err(BunkrError::traversal(path, "The root folder already exists"))
            };
        }

        // Dry run against the current tree
        let mut current = Some(&self.root);
        for (i, seg) in parts.iter().enumerate() {
            let Some(container) = current else { break };
            let terminal = i + 1 == parts.len();
            if container.find_file(seg).is_some() {
                let reason = if terminal {
                    "A file already exists at this path"
                } else {
                    "Path segment is a file, not a folder"
                };
                return Err(BunkrError::traversal(prefix(&parts, i + 1), reason));
            }
            current = match container.find_folder(seg) {
                Some(_) if terminal && !recursive => {
                    return Err(BunkrError::traversal(path, "Folder already exists"));
                }
                Some(folder) => Some(&folder.contents),
                None if !terminal && !recursive => {
                    return Err(BunkrError::traversal(
                        prefix(&parts, i + 1),
                        format!("No such folder '{}'", seg),
                    ));
                }
                None => None,
            };
        }

        let mut container = &mut self.root;
        for seg in &parts {
            if container.find_folder(seg).is_none() {
                container.folders.push(FolderEntry::new(seg)?);
            }
            container = match container.find_folder_mut(seg) {
                Some(folder) => &mut folder.contents,
                None => return Err(BunkrError::traversal(path, "Folder vanished")),
            };
        }
        Ok(())
    }

    /// Add an empty file at `path`; the parent folder must exist
    pub fn create_file(&mut self, path: &str) -> Result<&mut FileEntry> {
        let parts = segments(path)?;
        let (last, parents) = parts
            .split_last()
            .ok_or_else(|| BunkrError::traversal(path, "Cannot create a file at the root"))?;
        let entry = FileEntry::new(last)?;
        let parent = walk_mut(&mut self.root, parents)?;
        if parent.has_child(last) {
            return Err(BunkrError::traversal(path, "An entry already exists at this path"));
        }
        parent.files.push(entry);
        let i = parent.files.len() - 1;
        Ok(&mut parent.files[i])
    }

    /// Remove the entry at `path`, returning the blocks it held.
    ///
    /// Files go regardless of `recursive`. A non-empty folder needs
    /// `recursive`. The root can never be removed.
    pub fn remove(&mut self, path: &str, recursive: bool) -> Result<FragmentedRange> {
        let parts = segments(path)?;
        let (last, parents) = parts
            .split_last()
            .ok_or_else(|| BunkrError::traversal(path, "Cannot remove the root folder"))?;
        let parent = walk_mut(&mut self.root, parents)?;

        if let Some(folder) = parent.find_folder(last) {
            if !recursive && !folder.contents.is_empty() {
                return Err(BunkrError::traversal(path, "Folder is not empty"));
            }
            let blocks = blocks_under(Node::Folder(folder));
            parent.take_folder(last);
            return Ok(blocks);
        }
        match parent.take_file(last) {
            Some(file) => Ok(file.blocks),
            None => Err(BunkrError::traversal(
                path,
                format!("No such file or folder '{}'", last),
            )),
        }
    }

    /// Move or rename the entry at `from` to `to`.
    ///
    /// The parent of `to` must be an existing folder with no entry of the
    /// target name. A folder cannot move into its own subtree.
    pub fn rename(&mut self, from: &str, to: &str) -> Result<()> {
        let src = segments(from)?;
        let dst = segments(to)?;
        let (src_name, src_parent) = src
            .split_last()
            .ok_or_else(|| BunkrError::traversal(from, "Cannot move the root folder"))?;
        let (dst_name, dst_parent) = dst
            .split_last()
            .ok_or_else(|| BunkrError::traversal(to, "Cannot replace the root folder"))?;
        if src == dst {
            self.resolve(from)?;
            return Ok(());
        }

        let is_folder = self.resolve(from)?.is_folder();
        if is_folder && dst.len() > src.len() && dst[..src.len()] == src[..] {
            return Err(BunkrError::traversal(to, "Cannot move a folder into itself"));
        }
        if walk(&self.root, dst_parent)?.has_child(dst_name) {
            return Err(BunkrError::traversal(to, "An entry already exists at this path"));
        }

        let source = walk_mut(&mut self.root, src_parent)?;
        if is_folder {
            let mut folder = source
                .take_folder(src_name)
                .ok_or_else(|| BunkrError::traversal(from, "No such folder"))?;
            folder.set_name(dst_name)?;
            walk_mut(&mut self.root, dst_parent)?.folders.push(folder);
        } else {
            let mut file = source
                .take_file(src_name)
                .ok_or_else(|| BunkrError::traversal(from, "No such file"))?;
            file.set_name(dst_name)?;
            walk_mut(&mut self.root, dst_parent)?.files.push(file);
        }
        Ok(())
    }
}

/// Descend through `parts`, each of which must be a folder
fn walk<'a>(root: &'a Container, parts: &[&str]) -> Result<&'a Container> {
    let mut current = root;
    for (i, seg) in parts.iter().enumerate() {
        current = match current.find_folder(seg) {
            Some(folder) => &folder.contents,
            None => return Err(missing_folder(current, parts, i)),
        };
    }
    Ok(current)
}

fn walk_mut<'a>(root: &'a mut Container, parts: &[&str]) -> Result<&'a mut Container> {
    let mut current = root;
    for (i, seg) in parts.iter().enumerate() {
        if current.find_folder(seg).is_none() {
            return Err(missing_folder(current, parts, i));
        }
        current = match current.find_folder_mut(seg) {
            Some(folder) => &mut folder.contents,
            None => return Err(BunkrError::traversal(prefix(parts, i + 1), "Folder vanished")),
        };
    }
    Ok(current)
}

fn missing_folder(container: &Container, parts: &[&str], i: usize) -> BunkrError {
    let reason = if container.find_file(parts[i]).is_some() {
        "Path segment is a file, not a folder".to_string()
    } else {
        format!("No such folder '{}'", parts[i])
    };
    BunkrError::traversal(prefix(parts, i + 1), reason)
}
