//! Inventory: the tree of folders and files stored in an archive
//!
//! The tree is a plain owned structure. A [`Container`] holds child folders
//! and files; [`Inventory`] is the root container; [`FolderEntry`] is a
//! named, identified container. [`Node`] is the sum type handed out by path
//! resolution, and the tree-wide helpers ([`files_under`], [`blocks_under`])
//! are free functions over it.
//!
//! Files are always visited in pre-order: a container's own files first, in
//! insertion order, then each child folder's subtree in insertion order.

pub mod path;
pub mod tags;

use crate::codec::base64_opt;
use crate::encryption::EncryptionMaterial;
use crate::error::{BunkrError, Result};
use crate::range::FragmentedRange;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use uuid::Uuid;

pub use path::validate_name;

/// Coarse content type guessed from a file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    #[default]
    Unknown,
    Text,
    Image,
    Html,
}

const TEXT_EXT: &[&str] = &["md", "markdown", "mdown", "txt", "text", "log", "ini", "cfg"];
const IMAGE_EXT: &[&str] = &["jpg", "jpeg", "png", "ico", "bmp"];
const HTML_EXT: &[&str] = &["html", "xhtml", "htm"];

impl MediaType {
    pub fn guess(filename: &str) -> MediaType {
        let ext = match filename.rfind('.') {
            Some(i) if i > 0 => &filename[i + 1..],
            _ => return MediaType::Unknown,
        };
        if TEXT_EXT.contains(&ext) {
            MediaType::Text
        } else if IMAGE_EXT.contains(&ext) {
            MediaType::Image
        } else if HTML_EXT.contains(&ext) {
            MediaType::Html
        } else {
            MediaType::Unknown
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MediaType::Unknown => "unknown",
            MediaType::Text => "text",
            MediaType::Image => "image",
            MediaType::Html => "html",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata of one stored file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    name: String,
    uuid: Uuid,
    blocks: FragmentedRange,
    size_on_disk: u64,
    actual_size: u64,
    /// Milliseconds since the Unix epoch
    modified_at: i64,
    encryption: Option<EncryptionMaterial>,
    #[serde(with = "base64_opt", default)]
    integrity_hash: Option<Vec<u8>>,
    #[serde(default)]
    tags: BTreeSet<String>,
    #[serde(default)]
    media_type: MediaType,
}

impl FileEntry {
    /// Empty file named `name`, modified now
    pub fn new(name: &str) -> Result<Self> {
        validate_name(name)?;
        Ok(FileEntry {
            name: name.to_string(),
            uuid: Uuid::new_v4(),
            blocks: FragmentedRange::new(),
            size_on_disk: 0,
            actual_size: 0,
            modified_at: Utc::now().timestamp_millis(),
            encryption: None,
            integrity_hash: None,
            tags: BTreeSet::new(),
            media_type: MediaType::guess(name),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rename in place; the media type follows the new extension
    pub fn set_name(&mut self, name: &str) -> Result<()> {
        validate_name(name)?;
        self.name = name.to_string();
        self.media_type = MediaType::guess(name);
        Ok(())
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn blocks(&self) -> &FragmentedRange {
        &self.blocks
    }

    pub fn set_blocks(&mut self, blocks: FragmentedRange) {
        self.blocks = blocks;
    }

    /// Bytes stored in the block region, before padding
    pub fn size_on_disk(&self) -> u64 {
        self.size_on_disk
    }

    pub fn set_size_on_disk(&mut self, size: u64) {
        self.size_on_disk = size;
    }

    /// Logical (decrypted, decompressed) length
    pub fn actual_size(&self) -> u64 {
        self.actual_size
    }

    pub fn set_actual_size(&mut self, size: u64) {
        self.actual_size = size;
    }

    pub fn modified_at(&self) -> i64 {
        self.modified_at
    }

    pub fn set_modified_at(&mut self, millis: i64) -> Result<()> {
        if millis < 0 {
            return Err(BunkrError::InvalidArgument(format!(
                "modification time {} is before the epoch",
                millis
            )));
        }
        self.modified_at = millis;
        Ok(())
    }

    pub fn touch(&mut self) {
        self.modified_at = Utc::now().timestamp_millis();
    }

    pub fn encryption(&self) -> Option<&EncryptionMaterial> {
        self.encryption.as_ref()
    }

    pub fn set_encryption(&mut self, material: Option<EncryptionMaterial>) {
        self.encryption = material;
    }

    pub fn integrity_hash(&self) -> Option<&[u8]> {
        self.integrity_hash.as_deref()
    }

    pub fn set_integrity_hash(&mut self, hash: Option<Vec<u8>>) {
        self.integrity_hash = hash;
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// Returns whether the tag set changed
    pub fn add_tag(&mut self, tag: &str) -> Result<bool> {
        tags::add_tag(&mut self.tags, tag)
    }

    /// Returns whether the tag set changed
    pub fn remove_tag(&mut self, tag: &str) -> bool {
        tags::remove_tag(&mut self.tags, tag)
    }

    pub fn set_tags<I, S>(&mut self, new_tags: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        tags::replace_tags(&mut self.tags, new_tags)
    }

    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    pub fn set_media_type(&mut self, media_type: MediaType) {
        self.media_type = media_type;
    }
}

/// Children of a folder, or of the root
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    #[serde(default)]
    folders: Vec<FolderEntry>,
    #[serde(default)]
    files: Vec<FileEntry>,
}

impl Container {
    pub fn folders(&self) -> &[FolderEntry] {
        &self.folders
    }

    pub fn files(&self) -> &[FileEntry] {
        &self.files
    }

    pub fn is_empty(&self) -> bool {
        self.folders.is_empty() && self.files.is_empty()
    }

    pub fn find_folder(&self, name: &str) -> Option<&FolderEntry> {
        self.folders.iter().find(|f| f.name == name)
    }

    pub fn find_folder_mut(&mut self, name: &str) -> Option<&mut FolderEntry> {
        self.folders.iter_mut().find(|f| f.name == name)
    }

    pub fn find_file(&self, name: &str) -> Option<&FileEntry> {
        self.files.iter().find(|f| f.name == name)
    }

    pub fn find_file_mut(&mut self, name: &str) -> Option<&mut FileEntry> {
        self.files.iter_mut().find(|f| f.name == name)
    }

    /// Whether a folder or a file is called `name`
    pub fn has_child(&self, name: &str) -> bool {
        self.find_folder(name).is_some() || self.find_file(name).is_some()
    }

    pub fn child(&self, name: &str) -> Option<Node<'_>> {
        if let Some(folder) = self.find_folder(name) {
            return Some(Node::Folder(folder));
        }
        self.find_file(name).map(Node::File)
    }

    pub fn add_folder(&mut self, folder: FolderEntry) -> Result<()> {
        self.check_free(&folder.name)?;
        self.folders.push(folder);
        Ok(())
    }

    pub fn add_file(&mut self, file: FileEntry) -> Result<()> {
        self.check_free(&file.name)?;
        self.files.push(file);
        Ok(())
    }

    pub(crate) fn take_folder(&mut self, name: &str) -> Option<FolderEntry> {
        let i = self.folders.iter().position(|f| f.name == name)?;
        Some(self.folders.remove(i))
    }

    pub(crate) fn take_file(&mut self, name: &str) -> Option<FileEntry> {
        let i = self.files.iter().position(|f| f.name == name)?;
        Some(self.files.remove(i))
    }

    fn check_free(&self, name: &str) -> Result<()> {
        if self.has_child(name) {
            return Err(BunkrError::InvalidArgument(format!(
                "an entry named '{}' already exists",
                name
            )));
        }
        Ok(())
    }

    fn files_mut(&mut self) -> FilesMut<'_> {
        let mut out = Vec::new();
        collect_files_mut(self, &mut out);
        FilesMut {
            inner: out.into_iter(),
        }
    }
}

fn collect_files_mut<'a>(container: &'a mut Container, out: &mut Vec<&'a mut FileEntry>) {
    out.extend(container.files.iter_mut());
    for folder in container.folders.iter_mut() {
        collect_files_mut(&mut folder.contents, out);
    }
}

/// A named folder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderEntry {
    name: String,
    uuid: Uuid,
    #[serde(flatten)]
    contents: Container,
}

impl FolderEntry {
    pub fn new(name: &str) -> Result<Self> {
        validate_name(name)?;
        Ok(FolderEntry {
            name: name.to_string(),
            uuid: Uuid::new_v4(),
            contents: Container::default(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn set_name(&mut self, name: &str) -> Result<()> {
        validate_name(name)?;
        self.name = name.to_string();
        Ok(())
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn contents(&self) -> &Container {
        &self.contents
    }

    pub fn contents_mut(&mut self) -> &mut Container {
        &mut self.contents
    }
}

/// A resolved position in the tree
#[derive(Debug, Clone, Copy)]
pub enum Node<'a> {
    Root(&'a Container),
    Folder(&'a FolderEntry),
    File(&'a FileEntry),
}

impl<'a> Node<'a> {
    pub fn is_folder(&self) -> bool {
        !matches!(self, Node::File(_))
    }

    pub fn is_file(&self) -> bool {
        matches!(self, Node::File(_))
    }

    /// Children of a root or folder node
    pub fn container(&self) -> Option<&'a Container> {
        match *self {
            Node::Root(c) => Some(c),
            Node::Folder(f) => Some(&f.contents),
            Node::File(_) => None,
        }
    }

    pub fn as_file(&self) -> Option<&'a FileEntry> {
        match *self {
            Node::File(f) => Some(f),
            _ => None,
        }
    }

    /// Empty for the root
    pub fn name(&self) -> &'a str {
        match *self {
            Node::Root(_) => "",
            Node::Folder(f) => &f.name,
            Node::File(f) => &f.name,
        }
    }
}

/// Pre-order iterator over every file below a node
pub struct Files<'a> {
    current: std::slice::Iter<'a, FileEntry>,
    stack: Vec<std::slice::Iter<'a, FolderEntry>>,
}

impl<'a> Files<'a> {
    fn new(container: &'a Container) -> Self {
        Files {
            current: container.files.iter(),
            stack: vec![container.folders.iter()],
        }
    }

    fn single(file: &'a FileEntry) -> Self {
        Files {
            current: std::slice::from_ref(file).iter(),
            stack: Vec::new(),
        }
    }
}

impl<'a> Iterator for Files<'a> {
    type Item = &'a FileEntry;

    fn next(&mut self) -> Option<&'a FileEntry> {
        loop {
            if let Some(file) = self.current.next() {
                return Some(file);
            }
            let folders = self.stack.last_mut()?;
            match folders.next() {
                Some(folder) => {
                    self.current = folder.contents.files.iter();
                    self.stack.push(folder.contents.folders.iter());
                }
                None => {
                    self.stack.pop();
                }
            }
        }
    }
}

/// Mutable pre-order iterator over every file in the tree
pub struct FilesMut<'a> {
    inner: std::vec::IntoIter<&'a mut FileEntry>,
}

impl<'a> Iterator for FilesMut<'a> {
    type Item = &'a mut FileEntry;

    fn next(&mut self) -> Option<&'a mut FileEntry> {
        self.inner.next()
    }
}

/// Every file at or below `node`, in pre-order
pub fn files_under(node: Node<'_>) -> Files<'_> {
    match node {
        Node::Root(c) => Files::new(c),
        Node::Folder(f) => Files::new(&f.contents),
        Node::File(f) => Files::single(f),
    }
}

/// Union of the blocks of every file at or below `node`
pub fn blocks_under(node: Node<'_>) -> FragmentedRange {
    let mut blocks = FragmentedRange::new();
    for file in files_under(node) {
        blocks.union(&file.blocks);
    }
    blocks
}

/// The whole tree
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    #[serde(flatten)]
    root: Container,
}

impl Inventory {
    pub fn new() -> Self {
        Inventory::default()
    }

    pub fn root(&self) -> &Container {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut Container {
        &mut self.root
    }

    pub fn files(&self) -> Files<'_> {
        Files::new(&self.root)
    }

    pub fn files_mut(&mut self) -> FilesMut<'_> {
        self.root.files_mut()
    }

    pub fn find_file(&self, uuid: Uuid) -> Option<&FileEntry> {
        self.files().find(|f| f.uuid == uuid)
    }

    pub fn find_file_mut(&mut self, uuid: Uuid) -> Option<&mut FileEntry> {
        self.files_mut().find(|f| f.uuid == uuid)
    }

    /// Union of every file's blocks
    pub fn occupied_blocks(&self) -> FragmentedRange {
        blocks_under(Node::Root(&self.root))
    }

    /// `(absolute path, entry)` for every file, in pre-order
    pub fn file_paths(&self) -> Vec<(String, &FileEntry)> {
        let mut out = Vec::new();
        collect_paths(&self.root, "", &mut out);
        out
    }

    /// Paths of all files carrying `tag`
    pub fn find_by_tag(&self, tag: &str) -> Vec<(String, &FileEntry)> {
        self.file_paths()
            .into_iter()
            .filter(|(_, f)| f.has_tag(tag))
            .collect()
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse and check structural consistency against `block_size`
    pub fn from_json(bytes: &[u8], block_size: u32) -> Result<Self> {
        let inventory: Inventory = serde_json::from_slice(bytes)
            .map_err(|e| BunkrError::CorruptMetadata(format!("inventory: {}", e)))?;
        inventory
            .validate(block_size)
            .map_err(|e| BunkrError::CorruptMetadata(e.to_string()))?;
        Ok(inventory)
    }

    /// Names, tags, timestamps, block capacity, and that no block is owned twice
    pub fn validate(&self, block_size: u32) -> Result<()> {
        validate_container(&self.root)?;

        let mut seen = FragmentedRange::new();
        for file in self.files() {
            if file.modified_at < 0 {
                return Err(BunkrError::InvalidArgument(format!(
                    "file '{}' has a negative modification time",
                    file.name
                )));
            }
            for tag in &file.tags {
                tags::validate_tag(tag)?;
            }
            if file.blocks.min().is_some_and(|b| b < 0) {
                return Err(BunkrError::InvalidArgument(format!(
                    "file '{}' references a negative block index",
                    file.name
                )));
            }
            let capacity = file
                .blocks
                .size()
                .checked_mul(block_size as u64)
                .ok_or_else(|| {
                    BunkrError::InvalidArgument(format!(
                        "file '{}' references too many blocks",
                        file.name
                    ))
                })?;
            if capacity < file.size_on_disk {
                return Err(BunkrError::InvalidArgument(format!(
                    "file '{}' stores {} bytes in {} blocks",
                    file.name,
                    file.size_on_disk,
                    file.blocks.size()
                )));
            }
            let overlap = FragmentedRange::difference(&file.blocks, &FragmentedRange::difference(&file.blocks, &seen));
            if !overlap.is_empty() {
                return Err(BunkrError::InvalidArgument(format!(
                    "file '{}' shares blocks {} with another file",
                    file.name, overlap
                )));
            }
            seen.union(&file.blocks);
        }
        Ok(())
    }
}

fn validate_container(container: &Container) -> Result<()> {
    let mut names = HashSet::new();
    let all = container
        .folders
        .iter()
        .map(|f| f.name.as_str())
        .chain(container.files.iter().map(|f| f.name.as_str()));
    for name in all {
        validate_name(name)?;
        if !names.insert(name) {
            return Err(BunkrError::InvalidArgument(format!(
                "duplicate entry name '{}'",
                name
            )));
        }
    }
    for folder in &container.folders {
        validate_container(&folder.contents)?;
    }
    Ok(())
}

fn collect_paths<'a>(container: &'a Container, prefix: &str, out: &mut Vec<(String, &'a FileEntry)>) {
    for file in &container.files {
        out.push((format!("{}/{}", prefix, file.name), file));
    }
    for folder in &container.folders {
        collect_paths(&folder.contents, &format!("{}/{}", prefix, folder.name), out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str, blocks: &[(i64, i64)]) -> FileEntry {
        let mut f = FileEntry::new(name).unwrap();
        let mut range = FragmentedRange::new();
        for &(start, len) in blocks {
            range.add(start, len);
        }
        f.set_size_on_disk(range.size() * 16);
        f.set_blocks(range);
        f
    }

    fn sample() -> Inventory {
        let mut inv = Inventory::new();
        let mut a = FolderEntry::new("a").unwrap();
        let mut b = FolderEntry::new("b").unwrap();
        b.contents_mut().add_file(file("deep.txt", &[(9, 1)])).unwrap();
        a.contents_mut().add_folder(b).unwrap();
        a.contents_mut().add_file(file("a1.png", &[(3, 2)])).unwrap();
        inv.root_mut().add_folder(a).unwrap();
        inv.root_mut().add_file(file("top", &[(0, 2)])).unwrap();
        inv
    }

    #[test]
    fn test_preorder_files() {
        let inv = sample();
        let names: Vec<_> = inv.files().map(|f| f.name().to_string()).collect();
        assert_eq!(names, vec!["top", "a1.png", "deep.txt"]);

        let paths: Vec<_> = inv.file_paths().into_iter().map(|(p, _)| p).collect();
        assert_eq!(paths, vec!["/top", "/a/a1.png", "/a/b/deep.txt"]);

        let mut_names: Vec<_> = inv
            .clone()
            .files_mut()
            .map(|f| f.name().to_string())
            .collect();
        assert_eq!(mut_names, names);
    }

    #[test]
    fn test_free_functions_over_nodes() {
        let inv = sample();
        let a = inv.root().find_folder("a").unwrap();
        let under_a: Vec<_> = files_under(Node::Folder(a)).map(|f| f.name()).collect();
        assert_eq!(under_a, vec!["a1.png", "deep.txt"]);
        assert_eq!(blocks_under(Node::Folder(a)).to_list(), vec![3, 4, 9]);
        assert_eq!(inv.occupied_blocks().to_list(), vec![0, 1, 3, 4, 9]);

        let top = inv.root().find_file("top").unwrap();
        assert_eq!(files_under(Node::File(top)).count(), 1);
    }

    #[test]
    fn test_find_by_uuid_and_tag() {
        let mut inv = sample();
        let uuid = inv.files().nth(2).unwrap().uuid();
        let deep = inv.find_file_mut(uuid).unwrap();
        assert!(deep.add_tag("notes.old").unwrap());
        assert_eq!(inv.find_file(uuid).unwrap().name(), "deep.txt");

        let tagged = inv.find_by_tag("notes.old");
        assert_eq!(tagged.len(), 1);
        assert_eq!(tagged[0].0, "/a/b/deep.txt");
        assert!(inv.find_by_tag("absent").is_empty());
    }

    #[test]
    fn test_json_round_trip_and_shape() {
        let inv = sample();
        let json = inv.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&json).unwrap();
        assert_eq!(value["files"][0]["name"], "top");
        assert_eq!(value["files"][0]["blocks"], serde_json::json!([0, 2]));
        assert_eq!(value["files"][0]["mediaType"], "unknown");
        assert_eq!(value["folders"][0]["files"][0]["mediaType"], "image");
        assert!(value["files"][0]["integrityHash"].is_null());

        let back = Inventory::from_json(&json, 16).unwrap();
        assert_eq!(back, inv);
    }

    #[test]
    fn test_rejects_inconsistent_metadata() {
        let mut inv = sample();
        inv.root_mut().add_file(file("clash", &[(4, 2)])).unwrap();
        let json = inv.to_json().unwrap();
        assert!(matches!(
            Inventory::from_json(&json, 16),
            Err(BunkrError::CorruptMetadata(_))
        ));

        // capacity too small for declared size
        let inv = sample();
        assert!(Inventory::from_json(&inv.to_json().unwrap(), 8).is_err());

        assert!(Inventory::from_json(b"{\"files\":[{\"name\":1}]}", 16).is_err());
    }

    #[test]
    fn test_rejects_block_capacity_overflow() {
        let mut huge = FileEntry::new("huge").unwrap();
        huge.set_blocks(FragmentedRange::with_range(0, i64::MAX));
        huge.set_size_on_disk(1);
        let mut inv = Inventory::new();
        inv.root_mut().add_file(huge).unwrap();
        let json = inv.to_json().unwrap();

        assert!(matches!(
            Inventory::from_json(&json, 16),
            Err(BunkrError::CorruptMetadata(_))
        ));
    }

    #[test]
    fn test_overflowing_range_is_corrupt_metadata() {
        let json = br#"{"files":[{"name":"f","blocks":[9223372036854775806,5,0,1]}]}"#;
        assert!(matches!(
            Inventory::from_json(json, 16),
            Err(BunkrError::CorruptMetadata(_))
        ));
    }

    #[test]
    fn test_container_rejects_name_clash() {
        let mut inv = Inventory::new();
        inv.root_mut().add_file(FileEntry::new("x").unwrap()).unwrap();
        assert!(inv.root_mut().add_folder(FolderEntry::new("x").unwrap()).is_err());
        assert!(FileEntry::new("bad/name").is_err());
    }

    #[test]
    fn test_media_type_guess() {
        assert_eq!(MediaType::guess("notes.md"), MediaType::Text);
        assert_eq!(MediaType::guess("photo.jpeg"), MediaType::Image);
        assert_eq!(MediaType::guess("index.htm"), MediaType::Html);
        assert_eq!(MediaType::guess(".bashrc"), MediaType::Unknown);
        assert_eq!(MediaType::guess("archive.tar.gz"), MediaType::Unknown);

        let mut f = FileEntry::new("a.txt").unwrap();
        f.set_name("a.png").unwrap();
        assert_eq!(f.media_type(), MediaType::Image);
        assert!(f.set_modified_at(-1).is_err());
    }
}
