//! Restricts processing to files owned by one group id.
//!
//! Files on platforms without group ownership never match a configured id.

use crate::file_manager::MediaFile;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GroupFilter {
    target: Option<u32>,
}

impl GroupFilter {
    pub fn new(target: Option<u32>) -> Self {
        Self { target }
    }

    pub fn target(&self) -> Option<u32> {
        self.target
    }

    /// True when no group is configured or the file's group equals it
    pub fn admits(&self, file: &MediaFile) -> bool {
        match self.target {
            None => true,
            Some(target) => file.group_id == Some(target),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn media(name: &str, group_id: Option<u32>) -> MediaFile {
        MediaFile {
            path: PathBuf::from("/movies").join(name),
            size: 10,
            modified_time: 0,
            group_id,
            mode: Some(0o644),
        }
    }

    #[test]
    fn test_no_target_passes_everything() {
        let filter = GroupFilter::new(None);
        assert!(filter.admits(&media("a.mp4", Some(1001))));
        assert!(filter.admits(&media("b.mkv", None)));
    }

    #[test]
    fn test_target_matches_group_only() {
        let files = vec![
            media("a.mp4", Some(1001)),
            media("b.mkv", Some(2002)),
            media("c.mov", None),
        ];

        let filter = GroupFilter::new(Some(1001));
        let kept: Vec<String> = files
            .iter()
            .filter(|f| filter.admits(f))
            .map(|f| f.file_name())
            .collect();

        assert_eq!(kept, vec!["a.mp4"]);
    }
}
