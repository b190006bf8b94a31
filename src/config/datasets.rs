use std::path::{Path, PathBuf};

use crate::error::{CosalError, Result};

/// Training sets the trainer knows how to locate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainSet {
    Jigsaw2Duts,
    DutsClass,
}

impl TrainSet {
    pub fn from_id(id: &str) -> Result<TrainSet> {
        match id {
            "Jigsaw2_DUTS" => Ok(TrainSet::Jigsaw2Duts),
            "DUTS_class" => Ok(TrainSet::DutsClass),
            other => Err(CosalError::Config(format!(
                "unknown train dataset '{}'; options: Jigsaw2_DUTS, DUTS_class",
                other
            ))),
        }
    }

    pub fn id(&self) -> &'static str {
        match self {
            TrainSet::Jigsaw2Duts => "Jigsaw2_DUTS",
            TrainSet::DutsClass => "DUTS_class",
        }
    }

    /// `(image_root, gt_root)` under `data_root`.
    pub fn dirs(&self, data_root: &Path) -> (PathBuf, PathBuf) {
        match self {
            TrainSet::Jigsaw2Duts => (
                data_root.join("Jigsaw2_DUTS").join("img"),
                data_root.join("Jigsaw2_DUTS").join("gt"),
            ),
            TrainSet::DutsClass => (
                data_root.join("images").join("DUTS_class"),
                data_root.join("gts").join("DUTS_class"),
            ),
        }
    }
}

/// `(image_root, gt_root)` of a named test set.
pub fn testset_dirs(data_root: &Path, name: &str) -> (PathBuf, PathBuf) {
    (data_root.join("images").join(name), data_root.join("gts").join(name))
}
