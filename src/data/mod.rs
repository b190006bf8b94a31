pub mod batch;
pub mod folder;
pub mod image_io;

pub use batch::{Batch, BatchSource, InMemorySource};
pub use folder::FolderDataset;
