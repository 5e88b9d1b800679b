//! Helpers for naming, locating and filtering asset references.
//!
//! Nothing in here touches the filesystem.

mod filters;
mod location;
mod naming;

pub use filters::should_ignore_asset_reference;
pub use location::{absolutize_reference, logical_dir, logical_to_path, normalize_logical};
pub use naming::{
    GeneratedName, combine_filenames, combined_name, extension_of, split_extension,
    strip_timestamp,
};
