//! Export and metadata modules

pub mod export;
pub mod metadata;

pub use export::{
    export_collection, export_image, ExportBackend, ExportJob, ExportOptions, ExportReceipt,
    ExportSummary, JobHandle,
};
pub use metadata::{
    expand_feature_coll_meta, expand_feature_meta, expand_image_meta, image_info, write_sidecar,
};
