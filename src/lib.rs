pub mod error;
pub mod model;
pub mod parser;
pub mod resample;
pub mod writer;
pub mod zip_handler;

pub use error::FgdError;
pub use model::{Bounds, DemTile, Metadata, NODATA};
pub use resample::{BatchSummary, DestInit, ReferenceGrid, ResampleJob};
pub use writer::GeoTiffWriter;
pub use zip_handler::{MergeExtent, MergedDemTile, ZipHandler};
