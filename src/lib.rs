pub mod config;
pub mod crs;
pub mod data_source;
pub mod error;
pub mod extents;
pub mod info;
pub mod raster;
pub mod terrain_rgb;
pub mod vector;

pub use config::{ImportOptions, ProjectionMode, ResampleAlgorithm};
pub use crs::CoordinateReferenceSystem;
pub use data_source::{select_data_source, DataSource, RequestDataType};
pub use error::{LandscapeError, Result};
pub use extents::{Extents, Point, Resolution};
pub use info::{Bounds, LandscapingInfo, LandscapingInfos};
pub use raster::{RasterData, RasterFile, RasterTileFactory};
pub use vector::{GeometryKind, VectorData, VectorFile, VectorTileFactory};
