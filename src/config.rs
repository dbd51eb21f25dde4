use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use gdal_sys::GDALResampleAlg;

use crate::error::LandscapeError;

/// How the level CRS is chosen when the first file is imported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProjectionMode {
    /// UTM zone containing the first file's origin.
    #[default]
    AutoUtm,
    /// Keep the CRS of the first imported file.
    UseSourceCrs,
    /// Use `ImportOptions::target_epsg`.
    CustomCrs,
}

impl FromStr for ProjectionMode {
    type Err = LandscapeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto-utm" | "utm" | "auto" => Ok(ProjectionMode::AutoUtm),
            "source" | "use-source-crs" => Ok(ProjectionMode::UseSourceCrs),
            "custom" | "custom-crs" => Ok(ProjectionMode::CustomCrs),
            other => Err(LandscapeError::InvalidInput(format!(
                "Unknown projection mode '{}' (expected auto-utm, source or custom)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResampleAlgorithm {
    Nearest,
    #[default]
    Bilinear,
    Cubic,
    CubicSpline,
    Lanczos,
    Average,
    Mode,
    Max,
    Min,
    Med,
    Q1,
    Q3,
    Sum,
    Rms,
}

impl ResampleAlgorithm {
    pub fn to_gdal(self) -> GDALResampleAlg::Type {
        match self {
            ResampleAlgorithm::Nearest => GDALResampleAlg::GRA_NearestNeighbour,
            ResampleAlgorithm::Bilinear => GDALResampleAlg::GRA_Bilinear,
            ResampleAlgorithm::Cubic => GDALResampleAlg::GRA_Cubic,
            ResampleAlgorithm::CubicSpline => GDALResampleAlg::GRA_CubicSpline,
            ResampleAlgorithm::Lanczos => GDALResampleAlg::GRA_Lanczos,
            ResampleAlgorithm::Average => GDALResampleAlg::GRA_Average,
            ResampleAlgorithm::Mode => GDALResampleAlg::GRA_Mode,
            ResampleAlgorithm::Max => GDALResampleAlg::GRA_Max,
            ResampleAlgorithm::Min => GDALResampleAlg::GRA_Min,
            ResampleAlgorithm::Med => GDALResampleAlg::GRA_Med,
            ResampleAlgorithm::Q1 => GDALResampleAlg::GRA_Q1,
            ResampleAlgorithm::Q3 => GDALResampleAlg::GRA_Q3,
            ResampleAlgorithm::Sum => GDALResampleAlg::GRA_Sum,
            ResampleAlgorithm::Rms => GDALResampleAlg::GRA_RMS,
        }
    }

    fn name(self) -> &'static str {
        match self {
            ResampleAlgorithm::Nearest => "nearest",
            ResampleAlgorithm::Bilinear => "bilinear",
            ResampleAlgorithm::Cubic => "cubic",
            ResampleAlgorithm::CubicSpline => "cubicspline",
            ResampleAlgorithm::Lanczos => "lanczos",
            ResampleAlgorithm::Average => "average",
            ResampleAlgorithm::Mode => "mode",
            ResampleAlgorithm::Max => "max",
            ResampleAlgorithm::Min => "min",
            ResampleAlgorithm::Med => "med",
            ResampleAlgorithm::Q1 => "q1",
            ResampleAlgorithm::Q3 => "q3",
            ResampleAlgorithm::Sum => "sum",
            ResampleAlgorithm::Rms => "rms",
        }
    }
}

impl fmt::Display for ResampleAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ResampleAlgorithm {
    type Err = LandscapeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let all = [
            ResampleAlgorithm::Nearest,
            ResampleAlgorithm::Bilinear,
            ResampleAlgorithm::Cubic,
            ResampleAlgorithm::CubicSpline,
            ResampleAlgorithm::Lanczos,
            ResampleAlgorithm::Average,
            ResampleAlgorithm::Mode,
            ResampleAlgorithm::Max,
            ResampleAlgorithm::Min,
            ResampleAlgorithm::Med,
            ResampleAlgorithm::Q1,
            ResampleAlgorithm::Q3,
            ResampleAlgorithm::Sum,
            ResampleAlgorithm::Rms,
        ];
        let lower = s.to_ascii_lowercase();
        all.into_iter()
            .find(|alg| alg.name() == lower)
            .ok_or_else(|| {
                LandscapeError::InvalidInput(format!("Unknown resample algorithm '{}'", s))
            })
    }
}

/// Options for one import session, passed explicitly to every component.
#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub desired_max_tile_size: u32,
    pub resample_algorithm: ResampleAlgorithm,
    /// Warp memory budget in gigabytes.
    pub resample_memory_gb: f64,
    pub smooth_steps: u32,
    pub smooth_edges: bool,
    pub high_detail_z_scale: bool,
    pub z_scale: f64,
    pub square_tiles: bool,
    pub resample_to_first_tile: bool,
    pub native_raster_pixel_size: bool,
    pub custom_raster_pixel_size: f64,
    pub import_as_mesh: bool,
    pub import_sat_img_as_decal: bool,
    pub projection_mode: ProjectionMode,
    pub target_epsg: i32,
    pub extended_crs_compatibility: bool,
    pub connect_linestrings: bool,
    pub read_parallel: bool,
    pub use_in_memory_files: bool,
    pub vector_scale: f64,
    pub landscape_scale_factor: f64,
    pub texture_size: usize,
    pub max_decal_texture_size: usize,
    pub proj_search_paths: Vec<PathBuf>,
    pub gdal_data_path: Option<PathBuf>,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            desired_max_tile_size: 8192,
            resample_algorithm: ResampleAlgorithm::Bilinear,
            resample_memory_gb: 8.0,
            smooth_steps: 0,
            smooth_edges: false,
            high_detail_z_scale: true,
            z_scale: 100.0,
            square_tiles: false,
            resample_to_first_tile: true,
            native_raster_pixel_size: true,
            custom_raster_pixel_size: 1.0,
            import_as_mesh: false,
            import_sat_img_as_decal: true,
            projection_mode: ProjectionMode::AutoUtm,
            target_epsg: 0,
            extended_crs_compatibility: false,
            connect_linestrings: false,
            read_parallel: true,
            use_in_memory_files: true,
            vector_scale: 100.0,
            landscape_scale_factor: 1.0,
            texture_size: 8192,
            max_decal_texture_size: 8192,
            proj_search_paths: Vec::new(),
            gdal_data_path: None,
        }
    }
}

impl ImportOptions {
    /// Warp memory limit in bytes.
    pub fn resample_memory_bytes(&self) -> f64 {
        self.resample_memory_gb.max(0.0) * 1024.0 * 1024.0 * 1024.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = ImportOptions::default();
        assert_eq!(options.desired_max_tile_size, 8192);
        assert_eq!(options.resample_algorithm, ResampleAlgorithm::Bilinear);
        assert_eq!(options.projection_mode, ProjectionMode::AutoUtm);
        assert!(options.high_detail_z_scale);
        assert!(options.resample_to_first_tile);
        assert_eq!(options.z_scale, 100.0);
    }

    #[test]
    fn test_resample_algorithm_parse() {
        assert_eq!(
            "Lanczos".parse::<ResampleAlgorithm>().unwrap(),
            ResampleAlgorithm::Lanczos
        );
        assert_eq!(
            "rms".parse::<ResampleAlgorithm>().unwrap(),
            ResampleAlgorithm::Rms
        );
        assert!("bicubic".parse::<ResampleAlgorithm>().is_err());
        for alg in ["nearest", "cubicspline", "q1", "q3", "sum"] {
            let parsed: ResampleAlgorithm = alg.parse().unwrap();
            assert_eq!(parsed.to_string(), alg);
        }
    }

    #[test]
    fn test_projection_mode_parse() {
        assert_eq!(
            "custom".parse::<ProjectionMode>().unwrap(),
            ProjectionMode::CustomCrs
        );
        assert_eq!(
            "auto-utm".parse::<ProjectionMode>().unwrap(),
            ProjectionMode::AutoUtm
        );
        assert!("mercator".parse::<ProjectionMode>().is_err());
    }
}
