use std::path::Path;

use anyhow::{bail, Context, Result};
use gdal::raster::Buffer;
use gdal::{Dataset, DriverManager, Metadata};

use super::{Grid, RasterData};
use crate::crs::spatial_ref_from;
use crate::terrain_rgb::elevation_to_rgb;

/// Writes imported tiles as GeoTIFF.
#[derive(Default)]
pub struct HeightmapWriter {}

impl HeightmapWriter {
    pub fn new() -> Self {
        Self {}
    }

    /// Single-band UInt16 heightmap laid out by `data`'s extents and pixel size.
    pub fn write_heightmap(&self, data: &RasterData, heights: &[u16], output_path: &Path) -> Result<()> {
        let cols = data.import_resolution.x;
        let rows = data.import_resolution.y;
        if heights.len() != cols * rows {
            bail!(
                "Heightmap has {} values, expected {}x{}",
                heights.len(),
                cols,
                rows
            );
        }

        let driver =
            DriverManager::get_driver_by_name("GTiff").context("Failed to get GTiff driver")?;
        let mut dataset = driver
            .create_with_band_type::<u16, _>(output_path, cols, rows, 1)
            .context("Failed to create dataset")?;
        self.set_geo_metadata(&mut dataset, data)?;

        let mut band = dataset.rasterband(1).context("Failed to get raster band")?;
        let mut buffer = Buffer::new((cols, rows), heights.to_vec());
        band.write((0, 0), (cols, rows), &mut buffer)
            .context("Failed to write raster data")?;
        Ok(())
    }

    /// 3-band terrain-RGB encoding of a height grid.
    pub fn write_terrain_rgb(&self, data: &RasterData, heights: &Grid<f64>, output_path: &Path) -> Result<()> {
        let (cols, rows) = (heights.width(), heights.height());
        tracing::info!(
            "Converting heights to Terrain-RGB GeoTIFF: {} x {} pixels",
            cols,
            rows
        );

        let driver =
            DriverManager::get_driver_by_name("GTiff").context("Failed to get GTiff driver")?;
        let mut dataset = driver
            .create_with_band_type::<u8, _>(output_path, cols, rows, 3)
            .context("Failed to create dataset")?;
        self.set_geo_metadata(&mut dataset, data)?;

        let mut r_band = vec![0u8; cols * rows];
        let mut g_band = vec![0u8; cols * rows];
        let mut b_band = vec![0u8; cols * rows];
        for (i, &elevation) in heights.data().iter().enumerate() {
            // NoData は黒のまま
            if elevation == data.no_data_value && data.no_data_value != 0.0 {
                continue;
            }
            let (r, g, b) = elevation_to_rgb(elevation);
            r_band[i] = r;
            g_band[i] = g;
            b_band[i] = b;
        }

        for (index, values) in [r_band, g_band, b_band].into_iter().enumerate() {
            let mut band = dataset
                .rasterband(index + 1)
                .with_context(|| format!("Failed to get band {}", index + 1))?;
            let mut buffer = Buffer::new((cols, rows), values);
            band.write((0, 0), (cols, rows), &mut buffer)
                .with_context(|| format!("Failed to write band {}", index + 1))?;
        }
        Ok(())
    }

    fn set_geo_metadata(&self, dataset: &mut Dataset, data: &RasterData) -> Result<()> {
        dataset
            .set_geo_transform(&[
                data.extents.left,
                data.meter_per_pixel.x,
                0.0,
                data.extents.top,
                0.0,
                data.meter_per_pixel.y,
            ])
            .context("Failed to set geo transform")?;

        let projection = if !data.projection_wkt.is_empty() {
            data.projection_wkt.clone()
        } else if !data.projection.is_empty() {
            spatial_ref_from(&data.projection)
                .with_context(|| format!("Failed to create SpatialRef from {}", data.projection))?
                .to_wkt()
                .context("Failed to convert SpatialRef to WKT")?
        } else {
            String::new()
        };
        if projection.is_empty() {
            tracing::warn!("No projection for {}", data.filename);
        } else {
            dataset
                .set_projection(&projection)
                .context("Failed to set projection")?;
        }

        dataset
            .set_metadata_item("MIN_ALTITUDE", &data.min_altitude.to_string(), "")
            .context("Failed to set min altitude metadata")?;
        dataset
            .set_metadata_item("MAX_ALTITUDE", &data.max_altitude.to_string(), "")
            .context("Failed to set max altitude metadata")?;
        Ok(())
    }
}
