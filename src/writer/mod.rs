use anyhow::{Context, Result};
use gdal::raster::Buffer;
use gdal::spatial_ref::SpatialRef;
use gdal::DriverManager;
use std::path::Path;

use crate::model::{DemTile, NODATA};

/// 出力座標系はJGD2011経緯度に固定
const EPSG_JGD2011: u32 = 6668;

#[derive(Default)]
pub struct GeoTiffWriter {}

impl GeoTiffWriter {
    pub fn new() -> Self {
        Self {}
    }

    /// DEMタイルを1バンドfloat32のGeoTIFFへ書き出す
    pub fn write(&self, dem_tile: &DemTile, output_path: &Path) -> Result<()> {
        // GTiffドライバーを取得
        let driver =
            DriverManager::get_driver_by_name("GTiff").context("Failed to get GTiff driver")?;

        // データセットを作成
        let (rows, cols) = dem_tile.shape();
        let mut dataset = driver
            .create_with_band_type::<f32, _>(
                output_path,
                cols,
                rows,
                1, // バンド数
            )
            .context("Failed to create dataset")?;

        // ジオトランスフォームを設定
        dataset
            .set_geo_transform(&dem_tile.geo_transform())
            .context("Failed to set geo transform")?;

        // 座標系を設定
        let srs = SpatialRef::from_epsg(EPSG_JGD2011).context(format!(
            "Failed to create SpatialRef from EPSG:{}",
            EPSG_JGD2011
        ))?;
        let wkt = srs.to_wkt().context("Failed to convert SpatialRef to WKT")?;
        dataset
            .set_projection(&wkt)
            .context("Failed to set projection")?;

        // バンドにデータを書き込み
        let mut band = dataset.rasterband(1).context("Failed to get raster band")?;

        // NoData値を設定
        band.set_no_data_value(Some(NODATA as f64))
            .context("Failed to set no data value")?;

        // データを書き込み（GDALは行優先順を期待）
        let mut buffer = Buffer::new((cols, rows), dem_tile.values.clone());
        band.write((0, 0), (cols, rows), &mut buffer)
            .context("Failed to write raster data")?;

        Ok(())
    }
}
