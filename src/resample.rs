use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use gdal::raster::Buffer;
use gdal::{Dataset, DriverManager};
use rayon::prelude::*;
use tracing::{error, info, warn};

/// マスク出力の背景値。マスクは0/1なので第3の値で未カバーを表す
pub const MASK_BACKGROUND: f64 = 2.0;

/// 位置合わせの基準になるリファレンスラスタのグリッド
#[derive(Debug, Clone)]
pub struct ReferenceGrid {
    pub geo_transform: [f64; 6],
    pub projection: String,
    pub cols: usize,
    pub rows: usize,
}

impl ReferenceGrid {
    pub fn from_path(path: &Path) -> Result<Self> {
        let dataset = Dataset::open(path)
            .with_context(|| format!("Failed to open reference raster {:?}", path))?;
        let geo_transform = dataset
            .geo_transform()
            .context("Reference raster has no geo transform")?;
        let (cols, rows) = dataset.raster_size();
        Ok(Self {
            geo_transform,
            projection: dataset.projection(),
            cols,
            rows,
        })
    }

    /// 出力範囲 (xmin, ymin, xmax, ymax)
    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        let gt = &self.geo_transform;
        (
            gt[0],
            gt[3] + gt[5] * self.rows as f64,
            gt[0] + gt[1] * self.cols as f64,
            gt[3],
        )
    }

    pub fn x_res(&self) -> f64 {
        self.geo_transform[1]
    }

    pub fn y_res(&self) -> f64 {
        self.geo_transform[5].abs()
    }
}

/// ソースが届かない出力セルに入れる値
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DestInit {
    /// ソースのnodata値。未設定なら0
    NoData,
    Constant(f64),
}

/// 1件分のリサンプリング指示
#[derive(Debug, Clone)]
pub struct ResampleJob {
    pub location: String,
    pub target: String,
    pub input: PathBuf,
    pub output: PathBuf,
    pub init: DestInit,
}

/// 地域×種別の全組み合わせをジョブに展開する
pub fn plan_jobs(base_dir: &Path, locations: &[String], targets: &[String]) -> Vec<ResampleJob> {
    let mut jobs = Vec::with_capacity(locations.len() * targets.len());
    for location in locations {
        for target in targets {
            let input = base_dir.join(format!("clipped_{}_{}.tif", target, location));
            let output = base_dir.join(format!("clipped_resampled_{}_{}.tif", target, location));
            let init = if target == "mask" {
                DestInit::Constant(MASK_BACKGROUND)
            } else {
                DestInit::NoData
            };
            jobs.push(ResampleJob {
                location: location.clone(),
                target: target.clone(),
                input,
                output,
                init,
            });
        }
    }
    jobs
}

/// バッチ処理の結果
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub resampled: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// ジョブを順に処理する。入力が無ければ読み飛ばし、失敗してもバッチは止めない
pub fn run_jobs(reference: &ReferenceGrid, jobs: &[ResampleJob]) -> Result<BatchSummary> {
    let mut summary = BatchSummary::default();
    for job in jobs {
        // 出力先は入力の有無を確かめる前に用意する
        if let Some(parent) = job.output.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create output directory {:?}", parent))?;
        }
        if !job.input.exists() {
            warn!("Input not found, skipping: {:?}", job.input);
            summary.skipped += 1;
            continue;
        }

        info!("Resampling {} ({})", job.location, job.target);
        match resample_to_grid(reference, job) {
            Ok(()) => {
                info!("Saved: {:?}", job.output);
                summary.resampled += 1;
            }
            Err(e) => {
                error!("{}: {:#}", job.input.display(), e);
                summary.failed += 1;
            }
        }
    }
    Ok(summary)
}

/// 1枚のラスタをリファレンスのグリッドへ最近傍で合わせて書き出す
fn resample_to_grid(reference: &ReferenceGrid, job: &ResampleJob) -> Result<()> {
    let source =
        Dataset::open(&job.input).with_context(|| format!("Failed to open {:?}", job.input))?;
    let src_gt = source
        .geo_transform()
        .context("Input raster has no geo transform")?;
    if source.projection() != reference.projection {
        // 座標系の変換はしない。同じ座標系で切り出されている前提
        warn!(
            "Projection of {:?} differs from the reference grid",
            job.input
        );
    }

    let (src_cols, src_rows) = source.raster_size();
    let band = source.rasterband(1).context("Failed to get raster band")?;
    let src_nodata = band.no_data_value();
    let buf = band
        .read_as::<f32>((0, 0), (src_cols, src_rows), (src_cols, src_rows), None)
        .context("Failed to read raster data")?;

    let fill = match job.init {
        DestInit::Constant(v) => v as f32,
        DestInit::NoData => src_nodata.map(|v| v as f32).unwrap_or(0.0),
    };

    let values = resample_nearest(
        buf.data(),
        (src_rows, src_cols),
        &src_gt,
        (reference.rows, reference.cols),
        &reference.geo_transform,
        fill,
    );

    let driver =
        DriverManager::get_driver_by_name("GTiff").context("Failed to get GTiff driver")?;
    let mut output = driver
        .create_with_band_type::<f32, _>(&job.output, reference.cols, reference.rows, 1)
        .with_context(|| format!("Failed to create {:?}", job.output))?;
    output
        .set_geo_transform(&reference.geo_transform)
        .context("Failed to set geo transform")?;
    output
        .set_projection(&reference.projection)
        .context("Failed to set projection")?;

    let mut out_band = output.rasterband(1).context("Failed to get raster band")?;
    if let Some(nodata) = src_nodata {
        out_band
            .set_no_data_value(Some(nodata))
            .context("Failed to set no data value")?;
    }
    let mut buffer = Buffer::new((reference.cols, reference.rows), values);
    out_band
        .write((0, 0), (reference.cols, reference.rows), &mut buffer)
        .context("Failed to write raster data")?;

    Ok(())
}

/// 出力ピクセル中心をソースのセルへ逆引きして値を写す最近傍リサンプリング
///
/// 形状は (rows, cols)。ジオトランスフォームは回転項なしの前提
pub fn resample_nearest(
    src: &[f32],
    src_shape: (usize, usize),
    src_gt: &[f64; 6],
    dst_shape: (usize, usize),
    dst_gt: &[f64; 6],
    fill: f32,
) -> Vec<f32> {
    let (src_rows, src_cols) = src_shape;
    let (dst_rows, dst_cols) = dst_shape;
    let mut values = vec![fill; dst_rows * dst_cols];
    if dst_rows == 0 || dst_cols == 0 {
        return values;
    }

    // 行単位で並列化する
    values
        .par_chunks_mut(dst_cols)
        .enumerate()
        .for_each(|(row, out_row)| {
            let y = dst_gt[3] + (row as f64 + 0.5) * dst_gt[5];
            let fy = ((y - src_gt[3]) / src_gt[5]).floor();
            if fy < 0.0 || fy >= src_rows as f64 {
                return;
            }
            let src_row = fy as usize * src_cols;
            for (col, cell) in out_row.iter_mut().enumerate() {
                let x = dst_gt[0] + (col as f64 + 0.5) * dst_gt[1];
                let fx = ((x - src_gt[0]) / src_gt[1]).floor();
                if fx < 0.0 || fx >= src_cols as f64 {
                    continue;
                }
                *cell = src[src_row + fx as usize];
            }
        });

    values
}
