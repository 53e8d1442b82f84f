use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use fgd_dem::resample::{plan_jobs, run_jobs};
use fgd_dem::ReferenceGrid;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// 解像度と位置の基準にするリファレンスGeoTIFF
    #[arg(short, long, value_name = "FILE")]
    reference: PathBuf,

    /// 入力と出力を置くベースディレクトリ
    #[arg(short, long, value_name = "DIR")]
    base_dir: PathBuf,

    /// 処理する地域名（カンマ区切り）
    #[arg(
        short,
        long,
        value_delimiter = ',',
        default_value = "iburi,gofukuya,noto,akatani"
    )]
    locations: Vec<String>,

    /// 処理するラスタ種別（カンマ区切り）
    #[arg(short, long, value_delimiter = ',', default_value = "mask,dem")]
    targets: Vec<String>,
}

fn main() -> Result<()> {
    // ログの初期化
    tracing_subscriber::fmt::init();

    // CLI引数の解析
    let args = Args::parse();

    // 処理開始時間を記録
    let start_time = std::time::Instant::now();

    let reference = ReferenceGrid::from_path(&args.reference)?;
    let (xmin, ymin, xmax, ymax) = reference.bounds();
    info!(
        "Reference grid: {} x {} px, pixel size ({}, {}), bounds ({}, {}) - ({}, {})",
        reference.cols,
        reference.rows,
        reference.x_res(),
        reference.y_res(),
        xmin,
        ymin,
        xmax,
        ymax
    );

    let jobs = plan_jobs(&args.base_dir, &args.locations, &args.targets);
    let summary = run_jobs(&reference, &jobs)?;

    // 処理時間を表示
    let elapsed = start_time.elapsed();
    info!(
        "Resampled {} rasters ({} skipped, {} failed) in {:?}",
        summary.resampled, summary.skipped, summary.failed, elapsed
    );

    if summary.failed > 0 {
        anyhow::bail!("{} rasters failed to resample", summary.failed);
    }
    Ok(())
}
