use anyhow::Result;
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use fgd_dem::{GeoTiffWriter, MergedDemTile, ZipHandler};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// 変換する基盤地図情報DEMのZIPアーカイブ（複数指定可）
    #[arg(value_name = "ARCHIVE", required = true)]
    archives: Vec<PathBuf>,
}

fn main() -> Result<()> {
    // ログの初期化
    tracing_subscriber::fmt::init();

    // CLI引数の解析
    let args = Args::parse();

    // 処理開始時間を記録
    let start_time = std::time::Instant::now();

    // アーカイブごとに変換し、失敗しても残りは処理する
    let mut failures = 0usize;
    for archive in &args.archives {
        info!("Processing ZIP file: {:?}", archive);
        if let Err(e) = process_archive(archive) {
            error!("{}: {:#}", archive.display(), e);
            failures += 1;
        }
    }

    // 処理時間を表示
    let elapsed = start_time.elapsed();
    info!("Total processing time: {:?}", elapsed);

    if failures > 0 {
        anyhow::bail!("{} archives failed to process", failures);
    }
    Ok(())
}

fn process_archive(archive: &Path) -> Result<()> {
    // 出力は拡張子を.tifへ差し替えたパス
    let output = archive.with_extension("tif");

    let handler = ZipHandler::new(archive);
    let tiles = handler.process_all_tiles()?;

    if tiles.is_empty() {
        // タイルが無ければこのアーカイブの出力は作らない
        warn!("{}: no usable DEM tiles, nothing written", archive.display());
        return Ok(());
    }

    // タイルを結合して出力
    info!("Merging {} tiles", tiles.len());
    let merged = MergedDemTile::from_tiles(tiles)?;
    let dem_tile = merged.to_dem_tile();

    let writer = GeoTiffWriter::new();
    writer.write(&dem_tile, &output)?;
    info!("Written merged GeoTIFF: {:?}", output);

    Ok(())
}
