use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use tracing::{info, warn};
use zip::ZipArchive;

use crate::error::FgdError;
use crate::model::{Bounds, DemTile, Metadata, NODATA};
use crate::parser::parse_dem_xml;

/// 基盤地図情報のZIPアーカイブからDEMタイルを読み出す
pub struct ZipHandler {
    path: PathBuf,
}

impl ZipHandler {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    /// アーカイブ内の全XMLエントリを解析してタイルに変換する
    ///
    /// DEMでないXML（メタデータ等）は読み飛ばす。壊れた文書はエラーで止める
    pub fn process_all_tiles(&self) -> Result<Vec<DemTile>, FgdError> {
        let file = File::open(&self.path)?;
        let mut archive = ZipArchive::new(BufReader::new(file))?;

        let mut tiles = Vec::new();
        for index in 0..archive.len() {
            let mut entry = archive.by_index(index)?;
            if !entry.name().ends_with(".xml") {
                continue;
            }
            let name = entry.name().to_string();
            info!("Loading {}", name);

            let mut xml = String::new();
            entry.read_to_string(&mut xml)?;

            match parse_dem_xml(&xml) {
                Ok(tile) => {
                    info!(
                        "Parsed {} ({} x {})",
                        tile.metadata.meshcode, tile.cols, tile.rows
                    );
                    tiles.push(tile);
                }
                Err(e) if e.is_skip() => warn!("{}: {}, skipping", name, e),
                Err(e) => return Err(e),
            }
        }
        Ok(tiles)
    }
}

/// タイル群の結合先を決める集計結果
///
/// 範囲は全タイルの外接範囲、ピクセルサイズは軸ごとの最小値
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MergeExtent {
    pub bounds: Bounds,
    pub x_res: f64,
    pub y_res: f64,
}

impl MergeExtent {
    /// タイルが1枚もなければNone
    pub fn from_tiles(tiles: &[DemTile]) -> Option<Self> {
        let mut it = tiles.iter();
        let first = it.next()?;
        let mut extent = MergeExtent {
            bounds: first.bounds,
            x_res: first.x_res,
            y_res: first.y_res,
        };
        for tile in it {
            extent.bounds = extent.bounds.union(&tile.bounds);
            extent.x_res = extent.x_res.min(tile.x_res);
            extent.y_res = extent.y_res.min(tile.y_res);
        }
        Some(extent)
    }

    /// 結合ラスタの (rows, cols)
    pub fn raster_shape(&self) -> (usize, usize) {
        let cols = (self.bounds.width() / self.x_res).round() as usize;
        let rows = (self.bounds.height() / self.y_res).round() as usize;
        (rows, cols)
    }

    /// タイル左上隅の結合ラスタ内での位置 (row, col)
    pub fn tile_offset(&self, tile: &DemTile) -> (usize, usize) {
        let col = ((tile.bounds.min_lon - self.bounds.min_lon) / self.x_res).round() as usize;
        let row = ((self.bounds.max_lat - tile.bounds.max_lat) / self.y_res).round() as usize;
        (row, col)
    }
}

/// 複数タイルを1枚に敷き詰めた結合ラスタ
#[derive(Debug, Clone)]
pub struct MergedDemTile {
    pub bounds: Bounds,
    pub rows: usize,
    pub cols: usize,
    pub x_res: f64,
    pub y_res: f64,
    pub values: Vec<f32>,
}

impl MergedDemTile {
    /// タイル群を外接範囲いっぱいのラスタへ重ね書きする。重複は後勝ち
    pub fn from_tiles(tiles: Vec<DemTile>) -> Result<Self, FgdError> {
        let extent = MergeExtent::from_tiles(&tiles).ok_or(FgdError::EmptyDataset)?;
        let (rows, cols) = extent.raster_shape();
        info!(
            "Merged raster: {} x {} px, pixel size ({}, {})",
            cols, rows, extent.x_res, extent.y_res
        );

        let mut values = vec![NODATA; rows * cols];
        for tile in &tiles {
            let (offset_row, offset_col) = extent.tile_offset(tile);
            if offset_row + tile.rows > rows || offset_col + tile.cols > cols {
                // 出力からはみ出す分は切り落とす
                warn!(
                    "Tile {} exceeds the merged extent, clipping",
                    tile.metadata.meshcode
                );
            }
            let copy_rows = tile.rows.min(rows.saturating_sub(offset_row));
            let copy_cols = tile.cols.min(cols.saturating_sub(offset_col));
            for row in 0..copy_rows {
                let src = row * tile.cols;
                let dst = (offset_row + row) * cols + offset_col;
                values[dst..dst + copy_cols].copy_from_slice(&tile.values[src..src + copy_cols]);
            }
        }

        Ok(Self {
            bounds: extent.bounds,
            rows,
            cols,
            x_res: extent.x_res,
            y_res: extent.y_res,
            values,
        })
    }

    /// ライタへ渡すために1枚のタイルとして表現し直す
    pub fn to_dem_tile(self) -> DemTile {
        DemTile {
            bounds: self.bounds,
            rows: self.rows,
            cols: self.cols,
            x_res: self.x_res,
            y_res: self.y_res,
            values: self.values,
            start_point: (0, 0),
            metadata: Metadata::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn make_tile(
        min_lon: f64,
        min_lat: f64,
        max_lon: f64,
        max_lat: f64,
        rows: usize,
        cols: usize,
        fill: f32,
    ) -> DemTile {
        DemTile {
            bounds: Bounds {
                min_lon,
                min_lat,
                max_lon,
                max_lat,
            },
            rows,
            cols,
            x_res: (max_lon - min_lon) / cols as f64,
            y_res: (max_lat - min_lat) / rows as f64,
            values: vec![fill; rows * cols],
            start_point: (0, 0),
            metadata: Metadata::default(),
        }
    }

    #[test]
    fn test_extent_accumulates_union_and_min_resolution() {
        let tiles = vec![
            make_tile(135.0, 35.0, 135.1, 35.1, 10, 10, 1.0),
            make_tile(135.1, 34.9, 135.3, 35.0, 20, 10, 2.0),
        ];

        let extent = MergeExtent::from_tiles(&tiles).unwrap();
        assert_eq!(extent.bounds.min_lon, 135.0);
        assert_eq!(extent.bounds.min_lat, 34.9);
        assert_eq!(extent.bounds.max_lon, 135.3);
        assert_eq!(extent.bounds.max_lat, 35.1);
        // 軸ごとに細かい方のピクセルサイズを使う。xは1枚目、yは2枚目が最小
        assert!((extent.x_res - 0.01).abs() < 1e-9);
        assert!((extent.y_res - 0.005).abs() < 1e-9);
    }

    #[test]
    fn test_extent_empty_is_none() {
        assert!(MergeExtent::from_tiles(&[]).is_none());
    }

    #[test]
    fn test_tile_offset_is_stable() {
        let tiles = vec![
            make_tile(135.0, 35.0, 135.1, 35.1, 10, 10, 1.0),
            make_tile(135.1, 35.0, 135.2, 35.1, 10, 10, 2.0),
        ];
        let extent = MergeExtent::from_tiles(&tiles).unwrap();

        let first = extent.tile_offset(&tiles[1]);
        let second = extent.tile_offset(&tiles[1]);
        assert_eq!(first, (0, 10));
        assert_eq!(first, second);
    }

    #[test]
    fn test_merge_single_tile_is_identity() {
        let tile = make_tile(135.0, 35.0, 135.1, 35.1, 4, 4, 7.5);
        let expected = tile.values.clone();

        let merged = MergedDemTile::from_tiles(vec![tile]).unwrap();
        assert_eq!((merged.rows, merged.cols), (4, 4));
        assert_eq!(merged.values, expected);
        assert_eq!(merged.bounds.min_lon, 135.0);
    }

    #[test]
    fn test_merge_adjacent_tiles() {
        // 東西に隣接する2枚。継ぎ目は埋まり、重複はない
        let west = make_tile(135.0, 35.0, 135.1, 35.1, 10, 10, 1.0);
        let east = make_tile(135.1, 35.0, 135.2, 35.1, 10, 10, 2.0);

        let merged = MergedDemTile::from_tiles(vec![west, east]).unwrap();
        assert_eq!((merged.rows, merged.cols), (10, 20));
        for row in 0..10 {
            for col in 0..20 {
                let expected = if col < 10 { 1.0 } else { 2.0 };
                assert_eq!(merged.values[row * 20 + col], expected);
            }
        }
    }

    #[test]
    fn test_merge_gap_stays_nodata() {
        // 間に1タイル分の隙間がある2枚
        let west = make_tile(135.0, 35.0, 135.1, 35.1, 10, 10, 1.0);
        let east = make_tile(135.2, 35.0, 135.3, 35.1, 10, 10, 2.0);

        let merged = MergedDemTile::from_tiles(vec![west, east]).unwrap();
        assert_eq!((merged.rows, merged.cols), (10, 30));
        assert_eq!(merged.values[0], 1.0);
        assert_eq!(merged.values[15], NODATA);
        assert_eq!(merged.values[25], 2.0);
    }

    #[test]
    fn test_merge_overlap_last_wins() {
        let base = make_tile(135.0, 35.0, 135.2, 35.1, 10, 20, 1.0);
        let overlay = make_tile(135.1, 35.0, 135.2, 35.1, 10, 10, 9.0);

        let merged = MergedDemTile::from_tiles(vec![base, overlay]).unwrap();
        assert_eq!(merged.values[0], 1.0);
        assert_eq!(merged.values[19], 9.0);
    }

    #[test]
    fn test_merge_clips_tile_beyond_extent() {
        // 宣言された範囲より広いvaluesを持つ不整合タイルでも落ちない
        let mut tile = make_tile(135.0, 35.0, 135.1, 35.01, 1, 10, 3.0);
        tile.cols = 20;
        tile.values = (0..20).map(|i| i as f32).collect();

        let merged = MergedDemTile::from_tiles(vec![tile]).unwrap();
        assert_eq!((merged.rows, merged.cols), (1, 10));
        assert_eq!(merged.values, (0..10).map(|i| i as f32).collect::<Vec<_>>());
    }

    #[test]
    fn test_merge_empty_is_error() {
        let err = MergedDemTile::from_tiles(Vec::new()).unwrap_err();
        assert!(matches!(err, FgdError::EmptyDataset));
    }

    #[test]
    fn test_to_dem_tile_keeps_geometry() {
        let tile = make_tile(135.0, 35.0, 135.1, 35.1, 10, 10, 1.0);
        let merged = MergedDemTile::from_tiles(vec![tile]).unwrap();
        let x_res = merged.x_res;

        let out = merged.to_dem_tile();
        assert_eq!(out.shape(), (10, 10));
        let transform = out.geo_transform();
        assert_eq!(transform[0], 135.0);
        assert!((transform[1] - x_res).abs() < 1e-15);
        assert_eq!(transform[3], 35.1);
    }

    fn write_zip(path: &Path, entries: &[(&str, &str)]) {
        let file = File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        for (name, content) in entries {
            let options = zip::write::SimpleFileOptions::default()
                .compression_method(zip::CompressionMethod::Stored);
            writer.start_file(*name, options).unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
    }

    fn dem_doc(tuples: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<Dataset xmlns:gml="http://www.opengis.net/gml/3.2">
  <DEM>
    <type>10mメッシュ（標高）</type>
    <mesh>53394600</mesh>
    <coverage>
      <gml:boundedBy>
        <gml:Envelope srsName="fguuid:jgd2011.bl">
          <gml:lowerCorner>35.0 135.0</gml:lowerCorner>
          <gml:upperCorner>35.1 135.2</gml:upperCorner>
        </gml:Envelope>
      </gml:boundedBy>
      <gml:gridDomain>
        <gml:Grid dimension="2">
          <gml:limits>
            <gml:GridEnvelope>
              <gml:low>0 0</gml:low>
              <gml:high>1 1</gml:high>
            </gml:GridEnvelope>
          </gml:limits>
        </gml:Grid>
      </gml:gridDomain>
      <gml:rangeSet>
        <gml:DataBlock>
          <gml:tupleList>
{tuples}
          </gml:tupleList>
        </gml:DataBlock>
      </gml:rangeSet>
      <gml:coverageFunction>
        <gml:GridFunction>
          <gml:sequenceRule order="+x-y">Linear</gml:sequenceRule>
          <gml:startPoint>0 0</gml:startPoint>
        </gml:GridFunction>
      </gml:coverageFunction>
    </coverage>
  </DEM>
</Dataset>
"#
        )
    }

    #[test]
    fn test_process_all_tiles_skips_non_dem_entries() {
        let temp_dir = TempDir::new().unwrap();
        let zip_path = temp_dir.path().join("FG-GML-5339-46-DEM10B.zip");
        let doc = dem_doc("地表面,1.0\n地表面,2.0\n地表面,3.0\n地表面,4.0");
        write_zip(
            &zip_path,
            &[
                ("FG-GML-5339-46-dem10b-1.xml", doc.as_str()),
                ("readme.txt", "not xml"),
                (
                    "FG-GML-5339-46-meta.xml",
                    r#"<?xml version="1.0"?><metadata><title>meta</title></metadata>"#,
                ),
            ],
        );

        let tiles = ZipHandler::new(&zip_path).process_all_tiles().unwrap();
        assert_eq!(tiles.len(), 1);
        assert_eq!(tiles[0].values, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_process_empty_archive_yields_no_tiles() {
        let temp_dir = TempDir::new().unwrap();
        let zip_path = temp_dir.path().join("empty.zip");
        write_zip(&zip_path, &[]);

        let tiles = ZipHandler::new(&zip_path).process_all_tiles().unwrap();
        assert!(tiles.is_empty());
    }

    #[test]
    fn test_process_broken_document_is_error() {
        let temp_dir = TempDir::new().unwrap();
        let zip_path = temp_dir.path().join("broken.zip");
        let broken = dem_doc("地表面,1.0").replace("<gml:startPoint>0 0</gml:startPoint>", "");
        write_zip(&zip_path, &[("FG-GML-broken.xml", broken.as_str())]);

        let err = ZipHandler::new(&zip_path).process_all_tiles().unwrap_err();
        assert!(matches!(err, FgdError::MissingElement("startPoint")));
    }

    #[test]
    fn test_process_zero_area_document_is_error() {
        // 範囲が退化した文書は結合まで届かず、このアーカイブのエラーになる
        let temp_dir = TempDir::new().unwrap();
        let zip_path = temp_dir.path().join("degenerate.zip");
        let good = dem_doc("地表面,1.0\n地表面,2.0\n地表面,3.0\n地表面,4.0");
        let degenerate = good.replace(
            "<gml:upperCorner>35.1 135.2</gml:upperCorner>",
            "<gml:upperCorner>35.0 135.0</gml:upperCorner>",
        );
        write_zip(
            &zip_path,
            &[
                ("FG-GML-5339-46-dem10b-1.xml", good.as_str()),
                ("FG-GML-5339-46-dem10b-2.xml", degenerate.as_str()),
            ],
        );

        let err = ZipHandler::new(&zip_path).process_all_tiles().unwrap_err();
        assert!(matches!(
            err,
            FgdError::Malformed {
                what: "Envelope",
                ..
            }
        ));
    }
}
