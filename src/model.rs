/// 欠測セルに入れるセンチネル値
pub const NODATA: f32 = -9999.0;

/// 地理範囲（度単位、経度・緯度）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl Bounds {
    /// 2つの範囲の外接範囲
    pub fn union(&self, other: &Bounds) -> Bounds {
        Bounds {
            min_lon: self.min_lon.min(other.min_lon),
            min_lat: self.min_lat.min(other.min_lat),
            max_lon: self.max_lon.max(other.max_lon),
            max_lat: self.max_lat.max(other.max_lat),
        }
    }

    pub fn width(&self) -> f64 {
        self.max_lon - self.min_lon
    }

    pub fn height(&self) -> f64 {
        self.max_lat - self.min_lat
    }
}

/// DEM文書から読み取る付帯情報
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    pub meshcode: String,
    pub dem_type: String,
}

/// 1枚のXML文書に対応するDEMタイル
#[derive(Debug, Clone)]
pub struct DemTile {
    pub bounds: Bounds,
    pub rows: usize,
    pub cols: usize,
    /// 経度方向の1ピクセル幅（度）。範囲の幅÷列数
    pub x_res: f64,
    /// 緯度方向の1ピクセル幅(度)。範囲の高さ÷行数
    pub y_res: f64,
    /// 北西隅から行優先で並ぶ標高値
    pub values: Vec<f32>,
    /// tupleListの先頭行が対応するグリッド位置 (x, y)
    pub start_point: (usize, usize),
    pub metadata: Metadata,
}

impl DemTile {
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// GDAL形式のアフィン変換。原点は北西隅、y方向は南向きに負
    pub fn geo_transform(&self) -> [f64; 6] {
        [
            self.bounds.min_lon,
            self.x_res,
            0.0,
            self.bounds.max_lat,
            0.0,
            -self.y_res,
        ]
    }
}
