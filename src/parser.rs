use std::borrow::Cow;
use std::str::FromStr;

use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::warn;

use crate::error::FgdError;
use crate::model::{Bounds, DemTile, Metadata, NODATA};

/// tupleListの行ラベルの分類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SampleClass {
    /// 地表面
    Ground,
    /// 表層面・海水面など地表面以外
    Other,
}

impl SampleClass {
    fn classify(label: &str) -> Self {
        if label == "地表面" {
            SampleClass::Ground
        } else {
            SampleClass::Other
        }
    }

    /// セルに格納する値。数値にならない行はセンチネルになる
    fn cell_value(self, parsed: Option<f32>) -> f32 {
        let value = parsed.unwrap_or(NODATA);
        match self {
            // 地表面は読めた値をそのまま格納する
            SampleClass::Ground => value,
            // 地表面以外は欠測値をセンチネルへ正規化する
            SampleClass::Other => {
                if value == NODATA {
                    NODATA
                } else {
                    value
                }
            }
        }
    }
}

/// 文書走査で拾い集めた素材。検証は後段でまとめて行う
#[derive(Default)]
struct RawCoverage<'a> {
    saw_dem: bool,
    saw_coverage: bool,
    saw_envelope: bool,
    /// lowerCornerの (緯度, 経度)
    lower: Option<(f64, f64)>,
    /// upperCornerの (緯度, 経度)
    upper: Option<(f64, f64)>,
    grid_low: Option<(i64, i64)>,
    grid_high: Option<(i64, i64)>,
    start_point: Option<(i64, i64)>,
    rule_order: Option<String>,
    rule_name: Option<String>,
    tuple_list: Option<Cow<'a, str>>,
    meshcode: Option<String>,
    dem_type: Option<String>,
}

/// 基盤地図情報のDEM XML文書を1枚のタイルとして読み取る
pub fn parse_dem_xml(xml: &str) -> Result<DemTile, FgdError> {
    let raw = scan_document(xml)?;
    build_tile(raw)
}

fn scan_document(xml: &str) -> Result<RawCoverage<'_>, FgdError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut raw = RawCoverage::default();
    let mut in_dem = false;
    let mut in_coverage = false;
    let mut in_envelope = false;
    let mut in_grid_envelope = false;
    let mut in_grid_function = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"DEM" => {
                    raw.saw_dem = true;
                    in_dem = true;
                }
                b"coverage" if in_dem => {
                    raw.saw_coverage = true;
                    in_coverage = true;
                }
                b"mesh" if in_dem && !in_coverage && raw.meshcode.is_none() => {
                    raw.meshcode = Some(reader.read_text(e.name())?.trim().to_string());
                }
                b"type" if in_dem && !in_coverage && raw.dem_type.is_none() => {
                    raw.dem_type = Some(reader.read_text(e.name())?.trim().to_string());
                }
                b"Envelope" if in_coverage => {
                    raw.saw_envelope = true;
                    in_envelope = true;
                }
                b"lowerCorner" if in_envelope && raw.lower.is_none() => {
                    let text = reader.read_text(e.name())?;
                    raw.lower = Some(parse_pair(&text, "lowerCorner")?);
                }
                b"upperCorner" if in_envelope && raw.upper.is_none() => {
                    let text = reader.read_text(e.name())?;
                    raw.upper = Some(parse_pair(&text, "upperCorner")?);
                }
                b"GridEnvelope" if in_coverage => in_grid_envelope = true,
                b"low" if in_grid_envelope && raw.grid_low.is_none() => {
                    let text = reader.read_text(e.name())?;
                    raw.grid_low = Some(parse_pair(&text, "low")?);
                }
                b"high" if in_grid_envelope && raw.grid_high.is_none() => {
                    let text = reader.read_text(e.name())?;
                    raw.grid_high = Some(parse_pair(&text, "high")?);
                }
                b"tupleList" if in_coverage && raw.tuple_list.is_none() => {
                    raw.tuple_list = Some(reader.read_text(e.name())?);
                }
                b"GridFunction" if in_coverage => in_grid_function = true,
                b"sequenceRule" if in_grid_function && raw.rule_order.is_none() => {
                    let order = e
                        .try_get_attribute("order")
                        .map_err(quick_xml::Error::from)?
                        .map(|attr| String::from_utf8_lossy(&attr.value).into_owned())
                        .unwrap_or_default();
                    raw.rule_order = Some(order);
                    raw.rule_name = Some(reader.read_text(e.name())?.trim().to_string());
                }
                b"startPoint" if in_grid_function && raw.start_point.is_none() => {
                    let text = reader.read_text(e.name())?;
                    raw.start_point = Some(parse_pair(&text, "startPoint")?);
                }
                _ => {}
            },
            Event::End(e) => match e.local_name().as_ref() {
                b"DEM" => in_dem = false,
                b"coverage" => in_coverage = false,
                b"Envelope" => in_envelope = false,
                b"GridEnvelope" => in_grid_envelope = false,
                b"GridFunction" => in_grid_function = false,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(raw)
}

fn build_tile(raw: RawCoverage<'_>) -> Result<DemTile, FgdError> {
    // DEM・coverage・Envelopeを欠く文書はスキップ対象。それ以外の欠落はエラー
    if !raw.saw_dem {
        return Err(FgdError::NotDem("DEM"));
    }
    if !raw.saw_coverage {
        return Err(FgdError::NotDem("coverage"));
    }
    if !raw.saw_envelope {
        return Err(FgdError::NotDem("Envelope"));
    }

    let (lower_lat, lower_lon) = raw.lower.ok_or(FgdError::MissingElement("lowerCorner"))?;
    let (upper_lat, upper_lon) = raw.upper.ok_or(FgdError::MissingElement("upperCorner"))?;
    let (low_x, low_y) = raw.grid_low.ok_or(FgdError::MissingElement("low"))?;
    let (high_x, high_y) = raw.grid_high.ok_or(FgdError::MissingElement("high"))?;
    let rule_order = raw.rule_order.ok_or(FgdError::MissingElement("sequenceRule"))?;
    let rule_name = raw.rule_name.unwrap_or_default();
    let (start_x, start_y) = raw.start_point.ok_or(FgdError::MissingElement("startPoint"))?;
    let tuple_list = raw.tuple_list.ok_or(FgdError::MissingElement("tupleList"))?;

    // 想定外の走査規則はそのまま+x-yとして読む
    if rule_order != "+x-y" {
        warn!("unexpected sequence order {:?}, assuming +x-y", rule_order);
    }
    if rule_name != "Linear" {
        warn!("unexpected sequence rule {:?}, assuming Linear", rule_name);
    }

    let xsize = high_x - low_x + 1;
    let ysize = high_y - low_y + 1;
    if xsize <= 0 || ysize <= 0 {
        return Err(FgdError::Malformed {
            what: "GridEnvelope",
            text: format!("low {} {} high {} {}", low_x, low_y, high_x, high_y),
        });
    }
    let cols = xsize as usize;
    let rows = ysize as usize;

    // 面積のない範囲はピクセルサイズを決められない
    let width = upper_lon - lower_lon;
    let height = upper_lat - lower_lat;
    if width <= 0.0 || height <= 0.0 || !width.is_finite() || !height.is_finite() {
        return Err(FgdError::Malformed {
            what: "Envelope",
            text: format!("{} {} - {} {}", lower_lat, lower_lon, upper_lat, upper_lon),
        });
    }

    // ピクセルサイズは範囲をグリッドサイズで割って決める
    let x_res = width / cols as f64;
    let y_res = height / rows as f64;

    let mut values = vec![NODATA; rows * cols];
    let mut x = start_x;
    let mut y = start_y;
    for line in tuple_list.lines() {
        let line = line.trim();
        let mut fields = line.split(',');
        let (Some(label), Some(value)) = (fields.next(), fields.next()) else {
            // ラベルと値が揃わない行は位置を進めずに読み飛ばす
            continue;
        };

        let cell = SampleClass::classify(label).cell_value(value.trim().parse().ok());
        if (0..cols as i64).contains(&x) && (0..rows as i64).contains(&y) {
            values[y as usize * cols + x as usize] = cell;
        }

        // +x-y順の走査。行末で折り返し、グリッドを埋め切ったら残りは捨てる
        x += 1;
        if x > high_x {
            x = 0;
            y += 1;
            if y > high_y {
                break;
            }
        }
    }

    Ok(DemTile {
        bounds: Bounds {
            min_lon: lower_lon,
            min_lat: lower_lat,
            max_lon: upper_lon,
            max_lat: upper_lat,
        },
        rows,
        cols,
        x_res,
        y_res,
        values,
        start_point: (start_x.max(0) as usize, start_y.max(0) as usize),
        metadata: Metadata {
            meshcode: raw.meshcode.unwrap_or_default(),
            dem_type: raw.dem_type.unwrap_or_default(),
        },
    })
}

/// 空白区切りの2値を読む
fn parse_pair<T: FromStr>(text: &str, what: &'static str) -> Result<(T, T), FgdError> {
    let mut it = text.split_whitespace();
    let first = it.next().and_then(|v| v.parse().ok());
    let second = it.next().and_then(|v| v.parse().ok());
    match (first, second) {
        (Some(first), Some(second)) => Ok((first, second)),
        _ => Err(FgdError::Malformed {
            what,
            text: text.trim().to_string(),
        }),
    }
}
