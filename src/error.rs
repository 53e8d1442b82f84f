use thiserror::Error;

/// DEM変換パイプラインのエラー
#[derive(Debug, Error)]
pub enum FgdError {
    /// DEM・coverage・Envelopeを欠く文書はDEMデータとして扱わない
    #[error("not a DEM document: <{0}> not found")]
    NotDem(&'static str),

    #[error("missing <{0}> in DEM coverage")]
    MissingElement(&'static str),

    #[error("could not parse {what}: {text:?}")]
    Malformed { what: &'static str, text: String },

    #[error("no usable DEM tiles")]
    EmptyDataset,

    #[error(transparent)]
    Xml(#[from] quick_xml::Error),

    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl FgdError {
    /// アーカイブ走査を止めず、そのファイルだけ読み飛ばすべきエラーか
    pub fn is_skip(&self) -> bool {
        matches!(self, FgdError::NotDem(_))
    }
}
