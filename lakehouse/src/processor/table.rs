use std::fmt;

/// The three storage layers of the lake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layer {
    Source,
    Preprocessed,
    Analytics,
}

impl Layer {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Preprocessed => "preprocessed",
            Self::Analytics => "analytics",
        }
    }
}

// All tables produced by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableKind {
    Immigration,
    Demographic,
    Airports,
    Weather,
    FactImmigration,
    DimCities,
    DimTime,
}

impl TableKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Immigration => "i94",
            Self::Demographic => "demographic",
            Self::Airports => "airports",
            Self::Weather => "weather",
            Self::FactImmigration => "fact_i94_history",
            Self::DimCities => "dim_cities",
            Self::DimTime => "dim_time",
        }
    }

    pub fn partition_by(&self) -> &'static [&'static str] {
        match self {
            Self::Immigration | Self::Weather | Self::FactImmigration | Self::DimTime => {
                &["year", "month"]
            }
            Self::Demographic | Self::DimCities => &["state_code"],
            Self::Airports => &["iso_region"],
        }
    }
}

/// A table at a specific layer, e.g. `preprocessed/weather`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LakeTable {
    pub layer: Layer,
    pub kind: TableKind,
}

impl LakeTable {
    pub const fn new(layer: Layer, kind: TableKind) -> Self {
        Self { layer, kind }
    }

    pub fn name(&self) -> &'static str {
        self.kind.as_str()
    }

    pub fn partition_by(&self) -> &'static [&'static str] {
        self.kind.partition_by()
    }

    /// Relative location below the lake root
    pub fn relative_path(&self) -> String {
        format!("{}/{}", self.layer.as_str(), self.kind.as_str())
    }
}

impl fmt::Display for LakeTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.layer.as_str(), self.kind.as_str())
    }
}

/// The four conformed datasets, shared by the source and preprocessed layers
pub const CONFORMED_TABLES: [TableKind; 4] = [
    TableKind::Immigration,
    TableKind::Demographic,
    TableKind::Airports,
    TableKind::Weather,
];

pub const ANALYTICS_TABLES: [TableKind; 3] = [
    TableKind::FactImmigration,
    TableKind::DimCities,
    TableKind::DimTime,
];
