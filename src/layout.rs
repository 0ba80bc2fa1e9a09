//! Cooling plate layout
//!
//! Temperature channels are named `moduleTemperature<NN>_BMS<MM>`; the
//! layout turns the `(NN, MM)` pair into a `(row, column)` cell of the plate
//! grid, either with the naming formula or with an explicit sensor table.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    fs::File,
    io::BufReader,
    path::Path,
};

#[derive(thiserror::Error, Debug)]
pub enum LayoutError {
    #[error("layout conflict: {channel} ({cell}) lies outside of the {rows}x{columns} grid")]
    OutOfBounds {
        channel: String,
        cell: CellId,
        rows: usize,
        columns: usize,
    },
    #[error("layout conflict: {channel} maps to cell {position} already taken by {other}")]
    Duplicate {
        channel: String,
        other: String,
        position: GridPosition,
    },
    #[error("failed to open the layout table")]
    Io(#[from] std::io::Error),
    #[error("failed to parse the layout table")]
    Json(#[from] serde_json::Error),
    #[error("invalid layout: {0}")]
    Invalid(String),
}
type Result<T> = std::result::Result<T, LayoutError>;

static CHANNEL_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^moduletemperature([0-9]+)_bms([0-9]+)$").expect("valid channel name regex")
});

/// Module and BMS indices of a cell temperature channel
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct CellId {
    pub module: u32,
    pub bms: u32,
}
impl CellId {
    pub const OVERFLOW: u32 = u32::MAX;
    /// Whether the module or BMS index of the channel name overflowed
    pub fn is_overflow(&self) -> bool {
        self.module == Self::OVERFLOW || self.bms == Self::OVERFLOW
    }
}
impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "module {:02}, BMS {:02}", self.module, self.bms)
    }
}

/// Parses a `moduleTemperature<NN>_BMS<MM>` channel name, ignoring case
///
/// Any other name, including names that only contain the pattern, gives `None`.
/// Indices too large for `u32` saturate to [CellId::OVERFLOW], which no layout places.
pub fn parse_channel_name(name: &str) -> Option<CellId> {
    let captures = CHANNEL_NAME.captures(name)?;
    let index = |digits: &str| digits.parse().unwrap_or(CellId::OVERFLOW);
    Some(CellId {
        module: index(&captures[1]),
        bms: index(&captures[2]),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GridPosition {
    pub row: usize,
    pub column: usize,
}
impl fmt::Display for GridPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.row, self.column)
    }
}

/// The cooling plate grid, tiled into layers
///
/// Layers are numbered down the rows first, then across the columns
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Grid {
    pub rows: usize,
    pub columns: usize,
    pub layer_rows: usize,
    pub layer_columns: usize,
}
impl Default for Grid {
    fn default() -> Self {
        Self {
            rows: 12,
            columns: 16,
            layer_rows: 4,
            layer_columns: 8,
        }
    }
}
impl Grid {
    pub fn cell_count(&self) -> usize {
        self.rows * self.columns
    }
    pub fn contains(&self, position: GridPosition) -> bool {
        position.row < self.rows && position.column < self.columns
    }
    /// Row-major index of a position
    pub fn index(&self, position: GridPosition) -> usize {
        position.row * self.columns + position.column
    }
    pub fn position(&self, index: usize) -> GridPosition {
        GridPosition {
            row: index / self.columns,
            column: index % self.columns,
        }
    }
    pub fn layer_count(&self) -> usize {
        (self.rows / self.layer_rows) * (self.columns / self.layer_columns)
    }
    pub fn layer_of(&self, position: GridPosition) -> usize {
        (position.column / self.layer_columns) * (self.rows / self.layer_rows)
            + position.row / self.layer_rows
    }
    /// Position of the cell `(i, j)` of a layer
    fn layer_cell(&self, layer: usize, i: usize, j: usize) -> GridPosition {
        let stacked = self.rows / self.layer_rows;
        GridPosition {
            row: (layer % stacked) * self.layer_rows + i,
            column: (layer / stacked) * self.layer_columns + j,
        }
    }
    pub fn validate(&self) -> Result<()> {
        if self.rows == 0 || self.columns == 0 || self.layer_rows == 0 || self.layer_columns == 0
        {
            return Err(LayoutError::Invalid(format!(
                "empty {}x{} grid or {}x{} layers",
                self.rows, self.columns, self.layer_rows, self.layer_columns
            )));
        }
        if self.rows % self.layer_rows != 0 || self.columns % self.layer_columns != 0 {
            return Err(LayoutError::Invalid(format!(
                "{}x{} layers do not tile the {}x{} grid",
                self.layer_rows, self.layer_columns, self.rows, self.columns
            )));
        }
        Ok(())
    }
}

/// Position formula of the channel naming convention
///
/// ```text
/// index  = NN - first_module
/// row    = index / cells_per_row
/// column = bms_columns[MM] + index % cells_per_row
/// ```
/// with the column offset mirrored on odd rows for a serpentine wiring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamingRule {
    pub first_module: u32,
    pub cells_per_row: usize,
    pub serpentine: bool,
    /// first column of the cells of each BMS
    pub bms_columns: BTreeMap<u32, usize>,
}
impl Default for NamingRule {
    fn default() -> Self {
        Self {
            first_module: 1,
            cells_per_row: 8,
            serpentine: true,
            bms_columns: [(1, 0), (5, 8)].into_iter().collect(),
        }
    }
}
impl NamingRule {
    /// Cell position, `None` for an unknown BMS or a module below `first_module`
    pub fn position(&self, cell: CellId) -> Option<GridPosition> {
        let first_column = *self.bms_columns.get(&cell.bms)?;
        let index = cell.module.checked_sub(self.first_module)? as usize;
        let row = index / self.cells_per_row;
        let offset = index % self.cells_per_row;
        let offset = if self.serpentine && row % 2 == 1 {
            self.cells_per_row - 1 - offset
        } else {
            offset
        };
        Some(GridPosition {
            row,
            column: first_column + offset,
        })
    }
}

/// How cells are placed on the grid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rule {
    Naming(NamingRule),
    /// Sensor order, layer after layer, row-major within a layer
    Table(Vec<CellId>),
}
impl Default for Rule {
    fn default() -> Self {
        Rule::Naming(NamingRule::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Placement {
    Cell(GridPosition),
    OutOfBounds,
    Unmapped,
}

#[derive(Deserialize)]
struct LayoutTable {
    sensor_order: Vec<(u32, String)>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Layout {
    pub grid: Grid,
    pub rule: Rule,
}
impl Layout {
    pub fn new(grid: Grid, rule: Rule) -> Result<Self> {
        let layout = Self { grid, rule };
        layout.validate()?;
        Ok(layout)
    }
    pub fn validate(&self) -> Result<()> {
        self.grid.validate()?;
        match &self.rule {
            Rule::Naming(rule) if rule.cells_per_row == 0 => {
                Err(LayoutError::Invalid("zero cells per row".into()))
            }
            Rule::Naming(_) => Ok(()),
            Rule::Table(order) => {
                let mut seen = HashMap::new();
                for (i, cell) in order.iter().enumerate() {
                    if let Some(j) = seen.insert(*cell, i) {
                        return Err(LayoutError::Invalid(format!(
                            "{} is listed twice (#{} and #{})",
                            cell, j, i
                        )));
                    }
                }
                Ok(())
            }
        }
    }
    /// Loads a `{"sensor_order": [[NN, "MM"], ...]}` layout table
    pub fn from_table<P: AsRef<Path>>(grid: Grid, path: P) -> Result<Self> {
        log::info!("Loading layout table {:?}...", path.as_ref());
        let file = File::open(path)?;
        let table: LayoutTable = serde_json::from_reader(BufReader::new(file))?;
        let order = table
            .sensor_order
            .into_iter()
            .map(|(module, bms)| {
                bms.trim()
                    .parse()
                    .map(|bms| CellId { module, bms })
                    .map_err(|_| LayoutError::Invalid(format!("BMS index {:?}", bms)))
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(grid, Rule::Table(order))
    }
    /// Number of cells the layout can address
    pub fn capacity(&self) -> usize {
        match &self.rule {
            Rule::Naming(_) => self.grid.cell_count(),
            Rule::Table(order) => order.len().min(self.grid.cell_count()),
        }
    }
    pub fn place(&self, cell: CellId) -> Placement {
        if cell.is_overflow() {
            return Placement::OutOfBounds;
        }
        let position = match &self.rule {
            Rule::Naming(rule) => {
                if !rule.bms_columns.contains_key(&cell.bms) {
                    return Placement::Unmapped;
                }
                rule.position(cell)
            }
            Rule::Table(order) => {
                let Some(index) = order.iter().position(|c| *c == cell) else {
                    return Placement::Unmapped;
                };
                let per_layer = self.grid.layer_rows * self.grid.layer_columns;
                let layer = index / per_layer;
                let local = index % per_layer;
                (layer < self.grid.layer_count()).then(|| {
                    self.grid.layer_cell(
                        layer,
                        local / self.grid.layer_columns,
                        local % self.grid.layer_columns,
                    )
                })
            }
        };
        match position {
            Some(position) if self.grid.contains(position) => Placement::Cell(position),
            _ => Placement::OutOfBounds,
        }
    }
    /// Grid position of a channel name, `None` if it is not a placed cell channel
    pub fn locate(&self, name: &str) -> Option<GridPosition> {
        match self.place(parse_channel_name(name)?) {
            Placement::Cell(position) => Some(position),
            _ => None,
        }
    }
    /// Maps the cell channels among `names` to the grid
    ///
    /// Names that are not cell channels are skipped, cells without a place in
    /// the layout are dropped into [Mapping::unmapped] and a cell outside of
    /// the grid or on an already taken position is a layout conflict.
    pub fn map<I, S>(&self, names: I) -> Result<Mapping>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut taken: HashMap<GridPosition, String> = HashMap::new();
        let mut channels = vec![];
        let mut unmapped = vec![];
        for name in names {
            let name = name.as_ref();
            let Some(cell) = parse_channel_name(name) else {
                continue;
            };
            match self.place(cell) {
                Placement::Unmapped => {
                    log::warn!("{} ({}) has no cell in the layout, dropped", name, cell);
                    unmapped.push(name.to_string());
                }
                Placement::OutOfBounds => {
                    return Err(LayoutError::OutOfBounds {
                        channel: name.to_string(),
                        cell,
                        rows: self.grid.rows,
                        columns: self.grid.columns,
                    })
                }
                Placement::Cell(position) => {
                    if let Some(other) = taken.get(&position) {
                        return Err(LayoutError::Duplicate {
                            channel: name.to_string(),
                            other: other.clone(),
                            position,
                        });
                    }
                    taken.insert(position, name.to_string());
                    channels.push(MappedChannel {
                        name: name.to_string(),
                        cell,
                        position,
                    });
                }
            }
        }
        channels.sort_by_key(|c| self.grid.index(c.position));
        log::info!(
            "{} cell channels mapped on the {}x{} grid, {} unmapped",
            channels.len(),
            self.grid.rows,
            self.grid.columns,
            unmapped.len()
        );
        Ok(Mapping {
            grid: self.grid,
            capacity: self.capacity(),
            channels,
            unmapped,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MappedChannel {
    pub name: String,
    pub cell: CellId,
    pub position: GridPosition,
}

/// Cell channels placed on the grid, in row-major grid order
#[derive(Debug, Clone, PartialEq)]
pub struct Mapping {
    pub grid: Grid,
    capacity: usize,
    pub channels: Vec<MappedChannel>,
    pub unmapped: Vec<String>,
}
impl Mapping {
    pub fn len(&self) -> usize {
        self.channels.len()
    }
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
    pub fn position(&self, name: &str) -> Option<GridPosition> {
        self.channels
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.position)
    }
    /// Fraction of the layout cells with a channel
    pub fn coverage(&self) -> f64 {
        if self.capacity == 0 {
            0.
        } else {
            self.len() as f64 / self.capacity as f64
        }
    }
}
