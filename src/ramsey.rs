//! Ramsey families `(m, n)` and the fixed set of result tables they own.
//!
//! A family counts red `K_m` cliques in a graph and blue `K_n` cliques in its
//! complement. Each family is tied to the vertex count of the graphs it is run
//! against and to exactly one table, `r{m}{n}`. The table set is closed: table
//! names coming from callers are only ever matched against [`known_pairs`],
//! never parsed or interpolated.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{PlanningError, QueryValidationError};

/// Known Ramsey bounds, `((m, n), vertex count)`.
const RAMSEY_BOUNDS: &[((u32, u32), u32)] = &[
    ((3, 3), 6),
    ((3, 4), 9),
    ((3, 5), 14),
    ((3, 6), 18),
    ((3, 7), 23),
    ((3, 8), 28),
    ((3, 9), 36),
    ((4, 4), 18),
    ((4, 5), 25),
    ((4, 6), 41),
    ((4, 7), 49),
    ((5, 5), 43),
    ((5, 6), 102),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "(u32, u32)", into = "(u32, u32)")]
pub struct ParameterPair {
    m: u32,
    n: u32,
    vertex_count: u32,
}

impl ParameterPair {
    pub fn new(m: u32, n: u32) -> Result<Self, PlanningError> {
        RAMSEY_BOUNDS
            .iter()
            .find(|&&(pair, _)| pair == (m, n))
            .map(|&(_, vertex_count)| Self { m, n, vertex_count })
            .ok_or(PlanningError::UnknownFamily { m, n })
    }

    /// Resolve a caller-supplied table name against the allow-list.
    pub fn from_table_name(name: &str) -> Result<Self, QueryValidationError> {
        known_pairs()
            .find(|pair| pair.table_name() == name)
            .ok_or_else(|| QueryValidationError::UnknownTable(name.to_string()))
    }

    /// Red clique size.
    pub fn m(&self) -> u32 {
        self.m
    }

    /// Blue clique size.
    pub fn n(&self) -> u32 {
        self.n
    }

    /// Number of vertices in the graphs this family is counted on.
    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    pub fn table_name(&self) -> String {
        format!("r{}{}", self.m, self.n)
    }
}

/// Every family with a known bound, in table order.
pub fn known_pairs() -> impl Iterator<Item = ParameterPair> {
    RAMSEY_BOUNDS
        .iter()
        .map(|&((m, n), vertex_count)| ParameterPair { m, n, vertex_count })
}

impl fmt::Display for ParameterPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.m, self.n)
    }
}

impl TryFrom<(u32, u32)> for ParameterPair {
    type Error = PlanningError;

    fn try_from((m, n): (u32, u32)) -> Result<Self, Self::Error> {
        Self::new(m, n)
    }
}

impl From<ParameterPair> for (u32, u32) {
    fn from(pair: ParameterPair) -> Self {
        (pair.m, pair.n)
    }
}
