//! Mesh location types and the neighbor relations between them.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LocationType {
    Vertex,
    Edge,
    Cell,
}

impl LocationType {
    pub const ALL: [LocationType; 3] = [Self::Vertex, Self::Edge, Self::Cell];

    /// Type name used in parameter annotations: `Vertex`, `Edge`, `Cell`.
    pub fn from_type_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|loc| loc.type_name() == name)
    }

    /// Element name passed to a neighbor iteration: `vertex`, `edge`, `cell`.
    pub fn from_element_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|loc| loc.element_name() == name)
    }

    /// Neighbor iteration function: `vertices`, `edges`, `cells`.
    pub fn from_iteration_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|loc| loc.iteration_name() == name)
    }

    pub const fn type_name(self) -> &'static str {
        match self {
            Self::Vertex => "Vertex",
            Self::Edge => "Edge",
            Self::Cell => "Cell",
        }
    }

    pub const fn element_name(self) -> &'static str {
        match self {
            Self::Vertex => "vertex",
            Self::Edge => "edge",
            Self::Cell => "cell",
        }
    }

    pub const fn iteration_name(self) -> &'static str {
        match self {
            Self::Vertex => "vertices",
            Self::Edge => "edges",
            Self::Cell => "cells",
        }
    }
}

impl fmt::Display for LocationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// Valid `(target, neighbor)` pairs: iterating `neighbor` elements around a
/// `target` element. Edges are never adjacent to edges directly.
pub const NEIGHBOR_RELATIONS: &[(LocationType, LocationType)] = &[
    (LocationType::Vertex, LocationType::Vertex),
    (LocationType::Vertex, LocationType::Edge),
    (LocationType::Vertex, LocationType::Cell),
    (LocationType::Edge, LocationType::Vertex),
    (LocationType::Edge, LocationType::Cell),
    (LocationType::Cell, LocationType::Vertex),
    (LocationType::Cell, LocationType::Edge),
    (LocationType::Cell, LocationType::Cell),
];

pub fn is_valid_neighbor_relation(target: LocationType, neighbor: LocationType) -> bool {
    NEIGHBOR_RELATIONS.contains(&(target, neighbor))
}
