//! Value shapes and block-scoped locals.

use std::collections::HashMap;
use std::fmt;

use crate::ir::LocationType;

/// Structural shape of a lowered value: where it lives on the mesh, and
/// whether it varies per neighbor of the enclosing reduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct Shape {
    pub location: Option<LocationType>,
    pub per_neighbor: bool,
}

impl Shape {
    pub const SCALAR: Shape = Shape {
        location: None,
        per_neighbor: false,
    };

    pub fn center(location: LocationType) -> Self {
        Self {
            location: Some(location),
            per_neighbor: false,
        }
    }

    pub fn neighbor(location: LocationType) -> Self {
        Self {
            location: Some(location),
            per_neighbor: true,
        }
    }

    /// Shape of an operation over two values. A per-neighbor value may be
    /// combined with a center value; otherwise locations must agree.
    pub fn combine(self, other: Shape) -> Option<Shape> {
        let location = if self.per_neighbor == other.per_neighbor {
            match (self.location, other.location) {
                (Some(a), Some(b)) if a != b => return None,
                (a, b) => a.or(b),
            }
        } else if self.per_neighbor {
            self.location
        } else {
            other.location
        };
        Some(Shape {
            location,
            per_neighbor: self.per_neighbor || other.per_neighbor,
        })
    }

    /// Shape of a local after assigning `other` to it.
    pub fn unify(self, other: Shape) -> Option<Shape> {
        if self.per_neighbor != other.per_neighbor {
            return None;
        }
        match (self.location, other.location) {
            (Some(a), Some(b)) if a != b => None,
            (a, b) => Some(Shape {
                location: a.or(b),
                per_neighbor: self.per_neighbor,
            }),
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.per_neighbor {
            f.write_str("per-neighbor ")?;
        }
        match self.location {
            Some(location) => write!(f, "{location} value"),
            None => f.write_str("scalar value"),
        }
    }
}

/// Lexical frames of local variables. Frame 0 is the stencil body.
pub(super) struct Scopes {
    frames: Vec<HashMap<String, Shape>>,
}

impl Scopes {
    pub fn new() -> Self {
        Self {
            frames: vec![HashMap::new()],
        }
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn push(&mut self) {
        self.frames.push(HashMap::new());
    }

    pub fn pop(&mut self) {
        if self.frames.len() > 1 {
            self.frames.pop();
        }
    }

    /// Innermost binding of `name`, with the index of its frame.
    pub fn lookup(&self, name: &str) -> Option<(usize, Shape)> {
        self.frames
            .iter()
            .enumerate()
            .rev()
            .find_map(|(index, frame)| frame.get(name).map(|shape| (index, *shape)))
    }

    pub fn bind(&mut self, name: &str, shape: Shape) {
        if let Some(frame) = self.frames.last_mut() {
            frame.insert(name.to_string(), shape);
        }
    }

    /// Replace the shape of an existing binding in the frame that owns it.
    pub fn update(&mut self, frame: usize, name: &str, shape: Shape) {
        if let Some(slot) = self.frames.get_mut(frame).and_then(|f| f.get_mut(name)) {
            *slot = shape;
        }
    }
}
