// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Node-name parsing and rendering.
//!
//! Machine nodes are named `<prefix><XYZ>` with one base-36 digit per
//! axis; a rectangular span between two corners is written
//! `<prefix>[000x133]`.

use crate::{Coord, Error, Geometry, MachineShape, NodeMask, X, Y, Z};

/// The region a node list resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockFootprint {
    pub start: Coord,
    pub geometry: Geometry,
    pub mask: NodeMask,
}

fn coord_from(chars: &str) -> Option<Coord> {
    let mut digits = chars.chars().map(|c| c.to_digit(36).map(|d| d as u16));
    let x = digits.next()??;
    let y = digits.next()??;
    let z = digits.next()??;
    if digits.next().is_some() {
        return None;
    }
    Some([x, y, z])
}

fn coord_char(v: u16) -> char {
    char::from_digit(v as u32, 36)
        .map(|c| c.to_ascii_uppercase())
        .unwrap_or('?')
}

/// Resolve a node list such as `bgl[000x133]` or `bgl012` into its
/// footprint on the machine.
pub fn parse_node_names(
    prefix: &str,
    text: &str,
    shape: &MachineShape,
) -> Result<BlockFootprint, Error> {
    let bad = || Error::BadNodeName(text.to_owned());
    let rest = text.strip_prefix(prefix).unwrap_or(text).trim();

    let (start, end) = if let Some(span) = rest.strip_prefix('[') {
        let span = span.strip_suffix(']').ok_or_else(bad)?;
        let (a, b) = span.split_once('x').ok_or_else(bad)?;
        (
            coord_from(a).ok_or_else(bad)?,
            coord_from(b).ok_or_else(bad)?,
        )
    } else {
        let single = coord_from(rest).ok_or_else(bad)?;
        (single, single)
    };

    if (0..3).any(|d| end[d] < start[d]) {
        return Err(bad());
    }
    let geometry = Geometry([
        end[X] - start[X] + 1,
        end[Y] - start[Y] + 1,
        end[Z] - start[Z] + 1,
    ]);
    let mut mask = NodeMask::new(shape.node_count());
    mask.set_box(shape, start, &geometry)?;
    Ok(BlockFootprint {
        start,
        geometry,
        mask,
    })
}

/// Render the inverse of [`parse_node_names`].
pub fn format_block_nodes(prefix: &str, start: Coord, geometry: &Geometry) -> String {
    if geometry.size() == 1 {
        format!(
            "{}{}{}{}",
            prefix,
            coord_char(start[X]),
            coord_char(start[Y]),
            coord_char(start[Z])
        )
    } else {
        format!(
            "{}[{}{}{}x{}{}{}]",
            prefix,
            coord_char(start[X]),
            coord_char(start[Y]),
            coord_char(start[Z]),
            coord_char(start[X] + geometry.0[X] - 1),
            coord_char(start[Y] + geometry.0[Y] - 1),
            coord_char(start[Z] + geometry.0[Z] - 1),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_parses_to_box() {
        let shape = MachineShape::new([4, 4, 4]);
        let fp = parse_node_names("bgl", "bgl[000x133]", &shape).unwrap();
        assert_eq!(fp.start, [0, 0, 0]);
        assert_eq!(fp.geometry, Geometry([2, 4, 4]));
        assert_eq!(fp.mask.count(), 32);
    }

    #[test]
    fn single_node_parses() {
        let shape = MachineShape::new([4, 4, 4]);
        let fp = parse_node_names("bgl", "bgl012", &shape).unwrap();
        assert_eq!(fp.start, [0, 1, 2]);
        assert_eq!(fp.geometry.size(), 1);
        assert_eq!(fp.mask.count(), 1);
    }

    #[test]
    fn prefix_is_optional_in_input() {
        let shape = MachineShape::new([4, 4, 4]);
        let a = parse_node_names("bgl", "[000x111]", &shape).unwrap();
        let b = parse_node_names("bgl", "bgl[000x111]", &shape).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn weird_formats_are_rejected() {
        let shape = MachineShape::new([4, 4, 4]);
        for text in ["bgl[000x]", "bgl[00x111]", "bgl[111x000]", "bgl01", "rack7"] {
            assert!(
                parse_node_names("bgl", text, &shape).is_err(),
                "{text} should not parse"
            );
        }
    }

    #[test]
    fn formatting_round_trips() {
        let shape = MachineShape::new([4, 4, 4]);
        let text = format_block_nodes("bgl", [1, 0, 2], &Geometry([2, 2, 1]));
        assert_eq!(text, "bgl[102x212]");
        let fp = parse_node_names("bgl", &text, &shape).unwrap();
        assert_eq!(fp.start, [1, 0, 2]);
        assert_eq!(fp.geometry, Geometry([2, 2, 1]));
    }
}
