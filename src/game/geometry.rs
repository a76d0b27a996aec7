//! Grid geometry and membership tests

use rand::Rng;

use super::model::{Coordinate, Positioned};

/// Pure coordinate helpers for the cubic grid
pub struct Grid;

impl Grid {
    /// Check if two entities share a cell
    pub fn is_same_coordinate(a: &impl Positioned, b: &impl Positioned) -> bool {
        a.coordinate() == b.coordinate()
    }

    /// Check if any of `entities` sits on the cell of `target`
    pub fn coordinate_is_in_use<T: Positioned>(target: &impl Positioned, entities: &[T]) -> bool {
        entities
            .iter()
            .any(|entity| Self::is_same_coordinate(target, entity))
    }

    /// Check if a cell lies outside a grid of the given edge length
    pub fn is_out_of_bounds(target: &impl Positioned, edge_length: u32) -> bool {
        let c = target.coordinate();
        let edge = i64::from(edge_length);
        [c.x, c.y, c.z]
            .into_iter()
            .any(|v| v < 0 || i64::from(v) >= edge)
    }

    /// Uniform random cell with every axis in `0..=max`
    pub fn random_coordinate(rng: &mut impl Rng, max: i32) -> Coordinate {
        let max = max.max(0);
        Coordinate::new(
            rng.gen_range(0..=max),
            rng.gen_range(0..=max),
            rng.gen_range(0..=max),
        )
    }

    /// Random cell not occupied by any of `occupied`.
    /// The caller guarantees the grid has a free cell left.
    pub fn random_free_coordinate<T: Positioned>(
        rng: &mut impl Rng,
        max: i32,
        occupied: &[T],
    ) -> Coordinate {
        loop {
            let coordinate = Self::random_coordinate(rng, max);
            if !Self::coordinate_is_in_use(&coordinate, occupied) {
                return coordinate;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::model::{GameItem, PlayerPosition};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_out_of_bounds() {
        assert!(!Grid::is_out_of_bounds(&Coordinate::new(0, 0, 0), 3));
        assert!(!Grid::is_out_of_bounds(&Coordinate::new(2, 2, 2), 3));
        assert!(Grid::is_out_of_bounds(&Coordinate::new(3, 0, 0), 3));
        assert!(Grid::is_out_of_bounds(&Coordinate::new(0, -1, 0), 3));
        assert!(Grid::is_out_of_bounds(&Coordinate::new(0, 0, 7), 3));
    }

    #[test]
    fn test_coordinate_in_use() {
        let players = vec![
            PlayerPosition::new("alpha", Coordinate::new(1, 0, 0)),
            PlayerPosition::new("beta", Coordinate::new(2, 2, 2)),
        ];
        assert!(Grid::coordinate_is_in_use(&Coordinate::new(2, 2, 2), &players));
        assert!(!Grid::coordinate_is_in_use(&Coordinate::new(0, 0, 0), &players));

        let items = vec![GameItem::bomb(Coordinate::new(0, 0, 0))];
        assert!(Grid::coordinate_is_in_use(&Coordinate::new(0, 0, 0), &items));
        assert!(Grid::is_same_coordinate(&items[0], &Coordinate::new(0, 0, 0)));
    }

    #[test]
    fn test_random_coordinate_stays_in_range() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        for _ in 0..200 {
            let c = Grid::random_coordinate(&mut rng, 3);
            assert!(!Grid::is_out_of_bounds(&c, 4));
        }
    }

    #[test]
    fn test_random_free_coordinate_fills_grid() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let mut taken: Vec<Coordinate> = Vec::new();

        // Edge 2 has exactly 8 cells
        for _ in 0..8 {
            let c = Grid::random_free_coordinate(&mut rng, 1, &taken);
            assert!(!Grid::coordinate_is_in_use(&c, &taken));
            taken.push(c);
        }
        assert_eq!(taken.len(), 8);
    }
}
