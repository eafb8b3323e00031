use std::ops::Range;

use crate::dae::DaeLayout;

/// Offsets of the integration state buffer shared with the compiled integrator.
///
/// The buffer holds, in order: states, algebraic variables, forward sensitivities
/// (`(nx+nz)*nx` with respect to the initial state followed by `(nu+np)*nx` with respect to
/// controls and parameters), controls and parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateLayout {
    pub nx: usize,
    pub nz: usize,
    pub nu: usize,
    pub np: usize,
}

impl StateLayout {
    pub fn new(nx: usize, nz: usize, nu: usize, np: usize) -> Self {
        Self { nx, nz, nu, np }
    }

    /// Total buffer length
    pub fn len(&self) -> usize {
        self.nx + self.nz + self.nu + self.np + self.sensitivities_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn sensitivities_len(&self) -> usize {
        (self.nx + self.nz) * self.nx + (self.nu + self.np) * self.nx
    }

    pub fn state(&self) -> Range<usize> {
        0..self.nx
    }

    pub fn algebraic(&self) -> Range<usize> {
        self.nx..self.nx + self.nz
    }

    /// Written by the integrator only
    pub fn sensitivities(&self) -> Range<usize> {
        let start = self.nx + self.nz;
        start..start + self.sensitivities_len()
    }

    pub fn control(&self) -> Range<usize> {
        let n = self.len();
        n - self.np - self.nu..n - self.np
    }

    pub fn parameters(&self) -> Range<usize> {
        let n = self.len();
        n - self.np..n
    }

    /// Length of the packed `[x|z|u|p|xdot]` input of `rhs` and `rhs_jac`
    pub fn rhs_input_len(&self) -> usize {
        2 * self.nx + self.nz + self.nu + self.np
    }

    pub fn rhs_output_len(&self) -> usize {
        self.nx + self.nz
    }

    pub fn jacobian_len(&self) -> usize {
        self.rhs_output_len() * self.rhs_input_len()
    }
}

impl From<&DaeLayout> for StateLayout {
    fn from(layout: &DaeLayout) -> Self {
        Self::new(layout.nx(), layout.nz(), layout.nu(), layout.np())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_example() {
        let layout = StateLayout::new(2, 0, 1, 0);
        assert_eq!(layout.len(), 9);
        assert_eq!(layout.state(), 0..2);
        assert_eq!(layout.algebraic(), 2..2);
        assert_eq!(layout.sensitivities(), 2..8);
        assert_eq!(layout.control(), 8..9);
        assert_eq!(layout.parameters(), 9..9);
    }

    #[test]
    fn test_regions_tile_the_buffer() {
        for nx in 0..4 {
            for nz in 0..3 {
                for nu in 0..3 {
                    for np in 0..3 {
                        let l = StateLayout::new(nx, nz, nu, np);
                        let n = nx + nz + nu + np + (nx + nz) * nx + (nu + np) * nx;
                        assert_eq!(l.len(), n);
                        assert_eq!(l.state().end, l.algebraic().start);
                        assert_eq!(l.algebraic().end, l.sensitivities().start);
                        assert_eq!(l.sensitivities().end, l.control().start);
                        assert_eq!(l.control().end, l.parameters().start);
                        assert_eq!(l.parameters().end, n);
                        assert_eq!(l.control().len(), nu);
                        assert_eq!(l.parameters().len(), np);
                    }
                }
            }
        }
    }

    #[test]
    fn test_rhs_sizes() {
        let l = StateLayout::new(3, 2, 1, 4);
        assert_eq!(l.rhs_input_len(), 13);
        assert_eq!(l.rhs_output_len(), 5);
        assert_eq!(l.jacobian_len(), 65);
    }
}
