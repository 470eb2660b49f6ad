//! # Thiele-Innes constants
//!
//! The four Thiele-Innes constants `(A, B, F, G)` encode the size and the orientation
//! of an astrometric orbit as a **linear** combination of the normalized elliptical
//! rectangular coordinates `X = cos E − e`, `Y = √(1 − e²)·sin E`:
//!
//! ```text
//! Δδ  = A·X + F·Y
//! Δα* = B·X + G·Y
//! ```
//!
//! Once `(P, T0, e)` are fixed, the along-scan signal is linear in `(A, B, F, G)`, which is
//! why the fitting engine solves for them in closed form.
//!
//! Units
//! -----
//! * All four constants are in milliarcseconds (mas).
//!
//! See also
//! --------
//! * [`CampbellElements`](crate::orbit_type::campbell_element::CampbellElements) – geometric form `(a0, i, Ω, ω)`.

use std::fmt;

use serde::Serialize;

use crate::constants::Mas;

/// Thiele-Innes constants of one orbit (mas).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ThieleInnes {
    pub a: Mas,
    pub b: Mas,
    pub f: Mas,
    pub g: Mas,
}

impl ThieleInnes {
    pub fn new(a: Mas, b: Mas, f: Mas, g: Mas) -> Self {
        ThieleInnes { a, b, f, g }
    }

    /// Constants in design order `[A, B, F, G]`.
    pub fn to_array(&self) -> [f64; 4] {
        [self.a, self.b, self.f, self.g]
    }

    pub fn from_array(values: [f64; 4]) -> Self {
        let [a, b, f, g] = values;
        ThieleInnes { a, b, f, g }
    }

    /// Sky offsets `(Δα*, Δδ)` for normalized rectangular coordinates `(X, Y)`.
    pub fn sky_offsets(&self, x: f64, y: f64) -> (Mas, Mas) {
        (self.b * x + self.g * y, self.a * x + self.f * y)
    }

    /// Along-scan displacement for rectangular coordinates `(X, Y)` and scan direction `ψ`.
    pub fn along_scan(&self, x: f64, y: f64, sin_psi: f64, cos_psi: f64) -> Mas {
        let (d_ra, d_dec) = self.sky_offsets(x, y);
        d_ra * sin_psi + d_dec * cos_psi
    }
}

impl fmt::Display for ThieleInnes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ThieleInnes(A={:.6}, B={:.6}, F={:.6}, G={:.6}) mas",
            self.a, self.b, self.f, self.g
        )
    }
}
