//! # Parameter names
//!
//! Every quantity an [`AstrometricModel`](crate::astrometric_model::AstrometricModel)
//! can fit is identified by a [`ParamName`]. The enumeration is closed: single-star
//! astrometry, the noise jitter, and the per-companion orbital parameters, the latter
//! tagged with the companion [`Label`].
//!
//! ## String forms
//!
//! | Variant | Text |
//! |---|---|
//! | `Ra`, `Dec`, `Parallax`, `MuRa`, `MuDec` | `ra`, `dec`, `parallax`, `mura`, `mudec` |
//! | `Jitter` | `jitter` |
//! | `Period(k)`, `PeriastronEpoch(k)`, `Eccentricity(k)` | `P<k>`, `T0_<k>`, `e<k>` |
//! | `ThieleInnesA(k)` … `ThieleInnesG(k)` | `A<k>`, `B<k>`, `F<k>`, `G<k>` |
//! | `SemiMajorAxis(k)`, `Inclination(k)` | `a0_<k>`, `i<k>` |
//! | `AscendingNode(k)`, `PeriastronArgument(k)` | `Omega<k>`, `omega<k>` |
//!
//! [`Display`](std::fmt::Display) and [`FromStr`] round-trip these forms.

use std::{fmt, str::FromStr};

use serde::Serialize;

use crate::{astrofit_errors::AstroFitError, constants::Label};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ParamName {
    Ra,
    Dec,
    Parallax,
    MuRa,
    MuDec,
    Jitter,
    Period(Label),
    PeriastronEpoch(Label),
    Eccentricity(Label),
    ThieleInnesA(Label),
    ThieleInnesB(Label),
    ThieleInnesF(Label),
    ThieleInnesG(Label),
    SemiMajorAxis(Label),
    Inclination(Label),
    AscendingNode(Label),
    PeriastronArgument(Label),
}

impl ParamName {
    /// The five single-star regressors, in design order.
    pub const SINGLE_STAR: [ParamName; 5] = [
        ParamName::Ra,
        ParamName::Dec,
        ParamName::Parallax,
        ParamName::MuRa,
        ParamName::MuDec,
    ];

    /// Thiele-Innes regressor names of companion `label`, in design order `A, B, F, G`.
    pub fn thiele_innes(label: Label) -> [ParamName; 4] {
        [
            ParamName::ThieleInnesA(label),
            ParamName::ThieleInnesB(label),
            ParamName::ThieleInnesF(label),
            ParamName::ThieleInnesG(label),
        ]
    }

    /// Campbell orientation names of companion `label`: `a0, i, Ω, ω`.
    pub fn campbell(label: Label) -> [ParamName; 4] {
        [
            ParamName::SemiMajorAxis(label),
            ParamName::Inclination(label),
            ParamName::AscendingNode(label),
            ParamName::PeriastronArgument(label),
        ]
    }

    /// Shape parameters `P, T0, e` of companion `label`.
    pub fn orbit_shape(label: Label) -> [ParamName; 3] {
        [
            ParamName::Period(label),
            ParamName::PeriastronEpoch(label),
            ParamName::Eccentricity(label),
        ]
    }

    /// Companion label carried by this name, if any.
    pub fn label(&self) -> Option<Label> {
        use ParamName::*;
        match *self {
            Ra | Dec | Parallax | MuRa | MuDec | Jitter => None,
            Period(k)
            | PeriastronEpoch(k)
            | Eccentricity(k)
            | ThieleInnesA(k)
            | ThieleInnesB(k)
            | ThieleInnesF(k)
            | ThieleInnesG(k)
            | SemiMajorAxis(k)
            | Inclination(k)
            | AscendingNode(k)
            | PeriastronArgument(k) => Some(k),
        }
    }
}

impl fmt::Display for ParamName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use ParamName::*;
        match self {
            Ra => write!(f, "ra"),
            Dec => write!(f, "dec"),
            Parallax => write!(f, "parallax"),
            MuRa => write!(f, "mura"),
            MuDec => write!(f, "mudec"),
            Jitter => write!(f, "jitter"),
            Period(k) => write!(f, "P{k}"),
            PeriastronEpoch(k) => write!(f, "T0_{k}"),
            Eccentricity(k) => write!(f, "e{k}"),
            ThieleInnesA(k) => write!(f, "A{k}"),
            ThieleInnesB(k) => write!(f, "B{k}"),
            ThieleInnesF(k) => write!(f, "F{k}"),
            ThieleInnesG(k) => write!(f, "G{k}"),
            SemiMajorAxis(k) => write!(f, "a0_{k}"),
            Inclination(k) => write!(f, "i{k}"),
            AscendingNode(k) => write!(f, "Omega{k}"),
            PeriastronArgument(k) => write!(f, "omega{k}"),
        }
    }
}

impl FromStr for ParamName {
    type Err = AstroFitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || AstroFitError::UnknownParameter(s.to_string());
        match s {
            "ra" => return Ok(ParamName::Ra),
            "dec" => return Ok(ParamName::Dec),
            "parallax" => return Ok(ParamName::Parallax),
            "mura" => return Ok(ParamName::MuRa),
            "mudec" => return Ok(ParamName::MuDec),
            "jitter" => return Ok(ParamName::Jitter),
            _ => {}
        }

        // Longest prefixes first: "Omega" before "omega", "a0_" and "T0_" before single letters.
        let prefixes: [(&str, fn(Label) -> ParamName); 11] = [
            ("Omega", ParamName::AscendingNode),
            ("omega", ParamName::PeriastronArgument),
            ("a0_", ParamName::SemiMajorAxis),
            ("T0_", ParamName::PeriastronEpoch),
            ("P", ParamName::Period),
            ("e", ParamName::Eccentricity),
            ("A", ParamName::ThieleInnesA),
            ("B", ParamName::ThieleInnesB),
            ("F", ParamName::ThieleInnesF),
            ("G", ParamName::ThieleInnesG),
            ("i", ParamName::Inclination),
        ];

        for (prefix, ctor) in prefixes {
            if let Some(rest) = s.strip_prefix(prefix) {
                if rest.is_empty() || !rest.bytes().all(|b| b.is_ascii_digit()) {
                    continue;
                }
                let label: Label = rest.parse().map_err(|_| unknown())?;
                return Ok(ctor(label));
            }
        }
        Err(unknown())
    }
}
