//! Accelerator component kinds, their parameter schemas and typed
//! per-component configuration records.
//!
//! Each [`ComponentKind`] declares an ordered schema of [`Param`]s. A
//! [`ComponentSpec`] is one concrete assignment of values to (a subset of)
//! that schema, built through [`ComponentSpecBuilder`] so invalid parameter
//! names or value shapes are rejected before any file is written.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use bdsim_regress_error::{RegressError, Result};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Component kinds
// ---------------------------------------------------------------------------

/// Category of accelerator element exercised by the suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    Drift,
    Rbend,
    Sbend,
    Quadrupole,
    Sextupole,
    Octupole,
    Decapole,
    Multipole,
    ThinMultipole,
    Vkicker,
    Hkicker,
    Kicker,
    Tkicker,
    Solenoid,
    Rfcavity,
    Ecol,
    Rcol,
    Degrader,
    Muspoiler,
}

impl ComponentKind {
    /// All component kinds in canonical report order.
    pub const ALL: &[Self] = &[
        Self::Drift,
        Self::Rbend,
        Self::Sbend,
        Self::Quadrupole,
        Self::Sextupole,
        Self::Octupole,
        Self::Decapole,
        Self::Multipole,
        Self::ThinMultipole,
        Self::Vkicker,
        Self::Hkicker,
        Self::Kicker,
        Self::Tkicker,
        Self::Solenoid,
        Self::Rfcavity,
        Self::Ecol,
        Self::Rcol,
        Self::Degrader,
        Self::Muspoiler,
    ];

    /// Name used in gmad files, directory names and test file names.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Drift => "drift",
            Self::Rbend => "rbend",
            Self::Sbend => "sbend",
            Self::Quadrupole => "quadrupole",
            Self::Sextupole => "sextupole",
            Self::Octupole => "octupole",
            Self::Decapole => "decapole",
            Self::Multipole => "multipole",
            Self::ThinMultipole => "thinmultipole",
            Self::Vkicker => "vkicker",
            Self::Hkicker => "hkicker",
            Self::Kicker => "kicker",
            Self::Tkicker => "tkicker",
            Self::Solenoid => "solenoid",
            Self::Rfcavity => "rfcavity",
            Self::Ecol => "ecol",
            Self::Rcol => "rcol",
            Self::Degrader => "degrader",
            Self::Muspoiler => "muspoiler",
        }
    }

    /// Ordered parameter schema for this kind.
    #[must_use]
    pub const fn schema(self) -> &'static [Param] {
        match self {
            Self::Drift => &[Param::Length],
            Self::Rbend | Self::Sbend => &[
                Param::Length,
                Param::Angle,
                Param::Field,
                Param::E1,
                Param::E2,
                Param::Fint,
                Param::Fintx,
                Param::Hgap,
            ],
            Self::Quadrupole => &[Param::Length, Param::K1],
            Self::Sextupole => &[Param::Length, Param::K2],
            Self::Octupole => &[Param::Length, Param::K3],
            Self::Decapole => &[Param::Length, Param::K4],
            Self::Multipole => &[Param::Length, Param::Knl, Param::Ksl],
            Self::ThinMultipole => &[Param::Knl, Param::Ksl],
            Self::Vkicker | Self::Hkicker => &[Param::Length, Param::Angle, Param::Field],
            Self::Kicker | Self::Tkicker => &[Param::Length, Param::Hkick, Param::Vkick],
            Self::Solenoid => &[Param::Length, Param::Ks],
            Self::Rfcavity => &[Param::Length, Param::Gradient],
            Self::Ecol | Self::Rcol => &[Param::Length, Param::Xsize, Param::Ysize],
            Self::Degrader => &[Param::Length, Param::NumberWedges, Param::MaterialThickness],
            Self::Muspoiler => &[Param::Length, Param::Bfield],
        }
    }

    /// Whether `param` belongs to this kind's schema.
    #[must_use]
    pub fn accepts(self, param: Param) -> bool {
        self.schema().contains(&param)
    }

    #[must_use]
    pub const fn is_dipole(self) -> bool {
        matches!(self, Self::Rbend | Self::Sbend)
    }

    #[must_use]
    pub const fn is_kicker(self) -> bool {
        matches!(
            self,
            Self::Vkicker | Self::Hkicker | Self::Kicker | Self::Tkicker
        )
    }

    /// The pair of parameters of which at most one may be set.
    ///
    /// Dipoles and single-plane kickers are specified by angle or by field,
    /// never both.
    #[must_use]
    pub const fn exclusive_pair(self) -> Option<(Param, Param)> {
        match self {
            Self::Rbend | Self::Sbend | Self::Vkicker | Self::Hkicker => {
                Some((Param::Angle, Param::Field))
            }
            _ => None,
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ComponentKind {
    type Err = RegressError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| RegressError::UnknownComponent { name: s.to_owned() })
    }
}

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// Parameter name understood by at least one component kind.
///
/// Names never contain `_` so they can be split back out of file names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Param {
    Length,
    Angle,
    Field,
    E1,
    E2,
    Fint,
    Fintx,
    Hgap,
    K1,
    K2,
    K3,
    K4,
    Knl,
    Ksl,
    Hkick,
    Vkick,
    Ks,
    Gradient,
    Xsize,
    Ysize,
    NumberWedges,
    MaterialThickness,
    Bfield,
}

impl Param {
    pub const ALL: &[Self] = &[
        Self::Length,
        Self::Angle,
        Self::Field,
        Self::E1,
        Self::E2,
        Self::Fint,
        Self::Fintx,
        Self::Hgap,
        Self::K1,
        Self::K2,
        Self::K3,
        Self::K4,
        Self::Knl,
        Self::Ksl,
        Self::Hkick,
        Self::Vkick,
        Self::Ks,
        Self::Gradient,
        Self::Xsize,
        Self::Ysize,
        Self::NumberWedges,
        Self::MaterialThickness,
        Self::Bfield,
    ];

    /// Name used in file names and parameter-set JSON.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Length => "length",
            Self::Angle => "angle",
            Self::Field => "field",
            Self::E1 => "e1",
            Self::E2 => "e2",
            Self::Fint => "fint",
            Self::Fintx => "fintx",
            Self::Hgap => "hgap",
            Self::K1 => "k1",
            Self::K2 => "k2",
            Self::K3 => "k3",
            Self::K4 => "k4",
            Self::Knl => "knl",
            Self::Ksl => "ksl",
            Self::Hkick => "hkick",
            Self::Vkick => "vkick",
            Self::Ks => "ks",
            Self::Gradient => "gradient",
            Self::Xsize => "xsize",
            Self::Ysize => "ysize",
            Self::NumberWedges => "numberwedges",
            Self::MaterialThickness => "materialthickness",
            Self::Bfield => "bfield",
        }
    }

    /// Keyword and unit suffix used when writing the parameter to gmad.
    #[must_use]
    pub const fn gmad_keyword(self) -> (&'static str, &'static str) {
        match self {
            Self::Length => ("l", "*m"),
            Self::Angle => ("angle", ""),
            Self::Field | Self::Bfield => ("B", "*T"),
            Self::E1 => ("e1", ""),
            Self::E2 => ("e2", ""),
            Self::Fint => ("fint", ""),
            Self::Fintx => ("fintx", ""),
            Self::Hgap => ("hgap", "*m"),
            Self::K1 => ("k1", ""),
            Self::K2 => ("k2", ""),
            Self::K3 => ("k3", ""),
            Self::K4 => ("k4", ""),
            Self::Knl => ("knl", ""),
            Self::Ksl => ("ksl", ""),
            Self::Hkick => ("hkick", ""),
            Self::Vkick => ("vkick", ""),
            Self::Ks => ("ks", ""),
            Self::Gradient => ("gradient", "*MV/m"),
            Self::Xsize => ("xsize", "*m"),
            Self::Ysize => ("ysize", "*m"),
            Self::NumberWedges => ("numberWedges", ""),
            Self::MaterialThickness => ("materialThickness", "*m"),
        }
    }

    /// Whether values of this parameter are per-order strength tuples.
    #[must_use]
    pub const fn takes_orders(self) -> bool {
        matches!(self, Self::Knl | Self::Ksl)
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Param {
    type Err = RegressError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|param| param.name() == s)
            .ok_or_else(|| RegressError::UnknownParameter {
                component: "*".to_owned(),
                param: s.to_owned(),
            })
    }
}

// ---------------------------------------------------------------------------
// Values
// ---------------------------------------------------------------------------

/// A single test value: a scalar or a tuple of per-order multipole strengths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Scalar(f64),
    Orders(Vec<f64>),
}

impl ParamValue {
    #[must_use]
    pub const fn is_orders(&self) -> bool {
        matches!(self, Self::Orders(_))
    }

    #[must_use]
    pub const fn as_scalar(&self) -> Option<f64> {
        match self {
            Self::Scalar(value) => Some(*value),
            Self::Orders(_) => None,
        }
    }

    /// Text form used inside file names: `0.1`, `2.0`, `0.0_0.1_-0.1`.
    #[must_use]
    pub fn to_name_fragment(&self) -> String {
        match self {
            Self::Scalar(value) => format_scalar(*value),
            Self::Orders(orders) => orders
                .iter()
                .map(|value| format_scalar(*value))
                .collect::<Vec<_>>()
                .join("_"),
        }
    }

    /// Inverse of [`Self::to_name_fragment`].
    pub fn parse_fragment(param: Param, text: &str) -> Option<Self> {
        if param.takes_orders() {
            let orders = text
                .split('_')
                .map(str::parse::<f64>)
                .collect::<std::result::Result<Vec<_>, _>>()
                .ok()?;
            return Some(Self::Orders(orders));
        }
        text.parse::<f64>().ok().map(Self::Scalar)
    }

    /// Text form used inside gmad files: `0.1` or `{0.0,0.1,-0.1}`.
    #[must_use]
    pub fn to_gmad(&self) -> String {
        match self {
            Self::Scalar(value) => format_scalar(*value),
            Self::Orders(orders) => {
                let joined = orders
                    .iter()
                    .map(|value| format_scalar(*value))
                    .collect::<Vec<_>>()
                    .join(",");
                format!("{{{joined}}}")
            }
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_name_fragment())
    }
}

/// Deterministic scalar formatting: integral values keep a `.0` suffix.
#[must_use]
pub fn format_scalar(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{value:.1}")
    } else {
        format!("{value}")
    }
}

// ---------------------------------------------------------------------------
// Typed per-component configuration record
// ---------------------------------------------------------------------------

/// One concrete parameter assignment for a component kind.
///
/// Values are stored in schema order; parameters left unset are absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentSpec {
    kind: ComponentKind,
    values: Vec<(Param, ParamValue)>,
}

impl ComponentSpec {
    #[must_use]
    pub fn builder(kind: ComponentKind) -> ComponentSpecBuilder {
        ComponentSpecBuilder {
            kind,
            values: BTreeMap::new(),
            error: None,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> ComponentKind {
        self.kind
    }

    /// Set parameters in schema order.
    #[must_use]
    pub fn values(&self) -> &[(Param, ParamValue)] {
        &self.values
    }

    #[must_use]
    pub fn get(&self, param: Param) -> Option<&ParamValue> {
        self.values
            .iter()
            .find(|(candidate, _)| *candidate == param)
            .map(|(_, value)| value)
    }
}

/// Fluent builder for [`ComponentSpec`]; validation is deferred to `build`.
#[derive(Debug)]
pub struct ComponentSpecBuilder {
    kind: ComponentKind,
    values: BTreeMap<Param, ParamValue>,
    error: Option<RegressError>,
}

impl ComponentSpecBuilder {
    /// Set a parameter value (fluent builder).
    #[must_use]
    pub fn set(mut self, param: Param, value: ParamValue) -> Self {
        if self.error.is_some() {
            return self;
        }
        if !self.kind.accepts(param) {
            self.error = Some(RegressError::UnknownParameter {
                component: self.kind.name().to_owned(),
                param: param.name().to_owned(),
            });
            return self;
        }
        if param.takes_orders() != value.is_orders() {
            self.error = Some(RegressError::parameter_set(format!(
                "value shape mismatch component={} param={param} value={value}",
                self.kind
            )));
            return self;
        }
        self.values.insert(param, value);
        self
    }

    /// Set a scalar parameter (fluent builder).
    #[must_use]
    pub fn scalar(self, param: Param, value: f64) -> Self {
        self.set(param, ParamValue::Scalar(value))
    }

    pub fn build(self) -> Result<ComponentSpec> {
        if let Some(err) = self.error {
            return Err(err);
        }
        if let Some((first, second)) = self.kind.exclusive_pair() {
            if self.values.contains_key(&first) && self.values.contains_key(&second) {
                return Err(RegressError::ExclusiveParameters {
                    component: self.kind.name().to_owned(),
                    first: first.name().to_owned(),
                    second: second.name().to_owned(),
                });
            }
        }
        let mut values = self.values;
        let ordered = self
            .kind
            .schema()
            .iter()
            .filter_map(|param| values.remove(param).map(|value| (*param, value)))
            .collect();
        Ok(ComponentSpec {
            kind: self.kind,
            values: ordered,
        })
    }
}
