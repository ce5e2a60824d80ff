//! Parameter space model: per-component test-value tables and the
//! combination arithmetic the writer must agree with.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use bdsim_regress_error::{RegressError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::component::{ComponentKind, Param, ParamValue};

/// One parameter and the discrete values it is swept over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamAxis {
    pub param: Param,
    pub values: Vec<ParamValue>,
}

impl ParamAxis {
    #[must_use]
    pub fn scalars(param: Param, values: &[f64]) -> Self {
        Self {
            param,
            values: values.iter().copied().map(ParamValue::Scalar).collect(),
        }
    }

    #[must_use]
    pub fn orders(param: Param, values: &[&[f64]]) -> Self {
        Self {
            param,
            values: values
                .iter()
                .map(|orders| ParamValue::Orders(orders.to_vec()))
                .collect(),
        }
    }
}

/// One level of the nested enumeration: the choices a test may take there.
///
/// An ordinary axis yields one choice per value. The exclusive angle/field
/// pair collapses into a single level whose choices are every angle value
/// followed by every field value.
#[derive(Debug, Clone, PartialEq)]
pub struct VariationAxis {
    pub choices: Vec<(Param, ParamValue)>,
}

impl VariationAxis {
    /// Position of the choice a test took at this level, if any.
    #[must_use]
    pub fn position(&self, values: &[(Param, ParamValue)]) -> Option<usize> {
        self.choices
            .iter()
            .position(|choice| values.iter().any(|value| value == choice))
    }
}

/// Ordered mapping from component kind to its swept parameter axes.
///
/// Axis order is significant: it fixes both the nesting order of the
/// Cartesian product and the order of `__<param>_<value>` segments in file
/// names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterSet {
    components: BTreeMap<ComponentKind, Vec<ParamAxis>>,
}

impl ParameterSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert (or replace) the axes for one component kind.
    pub fn insert(&mut self, kind: ComponentKind, axes: Vec<ParamAxis>) {
        self.components.insert(kind, axes);
    }

    #[must_use]
    pub fn axes(&self, kind: ComponentKind) -> Option<&[ParamAxis]> {
        self.components.get(&kind).map(Vec::as_slice)
    }

    /// Component kinds present in the set, in canonical order.
    pub fn kinds(&self) -> impl Iterator<Item = ComponentKind> + '_ {
        self.components.keys().copied()
    }

    /// Keep only the listed kinds.
    #[must_use]
    pub fn restricted_to(&self, kinds: &[ComponentKind]) -> Self {
        let components = self
            .components
            .iter()
            .filter(|(kind, _)| kinds.contains(kind))
            .map(|(kind, axes)| (*kind, axes.clone()))
            .collect();
        Self { components }
    }

    /// Number of distinct parameter combinations for `kind` (0 if absent).
    ///
    /// Axes multiply, except the exclusive angle/field pair of dipoles and
    /// single-plane kickers: a test sets one or the other, so the pair
    /// contributes the sum of its cardinalities.
    #[must_use]
    pub fn combination_count(&self, kind: ComponentKind) -> u64 {
        let Some(axes) = self.axes(kind) else {
            return 0;
        };
        let exclusive = kind.exclusive_pair();
        let mut product = 1_u64;
        let mut exclusive_sum = 0_u64;
        let mut has_exclusive = false;
        for axis in axes {
            let cardinality = axis.values.len() as u64;
            let in_pair =
                exclusive.is_some_and(|(first, second)| axis.param == first || axis.param == second);
            if in_pair {
                exclusive_sum = exclusive_sum.saturating_add(cardinality);
                has_exclusive = true;
            } else {
                product = product.saturating_mul(cardinality);
            }
        }
        if has_exclusive {
            product.saturating_mul(exclusive_sum)
        } else {
            product
        }
    }

    /// Enumeration levels for `kind` in declared order.
    #[must_use]
    pub fn variation_axes(&self, kind: ComponentKind) -> Vec<VariationAxis> {
        let Some(axes) = self.axes(kind) else {
            return Vec::new();
        };
        let exclusive = kind.exclusive_pair();
        let mut levels: Vec<VariationAxis> = Vec::with_capacity(axes.len());
        let mut pair_level: Option<usize> = None;
        for axis in axes {
            let choices = axis
                .values
                .iter()
                .map(|value| (axis.param, value.clone()))
                .collect::<Vec<_>>();
            let in_pair =
                exclusive.is_some_and(|(first, second)| axis.param == first || axis.param == second);
            match (in_pair, pair_level) {
                (true, Some(index)) => levels[index].choices.extend(choices),
                (true, None) => {
                    pair_level = Some(levels.len());
                    levels.push(VariationAxis { choices });
                }
                (false, _) => levels.push(VariationAxis { choices }),
            }
        }
        levels
    }

    /// Files the writer will produce across every kind, particle and energy.
    #[must_use]
    pub fn total_file_count(&self, particles: usize, energies: usize) -> u64 {
        let per_beam = (particles as u64).saturating_mul(energies as u64);
        self.kinds()
            .map(|kind| self.combination_count(kind).saturating_mul(per_beam))
            .sum()
    }

    /// Check structural invariants; returns every violation found.
    #[must_use]
    pub fn diagnostics(&self) -> Vec<String> {
        let mut diagnostics = Vec::new();
        if self.components.is_empty() {
            diagnostics.push("component_set_empty".to_owned());
        }
        for (kind, axes) in &self.components {
            if axes.is_empty() {
                diagnostics.push(format!("parameter_list_empty component={kind}"));
            }
            let mut seen = BTreeSet::new();
            for axis in axes {
                if !kind.accepts(axis.param) {
                    diagnostics.push(format!(
                        "parameter_not_in_schema component={kind} param={}",
                        axis.param
                    ));
                }
                if !seen.insert(axis.param) {
                    diagnostics.push(format!(
                        "parameter_duplicate component={kind} param={}",
                        axis.param
                    ));
                }
                if axis.values.is_empty() {
                    diagnostics.push(format!(
                        "value_list_empty component={kind} param={}",
                        axis.param
                    ));
                }
                let mut fragments = BTreeSet::new();
                if !axis
                    .values
                    .iter()
                    .all(|value| fragments.insert(value.to_name_fragment()))
                {
                    diagnostics.push(format!(
                        "value_duplicate component={kind} param={}",
                        axis.param
                    ));
                }
                if axis
                    .values
                    .iter()
                    .any(|value| value.is_orders() != axis.param.takes_orders())
                {
                    diagnostics.push(format!(
                        "value_shape_mismatch component={kind} param={}",
                        axis.param
                    ));
                }
            }
        }
        diagnostics
    }

    pub fn validate(&self) -> Result<()> {
        let diagnostics = self.diagnostics();
        if diagnostics.is_empty() {
            return Ok(());
        }
        Err(RegressError::parameter_set(diagnostics.join("; ")))
    }

    /// Parse and validate a parameter set from JSON text.
    pub fn from_json(text: &str) -> Result<Self> {
        let set: Self = serde_json::from_str(text)?;
        set.validate()?;
        Ok(set)
    }

    /// Load and validate a parameter set from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(RegressError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let text = fs::read_to_string(path)?;
        let set = Self::from_json(&text)?;
        debug!(
            path = %path.display(),
            components = set.components.len(),
            "parameter set loaded"
        );
        Ok(set)
    }

    /// SHA-256 over the canonical JSON encoding of the tables.
    pub fn fingerprint(&self) -> Result<String> {
        let bytes = serde_json::to_vec(self)?;
        Ok(sha256_hex(&bytes))
    }

    /// The built-in sweep used when no parameter file is supplied.
    #[must_use]
    pub fn default_tables() -> Self {
        let mut set = Self::new();
        set.insert(
            ComponentKind::Drift,
            vec![ParamAxis::scalars(Param::Length, &[0.1, 1.0, 5.0])],
        );
        for dipole in [ComponentKind::Rbend, ComponentKind::Sbend] {
            set.insert(
                dipole,
                vec![
                    ParamAxis::scalars(Param::Length, &[0.5, 2.0]),
                    ParamAxis::scalars(Param::Angle, &[-0.1, -0.01, 0.001, 0.01, 0.1]),
                    ParamAxis::scalars(Param::Field, &[-2.0, -0.5, 0.1, 0.5, 2.0]),
                    ParamAxis::scalars(Param::E1, &[-0.1, 0.0, 0.1]),
                    ParamAxis::scalars(Param::E2, &[-0.1, 0.0, 0.1]),
                    ParamAxis::scalars(Param::Fint, &[0.0, 0.5]),
                    ParamAxis::scalars(Param::Fintx, &[0.0]),
                    ParamAxis::scalars(Param::Hgap, &[0.05]),
                ],
            );
        }
        set.insert(
            ComponentKind::Quadrupole,
            vec![
                ParamAxis::scalars(Param::Length, &[0.2, 1.0]),
                ParamAxis::scalars(Param::K1, &[-0.5, -0.05, 0.0, 0.05, 0.5]),
            ],
        );
        set.insert(
            ComponentKind::Sextupole,
            vec![
                ParamAxis::scalars(Param::Length, &[0.2, 1.0]),
                ParamAxis::scalars(Param::K2, &[-5.0, -0.5, 0.5, 5.0]),
            ],
        );
        set.insert(
            ComponentKind::Octupole,
            vec![
                ParamAxis::scalars(Param::Length, &[0.2, 1.0]),
                ParamAxis::scalars(Param::K3, &[-50.0, -5.0, 5.0, 50.0]),
            ],
        );
        set.insert(
            ComponentKind::Decapole,
            vec![
                ParamAxis::scalars(Param::Length, &[0.2, 1.0]),
                ParamAxis::scalars(Param::K4, &[-500.0, -50.0, 50.0, 500.0]),
            ],
        );
        let knl: &[&[f64]] = &[&[0.0, 0.1], &[0.0, -0.1], &[0.0, 0.0, 0.5], &[0.0, 0.0, -0.5]];
        let ksl: &[&[f64]] = &[&[0.0], &[0.0, 0.1], &[0.0, -0.1]];
        set.insert(
            ComponentKind::Multipole,
            vec![
                ParamAxis::scalars(Param::Length, &[0.5]),
                ParamAxis::orders(Param::Knl, knl),
                ParamAxis::orders(Param::Ksl, ksl),
            ],
        );
        set.insert(
            ComponentKind::ThinMultipole,
            vec![
                ParamAxis::orders(Param::Knl, knl),
                ParamAxis::orders(Param::Ksl, ksl),
            ],
        );
        for kicker in [ComponentKind::Vkicker, ComponentKind::Hkicker] {
            set.insert(
                kicker,
                vec![
                    ParamAxis::scalars(Param::Length, &[0.1, 1.0]),
                    ParamAxis::scalars(Param::Angle, &[-0.01, 0.001, 0.01]),
                    ParamAxis::scalars(Param::Field, &[-0.1, 0.1]),
                ],
            );
        }
        for kicker in [ComponentKind::Kicker, ComponentKind::Tkicker] {
            set.insert(
                kicker,
                vec![
                    ParamAxis::scalars(Param::Length, &[0.1, 1.0]),
                    ParamAxis::scalars(Param::Hkick, &[-0.01, 0.0, 0.01]),
                    ParamAxis::scalars(Param::Vkick, &[-0.01, 0.0, 0.01]),
                ],
            );
        }
        set.insert(
            ComponentKind::Solenoid,
            vec![
                ParamAxis::scalars(Param::Length, &[0.5, 2.0]),
                ParamAxis::scalars(Param::Ks, &[-0.5, 0.0, 0.5]),
            ],
        );
        set.insert(
            ComponentKind::Rfcavity,
            vec![
                ParamAxis::scalars(Param::Length, &[0.5]),
                ParamAxis::scalars(Param::Gradient, &[-10.0, 10.0]),
            ],
        );
        for collimator in [ComponentKind::Ecol, ComponentKind::Rcol] {
            set.insert(
                collimator,
                vec![
                    ParamAxis::scalars(Param::Length, &[0.5]),
                    ParamAxis::scalars(Param::Xsize, &[0.01, 0.05]),
                    ParamAxis::scalars(Param::Ysize, &[0.01, 0.05]),
                ],
            );
        }
        set.insert(
            ComponentKind::Degrader,
            vec![
                ParamAxis::scalars(Param::Length, &[0.5]),
                ParamAxis::scalars(Param::NumberWedges, &[1.0, 5.0]),
                ParamAxis::scalars(Param::MaterialThickness, &[0.01, 0.1]),
            ],
        );
        set.insert(
            ComponentKind::Muspoiler,
            vec![
                ParamAxis::scalars(Param::Length, &[1.0]),
                ParamAxis::scalars(Param::Bfield, &[0.5, 2.0]),
            ],
        );
        set
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    format!("{digest:x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_tables_are_valid() {
        let set = ParameterSet::default_tables();
        let diagnostics = set.diagnostics();
        assert!(diagnostics.is_empty(), "diagnostics={diagnostics:?}");
        for kind in ComponentKind::ALL {
            assert!(set.axes(*kind).is_some(), "case=default_coverage kind={kind}");
        }
    }

    #[test]
    fn drift_count_is_plain_product() {
        let set = ParameterSet::default_tables();
        assert_eq!(set.combination_count(ComponentKind::Drift), 3);
        assert_eq!(set.combination_count(ComponentKind::Quadrupole), 10);
    }

    #[test]
    fn dipole_angle_or_field_halves_then_doubles() {
        let set = ParameterSet::default_tables();
        // length(2) * e1(3) * e2(3) * fint(2) * fintx(1) * hgap(1) = 36 without the pair;
        // the full product would carry angle(5) * field(5), the rule gives 5 + 5.
        let without_pair = 36_u64;
        let full_product = without_pair * 5 * 5;
        assert_eq!(
            set.combination_count(ComponentKind::Sbend),
            full_product / 5 * 2
        );
        assert_eq!(set.combination_count(ComponentKind::Rbend), without_pair * 10);
    }

    #[test]
    fn kicker_angle_xor_field() {
        let set = ParameterSet::default_tables();
        assert_eq!(set.combination_count(ComponentKind::Hkicker), 2 * (3 + 2));
        assert_eq!(set.combination_count(ComponentKind::Kicker), 2 * 3 * 3);
    }

    #[test]
    fn multipole_counts_order_tuples() {
        let set = ParameterSet::default_tables();
        assert_eq!(set.combination_count(ComponentKind::ThinMultipole), 4 * 3);
        assert_eq!(set.combination_count(ComponentKind::Multipole), 4 * 3);
    }

    #[test]
    fn absent_kind_counts_zero() {
        let set = ParameterSet::new();
        assert_eq!(set.combination_count(ComponentKind::Drift), 0);
    }

    #[test]
    fn total_file_count_scales_with_beams() {
        let mut set = ParameterSet::new();
        set.insert(
            ComponentKind::Drift,
            vec![ParamAxis::scalars(Param::Length, &[0.1, 0.2, 0.3])],
        );
        assert_eq!(set.total_file_count(2, 2), 12);
    }

    #[test]
    fn diagnostics_report_every_violation() {
        let mut set = ParameterSet::new();
        set.insert(ComponentKind::Drift, Vec::new());
        set.insert(
            ComponentKind::Quadrupole,
            vec![
                ParamAxis::scalars(Param::K1, &[]),
                ParamAxis::scalars(Param::K2, &[1.0]),
                ParamAxis::scalars(Param::K1, &[1.0]),
            ],
        );
        set.insert(
            ComponentKind::Multipole,
            vec![ParamAxis::scalars(Param::Knl, &[0.1])],
        );
        let diagnostics = set.diagnostics();
        for needle in [
            "parameter_list_empty component=drift",
            "value_list_empty component=quadrupole param=k1",
            "parameter_not_in_schema component=quadrupole param=k2",
            "parameter_duplicate component=quadrupole param=k1",
            "value_shape_mismatch component=multipole param=knl",
        ] {
            assert!(
                diagnostics.iter().any(|line| line == needle),
                "case=diagnostics missing={needle} actual={diagnostics:?}"
            );
        }
        assert!(set.validate().is_err());
    }

    #[test]
    fn json_round_trip_and_fingerprint() {
        let set = ParameterSet::default_tables();
        let text = serde_json::to_string_pretty(&set).expect("serialize");
        let parsed = ParameterSet::from_json(&text).expect("parse");
        assert_eq!(parsed, set);
        assert_eq!(
            parsed.fingerprint().expect("fingerprint"),
            set.fingerprint().expect("fingerprint")
        );
        assert_eq!(set.fingerprint().expect("fingerprint").len(), 64);
    }

    #[test]
    fn duplicate_values_are_rejected() {
        let text = r#"{"components":{"drift":[{"param":"length","values":[0.1,0.1,1.0]}]}}"#;
        let err = ParameterSet::from_json(text).expect_err("duplicate length");
        assert!(
            err.to_string().contains("value_duplicate component=drift param=length"),
            "case=duplicate_values actual={err}"
        );

        let knl: &[&[f64]] = &[&[0.0, 0.1], &[0.0, 0.1]];
        let ksl: &[&[f64]] = &[&[0.0]];
        let mut set = ParameterSet::new();
        set.insert(
            ComponentKind::Multipole,
            vec![
                ParamAxis::scalars(Param::Length, &[1.0]),
                ParamAxis::orders(Param::Knl, knl),
                ParamAxis::orders(Param::Ksl, ksl),
            ],
        );
        assert_eq!(
            set.diagnostics(),
            vec!["value_duplicate component=multipole param=knl".to_owned()]
        );
    }

    #[test]
    fn from_json_rejects_invalid_tables() {
        let text = r#"{"components":{"drift":[{"param":"k1","values":[0.5]}]}}"#;
        assert!(ParameterSet::from_json(text).is_err());
    }

    #[test]
    fn restricted_keeps_only_requested() {
        let set = ParameterSet::default_tables().restricted_to(&[ComponentKind::Drift]);
        assert_eq!(set.kinds().collect::<Vec<_>>(), vec![ComponentKind::Drift]);
    }
}
