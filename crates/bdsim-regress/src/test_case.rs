//! Concrete test cases and the deterministic file-naming grammar.
//!
//! ```text
//! <component>__<particle>__energy_<E>(__<param>_<value>)*.gmad
//! ```
//!
//! Parameter segments follow the declared parameter order, so names are
//! unique within a component's enumeration and stable across runs.

use std::collections::BTreeMap;

use bdsim_regress_error::{RegressError, Result};
use serde::{Deserialize, Serialize};

use crate::component::{ComponentKind, ComponentSpec, Param, ParamValue, format_scalar};
use crate::params::ParameterSet;

/// Extension of generated lattice files.
pub const GMAD_EXTENSION: &str = "gmad";

const SEGMENT_SEPARATOR: &str = "__";
const ENERGY_PREFIX: &str = "energy_";

/// One concrete combination: beam particle, beam energy and component spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub particle: String,
    /// Total beam energy in GeV.
    pub energy: f64,
    pub spec: ComponentSpec,
}

impl TestCase {
    #[must_use]
    pub fn new(particle: impl Into<String>, energy: f64, spec: ComponentSpec) -> Self {
        Self {
            particle: particle.into(),
            energy,
            spec,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> ComponentKind {
        self.spec.kind()
    }

    /// File stem: `drift__e-__energy_1.0__length_0.1`.
    #[must_use]
    pub fn file_stem(&self) -> String {
        let mut stem = format!(
            "{}{SEGMENT_SEPARATOR}{}{SEGMENT_SEPARATOR}{ENERGY_PREFIX}{}",
            self.kind(),
            self.particle,
            format_scalar(self.energy)
        );
        for (param, value) in self.spec.values() {
            stem.push_str(SEGMENT_SEPARATOR);
            stem.push_str(param.name());
            stem.push('_');
            stem.push_str(&value.to_name_fragment());
        }
        stem
    }

    #[must_use]
    pub fn file_name(&self) -> String {
        format!("{}.{GMAD_EXTENSION}", self.file_stem())
    }

    /// Parse a file name (with or without extension) back into a test case.
    pub fn parse_file_name(name: &str) -> Result<Self> {
        let invalid = |detail: &str| RegressError::InvalidFileName {
            name: name.to_owned(),
            detail: detail.to_owned(),
        };
        let stem = name
            .strip_suffix(&format!(".{GMAD_EXTENSION}"))
            .unwrap_or(name);
        let mut segments = stem.split(SEGMENT_SEPARATOR);

        let kind: ComponentKind = segments
            .next()
            .filter(|segment| !segment.is_empty())
            .ok_or_else(|| invalid("missing component"))?
            .parse()?;
        let particle = segments
            .next()
            .filter(|segment| !segment.is_empty())
            .ok_or_else(|| invalid("missing particle"))?;
        let energy = segments
            .next()
            .and_then(|segment| segment.strip_prefix(ENERGY_PREFIX))
            .and_then(|text| text.parse::<f64>().ok())
            .ok_or_else(|| invalid("missing or malformed energy segment"))?;

        let mut builder = ComponentSpec::builder(kind);
        for segment in segments {
            let (param_name, fragment) = segment
                .split_once('_')
                .ok_or_else(|| invalid("parameter segment without value"))?;
            let param: Param = param_name.parse().map_err(|_| RegressError::UnknownParameter {
                component: kind.name().to_owned(),
                param: param_name.to_owned(),
            })?;
            let value = ParamValue::parse_fragment(param, fragment)
                .ok_or_else(|| invalid("malformed parameter value"))?;
            builder = builder.set(param, value);
        }
        Ok(Self::new(particle, energy, builder.build()?))
    }

    /// Every varying attribute as text, keyed by name.
    ///
    /// Used for common-factor analysis; keys are `particle`, `energy` and the
    /// parameter names.
    #[must_use]
    pub fn attributes(&self) -> BTreeMap<String, String> {
        let mut attributes = BTreeMap::new();
        attributes.insert("particle".to_owned(), self.particle.clone());
        attributes.insert("energy".to_owned(), format_scalar(self.energy));
        for (param, value) in self.spec.values() {
            attributes.insert(param.name().to_owned(), value.to_name_fragment());
        }
        attributes
    }

    /// Position of this case in the writer's nested enumeration order.
    #[must_use]
    pub fn canonical_key(
        &self,
        params: &ParameterSet,
        particles: &[String],
        energies: &[f64],
    ) -> CanonicalKey {
        let particle = particles
            .iter()
            .position(|candidate| *candidate == self.particle)
            .unwrap_or(usize::MAX);
        let energy = energies
            .iter()
            .position(|candidate| *candidate == self.energy)
            .unwrap_or(usize::MAX);
        let levels = params
            .variation_axes(self.kind())
            .iter()
            .map(|level| level.position(self.spec.values()).unwrap_or(usize::MAX))
            .collect();
        CanonicalKey {
            particle,
            energy,
            levels,
            stem: self.file_stem(),
        }
    }
}

/// Sort key reproducing the nested particle → energy → parameter order.
///
/// Cases outside the current tables sort last, ordered by file stem.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct CanonicalKey {
    particle: usize,
    energy: usize,
    levels: Vec<usize>,
    stem: String,
}

/// Sort cases into canonical nested-parameter order.
pub fn sort_canonical(
    cases: &mut [TestCase],
    params: &ParameterSet,
    particles: &[String],
    energies: &[f64],
) {
    cases.sort_by_cached_key(|case| case.canonical_key(params, particles, energies));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad(length: f64, k1: f64) -> TestCase {
        let spec = ComponentSpec::builder(ComponentKind::Quadrupole)
            .scalar(Param::Length, length)
            .scalar(Param::K1, k1)
            .build()
            .expect("valid quadrupole");
        TestCase::new("e-", 1.0, spec)
    }

    #[test]
    fn file_name_follows_grammar() {
        let case = quad(0.2, -0.5);
        assert_eq!(
            case.file_name(),
            "quadrupole__e-__energy_1.0__length_0.2__k1_-0.5.gmad"
        );
    }

    #[test]
    fn parse_inverts_file_name() {
        let case = quad(1.0, 0.05);
        let parsed = TestCase::parse_file_name(&case.file_name()).expect("parse");
        assert_eq!(parsed, case);
        let parsed_stem = TestCase::parse_file_name(&case.file_stem()).expect("parse stem");
        assert_eq!(parsed_stem, case);
    }

    #[test]
    fn parse_handles_order_tuples() {
        let spec = ComponentSpec::builder(ComponentKind::ThinMultipole)
            .set(Param::Knl, ParamValue::Orders(vec![0.0, 0.0, -0.5]))
            .set(Param::Ksl, ParamValue::Orders(vec![0.0]))
            .build()
            .expect("valid thin multipole");
        let case = TestCase::new("proton", 10.0, spec);
        assert_eq!(
            case.file_stem(),
            "thinmultipole__proton__energy_10.0__knl_0.0_0.0_-0.5__ksl_0.0"
        );
        assert_eq!(
            TestCase::parse_file_name(&case.file_name()).expect("parse"),
            case
        );
    }

    #[test]
    fn parse_rejects_malformed_names() {
        for name in [
            "",
            "drift",
            "drift__e-",
            "drift__e-__energy_abc",
            "drift__e-__power_1.0",
            "drift__e-__energy_1.0__length",
            "drift__e-__energy_1.0__k1_0.5",
            "warpdrive__e-__energy_1.0",
            "sbend__e-__energy_1.0__angle_0.1__field_0.5",
        ] {
            assert!(
                TestCase::parse_file_name(name).is_err(),
                "case=parse_rejects name={name}"
            );
        }
    }

    #[test]
    fn attributes_include_beam_and_params() {
        let attributes = quad(0.2, 0.5).attributes();
        assert_eq!(attributes.get("particle").map(String::as_str), Some("e-"));
        assert_eq!(attributes.get("energy").map(String::as_str), Some("1.0"));
        assert_eq!(attributes.get("k1").map(String::as_str), Some("0.5"));
        assert_eq!(attributes.len(), 4);
    }

    #[test]
    fn canonical_sort_restores_nested_order() {
        let params = ParameterSet::default_tables();
        let particles = vec!["e-".to_owned()];
        let energies = vec![1.0];
        let mut cases = vec![quad(1.0, 0.5), quad(0.2, 0.0), quad(0.2, -0.5), quad(1.0, -0.5)];
        sort_canonical(&mut cases, &params, &particles, &energies);
        let stems: Vec<String> = cases.iter().map(TestCase::file_stem).collect();
        assert_eq!(
            stems,
            vec![
                "quadrupole__e-__energy_1.0__length_0.2__k1_-0.5",
                "quadrupole__e-__energy_1.0__length_0.2__k1_0.0",
                "quadrupole__e-__energy_1.0__length_1.0__k1_-0.5",
                "quadrupole__e-__energy_1.0__length_1.0__k1_0.5",
            ]
        );
    }
}
