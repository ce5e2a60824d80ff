//! Property tests over generated parameter tables and result buckets.

use std::collections::BTreeSet;

use bdsim_regress::executor::{RunMode, RunResult, RunStatus};
use bdsim_regress::params::{ParamAxis, ParameterSet};
use bdsim_regress::results::{CommonFactor, common_factors};
use bdsim_regress::test_case::TestCase;
use bdsim_regress::writer::enumerate_cases;
use bdsim_regress::{ComponentKind, ComponentSpec, Param};
use proptest::prelude::*;

fn values(count: usize, scale: f64) -> Vec<f64> {
    (1..=count).map(|index| index as f64 * scale).collect()
}

fn beams(particles: usize, energies: usize) -> (Vec<String>, Vec<f64>) {
    let particles = ["e-", "proton", "mu-"][..particles]
        .iter()
        .map(|name| (*name).to_owned())
        .collect();
    (particles, values(energies, 1.5))
}

fn drift_result(length: f64, energy: f64) -> RunResult {
    let spec = ComponentSpec::builder(ComponentKind::Drift)
        .scalar(Param::Length, length)
        .build()
        .expect("valid drift");
    RunResult::new(
        TestCase::new("e-", energy, spec),
        RunMode::Compare,
        RunStatus::Failed,
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn quadrupole_count_matches_enumeration(
        lengths in 1_usize..4,
        strengths in 1_usize..5,
        particles in 1_usize..=3,
        energies in 1_usize..3,
    ) {
        let mut params = ParameterSet::new();
        params.insert(
            ComponentKind::Quadrupole,
            vec![
                ParamAxis::scalars(Param::Length, &values(lengths, 0.5)),
                ParamAxis::scalars(Param::K1, &values(strengths, 0.25)),
            ],
        );
        let (particles, energies) = beams(particles, energies);
        let cases = enumerate_cases(ComponentKind::Quadrupole, &particles, &energies, &params)
            .expect("enumerate");
        let beam_count = (particles.len() * energies.len()) as u64;
        prop_assert_eq!(
            cases.len() as u64,
            params.combination_count(ComponentKind::Quadrupole) * beam_count
        );
        let names: BTreeSet<String> = cases.iter().map(TestCase::file_name).collect();
        prop_assert_eq!(names.len(), cases.len());
    }

    #[test]
    fn dipole_count_matches_enumeration(
        lengths in 1_usize..3,
        angles in 0_usize..4,
        fields in 1_usize..4,
        e1 in 1_usize..3,
    ) {
        let mut params = ParameterSet::new();
        params.insert(
            ComponentKind::Sbend,
            vec![
                ParamAxis::scalars(Param::Length, &values(lengths, 1.0)),
                ParamAxis::scalars(Param::Angle, &values(angles, 0.01)),
                ParamAxis::scalars(Param::Field, &values(fields, 0.2)),
                ParamAxis::scalars(Param::E1, &values(e1, 0.05)),
            ],
        );
        let (particles, energies) = beams(1, 1);
        let cases = enumerate_cases(ComponentKind::Sbend, &particles, &energies, &params)
            .expect("enumerate");
        prop_assert_eq!(
            cases.len() as u64,
            params.combination_count(ComponentKind::Sbend)
        );
        prop_assert_eq!(cases.len(), lengths * (angles + fields) * e1);
        for case in &cases {
            let angle = case.spec.get(Param::Angle).is_some();
            let field = case.spec.get(Param::Field).is_some();
            prop_assert!(angle != field, "stem={}", case.file_stem());
        }
    }

    #[test]
    fn file_names_parse_back(length_index in 1_usize..20, energy_index in 1_usize..20) {
        let case = drift_result(length_index as f64 * 0.1, energy_index as f64 * 0.5).case;
        let parsed = TestCase::parse_file_name(&case.file_name()).expect("parse");
        prop_assert_eq!(parsed, case);
    }

    #[test]
    fn common_factor_depends_on_distinct_count(
        picks in prop::collection::vec(0_usize..4, 1..12),
    ) {
        let pool = [0.1, 1.0, 5.0, 10.0];
        let results: Vec<RunResult> = picks
            .iter()
            .map(|pick| drift_result(pool[*pick], 1.0))
            .collect();
        let refs: Vec<&RunResult> = results.iter().collect();
        let factors = common_factors(&refs);
        let distinct: BTreeSet<usize> = picks.iter().copied().collect();

        prop_assert_eq!(
            factors.get("energy"),
            Some(&CommonFactor::Single("1.0".to_owned()))
        );
        match distinct.len() {
            1 => prop_assert!(matches!(factors.get("length"), Some(CommonFactor::Single(_)))),
            2 => prop_assert!(matches!(factors.get("length"), Some(CommonFactor::Pair(_, _)))),
            _ => prop_assert!(!factors.contains_key("length")),
        }
    }
}

#[test]
fn default_tables_count_matches_enumeration() {
    let params = ParameterSet::default_tables();
    let (particles, energies) = beams(2, 2);
    let mut total = 0_u64;
    for kind in params.kinds() {
        let cases = enumerate_cases(kind, &particles, &energies, &params).expect("enumerate");
        assert_eq!(
            cases.len() as u64,
            params.combination_count(kind) * 4,
            "case=default_tables kind={kind}"
        );
        total += cases.len() as u64;
    }
    assert_eq!(total, params.total_file_count(2, 2));
}
