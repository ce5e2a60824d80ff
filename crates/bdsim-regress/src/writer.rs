//! Test file generation: expands the parameter space into one lattice file
//! per combination.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use bdsim_regress_error::{RegressError, Result};
use tracing::{debug, info};

use crate::component::{ComponentKind, ComponentSpec, format_scalar};
use crate::config::SuiteConfig;
use crate::params::ParameterSet;
use crate::test_case::TestCase;

/// Label given to the single element in every generated lattice.
const ELEMENT_LABEL: &str = "c1";

/// Every test case for `kind`: particles outermost, then energies, then the
/// parameter levels in declared order.
pub fn enumerate_cases(
    kind: ComponentKind,
    particles: &[String],
    energies: &[f64],
    params: &ParameterSet,
) -> Result<Vec<TestCase>> {
    let levels = params.variation_axes(kind);
    if levels.is_empty() {
        return Err(RegressError::parameter_set(format!(
            "no parameters declared for component={kind}"
        )));
    }
    if levels.iter().any(|level| level.choices.is_empty()) {
        return Ok(Vec::new());
    }

    // Odometer over the levels; the last level varies fastest.
    let mut specs = Vec::new();
    let mut cursor = vec![0_usize; levels.len()];
    'outer: loop {
        let mut builder = ComponentSpec::builder(kind);
        for (level, index) in levels.iter().zip(&cursor) {
            let (param, value) = &level.choices[*index];
            builder = builder.set(*param, value.clone());
        }
        specs.push(builder.build()?);

        for position in (0..levels.len()).rev() {
            cursor[position] += 1;
            if cursor[position] < levels[position].choices.len() {
                continue 'outer;
            }
            cursor[position] = 0;
        }
        break;
    }

    let mut cases = Vec::with_capacity(specs.len() * particles.len() * energies.len());
    for particle in particles {
        for energy in energies {
            for spec in &specs {
                cases.push(TestCase::new(particle.clone(), *energy, spec.clone()));
            }
        }
    }
    Ok(cases)
}

/// External collaborator that turns a test case into an input file the
/// simulator understands.
pub trait MachineBuilder: Send + Sync {
    /// Write the lattice for `case` to `path`, including `options_file`.
    fn write_lattice(&self, case: &TestCase, options_file: &Path, path: &Path) -> Result<()>;

    /// Write the options file shared by every lattice.
    fn write_options(&self, path: &Path) -> Result<()>;
}

/// Minimal gmad writer: one element, one line, reference beam.
#[derive(Debug, Clone)]
pub struct GmadMachineBuilder {
    pub ngenerate: u32,
    pub physics_list: String,
}

impl GmadMachineBuilder {
    #[must_use]
    pub fn from_config(config: &SuiteConfig) -> Self {
        Self {
            ngenerate: config.ngenerate,
            physics_list: config.physics_list.clone(),
        }
    }

    /// Render the lattice text for `case`.
    #[must_use]
    pub fn render_lattice(case: &TestCase, options_file: &Path) -> String {
        let mut text = String::new();
        let _ = writeln!(text, "! {}", case.file_stem());
        let _ = writeln!(text, "include {};", options_file.display());
        let _ = writeln!(
            text,
            "beam, particle=\"{}\", energy={}*GeV, distrType=\"reference\";",
            case.particle,
            format_scalar(case.energy)
        );
        let mut element = format!("{ELEMENT_LABEL}: {}", case.kind());
        for (param, value) in case.spec.values() {
            let (keyword, unit) = param.gmad_keyword();
            let _ = write!(element, ", {keyword}={}{unit}", value.to_gmad());
        }
        let _ = writeln!(text, "{element};");
        let _ = writeln!(text, "lat: line = ({ELEMENT_LABEL});");
        let _ = writeln!(text, "use, period=lat;");
        let _ = writeln!(text, "sample, all;");
        text
    }

    #[must_use]
    pub fn render_options(&self) -> String {
        format!(
            "option, ngenerate={}, physicsList=\"{}\", checkOverlaps=1, \
             stopSecondaries=1, elossHistoBinWidth=0.1*m;\n",
            self.ngenerate, self.physics_list
        )
    }
}

impl MachineBuilder for GmadMachineBuilder {
    fn write_lattice(&self, case: &TestCase, options_file: &Path, path: &Path) -> Result<()> {
        fs::write(path, Self::render_lattice(case, options_file))?;
        Ok(())
    }

    fn write_options(&self, path: &Path) -> Result<()> {
        fs::write(path, self.render_options())?;
        Ok(())
    }
}

/// Per-component outcome of a writer pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteSummary {
    /// Every test file for the component, in enumeration order.
    pub files: Vec<PathBuf>,
    pub written: usize,
    /// Files left untouched because they already existed.
    pub skipped: usize,
}

/// Writes test files under `<output_dir>/<component>/`.
pub struct TestWriter<'a> {
    config: &'a SuiteConfig,
    params: &'a ParameterSet,
    builder: &'a dyn MachineBuilder,
}

impl<'a> TestWriter<'a> {
    #[must_use]
    pub fn new(
        config: &'a SuiteConfig,
        params: &'a ParameterSet,
        builder: &'a dyn MachineBuilder,
    ) -> Self {
        Self {
            config,
            params,
            builder,
        }
    }

    /// Write the shared options file, creating the output root if needed.
    pub fn write_global_options(&self) -> Result<PathBuf> {
        create_dir(&self.config.output_dir)?;
        let path = self.config.global_options_path();
        self.builder.write_options(&path)?;
        info!(path = %path.display(), "global options written");
        Ok(path)
    }

    /// Write every test file for `kind`, skipping names already on disk.
    ///
    /// Failing to create the component directory is fatal: every later stage
    /// depends on the files existing.
    pub fn write_tests(&self, kind: ComponentKind) -> Result<WriteSummary> {
        let dir = self.config.component_dir(kind);
        create_dir(&dir)?;

        let options_file = self.config.options_include_path();
        let cases = enumerate_cases(
            kind,
            &self.config.particles,
            &self.config.energies,
            self.params,
        )?;

        let mut summary = WriteSummary::default();
        for case in &cases {
            let path = dir.join(case.file_name());
            if path.exists() {
                summary.skipped += 1;
            } else {
                self.builder.write_lattice(case, &options_file, &path)?;
                summary.written += 1;
            }
            summary.files.push(path);
        }
        info!(
            component = %kind,
            written = summary.written,
            skipped = summary.skipped,
            "test files generated"
        );
        Ok(summary)
    }

    /// Write every component present in the parameter set.
    pub fn write_all(&self) -> Result<Vec<(ComponentKind, WriteSummary)>> {
        self.params
            .kinds()
            .map(|kind| self.write_tests(kind).map(|summary| (kind, summary)))
            .collect()
    }
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|source| RegressError::DirectoryCreate {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), "directory ready");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::component::Param;
    use crate::params::ParamAxis;

    fn beams() -> (Vec<String>, Vec<f64>) {
        (vec!["e-".to_owned(), "proton".to_owned()], vec![1.0, 10.0])
    }

    #[test]
    fn enumeration_matches_combination_count_for_defaults() {
        let params = ParameterSet::default_tables();
        let (particles, energies) = beams();
        for kind in params.kinds() {
            let cases = enumerate_cases(kind, &particles, &energies, &params).expect("enumerate");
            let expected = params.combination_count(kind) * 4;
            assert_eq!(
                cases.len() as u64,
                expected,
                "case=exhaustive kind={kind} expected={expected} actual={}",
                cases.len()
            );
        }
    }

    #[test]
    fn names_are_unique_per_component() {
        let params = ParameterSet::default_tables();
        let (particles, energies) = beams();
        for kind in params.kinds() {
            let cases = enumerate_cases(kind, &particles, &energies, &params).expect("enumerate");
            let names: BTreeSet<String> = cases.iter().map(TestCase::file_name).collect();
            assert_eq!(names.len(), cases.len(), "case=unique_names kind={kind}");
        }
    }

    #[test]
    fn dipole_sets_angle_or_field_never_both() {
        let params = ParameterSet::default_tables();
        let cases = enumerate_cases(
            ComponentKind::Rbend,
            &["e-".to_owned()],
            &[1.0],
            &params,
        )
        .expect("enumerate");
        let with_angle = cases
            .iter()
            .filter(|case| case.spec.get(Param::Angle).is_some())
            .count();
        let with_field = cases
            .iter()
            .filter(|case| case.spec.get(Param::Field).is_some())
            .count();
        assert_eq!(with_angle + with_field, cases.len());
        assert_eq!(with_angle, with_field);
    }

    #[test]
    fn nested_order_varies_last_parameter_fastest() {
        let mut params = ParameterSet::new();
        params.insert(
            ComponentKind::Quadrupole,
            vec![
                ParamAxis::scalars(Param::Length, &[0.1, 0.2]),
                ParamAxis::scalars(Param::K1, &[1.0, 2.0]),
            ],
        );
        let cases = enumerate_cases(
            ComponentKind::Quadrupole,
            &["e-".to_owned()],
            &[1.0],
            &params,
        )
        .expect("enumerate");
        let stems: Vec<String> = cases.iter().map(TestCase::file_stem).collect();
        assert_eq!(
            stems,
            vec![
                "quadrupole__e-__energy_1.0__length_0.1__k1_1.0",
                "quadrupole__e-__energy_1.0__length_0.1__k1_2.0",
                "quadrupole__e-__energy_1.0__length_0.2__k1_1.0",
                "quadrupole__e-__energy_1.0__length_0.2__k1_2.0",
            ]
        );
    }

    #[test]
    fn missing_component_is_an_error() {
        let params = ParameterSet::new();
        assert!(enumerate_cases(ComponentKind::Drift, &[], &[], &params).is_err());
    }

    #[test]
    fn lattice_text_carries_beam_and_element() {
        let spec = ComponentSpec::builder(ComponentKind::Sbend)
            .scalar(Param::Length, 2.0)
            .scalar(Param::Field, 0.5)
            .build()
            .expect("valid sbend");
        let case = TestCase::new("proton", 10.0, spec);
        let text = GmadMachineBuilder::render_lattice(&case, Path::new("opts.gmad"));
        assert!(text.contains("include opts.gmad;"));
        assert!(text.contains("beam, particle=\"proton\", energy=10.0*GeV"));
        assert!(text.contains("c1: sbend, l=2.0*m, B=0.5*T;"));
        assert!(text.contains("use, period=lat;"));
    }

    #[test]
    fn written_lattice_includes_options_from_its_own_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = SuiteConfig {
            output_dir: dir.path().join("out"),
            particles: vec!["e-".to_owned()],
            energies: vec![1.0],
            ..SuiteConfig::default()
        };
        let mut params = ParameterSet::new();
        params.insert(
            ComponentKind::Drift,
            vec![ParamAxis::scalars(Param::Length, &[0.1])],
        );
        let builder = GmadMachineBuilder::from_config(&config);
        let writer = TestWriter::new(&config, &params, &builder);
        writer.write_global_options().expect("options");
        let summary = writer.write_tests(ComponentKind::Drift).expect("write");

        let text = fs::read_to_string(&summary.files[0]).expect("lattice");
        let include = text
            .lines()
            .find_map(|line| line.strip_prefix("include "))
            .and_then(|rest| rest.strip_suffix(';'))
            .expect("include line");
        assert_eq!(include, "../trackingTestOptions.gmad");
        let resolved = config.component_dir(ComponentKind::Drift).join(include);
        assert!(resolved.is_file(), "case=include_resolves path={}", resolved.display());
    }
}
