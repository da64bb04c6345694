use log::{debug, info, warn};
use std::path::{Path, PathBuf};

use crate::contract::ExpectedContract;
use crate::error::{Result, VerifyError};
use crate::models::ArtifactDescriptors;
use crate::report::{ConsumerSettings, VerificationReport};
use crate::runtime::InferenceArtifact;
use crate::verifier::{
    Observations, SmokeOptions, Verifier, check_conformance, derive_layout_oriented, describe,
    smoke_test_artifact,
};

/// Read-only inputs shared by every step of a run.
pub struct VerifyContext {
    pub verifier: Verifier,
    pub contract: ExpectedContract,
    /// Class names the consumer ships with, if a labels file was given.
    pub labels: Option<Vec<String>>,
}

impl VerifyContext {
    pub fn new(verifier: Verifier, contract: ExpectedContract) -> Self {
        Self {
            verifier,
            contract,
            labels: None,
        }
    }

    pub fn with_labels(mut self, labels: Vec<String>) -> Self {
        self.labels = Some(labels);
        self
    }

    fn smoke_options(&self) -> SmokeOptions {
        SmokeOptions {
            output_index: self.contract.output_index,
            seed: self.contract.seed,
            bindings: self.contract.dim_bindings.clone(),
        }
    }
}

/// State threaded through the steps of one verification.
///
/// Owns the loaded interpreter; it is released when the run ends.
pub struct VerificationState {
    pub path: PathBuf,
    pub artifact: Option<Box<dyn InferenceArtifact>>,
    pub descriptors: ArtifactDescriptors,
    pub report: VerificationReport,
}

impl VerificationState {
    pub fn new(path: &Path, context: &VerifyContext) -> Self {
        let mut report = VerificationReport::new(
            path.to_path_buf(),
            context.verifier.loader().name(),
            context.contract.format.fixed_geometry_fields(),
        );
        report.smoke_skipped = true;
        Self {
            path: path.to_path_buf(),
            artifact: None,
            descriptors: ArtifactDescriptors::default(),
            report,
        }
    }
}

/// One stage of a verification.
///
/// An `Err` aborts the whole run. Recoverable problems are recorded in the
/// state's report instead.
pub trait VerificationStep: Send + Sync {
    fn process(&self, state: &mut VerificationState, context: &VerifyContext) -> Result<()>;

    /// Human-readable name for this step (used in log output)
    fn name(&self) -> &str;
}

/// Loads the artifact and records its descriptors.
pub struct InspectStep;

impl VerificationStep for InspectStep {
    fn process(&self, state: &mut VerificationState, context: &VerifyContext) -> Result<()> {
        let artifact = context
            .verifier
            .open(&state.path, &context.contract.dim_bindings)?;
        state.descriptors = describe(artifact.as_ref());
        state.report.inputs = state.descriptors.inputs.clone();
        state.report.outputs = state.descriptors.outputs.clone();
        state.artifact = Some(artifact);
        Ok(())
    }

    fn name(&self) -> &str {
        "Inspect"
    }
}

/// Derives the detection-head layout from the selected output.
pub struct LayoutStep;

impl VerificationStep for LayoutStep {
    fn process(&self, state: &mut VerificationState, context: &VerifyContext) -> Result<()> {
        let contract = &context.contract;
        let Some(output) = state.descriptors.outputs.get(contract.output_index) else {
            state.report.layout_error = Some(format!(
                "artifact declares no output at index {}",
                contract.output_index
            ));
            return Ok(());
        };

        match derive_layout_oriented(output, contract.format, contract.orientation) {
            Ok(layout) => {
                let input = state.descriptors.inputs.get(contract.input_index);
                state.report.consumer_settings =
                    Some(ConsumerSettings::derive(&layout, input, contract.orientation));
                state.report.layout = Some(layout);
            }
            Err(err @ VerifyError::UnsupportedLayout { .. }) => {
                warn!("{}", err);
                state.report.layout_error = Some(err.to_string());
            }
            Err(err) => return Err(err),
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "Layout"
    }
}

/// Runs one synthetic forward pass. Failures are recorded, not propagated.
pub struct SmokeTestStep;

impl VerificationStep for SmokeTestStep {
    fn process(&self, state: &mut VerificationState, context: &VerifyContext) -> Result<()> {
        state.report.smoke_skipped = false;
        let options = context.smoke_options();

        let Some(input) = state.descriptors.inputs.get(context.contract.input_index).cloned() else {
            state.report.smoke_error = Some(format!(
                "artifact declares no input at index {}",
                context.contract.input_index
            ));
            return Ok(());
        };

        let outcome = match state.artifact.as_mut() {
            Some(artifact) => smoke_test_artifact(artifact.as_mut(), &state.path, &input, &options),
            None => context.verifier.smoke_test(&state.path, &input, &options),
        };

        match outcome {
            Ok(sample) => state.report.smoke = Some(sample),
            Err(err @ VerifyError::ArtifactLoad { .. }) => return Err(err),
            Err(err) => {
                warn!("{}", err);
                state.report.smoke_error = Some(err.to_string());
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "Smoke Test"
    }
}

/// Compares the gathered observations against the contract.
pub struct ConformanceStep;

impl VerificationStep for ConformanceStep {
    fn process(&self, state: &mut VerificationState, context: &VerifyContext) -> Result<()> {
        let observations = Observations {
            descriptors: &state.descriptors,
            layout: state.report.layout.as_ref(),
            sample: state.report.smoke.as_ref(),
            labels: context.labels.as_deref(),
        };
        let warnings = check_conformance(&observations, &context.contract);
        for warning in &warnings {
            warn!("{}: {}", state.path.display(), warning);
        }
        state.report.warnings.extend(warnings);
        Ok(())
    }

    fn name(&self) -> &str {
        "Conformance"
    }
}

/// Ordered list of verification steps.
pub struct VerificationPipeline {
    steps: Vec<Box<dyn VerificationStep>>,
}

impl VerificationPipeline {
    /// Create a new empty pipeline
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    /// Inspect, layout, optional smoke test, conformance.
    pub fn standard(run_smoke_test: bool) -> Self {
        let mut pipeline = Self::new()
            .add_step(Box::new(InspectStep))
            .add_step(Box::new(LayoutStep));
        if run_smoke_test {
            pipeline = pipeline.add_step(Box::new(SmokeTestStep));
        }
        pipeline.add_step(Box::new(ConformanceStep))
    }

    /// Appends a step that runs after every step added so far.
    pub fn add_step(mut self, step: Box<dyn VerificationStep>) -> Self {
        self.steps.push(step);
        self
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Runs every step against `path` and returns the finished report.
    pub fn run(&self, path: &Path, context: &VerifyContext) -> Result<VerificationReport> {
        info!("verifying {}", path.display());
        let mut state = VerificationState::new(path, context);

        for step in &self.steps {
            debug!("running step: {}", step.name());
            step.process(&mut state, context)?;
        }

        Ok(state.report)
    }
}

impl Default for VerificationPipeline {
    fn default() -> Self {
        Self::standard(true)
    }
}
