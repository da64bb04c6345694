use clap::{Parser, ValueEnum};
use log::error;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use modelcheck::batch::verify_many;
use modelcheck::contract::{
    ContractFile, ValueBound, output_triple, parse_binding, parse_shape, parse_value_bound,
    read_labels,
};
use modelcheck::runtime::RtenLoader;
use modelcheck::{
    ArtifactLoader, ElementType, ExpectedContract, HeadFormat, HeadOrientation,
    VerificationPipeline, VerificationReport, Verifier, VerifyContext, VerifyError,
};

#[derive(Parser)]
#[command(name = "modelcheck")]
#[command(version, about = "Check that an exported detection model matches the tensor contract of its consumer")]
struct Cli {
    /// Model artifacts to verify
    #[arg(value_name = "ARTIFACT", default_value = "assets/models/yolov5n.rten")]
    artifacts: Vec<PathBuf>,

    /// Detection head family, which fixes the number of geometry fields
    #[arg(long, value_enum)]
    format: Option<Format>,

    /// Number of leading geometry fields per anchor (overrides --format)
    #[arg(long, value_name = "N")]
    geometry_fields: Option<usize>,

    /// Output is laid out as [batch, features, anchors]
    #[arg(long)]
    features_major: bool,

    /// Expected output shape, e.g. 1,84,8400
    #[arg(long, value_name = "SHAPE", value_parser = parse_shape_arg)]
    expect_output: Option<ShapeArg>,

    /// Expected input shape, e.g. 1,640,640,3
    #[arg(long, value_name = "SHAPE", value_parser = parse_shape_arg)]
    expect_input: Option<ShapeArg>,

    /// Expected input element type (float32, uint8, int8, int32)
    #[arg(long, value_name = "TYPE", value_parser = parse_element_type)]
    expect_input_type: Option<ElementType>,

    /// Bound for smoke-test output values as `lo,hi`, or `none` [default: 0,1]
    #[arg(long, value_name = "RANGE", value_parser = parse_range_arg)]
    value_range: Option<RangeArg>,

    /// Warn when the derived class count is below this value
    #[arg(long, value_name = "N")]
    min_classes: Option<usize>,

    /// Labels file shipped with the model, one class per line
    #[arg(long, value_name = "FILE")]
    labels: Option<PathBuf>,

    /// JSON contract file; flags given on the command line take precedence
    #[arg(long, value_name = "FILE")]
    contract: Option<PathBuf>,

    /// Bind a symbolic dimension, e.g. batch=1 (repeatable)
    #[arg(long = "bind", value_name = "NAME=VALUE", value_parser = parse_binding)]
    bindings: Vec<(String, usize)>,

    /// Index of the input slot used for the smoke test
    #[arg(long, value_name = "N")]
    input_index: Option<usize>,

    /// Index of the output slot to analyze
    #[arg(long, value_name = "N")]
    output_index: Option<usize>,

    /// Seed for the synthetic input tensor
    #[arg(long, value_name = "N")]
    seed: Option<u64>,

    /// Only inspect descriptors, do not run inference
    #[arg(long)]
    skip_smoke: bool,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
enum Format {
    /// cx, cy, w, h, objectness, classes...
    Yolov5,
    /// cx, cy, w, h, classes...
    Yolov8,
}

#[derive(Clone, Debug)]
struct ShapeArg(Vec<usize>);

#[derive(Clone, Debug)]
struct RangeArg(Option<ValueBound>);

fn parse_shape_arg(s: &str) -> Result<ShapeArg, String> {
    parse_shape(s).map(ShapeArg)
}

fn parse_range_arg(s: &str) -> Result<RangeArg, String> {
    parse_value_bound(s).map(RangeArg)
}

fn parse_element_type(s: &str) -> Result<ElementType, String> {
    s.parse()
}

fn build_contract(args: &Cli) -> anyhow::Result<ExpectedContract> {
    let mut contract = ExpectedContract::default();

    if let Some(path) = &args.contract {
        ContractFile::load(path)?.apply(&mut contract)?;
    }

    if let Some(format) = args.format {
        contract.format = match format {
            Format::Yolov5 => HeadFormat::Objectness,
            Format::Yolov8 => HeadFormat::Anchorless,
        };
    }
    if let Some(fields) = args.geometry_fields {
        contract.format = HeadFormat::from_fields(fields);
    }
    if args.features_major {
        contract.orientation = HeadOrientation::FeaturesMajor;
    }
    if let Some(ShapeArg(shape)) = &args.expect_output {
        contract.expected_output_shape = Some(output_triple(shape)?);
    }
    if let Some(ShapeArg(shape)) = &args.expect_input {
        contract.expected_input_shape = Some(shape.clone());
    }
    if let Some(ty) = &args.expect_input_type {
        contract.expected_input_type = Some(ty.clone());
    }
    if let Some(RangeArg(bound)) = &args.value_range {
        contract.value_bound = *bound;
    }
    if let Some(min) = args.min_classes {
        contract.min_class_count = Some(min);
    }
    if let Some(labels) = &args.labels {
        contract.labels_path = Some(labels.clone());
    }
    if let Some(index) = args.input_index {
        contract.input_index = index;
    }
    if let Some(index) = args.output_index {
        contract.output_index = index;
    }
    if let Some(seed) = args.seed {
        contract.seed = seed;
    }
    contract.dim_bindings.extend(args.bindings.iter().cloned());

    contract.validate()?;
    Ok(contract)
}

/// The verifier assumes a provisioned runtime; refuse artifacts nothing here can load.
fn ensure_supported(loader: &dyn ArtifactLoader, path: &Path) -> Result<(), VerifyError> {
    if loader.supports(path) {
        return Ok(());
    }
    let supported: Vec<String> = loader
        .extensions()
        .iter()
        .map(|ext| format!(".{}", ext))
        .collect();
    Err(VerifyError::Setup {
        path: path.to_path_buf(),
        reason: format!(
            "no {} runtime for this artifact type (supported: {}); convert the model first",
            loader.name(),
            supported.join(", ")
        ),
    })
}

fn print_reports(reports: &[VerificationReport], json: bool) -> anyhow::Result<()> {
    if json {
        match reports {
            [report] => println!("{}", report.to_json()?),
            _ => println!("{}", serde_json::to_string_pretty(reports)?),
        }
    } else {
        for report in reports {
            print!("{}", report);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Cli::parse();

    let level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let contract = build_contract(&args)?;
    let loader: Arc<dyn ArtifactLoader> = Arc::new(RtenLoader);
    for path in &args.artifacts {
        ensure_supported(loader.as_ref(), path)?;
    }

    let labels = contract
        .labels_path
        .as_deref()
        .map(read_labels)
        .transpose()?;
    let mut context = VerifyContext::new(Verifier::new(loader), contract);
    if let Some(labels) = labels {
        context = context.with_labels(labels);
    }
    let pipeline = VerificationPipeline::standard(!args.skip_smoke);

    if let [path] = args.artifacts.as_slice() {
        // Load and inspection errors end the run here with a non-zero status.
        let report = pipeline.run(path, &context)?;
        print_reports(std::slice::from_ref(&report), args.json)?;
        return Ok(if report.is_fatal() {
            ExitCode::FAILURE
        } else {
            ExitCode::SUCCESS
        });
    }

    let items = verify_many(Arc::new(pipeline), Arc::new(context), args.artifacts.clone()).await;
    let mut failed = false;
    let mut reports = Vec::with_capacity(items.len());
    for item in items {
        match item.result {
            Ok(report) => {
                failed |= report.is_fatal();
                reports.push(report);
            }
            Err(err) => {
                error!("{}", err);
                failed = true;
            }
        }
    }
    print_reports(&reports, args.json)?;

    Ok(if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}
