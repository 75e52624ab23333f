use anyhow::{Context, Result};
use clap::Parser;
use tracemodel::call_tree::{group_by_category, group_by_thread, group_by_url, GroupFn};
use tracemodel::cli::{Cli, GroupBy, OutputFormat};
use tracemodel::config::ModelConfig;
use tracemodel::filter::{EventFilter, FilterExpr};
use tracemodel::model::PerformanceModel;
use tracemodel::report::{Report, ReportOptions};
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber; `--debug` enables everything
fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(args: &Cli) -> Result<ModelConfig> {
    match &args.config {
        Some(path) => ModelConfig::from_toml(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => Ok(ModelConfig::default()),
    }
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.debug);

    let config = load_config(&args)?;
    let categories = config.category_map();
    let filters = args
        .filters
        .iter()
        .map(|expr| FilterExpr::from_expr(expr).map(|f| f.into_filter(&categories)))
        .collect::<tracemodel::Result<Vec<Box<dyn EventFilter>>>>()?;

    let text = std::fs::read_to_string(&args.trace)
        .with_context(|| format!("failed to read trace {}", args.trace.display()))?;

    let mut model = PerformanceModel::new(config);
    let count = model
        .add_trace_json(&text)
        .with_context(|| format!("failed to parse trace {}", args.trace.display()))?;
    tracing::debug!(events = count, "loaded trace");
    model.tracing_complete()?;

    let by_category = group_by_category(categories);
    let group_fn: Option<&GroupFn> = match args.group_by {
        GroupBy::None => None,
        GroupBy::Category => Some(&by_category),
        GroupBy::Url => Some(&group_by_url),
        GroupBy::Thread => Some(&group_by_thread),
    };

    let options = ReportOptions {
        selector: args.thread.clone(),
        window: args.window.map(|w| (w.start, w.end)),
        top: args.top,
        filters: &filters,
        group_fn,
    };
    let report = Report::build(&model, &options);

    match args.format {
        OutputFormat::Text => print!("{}", report.render_text()),
        OutputFormat::Json => println!("{}", report.to_json()?),
    }
    Ok(())
}
