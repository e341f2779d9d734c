use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, bail};
use tracing::{error, info};

use email_discriminator::{
    config::Config,
    dataset::{
        Dataset,
        builder::{DatasetBuilder, DirectorySource},
    },
    observability,
    parser::TldrParser,
    store::LocalDatasetStore,
    workflow,
};

const USAGE: &str = "usage:
  email-discriminator parse --input <newsletter.txt>
  email-discriminator ingest --messages <dir> --relevant <subdir> --irrelevant <subdir>
  email-discriminator train
  email-discriminator predict (--input <dataset.jsonl> | --messages <dir> --query <subdir>)";

#[derive(Debug)]
enum Command {
    Parse {
        input: PathBuf,
    },
    Ingest {
        messages: PathBuf,
        relevant: String,
        irrelevant: String,
    },
    Train,
    Predict {
        input: Option<PathBuf>,
        messages: Option<PathBuf>,
        query: Option<String>,
    },
}

#[derive(Debug, Default)]
struct Flags {
    input: Option<PathBuf>,
    messages: Option<PathBuf>,
    relevant: Option<String>,
    irrelevant: Option<String>,
    query: Option<String>,
}

impl Flags {
    fn parse(args: impl IntoIterator<Item = String>) -> anyhow::Result<Self> {
        let mut flags = Self::default();
        let mut args = args.into_iter();
        while let Some(flag) = args.next() {
            let value = args
                .next()
                .with_context(|| format!("missing value for `{flag}`"))?;
            match flag.as_str() {
                "--input" => flags.input = Some(PathBuf::from(value)),
                "--messages" => flags.messages = Some(PathBuf::from(value)),
                "--relevant" => flags.relevant = Some(value),
                "--irrelevant" => flags.irrelevant = Some(value),
                "--query" => flags.query = Some(value),
                other => bail!("unknown flag `{other}`\n{USAGE}"),
            }
        }
        Ok(flags)
    }
}

impl Command {
    fn from_args(mut args: impl Iterator<Item = String>) -> anyhow::Result<Self> {
        let Some(name) = args.next() else {
            bail!("missing command\n{USAGE}");
        };
        let flags = Flags::parse(args)?;
        let command = match name.as_str() {
            "parse" => Self::Parse {
                input: flags.input.context("`parse` requires --input")?,
            },
            "ingest" => Self::Ingest {
                messages: flags.messages.context("`ingest` requires --messages")?,
                relevant: flags.relevant.context("`ingest` requires --relevant")?,
                irrelevant: flags.irrelevant.context("`ingest` requires --irrelevant")?,
            },
            "train" => Self::Train,
            "predict" => {
                if flags.input.is_none() && (flags.messages.is_none() || flags.query.is_none()) {
                    bail!("`predict` requires --input or --messages with --query\n{USAGE}");
                }
                Self::Predict {
                    input: flags.input,
                    messages: flags.messages,
                    query: flags.query,
                }
            }
            other => bail!("unknown command `{other}`\n{USAGE}"),
        };
        Ok(command)
    }
}

fn run(command: Command) -> anyhow::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();

    if let Command::Parse { input } = &command {
        let content = std::fs::read_to_string(input)
            .with_context(|| format!("failed to read {}", input.display()))?;
        for record in TldrParser::new().parse(&content) {
            serde_json::to_writer(&mut out, &record)?;
            writeln!(out)?;
        }
        return Ok(());
    }

    let config = Config::from_env().context("failed to load configuration")?;
    let store = LocalDatasetStore::new(config.data_dir());
    match command {
        Command::Parse { .. } => {}
        Command::Ingest {
            messages,
            relevant,
            irrelevant,
        } => {
            let builder = DatasetBuilder::new(DirectorySource::new(messages), TldrParser::new());
            let dataset = workflow::ingest(&builder, &store, &relevant, &irrelevant)?;
            writeln!(out, "stored {} articles", dataset.len())?;
        }
        Command::Train => {
            let outcome = workflow::train(&config, &store)?;
            serde_json::to_writer_pretty(&mut out, &outcome)?;
            writeln!(out)?;
        }
        Command::Predict {
            input,
            messages,
            query,
        } => {
            let dataset = match (input, messages, query) {
                (Some(input), _, _) => Dataset::read_jsonl(&input)
                    .with_context(|| format!("failed to read {}", input.display()))?,
                (None, Some(messages), Some(query)) => {
                    let builder =
                        DatasetBuilder::new(DirectorySource::new(messages), TldrParser::new());
                    let (dataset, ids) = builder.prediction_dataset(&query)?;
                    info!(messages = ids.len(), "read messages to classify");
                    dataset
                }
                _ => bail!("`predict` requires --input or --messages with --query"),
            };
            let outcome = workflow::predict(&config, &store, dataset)?;
            writeln!(out, "unlabelled: {}", outcome.unlabelled_hash)?;
            writeln!(out, "predicted: {}", outcome.predicted_hash)?;
        }
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    std::panic::set_hook(Box::new(|panic_info| {
        let message = panic_info
            .payload()
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| {
                panic_info
                    .payload()
                    .downcast_ref::<String>()
                    .map(String::as_str)
            })
            .unwrap_or("unknown panic payload");

        if let Some(location) = panic_info.location() {
            error!(
                file = location.file(),
                line = location.line(),
                message,
                "panic occurred"
            );
        } else {
            error!(message, "panic occurred without location information");
        }
    }));

    observability::init().context("failed to initialize tracing")?;
    let command = Command::from_args(std::env::args().skip(1))?;
    run(command).inspect_err(|err| error!(error = %err, "command failed"))
}
