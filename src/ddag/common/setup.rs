use std::ffi::OsString;
use std::io::Write;

use clap::{Arg, ArgMatches, Command};
use env_logger::{Builder, Env};

use crate::ddag::common::error::{DagError, Result};
use crate::ddag::inference::EliminationSchedule;
use crate::graph::dag::Node;

/// The query the user asked for.
#[derive(Clone, Debug, PartialEq)]
pub enum CliCommand {
    Marginal {
        nodes: Vec<Node>,
    },
    Conditional {
        marginal: Vec<Node>,
        cond: Vec<Node>,
        sampled: bool,
    },
    Sample {
        n: usize,
    },
    Intervene {
        node: Node,
        value: i64,
        query: Vec<Node>,
    },
    Fit {
        data: String,
        method: String,
        output: Option<String>,
    },
}

/// These options define the inputs from the user.
#[derive(Clone, Debug, PartialEq)]
pub struct CommandLineOptions {
    pub network: String,
    pub schedule: Option<EliminationSchedule>,
    pub seed: Option<u64>,
    pub command: CliCommand,
}

pub fn init_logging() {
    Builder::from_env(Env::default().default_filter_or("info"))
        .format(|buf, record| {
            let file = record.file().unwrap_or("unknown");
            let line = record.line().unwrap_or(0);
            writeln!(
                buf,
                "{} [{}:{}] {}",
                record.level(),
                file,
                line,
                record.args()
            )
        })
        .init();
}

/// Parses `"0,2, 3"` into node ids. An empty string is the empty list.
pub fn parse_node_list(raw: &str) -> Result<Vec<Node>> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<Node>()
                .map_err(|_| DagError::InvalidData(format!("'{}' is not a node id", part)))
        })
        .collect()
}

fn node_list_arg(name: &'static str, help: &'static str) -> Arg {
    Arg::new(name)
        .long(name)
        .value_name("NODES")
        .help(help)
        .default_value("")
}

fn build_command() -> Command {
    Command::new("BAYESDAG")
        .version("0.1")
        .about("Exact inference, sampling and fitting for discrete Bayesian networks.")
        .subcommand_required(true)
        .arg(
            Arg::new("network")
                .long("network")
                .value_name("FILE")
                .help("Network JSON file (written by `fit --output` or by hand)")
                .required(true),
        )
        .arg(
            Arg::new("schedule")
                .long("schedule")
                .value_name("STRING")
                .help("Variable elimination schedule: 'insertion' or 'node'"),
        )
        .arg(
            Arg::new("seed")
                .long("seed")
                .value_name("NUMBER")
                .help("Seed for the random number generator (optional)"),
        )
        .subcommand(
            Command::new("marginal")
                .about("Joint marginal of a set of nodes")
                .arg(node_list_arg("nodes", "Comma separated node ids")),
        )
        .subcommand(
            Command::new("conditional")
                .about("Conditional of marginal nodes given conditioning nodes")
                .arg(node_list_arg("marginal", "Comma separated node ids"))
                .arg(node_list_arg("cond", "Comma separated conditioning node ids"))
                .arg(
                    Arg::new("sampled")
                        .long("sampled")
                        .help("Estimate by importance sampling instead of exact elimination")
                        .action(clap::ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("sample").about("Ancestral samples").arg(
                Arg::new("n")
                    .long("n")
                    .value_name("NUMBER")
                    .help("Number of samples")
                    .default_value("10"),
            ),
        )
        .subcommand(
            Command::new("intervene")
                .about("Marginals under a hard intervention")
                .arg(Arg::new("node").long("node").value_name("NODE").required(true))
                .arg(
                    Arg::new("value")
                        .long("value")
                        .value_name("VALUE")
                        .allow_negative_numbers(true)
                        .required(true),
                )
                .arg(node_list_arg("query", "Comma separated node ids to report")),
        )
        .subcommand(
            Command::new("fit")
                .about("Fit the conditionals of the network's graph to data")
                .arg(
                    Arg::new("data")
                        .long("data")
                        .value_name("FILE")
                        .help("JSON array of rows of codes, one column per node")
                        .required(true),
                )
                .arg(
                    Arg::new("method")
                        .long("method")
                        .value_name("STRING")
                        .help("mle, add_one_mle, logistic, random_forest or xgboost")
                        .default_value("mle"),
                )
                .arg(
                    Arg::new("output")
                        .long("output")
                        .value_name("FILE")
                        .help("Where to write the fitted network (optional)"),
                ),
        )
}

fn required<'a>(matches: &'a ArgMatches, name: &str) -> Result<&'a String> {
    matches
        .get_one::<String>(name)
        .ok_or_else(|| DagError::InvalidData(format!("missing argument '{}'", name)))
}

fn parse_number<T: std::str::FromStr>(matches: &ArgMatches, name: &str) -> Result<T> {
    let raw = required(matches, name)?;
    raw.parse()
        .map_err(|_| DagError::InvalidData(format!("{} needs to be an integer, got '{}'", name, raw)))
}

fn options_from_matches(matches: &ArgMatches) -> Result<CommandLineOptions> {
    let network = required(matches, "network")?.to_string();
    let schedule = matches
        .get_one::<String>("schedule")
        .map(|s| s.parse::<EliminationSchedule>())
        .transpose()?;
    let seed = match matches.get_one::<String>("seed") {
        Some(_) => Some(parse_number(matches, "seed")?),
        None => None,
    };

    let command = match matches.subcommand() {
        Some(("marginal", sub)) => CliCommand::Marginal {
            nodes: parse_node_list(required(sub, "nodes")?)?,
        },
        Some(("conditional", sub)) => CliCommand::Conditional {
            marginal: parse_node_list(required(sub, "marginal")?)?,
            cond: parse_node_list(required(sub, "cond")?)?,
            sampled: sub.get_flag("sampled"),
        },
        Some(("sample", sub)) => CliCommand::Sample {
            n: parse_number(sub, "n")?,
        },
        Some(("intervene", sub)) => CliCommand::Intervene {
            node: parse_number(sub, "node")?,
            value: parse_number(sub, "value")?,
            query: parse_node_list(required(sub, "query")?)?,
        },
        Some(("fit", sub)) => CliCommand::Fit {
            data: required(sub, "data")?.to_string(),
            method: required(sub, "method")?.to_string(),
            output: sub.get_one::<String>("output").map(|s| s.to_string()),
        },
        other => {
            return Err(DagError::InvalidData(format!(
                "unknown subcommand {:?}",
                other.map(|(name, _)| name)
            )));
        }
    };

    Ok(CommandLineOptions {
        network,
        schedule,
        seed,
        command,
    })
}

/// Parses an explicit argument list (the first item is the program name).
pub fn parse_args<I, T>(args: I) -> Result<CommandLineOptions>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let matches = build_command()
        .try_get_matches_from(args)
        .map_err(|e| DagError::InvalidData(e.to_string()))?;
    options_from_matches(&matches)
}

pub fn parse_configuration_options() -> Result<CommandLineOptions> {
    let matches = build_command().get_matches();
    options_from_matches(&matches)
}
